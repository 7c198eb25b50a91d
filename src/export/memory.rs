// src/export/memory.rs
// =============================================================================
// Collects results in memory.
//
// The exporter is a cheap handle: keep a clone, hand the other to the
// engine, read the results back after close().
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Exporter;
use crate::crawl::ExecutionResult;
use crate::error::SinkError;

#[derive(Default)]
struct Collected {
    results: Vec<ExecutionResult>,
    opens: usize,
    closes: usize,
}

#[derive(Clone, Default)]
pub struct MemoryExporter {
    inner: Arc<Mutex<Collected>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results received so far, in the order they were written.
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.inner.lock().results.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().results.is_empty()
    }

    pub fn opens(&self) -> usize {
        self.inner.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.inner.lock().closes
    }
}

#[async_trait]
impl Exporter for MemoryExporter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&mut self) -> Result<(), SinkError> {
        self.inner.lock().opens += 1;
        Ok(())
    }

    async fn write(&mut self, result: &ExecutionResult) -> Result<(), SinkError> {
        self.inner.lock().results.push(result.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.inner.lock().closes += 1;
        Ok(())
    }
}
