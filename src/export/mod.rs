// src/export/mod.rs
// =============================================================================
// Result exporters.
//
// Every finished ExecutionResult is forwarded to each configured sink. A
// sink has three phases:
// - open():  once, at launch (write a header, create the file)
// - write(): once per result, in completion order
// - close(): once, at shutdown (flush to disk)
//
// Each sink runs on its own task behind its own unbounded channel. The
// scheduler only ever pushes into channels, so a slow disk never delays
// dispatch, and a sink that fails a write just logs it and keeps going.
//
// Submodules:
// - csv: delimited text with a header row
// - json_line: one JSON object per line
// - memory: keeps results in memory (tests, the CLI summary)
// =============================================================================

mod csv;
mod json_line;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::crawl::ExecutionResult;
use crate::error::{EngineError, SinkError};

pub use self::csv::CsvExporter;
pub use self::json_line::JsonLineExporter;
pub use self::memory::MemoryExporter;

/// A consumer of finished results.
#[async_trait]
pub trait Exporter: Send {
    /// Used in log lines and launch errors.
    fn name(&self) -> &str;

    async fn open(&mut self) -> Result<(), SinkError>;

    async fn write(&mut self, result: &ExecutionResult) -> Result<(), SinkError>;

    async fn close(&mut self) -> Result<(), SinkError>;
}

struct SinkHandle {
    name: String,
    tx: UnboundedSender<Arc<ExecutionResult>>,
    task: JoinHandle<()>,
}

pub(crate) struct ExportPipeline {
    sinks: Vec<SinkHandle>,
}

impl ExportPipeline {
    /// Opens every exporter, in order. If one fails, the ones already open
    /// are closed again and the failure is returned.
    pub async fn open(
        exporters: Vec<Box<dyn Exporter>>,
        runtime: &Handle,
    ) -> Result<Self, EngineError> {
        let mut opened: Vec<Box<dyn Exporter>> = Vec::with_capacity(exporters.len());

        for mut exporter in exporters {
            if let Err(source) = exporter.open().await {
                for mut done in opened {
                    if let Err(e) = done.close().await {
                        warn!(sink = done.name(), error = %e, "failed to close exporter");
                    }
                }
                return Err(EngineError::Sink {
                    sink: exporter.name().to_string(),
                    source,
                });
            }
            debug!(sink = exporter.name(), "exporter opened");
            opened.push(exporter);
        }

        let sinks = opened
            .into_iter()
            .map(|exporter| {
                let (tx, rx) = mpsc::unbounded_channel();
                let name = exporter.name().to_string();
                let task = runtime.spawn(drain(exporter, rx));
                SinkHandle { name, tx, task }
            })
            .collect();

        Ok(Self { sinks })
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Queues `result` for every sink. Never blocks.
    pub fn forward(&self, result: &Arc<ExecutionResult>) {
        for sink in &self.sinks {
            if sink.tx.send(Arc::clone(result)).is_err() {
                warn!(sink = %sink.name, request = %result.request.id, "exporter is gone, result dropped");
            }
        }
    }

    /// Waits for every sink to write what it was sent, then closes them.
    pub async fn close(self) {
        for sink in self.sinks {
            let SinkHandle { name, tx, task } = sink;
            drop(tx);
            if let Err(e) = task.await {
                warn!(sink = %name, error = %e, "exporter task failed");
            }
        }
    }
}

async fn drain(mut exporter: Box<dyn Exporter>, mut rx: UnboundedReceiver<Arc<ExecutionResult>>) {
    while let Some(result) = rx.recv().await {
        if let Err(e) = exporter.write(&result).await {
            warn!(
                sink = exporter.name(),
                request = %result.request.id,
                error = %e,
                "exporter failed to write result"
            );
        }
    }

    match exporter.close().await {
        Ok(()) => debug!(sink = exporter.name(), "exporter closed"),
        Err(e) => warn!(sink = exporter.name(), error = %e, "failed to close exporter"),
    }
}

/// Looks up a dotted path (`request.url`, `payload.items.0`) in a value.
/// Numeric segments index into arrays.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Keeps only `fields` of `value`, rebuilding the nesting of dotted paths.
/// Paths that do not resolve are left out.
pub(crate) fn project(value: &Value, fields: &[String]) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(found) = lookup(value, field) {
            insert_path(&mut out, field, found.clone());
        }
    }
    Value::Object(out)
}

fn insert_path(out: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            out.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_lookup_dotted_paths() {
        let value = json!({"request": {"url": "https://a.test/"}, "payload": {"items": [10, 20]}});
        assert_eq!(lookup(&value, "request.url"), Some(&json!("https://a.test/")));
        assert_eq!(lookup(&value, "payload.items.1"), Some(&json!(20)));
        assert_eq!(lookup(&value, "payload.items.9"), None);
        assert_eq!(lookup(&value, "request.url.host"), None);
        assert_eq!(lookup(&value, "missing"), None);
    }

    #[test]
    fn test_project_rebuilds_nesting() {
        let value = json!({
            "status": "success",
            "request": {"id": 1, "url": "https://a.test/", "depth": 2},
            "payload": {"title": "Home"}
        });
        let fields = vec![
            "request.url".to_string(),
            "status".to_string(),
            "payload.title".to_string(),
            "payload.nope".to_string(),
        ];
        assert_eq!(
            project(&value, &fields),
            json!({
                "request": {"url": "https://a.test/"},
                "status": "success",
                "payload": {"title": "Home"}
            })
        );
    }

    #[tokio::test]
    async fn test_failed_open_closes_earlier_sinks() {
        let first = MemoryExporter::new();
        let exporters: Vec<Box<dyn Exporter>> = vec![Box::new(first.clone()), Box::new(Broken)];

        let err = ExportPipeline::open(exporters, &Handle::current())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, EngineError::Sink { ref sink, .. } if sink == "broken"));
        assert_eq!(first.opens(), 1);
        assert_eq!(first.closes(), 1);
    }

    #[tokio::test]
    async fn test_write_errors_do_not_stop_other_sinks() {
        let memory = MemoryExporter::new();
        let exporters: Vec<Box<dyn Exporter>> =
            vec![Box::new(FailsWrites), Box::new(memory.clone())];
        let pipeline = ExportPipeline::open(exporters, &Handle::current())
            .await
            .unwrap();
        assert_eq!(pipeline.len(), 2);

        pipeline.forward(&Arc::new(memory::tests::sample("https://a.test/1")));
        pipeline.forward(&Arc::new(memory::tests::sample("https://a.test/2")));
        pipeline.close().await;

        assert_eq!(memory.len(), 2);
        assert_eq!(memory.closes(), 1);
    }

    struct Broken;

    #[async_trait]
    impl Exporter for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn open(&mut self) -> Result<(), SinkError> {
            Err(SinkError::NotOpen)
        }

        async fn write(&mut self, _result: &ExecutionResult) -> Result<(), SinkError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct FailsWrites;

    #[async_trait]
    impl Exporter for FailsWrites {
        fn name(&self) -> &str {
            "fails-writes"
        }

        async fn open(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn write(&mut self, _result: &ExecutionResult) -> Result<(), SinkError> {
            Err(SinkError::NotOpen)
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }
}
