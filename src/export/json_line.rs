// src/export/json_line.rs
// =============================================================================
// Line-delimited JSON exporter: one ExecutionResult per line.
//
// With no fields configured every line is the full result. Otherwise each
// line keeps only the listed dotted paths, nested the way they were found.
// =============================================================================

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

use super::{project, Exporter};
use crate::crawl::ExecutionResult;
use crate::error::SinkError;

pub struct JsonLineExporter {
    name: String,
    path: PathBuf,
    fields: Vec<String>,
    writer: Option<BufWriter<File>>,
}

impl JsonLineExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("json_lines:{}", path.display()),
            path,
            fields: Vec::new(),
            writer: None,
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }
}

#[async_trait]
impl Exporter for JsonLineExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        self.writer = Some(BufWriter::new(File::create(&self.path).await?));
        Ok(())
    }

    async fn write(&mut self, result: &ExecutionResult) -> Result<(), SinkError> {
        let mut line = if self.fields.is_empty() {
            serde_json::to_string(result)?
        } else {
            let value = serde_json::to_value(result)?;
            project(&value, &self.fields).to_string()
        };
        line.push('\n');

        let writer = self.writer.as_mut().ok_or(SinkError::NotOpen)?;
        writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.get_ref().sync_all().await?;
        }
        Ok(())
    }
}
