// src/export/csv.rs
// =============================================================================
// Delimited-text exporter.
//
// Columns are dotted paths into the JSON form of an ExecutionResult, for
// example `request.url`, `status`, `payload.title`, `error.message`.
//
// Cell rules:
// - null or missing -> empty
// - strings as-is, numbers and booleans as written by serde_json
// - objects and arrays as compact JSON
// - a cell containing the separator, a quote, CR or LF is wrapped in quotes
//   with inner quotes doubled
// =============================================================================

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

use super::{lookup, Exporter};
use crate::crawl::ExecutionResult;
use crate::error::SinkError;

pub struct CsvExporter {
    name: String,
    path: PathBuf,
    fields: Vec<String>,
    separator: String,
    writer: Option<BufWriter<File>>,
}

impl CsvExporter {
    pub fn new(path: impl Into<PathBuf>, fields: Vec<String>) -> Self {
        let path = path.into();
        Self {
            name: format!("csv:{}", path.display()),
            path,
            fields,
            separator: ",".to_string(),
            writer: None,
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    fn row(&self, cells: impl Iterator<Item = String>) -> String {
        let mut line = cells
            .map(|cell| escape(&cell, &self.separator))
            .collect::<Vec<_>>()
            .join(&self.separator);
        line.push('\n');
        line
    }
}

#[async_trait]
impl Exporter for CsvExporter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut writer = BufWriter::new(File::create(&self.path).await?);
        let header = self.row(self.fields.iter().cloned());
        writer.write_all(header.as_bytes()).await?;
        self.writer = Some(writer);
        Ok(())
    }

    async fn write(&mut self, result: &ExecutionResult) -> Result<(), SinkError> {
        let value = serde_json::to_value(result)?;
        let line = self.row(self.fields.iter().map(|field| cell(lookup(&value, field))));
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

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape(cell: &str, separator: &str) -> String {
    let needs_quotes = cell.contains(separator)
        || cell.contains('"')
        || cell.contains('\n')
        || cell.contains('\r');
    if needs_quotes {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::memory::tests::sample;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain", ","), "plain");
        assert_eq!(escape("a,b", ","), "\"a,b\"");
        assert_eq!(escape("a,b", ";"), "a,b");
        assert_eq!(escape("say \"hi\"", ","), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("two\nlines", ","), "\"two\nlines\"");
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(cell(None), "");
        assert_eq!(cell(Some(&Value::Null)), "");
        assert_eq!(cell(Some(&json!("text"))), "text");
        assert_eq!(cell(Some(&json!(3))), "3");
        assert_eq!(cell(Some(&json!(true))), "true");
        assert_eq!(cell(Some(&json!({"a": 1}))), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.csv");
        let fields = vec![
            "request.url".to_string(),
            "status".to_string(),
            "payload.title".to_string(),
            "error.message".to_string(),
        ];
        let mut sink = CsvExporter::new(&path, fields);

        sink.open().await.unwrap();
        let mut result = sample("https://a.test/?q=1,2");
        result.payload = Some(json!({"title": "Say \"hi\""}));
        sink.write(&result).await.unwrap();
        sink.close().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "request.url,status,payload.title,error.message\n\
             \"https://a.test/?q=1,2\",success,\"Say \"\"hi\"\"\",\n"
        );
    }

    #[tokio::test]
    async fn test_write_before_open_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvExporter::new(dir.path().join("x.csv"), vec!["status".to_string()]);
        let err = sink.write(&sample("https://a.test/")).await.unwrap_err();
        assert!(matches!(err, SinkError::NotOpen));
    }

    #[tokio::test]
    async fn test_custom_separator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.tsv");
        let mut sink = CsvExporter::new(&path, vec!["request.depth".to_string(), "status".to_string()])
            .with_separator("\t");
        sink.open().await.unwrap();
        sink.write(&sample("https://a.test/")).await.unwrap();
        sink.close().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "request.depth\tstatus\n1\tsuccess\n");
    }
}
