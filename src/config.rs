// src/config.rs
// =============================================================================
// Engine configuration.
//
// Everything has a default, so an empty TOML file is a valid configuration.
// The CLI loads a file first (if given) and then applies its flags on top.
//
// Example:
//
//   concurrency = 4
//   max_depth = 3
//   allowed_domains = ["*.example.com"]
//   delay_ms = 250
//
//   [http]
//   timeout_ms = 5000
//
//   [[exporters]]
//   kind = "csv"
//   path = "out/results.csv"
//   fields = ["request.url", "status", "payload.status", "error.message"]
//
//   [[exporters]]
//   kind = "json_lines"
//   path = "out/results.jsonl"
// =============================================================================

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::export::{CsvExporter, Exporter, JsonLineExporter};
use crate::session::HttpSessionConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of workers, and so of sessions. Must be at least 1.
    pub concurrency: usize,
    /// Skip jobs whose fingerprint was admitted before.
    pub dedupe: bool,
    /// Deepest request admitted; caller jobs are depth 1.
    pub max_depth: Option<usize>,
    /// Total number of requests admitted over the engine's life.
    pub max_requests: Option<usize>,
    pub allowed_domains: Vec<String>,
    pub denied_domains: Vec<String>,
    /// Default per-job timeout.
    pub job_timeout_ms: Option<u64>,
    /// Pause each worker takes after an execution.
    pub delay_ms: u64,
    /// Tries per worker when opening its session at launch.
    pub session_attempts: u32,
    pub exporters: Vec<SinkConfig>,
    pub http: HttpSessionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            dedupe: true,
            max_depth: None,
            max_requests: None,
            allowed_domains: Vec::new(),
            denied_domains: Vec::new(),
            job_timeout_ms: None,
            delay_ms: 0,
            session_attempts: 3,
            exporters: Vec::new(),
            http: HttpSessionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Csv {
        path: PathBuf,
        fields: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },
    JsonLines {
        path: PathBuf,
        #[serde(default)]
        fields: Vec<String>,
    },
}

fn default_separator() -> String {
    ",".to_string()
}

impl SinkConfig {
    pub fn build(&self) -> Box<dyn Exporter> {
        match self {
            SinkConfig::Csv {
                path,
                fields,
                separator,
            } => Box::new(CsvExporter::new(path, fields.clone()).with_separator(separator.clone())),
            SinkConfig::JsonLines { path, fields } => {
                Box::new(JsonLineExporter::new(path).with_fields(fields.clone()))
            }
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency < 1 {
            return Err(invalid("concurrency must be at least 1"));
        }
        if self.session_attempts < 1 {
            return Err(invalid("session_attempts must be at least 1"));
        }
        if self.max_depth == Some(0) {
            return Err(invalid("max_depth must be at least 1"));
        }

        let patterns = self.allowed_domains.iter().chain(&self.denied_domains);
        if patterns.into_iter().any(|p| p.trim().is_empty()) {
            return Err(invalid("domain patterns must not be empty"));
        }

        for sink in &self.exporters {
            match sink {
                SinkConfig::Csv {
                    path,
                    fields,
                    separator,
                } => {
                    if fields.is_empty() {
                        return Err(invalid(format!(
                            "csv exporter {} needs at least one field",
                            path.display()
                        )));
                    }
                    if separator.is_empty() {
                        return Err(invalid(format!(
                            "csv exporter {} has an empty separator",
                            path.display()
                        )));
                    }
                }
                SinkConfig::JsonLines { .. } => {}
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::Configuration(message.into())
}
