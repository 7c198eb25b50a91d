// src/error.rs
// =============================================================================
// Error types for the crawl engine.
//
// Only failures that stop the engine from making progress are errors here:
// - EngineError: bad configuration, sessions that cannot be opened, sinks
//   that cannot be opened. These come out of `launch()`.
// - SessionError: what a session driver reports back to a job hook.
// - SinkError: what an exporter reports back to the pipeline.
//
// A failing job is NOT an error at this level. The executor turns it into an
// ExecutionResult with status Failure (see crawl/executor.rs).
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("could not open a session for worker {worker} after {attempts} attempt(s): {source}")]
    ResourceAcquisition {
        worker: usize,
        attempts: u32,
        #[source]
        source: SessionError,
    },

    #[error("exporter '{sink}' failed to open: {source}")]
    Sink {
        sink: String,
        #[source]
        source: SinkError,
    },

    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Failures reported by a session driver.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request timed out")]
    Timeout,

    #[error("could not resolve hostname")]
    Dns,

    #[error("TLS certificate error")]
    Tls,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("the element corresponding to the selector {0} does not exist")]
    ElementNotFound(String),

    #[error("cannot {action} element matched by {selector}")]
    Unsupported { action: &'static str, selector: String },

    #[error("no page loaded, navigate first")]
    NoPage,

    #[error("failed to open session: {0}")]
    Open(String),
}

/// Failures reported by an exporter sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sink is not open")]
    NotOpen,
}

pub type Result<T> = std::result::Result<T, EngineError>;
