// src/lib.rs
// =============================================================================
// crawl-pool: a concurrent crawl engine.
//
// Many independent jobs, each driving a remote session (navigate, click,
// type, evaluate), run under a fixed concurrency ceiling. Jobs are
// deduplicated by fingerprint, can enqueue follow-on jobs from inside their
// hook, and every finished result is forwarded to a set of exporters.
//
// Typical use:
//
//   let engine = Engine::builder(HttpSessionFactory::new(&config.http)?)
//       .config(config)
//       .exporter(MemoryExporter::new())
//       .launch()
//       .await?;
//   engine.enqueue(Job::new("https://example.com/", jobs::site_crawl()));
//   engine.on_idle().await;
//   engine.close().await;
//
// Modules:
// - crawl: the engine (queue, pool, executor, events, lifecycle)
// - session: the session driver capability and two drivers
// - export: result sinks
// - jobs: ready-made hooks used by the CLI
// - config, error, logging: the ambient parts
// =============================================================================

pub mod config;
pub mod crawl;
pub mod error;
pub mod export;
pub mod jobs;
pub mod logging;
pub mod session;

pub use config::{EngineConfig, SinkConfig};
pub use crawl::{
    hook_fn, Admission, Engine, EngineBuilder, EngineStats, Event, EventKind, EventName,
    ExecutionResult, Hook, Job, JobContext, JobStatus, Lifecycle, SkipReason,
};
pub use error::{EngineError, SessionError, SinkError};
pub use export::{CsvExporter, Exporter, JsonLineExporter, MemoryExporter};
pub use session::{HttpSessionFactory, MockSessionFactory, Session, SessionFactory};
