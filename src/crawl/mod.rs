// src/crawl/mod.rs
// =============================================================================
// The crawl engine.
//
// Data flow, leaves first:
// - fingerprint: identity of a job, and the set of identities already seen
// - queue: admitted requests waiting for a worker (FIFO)
// - pool: the fixed set of workers, one session each
// - executor: runs one request on one worker, turns the outcome into data
// - events: lifecycle notifications, delivered off the scheduling path
// - policy: retry decisions and domain filtering
// - engine: the facade tying it together (launch, enqueue, on_idle, close)
//
// Jobs can enqueue more jobs from inside their hook (see JobContext), which
// is how a crawl feeds itself.
// =============================================================================

mod engine;
mod events;
mod executor;
mod fingerprint;
mod policy;
mod pool;
mod queue;
mod request;

pub use engine::{Engine, EngineBuilder, EngineStats, JobContext, Lifecycle};
pub use events::{Event, EventKind, EventName};
pub use executor::{ErrorInfo, ExecutionResult, FailureKind, JobStatus};
pub use fingerprint::{canonical_target, Deduplicator, Fingerprint};
pub use policy::{DomainFilter, NoRetry, RetryFailures, RetryPolicy, RetryTimeouts};
pub use request::{hook_fn, Admission, Hook, Job, RequestId, RequestInfo, SkipReason};
