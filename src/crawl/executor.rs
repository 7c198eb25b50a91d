// src/crawl/executor.rs
// =============================================================================
// The session executor: runs one request on one worker.
//
// Steps:
// 1. The caller hands over the worker, so the session is ours alone
// 2. Invoke the request's hook with the session and a JobContext
// 3. Turn whatever happens into an ExecutionResult:
//    - Ok(payload)       -> Success
//    - Err(error)        -> Failure (kind = hook), with the full error chain
//    - the hook panicked -> Failure (kind = panic)
//    - time ran out      -> Failure (kind = timeout)
//
// Nothing a hook does can escape this function. Publishing the result and
// releasing the worker happen in engine.rs, on every path.
// =============================================================================

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::engine::JobContext;
use super::pool::Worker;
use super::request::{Request, RequestInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The hook returned an error.
    Hook,
    /// The hook did not finish within its timeout.
    Timeout,
    /// The hook panicked.
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: FailureKind,
    pub message: String,
    /// Error chain or panic location, when there is more to say than the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The outcome of one execution. Never changes after it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request: RequestInfo,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub worker: usize,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    pub fn is_timeout(&self) -> bool {
        matches!(&self.error, Some(error) if error.kind == FailureKind::Timeout)
    }
}

pub(crate) async fn execute(
    request: &Request,
    worker: &mut Worker,
    ctx: JobContext,
) -> ExecutionResult {
    let started_at = Utc::now();
    let worker_id = worker.id();
    let hook = request.hook.clone();

    let run = AssertUnwindSafe(hook.run(worker.session_mut(), ctx)).catch_unwind();
    let outcome = match request.timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(finished) => finished,
            Err(_) => Ok(Err(Elapsed(limit).into())),
        },
        None => run.await,
    };

    let (status, payload, error) = match outcome {
        Ok(Ok(payload)) => (JobStatus::Success, Some(payload), None),
        Ok(Err(e)) => {
            let kind = if e.is::<Elapsed>() {
                FailureKind::Timeout
            } else {
                FailureKind::Hook
            };
            let chain = format!("{e:?}");
            let message = e.to_string();
            let detail = (chain != message).then_some(chain);
            (JobStatus::Failure, None, Some(ErrorInfo { kind, message, detail }))
        }
        Err(panic) => (
            JobStatus::Failure,
            None,
            Some(ErrorInfo {
                kind: FailureKind::Panic,
                message: panic_message(panic.as_ref()),
                detail: None,
            }),
        ),
    };

    let finished_at = Utc::now();
    ExecutionResult {
        request: request.info.clone(),
        status,
        payload,
        error,
        worker: worker_id,
        attempt: request.attempt,
        started_at,
        finished_at,
        duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
    }
}

#[derive(Debug, thiserror::Error)]
#[error("job timed out after {}ms", .0.as_millis())]
struct Elapsed(Duration);

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("hook panicked: {text}")
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("hook panicked: {text}")
    } else {
        "hook panicked".to_string()
    }
}
