// src/crawl/request.rs
// =============================================================================
// Jobs, hooks and requests.
//
// - Job: what a caller (or a running hook) hands to `enqueue`
// - Hook: the caller-supplied work, run with a session and a JobContext
// - Request: a job once admitted; immutable from then on
// - RequestInfo: the serialisable view of a request carried by events and
//   results
// =============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::engine::JobContext;
use super::fingerprint::Fingerprint;
use crate::session::Session;

/// The work a job performs.
///
/// A hook receives exclusive use of one worker's session for the duration of
/// the call, plus a [`JobContext`] through which it can enqueue follow-on
/// jobs. Returning `Err` marks the job as failed; the error never leaves the
/// executor.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, session: &mut dyn Session, ctx: JobContext) -> anyhow::Result<Value>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: for<'a> Fn(&'a mut dyn Session, JobContext) -> BoxFuture<'a, anyhow::Result<Value>>
        + Send
        + Sync,
{
    async fn run(&self, session: &mut dyn Session, ctx: JobContext) -> anyhow::Result<Value> {
        (self.0)(session, ctx).await
    }
}

/// Wraps a closure as a hook.
///
/// ```ignore
/// let hook = hook_fn(|session, ctx| Box::pin(async move {
///     let page = session.navigate(ctx.url()).await?;
///     Ok(serde_json::json!({ "title": page.title }))
/// }));
/// ```
pub fn hook_fn<F>(f: F) -> Arc<dyn Hook>
where
    F: for<'a> Fn(&'a mut dyn Session, JobContext) -> BoxFuture<'a, anyhow::Result<Value>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHook(f))
}

/// A job description handed to `enqueue`.
#[derive(Clone)]
pub struct Job {
    pub(crate) url: String,
    pub(crate) payload: Option<Value>,
    pub(crate) hook: Arc<dyn Hook>,
    pub(crate) retries: u32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) depth: usize,
}

impl Job {
    pub fn new(url: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
        Self {
            url: url.into(),
            payload: None,
            hook,
            retries: 0,
            timeout: None,
            depth: 1,
        }
    }

    /// Extra data that distinguishes this job from others on the same URL.
    /// It takes part in the fingerprint.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// How many extra attempts the retry policy may grant.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Overrides the engine-wide job timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Depth of a caller-level job. Jobs enqueued from a hook always get
    /// their parent's depth plus one.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.url, self.payload.as_ref())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("url", &self.url)
            .field("payload", &self.payload)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// Identity of an admitted request, unique per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The serialisable part of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub id: RequestId,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub depth: usize,
    pub fingerprint: Fingerprint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<RequestId>,
}

/// An admitted job.
pub(crate) struct Request {
    pub info: RequestInfo,
    pub hook: Arc<dyn Hook>,
    pub retries: u32,
    pub timeout: Option<Duration>,
    /// 1 for the first execution, incremented on every retry.
    pub attempt: u32,
}

impl Request {
    pub fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// Why `enqueue` declined a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The fingerprint was admitted before.
    Duplicate,
    /// Deeper than `max_depth`.
    DepthExceeded,
    /// Blocked by the domain filter.
    Disallowed,
    /// `max_requests` jobs were already admitted.
    MaxRequests,
    /// The engine is draining or closed.
    Closed,
    /// Queued, but thrown away when the engine started draining.
    Discarded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::Duplicate => "duplicate",
            SkipReason::DepthExceeded => "depth exceeded",
            SkipReason::Disallowed => "disallowed",
            SkipReason::MaxRequests => "max requests reached",
            SkipReason::Closed => "engine closed",
            SkipReason::Discarded => "discarded",
        };
        f.write_str(text)
    }
}

/// Outcome of `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued(RequestId),
    Skipped(SkipReason),
}

impl Admission {
    pub fn is_queued(&self) -> bool {
        matches!(self, Admission::Queued(_))
    }
}
