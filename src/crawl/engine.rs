// src/crawl/engine.rs
// =============================================================================
// The lifecycle controller and the scheduling loop.
//
// Lifecycle: (EngineBuilder) -> Launched -> Draining -> Closed
//
// How scheduling works:
// 1. All mutable scheduling state (queue, pool, dedup set, counters) lives in
//    one `Scheduler` behind one mutex
// 2. `enqueue` admits a job under the lock, then runs `pump`
// 3. `pump` matches idle workers to queued requests. It never suspends: it
//    moves the worker and the request into a freshly spawned task and goes on
// 4. When a task finishes it takes the lock again, publishes the result,
//    releases the worker and runs `pump` once more
//
// So "the scheduling loop" is not a task of its own. It runs wherever the
// state changes, which is every enqueue and every completion. A freed worker
// picks up the next request before the lock is even released.
//
// Idle means: nothing queued and nothing running. It is tracked as an edge
// (`was_idle`) so the idle event fires exactly once per transition.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use super::events::{Event, EventBus, EventKind, EventName};
use super::executor::{self, ExecutionResult};
use super::fingerprint::Deduplicator;
use super::policy::{DomainFilter, NoRetry, RetryPolicy};
use super::pool::{Worker, WorkerPool};
use super::queue::RequestQueue;
use super::request::{Admission, Job, Request, RequestId, RequestInfo, SkipReason};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::export::{ExportPipeline, Exporter};
use crate::session::SessionFactory;

/// Where an [`Engine`] is in its life. The created stage is the
/// [`EngineBuilder`]: an `Engine` only exists once it has launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Launched,
    Draining,
    Closed,
}

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub admitted: usize,
    pub skipped: usize,
    /// Queued requests thrown away by `close()`.
    pub discarded: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retried: usize,
    /// Highest number of simultaneously busy workers seen.
    pub peak_active: usize,
}

// Where an enqueue came from. Only hooks may add work while draining.
#[derive(Debug, Clone, Copy)]
enum Origin {
    Caller,
    Hook { parent: RequestId, depth: usize },
}

struct Limits {
    max_depth: Option<usize>,
    max_requests: Option<usize>,
    job_timeout: Option<Duration>,
    delay: Duration,
}

struct Scheduler {
    lifecycle: Lifecycle,
    paused: bool,
    queue: RequestQueue,
    pool: WorkerPool,
    dedup: Deduplicator,
    pipeline: Option<ExportPipeline>,
    next_id: u64,
    was_idle: bool,
    // Set once shutdown has taken the workers; nothing is admitted after it.
    drained: bool,
    stats: EngineStats,
}

impl Scheduler {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.pool.active() == 0
    }
}

pub(crate) struct Shared {
    state: Mutex<Scheduler>,
    // Workers handed back by a dropped lease that could not take `state`.
    // Never locked while waiting for `state`.
    orphans: Mutex<Vec<Worker>>,
    events: EventBus,
    factory: Arc<dyn SessionFactory>,
    retry: Box<dyn RetryPolicy>,
    filter: DomainFilter,
    limits: Limits,
    // Bumped on every transition into idle.
    idle_tx: watch::Sender<u64>,
    runtime: Handle,
    closing: OnceCell<()>,
}

impl Shared {
    fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }
}

/// A running crawl engine.
///
/// Created with [`Engine::builder`] or [`Engine::launch`]. Must be shut down
/// with [`Engine::close`], which is the only way sessions and exporters are
/// released.
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn builder<F>(factory: F) -> EngineBuilder
    where
        F: SessionFactory + 'static,
    {
        EngineBuilder {
            factory: Arc::new(factory),
            config: EngineConfig::default(),
            exporters: Vec::new(),
            retry: Box::new(NoRetry),
        }
    }

    /// Launches an engine from a configuration, with no extra exporters and
    /// the default retry policy.
    pub async fn launch<F>(config: EngineConfig, factory: F) -> Result<Self>
    where
        F: SessionFactory + 'static,
    {
        Engine::builder(factory).config(config).launch().await
    }

    /// Offers a job for admission. Skipped jobs are reported, not errors.
    pub fn enqueue(&self, job: Job) -> Admission {
        admit(&self.shared, job, Origin::Caller)
    }

    /// Calls `listener` for every event called `name`. Listeners run on their
    /// own task, so a slow one never holds up dispatch.
    pub fn on<F>(&self, name: EventName, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.events.on(name, listener);
    }

    /// Receives every event published from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<Arc<Event>> {
        self.shared.events.subscribe()
    }

    /// Resolves once nothing is queued and nothing is running. Returns at
    /// once when that is already the case.
    ///
    /// Results are handed to exporters before the engine turns idle, but
    /// sinks write on their own tasks; `close()` is what flushes them.
    pub async fn on_idle(&self) {
        wait_idle(&self.shared).await;
    }

    /// Stops admitting caller jobs, discards the queue, waits for running
    /// jobs (and any follow-ons they enqueue) to finish, then releases every
    /// session and closes every exporter. Calling it again does nothing.
    pub async fn close(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared
            .closing
            .get_or_init(|| async move { shutdown(&shared).await })
            .await;
    }

    /// Stops dispatching. Running jobs carry on.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            state.paused = true;
            info!("engine paused");
        }
    }

    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if state.paused {
            state.paused = false;
            info!("engine resumed");
            pump(&self.shared, &mut state);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    pub fn state(&self) -> Lifecycle {
        self.shared.state.lock().lifecycle
    }

    pub fn pending_queue_size(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn active_count(&self) -> usize {
        self.shared.state.lock().pool.active()
    }

    /// Total number of requests admitted so far.
    pub fn requested_count(&self) -> usize {
        self.shared.state.lock().stats.admitted
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.state.lock().stats
    }

    pub fn concurrency(&self) -> usize {
        self.shared.state.lock().pool.ceiling()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let state = self.shared.state.lock();
        if state.lifecycle == Lifecycle::Launched {
            warn!("engine dropped without close(), sessions were not released");
        }
    }
}

/// Configures and launches an [`Engine`].
pub struct EngineBuilder {
    factory: Arc<dyn SessionFactory>,
    config: EngineConfig,
    exporters: Vec<Box<dyn Exporter>>,
    retry: Box<dyn RetryPolicy>,
}

impl EngineBuilder {
    /// Replaces the whole configuration. Sinks listed in it are built at
    /// launch, ahead of any added with [`EngineBuilder::exporter`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, ceiling: usize) -> Self {
        self.config.concurrency = ceiling;
        self
    }

    pub fn dedupe(mut self, enabled: bool) -> Self {
        self.config.dedupe = enabled;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = Some(depth);
        self
    }

    pub fn max_requests(mut self, count: usize) -> Self {
        self.config.max_requests = Some(count);
        self
    }

    /// Default timeout for jobs that do not set their own.
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.config.job_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Pause each worker takes after every execution.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn exporter<E>(mut self, exporter: E) -> Self
    where
        E: Exporter + 'static,
    {
        self.exporters.push(Box::new(exporter));
        self
    }

    pub fn retry_policy<P>(mut self, policy: P) -> Self
    where
        P: RetryPolicy + 'static,
    {
        self.retry = Box::new(policy);
        self
    }

    /// Validates the configuration, opens one session per worker and opens
    /// every exporter. Nothing is left running when this fails.
    pub async fn launch(self) -> Result<Engine> {
        let EngineBuilder {
            factory,
            config,
            exporters: extra,
            retry,
        } = self;

        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            EngineError::Configuration("launch() must run inside a tokio runtime".to_string())
        })?;
        let filter = DomainFilter::new(&config.allowed_domains, &config.denied_domains)?;

        let mut exporters: Vec<Box<dyn Exporter>> =
            config.exporters.iter().map(|sink| sink.build()).collect();
        exporters.extend(extra);

        let mut pool =
            WorkerPool::start(factory.as_ref(), config.concurrency, config.session_attempts)
                .await?;

        let pipeline = match ExportPipeline::open(exporters, &runtime).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                close_sessions(factory.as_ref(), pool.take_idle()).await;
                return Err(e);
            }
        };

        let (idle_tx, _) = watch::channel(0u64);
        let sinks = pipeline.len();
        let scheduler = Scheduler {
            lifecycle: Lifecycle::Launched,
            paused: false,
            queue: RequestQueue::new(),
            pool,
            dedup: Deduplicator::new(config.dedupe),
            pipeline: Some(pipeline),
            next_id: 0,
            was_idle: true,
            drained: false,
            stats: EngineStats::default(),
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(scheduler),
            orphans: Mutex::new(Vec::new()),
            events: EventBus::new(runtime.clone()),
            factory,
            retry,
            filter,
            limits: Limits {
                max_depth: config.max_depth,
                max_requests: config.max_requests,
                job_timeout: config.job_timeout_ms.map(Duration::from_millis),
                delay: Duration::from_millis(config.delay_ms),
            },
            idle_tx,
            runtime,
            closing: OnceCell::new(),
        });

        info!(
            concurrency = config.concurrency,
            dedupe = config.dedupe,
            exporters = sinks,
            "engine launched"
        );
        Ok(Engine { shared })
    }
}

/// What a running hook gets besides its session.
///
/// Carries the request being executed and the capability to enqueue
/// follow-on jobs into the same engine. Follow-ons get the current depth
/// plus one, and are still accepted while the engine drains.
#[derive(Clone)]
pub struct JobContext {
    shared: Arc<Shared>,
    request: RequestInfo,
    attempt: u32,
}

impl JobContext {
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    pub fn payload(&self) -> Option<&Value> {
        self.request.payload.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.request.depth
    }

    /// 1 on the first execution, higher on retries.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn enqueue(&self, job: Job) -> Admission {
        let origin = Origin::Hook {
            parent: self.request.id,
            depth: self.request.depth + 1,
        };
        admit(&self.shared, job, origin)
    }
}

fn admit(shared: &Arc<Shared>, job: Job, origin: Origin) -> Admission {
    let mut state = shared.state.lock();

    let (depth, parent) = match origin {
        Origin::Caller => (job.depth, None),
        Origin::Hook { parent, depth } => (depth, Some(parent)),
    };
    let fingerprint = job.fingerprint();
    let limits = &shared.limits;

    // Dedup comes last: a job skipped for any other reason must not block
    // its fingerprint.
    let lifecycle = state.lifecycle;
    let skip = match lifecycle {
        Lifecycle::Closed => Some(SkipReason::Closed),
        Lifecycle::Draining if state.drained || matches!(origin, Origin::Caller) => {
            Some(SkipReason::Closed)
        }
        _ if limits.max_depth.is_some_and(|max| depth > max) => Some(SkipReason::DepthExceeded),
        _ if !shared.filter.allows(&job.url) => Some(SkipReason::Disallowed),
        _ if limits
            .max_requests
            .is_some_and(|max| state.stats.admitted >= max) =>
        {
            Some(SkipReason::MaxRequests)
        }
        _ if !state.dedup.should_admit(&fingerprint) => Some(SkipReason::Duplicate),
        _ => None,
    };

    if let Some(reason) = skip {
        state.stats.skipped += 1;
        debug!(url = %job.url, %reason, "request skipped");
        shared.events.publish(EventKind::Skipped {
            url: job.url,
            fingerprint,
            reason,
        });
        return Admission::Skipped(reason);
    }

    state.next_id += 1;
    state.stats.admitted += 1;
    let id = RequestId(state.next_id);
    let info = RequestInfo {
        id,
        url: job.url,
        payload: job.payload,
        depth,
        fingerprint,
        parent,
    };

    debug!(request = %id, url = %info.url, depth, "request queued");
    shared.events.publish(EventKind::Queued {
        request: info.clone(),
    });
    state.queue.enqueue(Request {
        info,
        hook: job.hook,
        retries: job.retries,
        timeout: job.timeout.or(limits.job_timeout),
        attempt: 1,
    });

    update_idle(shared, &mut state);
    pump(shared, &mut state);
    Admission::Queued(id)
}

// The dispatch step. Runs with the lock held and never suspends.
fn pump(shared: &Arc<Shared>, state: &mut Scheduler) {
    return_orphans(shared, state);
    if state.paused {
        return;
    }

    while state.pool.has_idle() {
        let Some(request) = state.queue.dequeue() else {
            break;
        };
        let Some(worker) = state.pool.claim() else {
            state.queue.requeue_front(request);
            break;
        };
        state.stats.peak_active = state.pool.peak();

        info!(
            request = %request.info.id,
            url = %request.info.url,
            worker = worker.id(),
            attempt = request.attempt,
            "dispatching"
        );
        shared.events.publish(EventKind::Dispatched {
            request: request.info.clone(),
            worker: worker.id(),
            attempt: request.attempt,
        });

        let lease = WorkerLease {
            shared: Arc::clone(shared),
            worker: Some(worker),
        };
        shared.runtime.spawn(run_job(lease, request));
    }
}

async fn run_job(mut lease: WorkerLease, request: Request) {
    let ctx = JobContext {
        shared: Arc::clone(&lease.shared),
        request: request.info.clone(),
        attempt: request.attempt,
    };
    let Some(worker) = lease.worker.as_mut() else {
        return;
    };

    let result = executor::execute(&request, worker, ctx).await;

    let delay = lease.shared.limits.delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    lease.complete(request, result);
}

// A busy worker on loan to one task. Dropping the lease hands the worker
// back, so the worker returns to the pool even if the task is torn down.
struct WorkerLease {
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl WorkerLease {
    fn complete(mut self, request: Request, result: ExecutionResult) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        let result = Arc::new(result);
        let id = result.request.id;

        let retry = !result.is_success()
            && request.attempt <= request.retries
            && shared.retry.should_retry(&result);

        if retry {
            state.stats.retried += 1;
            warn!(
                request = %id,
                url = %result.request.url,
                attempt = result.attempt,
                "job failed, retrying"
            );
            shared.events.publish(EventKind::Retried { result });
            state.queue.enqueue(request.next_attempt());
        } else {
            if result.is_success() {
                state.stats.succeeded += 1;
                info!(
                    request = %id,
                    url = %result.request.url,
                    worker = result.worker,
                    duration_ms = result.duration_ms,
                    "job succeeded"
                );
                shared.events.publish(EventKind::Succeeded {
                    result: Arc::clone(&result),
                });
            } else {
                state.stats.failed += 1;
                let message = result.error.as_ref().map(|e| e.message.as_str()).unwrap_or("");
                warn!(
                    request = %id,
                    url = %result.request.url,
                    worker = result.worker,
                    duration_ms = result.duration_ms,
                    error = message,
                    "job failed"
                );
                shared.events.publish(EventKind::Failed {
                    result: Arc::clone(&result),
                });
            }
            if let Some(pipeline) = &state.pipeline {
                pipeline.forward(&result);
            }
        }

        state.pool.release(worker);
        update_idle(&shared, &mut state);
        pump(&shared, &mut state);
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        warn!(worker = worker.id(), "job task ended without a result");
        self.shared.orphans.lock().push(worker);

        // A shutting-down runtime drops tasks straight out of pump(), with
        // `state` already locked on this thread. Never wait for it here.
        match self.shared.state.try_lock() {
            Some(mut state) => settle_orphans(&self.shared, &mut state),
            None => {
                let shared = Arc::clone(&self.shared);
                self.shared.runtime.spawn(async move {
                    let mut state = shared.state.lock();
                    settle_orphans(&shared, &mut state);
                });
            }
        }
    }
}

fn settle_orphans(shared: &Arc<Shared>, state: &mut Scheduler) {
    return_orphans(shared, state);
    update_idle(shared, state);
    pump(shared, state);
}

// Moves orphaned workers back into the pool. Called with `state` held.
fn return_orphans(shared: &Shared, state: &mut Scheduler) {
    let orphans = std::mem::take(&mut *shared.orphans.lock());
    for worker in orphans {
        debug!(worker = worker.id(), "orphaned worker returned");
        state.pool.release(worker);
    }
}

fn update_idle(shared: &Shared, state: &mut Scheduler) {
    let idle = state.is_idle();
    if idle && !state.was_idle {
        debug!(
            succeeded = state.stats.succeeded,
            failed = state.stats.failed,
            "engine idle"
        );
        shared.events.publish(EventKind::Idle);
        shared.idle_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
    state.was_idle = idle;
}

async fn wait_idle(shared: &Shared) {
    // Subscribe before checking so a transition in between is not missed.
    let mut rx = shared.idle_tx.subscribe();
    loop {
        if shared.is_idle() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown(shared: &Arc<Shared>) {
    let discarded = {
        let mut state = shared.state.lock();
        state.lifecycle = Lifecycle::Draining;
        state.paused = false;

        let discarded = state.queue.drain();
        state.stats.discarded += discarded.len();
        for request in &discarded {
            shared.events.publish(EventKind::Skipped {
                url: request.info.url.clone(),
                fingerprint: request.info.fingerprint.clone(),
                reason: SkipReason::Discarded,
            });
        }
        update_idle(shared, &mut state);
        discarded
    };
    info!(discarded = discarded.len(), "engine draining");
    drop(discarded);

    // Idle is re-checked under the same lock that marks the engine drained,
    // so a late follow-on either runs before the workers go or is refused.
    let (workers, pipeline) = loop {
        wait_idle(shared).await;
        let mut state = shared.state.lock();
        return_orphans(shared, &mut state);
        if state.is_idle() {
            state.drained = true;
            break (state.pool.take_idle(), state.pipeline.take());
        }
        pump(shared, &mut state);
    };
    close_sessions(shared.factory.as_ref(), workers).await;
    if let Some(pipeline) = pipeline {
        pipeline.close().await;
    }
    shared.events.close().await;

    let mut state = shared.state.lock();
    state.lifecycle = Lifecycle::Closed;
    info!(
        admitted = state.stats.admitted,
        succeeded = state.stats.succeeded,
        failed = state.stats.failed,
        skipped = state.stats.skipped,
        "engine closed"
    );
}

async fn close_sessions(factory: &dyn SessionFactory, workers: Vec<Worker>) {
    for worker in workers {
        let id = worker.id();
        if let Err(e) = factory.close_session(worker.into_session()).await {
            warn!(worker = id, error = %e, "failed to close session");
        }
    }
}
