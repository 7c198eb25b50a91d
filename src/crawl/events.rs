// src/crawl/events.rs
// =============================================================================
// Lifecycle events and the bus that delivers them.
//
// The scheduler publishes while it holds its lock, so publishing must never
// wait: every subscriber owns an unbounded channel and a listener runs on its
// own task, draining that channel. A slow listener only falls behind itself;
// a panicking one is logged and keeps receiving.
//
// Events carry a sequence number taken at publish time. Since publishing is
// serialised by the scheduler, the sequence is the order things happened in.
// =============================================================================

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::warn;

use super::executor::ExecutionResult;
use super::fingerprint::Fingerprint;
use super::request::{RequestInfo, SkipReason};

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Queued {
        request: RequestInfo,
    },
    Skipped {
        url: String,
        fingerprint: Fingerprint,
        reason: SkipReason,
    },
    Dispatched {
        request: RequestInfo,
        worker: usize,
        attempt: u32,
    },
    Retried {
        result: Arc<ExecutionResult>,
    },
    Succeeded {
        result: Arc<ExecutionResult>,
    },
    Failed {
        result: Arc<ExecutionResult>,
    },
    Idle,
}

impl EventKind {
    pub fn name(&self) -> EventName {
        match self {
            EventKind::Queued { .. } => EventName::Queued,
            EventKind::Skipped { .. } => EventName::Skipped,
            EventKind::Dispatched { .. } => EventName::Dispatched,
            EventKind::Retried { .. } => EventName::Retried,
            EventKind::Succeeded { .. } => EventName::Succeeded,
            EventKind::Failed { .. } => EventName::Failed,
            EventKind::Idle => EventName::Idle,
        }
    }
}

/// Names accepted by `Engine::on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Queued,
    Skipped,
    Dispatched,
    Retried,
    Succeeded,
    Failed,
    Idle,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Queued => "queued",
            EventName::Skipped => "skipped",
            EventName::Dispatched => "dispatched",
            EventName::Retried => "retried",
            EventName::Succeeded => "succeeded",
            EventName::Failed => "failed",
            EventName::Idle => "idle",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(EventName::Queued),
            "skipped" => Ok(EventName::Skipped),
            "dispatched" => Ok(EventName::Dispatched),
            "retried" => Ok(EventName::Retried),
            "succeeded" => Ok(EventName::Succeeded),
            "failed" => Ok(EventName::Failed),
            "idle" => Ok(EventName::Idle),
            other => Err(format!("unknown event '{other}'")),
        }
    }
}

struct Subscriber {
    filter: Option<EventName>,
    tx: UnboundedSender<Arc<Event>>,
}

pub(crate) struct EventBus {
    seq: AtomicU64,
    closed: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    runtime: Handle,
}

impl EventBus {
    pub fn new(runtime: Handle) -> Self {
        Self {
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            runtime,
        }
    }

    /// Publishes an event to every matching subscriber. Never blocks.
    pub fn publish(&self, kind: EventKind) {
        let name = kind.name();
        let event = Arc::new(Event {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            kind,
        });

        // Subscribers whose receiving side is gone are dropped here.
        self.subscribers.lock().retain(|sub| {
            if sub.filter.map_or(true, |filter| filter == name) {
                sub.tx.send(Arc::clone(&event)).is_ok()
            } else {
                !sub.tx.is_closed()
            }
        });
    }

    /// Runs `listener` for every event called `name`, on a task of its own.
    pub fn on<F>(&self, name: EventName, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut rx = self.register(Some(name));
        let task = self.runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    warn!(event = %name, seq = event.seq, "event listener panicked");
                }
            }
        });
        self.listeners.lock().push(task);
    }

    /// A receiver for every event published from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<Arc<Event>> {
        self.register(None)
    }

    fn register(&self, filter: Option<EventName>) -> UnboundedReceiver<Arc<Event>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.closed.load(Ordering::SeqCst) {
            self.subscribers.lock().push(Subscriber { filter, tx });
        }
        rx
    }

    /// Stops accepting events and waits for listeners to work through what
    /// they already received.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().clear();

        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            if let Err(e) = listener.await {
                warn!(error = %e, "event listener task failed");
            }
        }
    }
}
