// src/crawl/pool.rs
// =============================================================================
// The worker pool.
//
// A worker is a pool slot that owns one session. The pool opens exactly
// `ceiling` sessions at start-up and never more, so the number of busy
// workers can never exceed the ceiling: a busy worker has been moved out of
// the pool and into the task running its job.
//
// Opening a session may fail. Each worker gets a few attempts; if one still
// cannot be opened the pool refuses to start (it will not run short-handed)
// and closes whatever it had opened already.
// =============================================================================

use tracing::{debug, warn};

use crate::error::{EngineError, SessionError};
use crate::session::{Session, SessionFactory};

pub(crate) struct Worker {
    id: usize,
    session: Box<dyn Session>,
}

impl Worker {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn session_mut(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    pub fn into_session(self) -> Box<dyn Session> {
        self.session
    }
}

pub(crate) struct WorkerPool {
    ceiling: usize,
    idle: Vec<Worker>,
    active: usize,
    peak: usize,
}

impl WorkerPool {
    /// Opens `ceiling` sessions, giving each worker up to `attempts` tries.
    pub async fn start(
        factory: &dyn SessionFactory,
        ceiling: usize,
        attempts: u32,
    ) -> Result<Self, EngineError> {
        let mut idle = Vec::with_capacity(ceiling);

        for id in 0..ceiling {
            match open_with_retries(factory, id, attempts).await {
                Ok(session) => idle.push(Worker { id, session }),
                Err(source) => {
                    for worker in idle {
                        if let Err(e) = factory.close_session(worker.into_session()).await {
                            warn!(error = %e, "failed to close session after aborted start");
                        }
                    }
                    return Err(EngineError::ResourceAcquisition {
                        worker: id,
                        attempts,
                        source,
                    });
                }
            }
        }

        // Pop from the back hands out worker 0 first.
        idle.reverse();

        Ok(Self {
            ceiling,
            idle,
            active: 0,
            peak: 0,
        })
    }

    /// Takes an idle worker and marks it busy.
    pub fn claim(&mut self) -> Option<Worker> {
        let worker = self.idle.pop()?;
        self.active += 1;
        self.peak = self.peak.max(self.active);
        debug_assert!(self.active <= self.ceiling);
        Some(worker)
    }

    /// Returns a busy worker to the idle set.
    pub fn release(&mut self, worker: Worker) {
        self.active = self.active.saturating_sub(1);
        self.idle.push(worker);
    }

    /// Removes every idle worker, for shutdown.
    pub fn take_idle(&mut self) -> Vec<Worker> {
        std::mem::take(&mut self.idle)
    }

    pub fn has_idle(&self) -> bool {
        !self.idle.is_empty()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn peak(&self) -> usize {
        self.peak
    }
}

async fn open_with_retries(
    factory: &dyn SessionFactory,
    worker: usize,
    attempts: u32,
) -> Result<Box<dyn Session>, SessionError> {
    let mut attempt = 1;
    loop {
        match factory.open_session().await {
            Ok(session) => {
                debug!(worker, attempt, "session opened");
                return Ok(session);
            }
            Err(e) if attempt < attempts => {
                warn!(worker, attempt, error = %e, "failed to open session, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
