//! Serial job queue
//!
//! [`JobManager`] keeps waiting index requests in FIFO order and runs them one
//! at a time on a dedicated worker thread. Equal requests (by
//! [`RequestIdentity`]) collapse while waiting. Each running job gets a child
//! of the manager's shutdown token so a family cancel or a shutdown stops it
//! cooperatively.
//!
//! Once the queue has been idle for the configured delay an optional hook
//! runs on the worker thread; the coordinator uses it to save dirty indexes.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::requests::{IndexRequest, RequestIdentity, RequestQueue};
use crate::{log_request, log_timing};

const WORKER_THREAD_NAME: &str = "cpp-indexer-jobs";

type IdleHook = Arc<dyn Fn() + Send + Sync>;

struct Job {
    identity: RequestIdentity,
    request: Arc<dyn IndexRequest>,
}

struct Running {
    request: Arc<dyn IndexRequest>,
    token: CancellationToken,
}

struct QueueState {
    waiting: VecDeque<Job>,
    running: Option<Running>,
    enabled: bool,
    shutdown: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.running.is_none()
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Wakes the worker: new job, enabled, shutdown
    work: Condvar,
    /// Wakes callers of `wait_until_idle`
    idle: Condvar,
    shutdown_token: CancellationToken,
    idle_delay: Duration,
    idle_hook: Mutex<Option<IdleHook>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_idle_hook(&self) {
        let hook = self
            .idle_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            trace!("Queue idle, running idle hook");
            if panic::catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                error!("Idle hook panicked");
            }
        }
    }
}

/// Single-worker request queue
pub struct JobManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("JobManager")
            .field("waiting", &state.waiting.len())
            .field("running", &state.running.as_ref().map(|running| running.request.to_string()))
            .field("enabled", &state.enabled)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

impl JobManager {
    /// Start the worker thread
    pub fn new(idle_delay: Duration) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                waiting: VecDeque::new(),
                running: None,
                enabled: true,
                shutdown: false,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
            shutdown_token: CancellationToken::new(),
            idle_delay,
            idle_hook: Mutex::new(None),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(worker_shared))?;
        debug!("Job manager started");
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a request; false after shutdown or when an equal request is
    /// already waiting
    pub fn request(&self, request: Arc<dyn IndexRequest>) -> bool {
        let identity = request.identity();
        let mut state = self.shared.lock();
        if state.shutdown {
            debug!("Rejecting {}: job manager is shut down", request);
            return false;
        }
        if state.waiting.iter().any(|job| job.identity == identity) {
            trace!("Dropping {}: an equal request is waiting", request);
            return false;
        }
        trace!("Queued {}", request);
        state.waiting.push_back(Job { identity, request });
        self.shared.work.notify_one();
        true
    }

    /// Drop waiting jobs of `family` and cancel its running job
    ///
    /// Returns the number of waiting jobs removed.
    pub fn cancel_family(&self, family: &str) -> usize {
        let mut state = self.shared.lock();
        let before = state.waiting.len();
        state.waiting.retain(|job| !job.request.belongs_to(family));
        let removed = before - state.waiting.len();
        if let Some(running) = &state.running
            && running.request.belongs_to(family)
        {
            debug!("Cancelling running {}", running.request);
            running.token.cancel();
        }
        if state.is_idle() {
            self.shared.idle.notify_all();
        }
        if removed > 0 {
            info!("Cancelled {} waiting jobs of {}", removed, family);
        }
        removed
    }

    /// Block until no job is waiting or running; false on timeout
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        true
    }

    pub fn awaiting_jobs_count(&self) -> usize {
        self.shared.lock().waiting.len()
    }

    pub fn enable(&self) {
        let mut state = self.shared.lock();
        state.enabled = true;
        self.shared.work.notify_one();
    }

    /// Keep jobs queued without running them
    pub fn disable(&self) {
        self.shared.lock().enabled = false;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Run `hook` on the worker once the queue has been idle for the delay
    pub fn set_idle_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self
            .shared
            .idle_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Cancel everything and stop the worker
    ///
    /// Waiting jobs are dropped. Safe to call more than once and from a job.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if !state.shutdown {
                info!(
                    "Shutting down job manager ({} waiting jobs dropped)",
                    state.waiting.len()
                );
            }
            state.shutdown = true;
            state.waiting.clear();
            self.shared.shutdown_token.cancel();
            self.shared.work.notify_all();
            self.shared.idle.notify_all();
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!("Job worker thread panicked");
            }
        }
    }
}

impl RequestQueue for JobManager {
    fn request(&self, request: Arc<dyn IndexRequest>) -> bool {
        JobManager::request(self, request)
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Worker
// ============================================================================

fn run_worker(shared: Arc<Shared>) {
    let mut idle_pending = false;
    loop {
        let (request, token) = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    debug!("Job worker exiting");
                    return;
                }
                if state.enabled
                    && let Some(job) = state.waiting.pop_front()
                {
                    let token = shared.shutdown_token.child_token();
                    state.running = Some(Running {
                        request: job.request.clone(),
                        token: token.clone(),
                    });
                    break (job.request, token);
                }
                if idle_pending {
                    let (guard, timeout) = shared
                        .work
                        .wait_timeout(state, shared.idle_delay)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                    if timeout.timed_out() && state.waiting.is_empty() && !state.shutdown {
                        idle_pending = false;
                        drop(state);
                        shared.run_idle_hook();
                        state = shared.lock();
                    }
                } else {
                    state = shared
                        .work
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        };

        run_job(&request, &token);
        idle_pending = true;

        let mut state = shared.lock();
        state.running = None;
        if state.is_idle() {
            shared.idle.notify_all();
        }
    }
}

fn run_job(request: &Arc<dyn IndexRequest>, token: &CancellationToken) {
    let start = Instant::now();
    if !request.is_ready_to_run() {
        info!("Discarding {}: not ready to run", request);
        return;
    }

    match panic::catch_unwind(AssertUnwindSafe(|| request.execute(token))) {
        Ok(true) => {
            log_request!(tracing::Level::DEBUG, request, "succeeded");
        }
        Ok(false) => {
            log_request!(tracing::Level::WARN, request, "failed");
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("{} panicked: {}", request, reason);
            log_request!(tracing::Level::ERROR, request, "panicked");
        }
    }
    log_timing!(tracing::Level::TRACE, "index_request", start.elapsed());
}
