//! Cooperative task runner for the tempo clock
//!
//! Tasks are plain futures driven by a current-thread tokio runtime on a
//! dedicated `clock-executor` thread. Suspension points are explicit:
//! [`TaskHandle::sleep`] and [`TaskHandle::sync`]. Cancellation sets a
//! flag and wakes the task's current suspension, which returns the
//! [`Cancelled`] sentinel; the completion wrapper treats that as clean
//! termination and removes the task from the registry.
//!
//! Sleep accuracy: the coarse timer covers all but the last few
//! milliseconds, and a spin on the monotonic clock covers the tail, so a
//! wake lands well inside one audio block of its deadline.

use super::tempo::TempoState;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;

/// Spin tail: the stretch before a deadline covered by busy-waiting
const SPIN_WINDOW: Duration = Duration::from_millis(3);

/// Waits at or below this skip the coarse timer and spin end-to-end
const SPIN_ONLY_BELOW: Duration = Duration::from_millis(4);

/// A grid point closer than this is considered already passed
const SYNC_EPSILON_BEATS: f64 = 1e-4;

/// Cancellation sentinel
///
/// Returned from a suspension point when the task has been cancelled.
/// Propagate it with `?`; the task runner recognises it and terminates
/// the task without logging.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("task cancelled")]
pub struct Cancelled;

/// Outcome of a clock task body
pub type TaskResult = Result<(), Cancelled>;

/// Non-reusable identifier for a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

#[derive(Default)]
struct CancelState {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelState {
    fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

type TransportHook = Box<dyn Fn() + Send>;
type TempoHook = Box<dyn Fn(f64) + Send>;

#[derive(Default)]
struct Hooks {
    transport_start: Option<TransportHook>,
    transport_stop: Option<TransportHook>,
    tempo_change: Option<TempoHook>,
}

struct ClockInner {
    tempo: Mutex<TempoState>,
    tasks: Mutex<HashMap<u64, Arc<CancelState>>>,
    next_id: AtomicU64,
    rt: tokio::runtime::Handle,
    hooks: Mutex<Hooks>,
}

/// The tempo clock: beat counter, transport, and task scheduling
///
/// Owns the executor thread; dropping the clock shuts the executor down
/// and aborts any tasks still suspended.
pub struct Clock {
    inner: Arc<ClockInner>,
    shutdown: Arc<Notify>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Clock {
    /// Start the clock with its executor thread
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(Notify::new());
        let shutdown_worker = shutdown.clone();

        let worker = thread::Builder::new()
            .name("clock-executor".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to build clock runtime");
                tx.send(rt.handle().clone())
                    .expect("failed to hand back clock runtime handle");

                log::info!("clock executor started");
                rt.block_on(shutdown_worker.notified());
                log::info!("clock executor stopped");
            })
            .expect("failed to spawn clock executor thread");

        let rt = rx.recv().expect("failed to receive clock runtime handle");

        Self {
            inner: Arc::new(ClockInner {
                tempo: Mutex::new(TempoState::new()),
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                rt,
                hooks: Mutex::new(Hooks::default()),
            }),
            shutdown,
            worker: Some(worker),
        }
    }

    // --- Tempo and transport ---

    /// Change tempo, clamped to the valid range, preserving the current
    /// beat position. Fires the tempo-change hook with the applied value.
    pub fn set_tempo(&self, bpm: f64) -> f64 {
        let applied = self.inner.tempo.lock().unwrap().set_tempo(bpm);
        if let Some(hook) = self.inner.hooks.lock().unwrap().tempo_change.as_ref() {
            hook(applied);
        }
        applied
    }

    /// Current tempo in beats per minute
    pub fn tempo(&self) -> f64 {
        self.inner.tempo.lock().unwrap().tempo()
    }

    /// Current beat position
    pub fn beats(&self) -> f64 {
        self.inner.tempo.lock().unwrap().beats()
    }

    /// Seconds per beat at the current tempo
    pub fn beat_seconds(&self) -> f64 {
        self.inner.tempo.lock().unwrap().beat_seconds()
    }

    /// Whether the transport is running
    pub fn is_running(&self) -> bool {
        self.inner.tempo.lock().unwrap().is_running()
    }

    /// Start the transport; idempotent. Fires the transport-start hook.
    pub fn start(&self) {
        self.inner.tempo.lock().unwrap().start();
        if let Some(hook) = self.inner.hooks.lock().unwrap().transport_start.as_ref() {
            hook();
        }
    }

    /// Stop the transport, freezing the beat counter; idempotent. Fires
    /// the transport-stop hook.
    pub fn stop(&self) {
        self.inner.tempo.lock().unwrap().stop();
        if let Some(hook) = self.inner.hooks.lock().unwrap().transport_stop.as_ref() {
            hook();
        }
    }

    // --- Hooks ---

    pub fn set_transport_start_handler(&self, hook: impl Fn() + Send + 'static) {
        self.inner.hooks.lock().unwrap().transport_start = Some(Box::new(hook));
    }

    pub fn set_transport_stop_handler(&self, hook: impl Fn() + Send + 'static) {
        self.inner.hooks.lock().unwrap().transport_stop = Some(Box::new(hook));
    }

    pub fn set_tempo_change_handler(&self, hook: impl Fn(f64) + Send + 'static) {
        self.inner.hooks.lock().unwrap().tempo_change = Some(Box::new(hook));
    }

    // --- Tasks ---

    /// Register and schedule a cooperative task
    ///
    /// The closure receives a [`TaskHandle`] carrying the suspension
    /// primitives and the implicit cancellation state. The identifier is
    /// never reused; it leaves the registry when the task completes, is
    /// cancelled, or panics. A panic is confined to the task and logged.
    pub fn run<F, Fut>(&self, f: F) -> TaskId
    where
        F: FnOnce(TaskHandle) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(CancelState::default());
        self.inner.tasks.lock().unwrap().insert(id, cancel.clone());

        let handle = TaskHandle {
            inner: self.inner.clone(),
            cancel,
            id: TaskId(id),
        };
        // The body runs as its own executor task so a panic unwinds only
        // that task. The supervisor observes it through the join error and
        // removes the registry entry no matter how the body exited.
        let body = self.inner.rt.spawn(async move { f(handle).await });
        let inner = self.inner.clone();
        self.inner.rt.spawn(async move {
            match body.await {
                // Normal completion and the cancellation sentinel both
                // end the task silently.
                Ok(_) => {}
                Err(err) if err.is_panic() => {
                    log::error!("clock task {} panicked", id);
                }
                Err(_) => {}
            }
            inner.tasks.lock().unwrap().remove(&id);
        });

        TaskId(id)
    }

    /// Signal cancellation to a task
    ///
    /// Asynchronous: the flag is set and the task's current suspension is
    /// woken; the task observes it at the next suspension return.
    /// Idempotent, and a no-op for completed or unknown identifiers.
    pub fn cancel(&self, id: TaskId) {
        if let Some(cancel) = self.inner.tasks.lock().unwrap().get(&id.0) {
            cancel.cancel();
        }
    }

    /// Whether a task identifier is still in the registry
    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.inner.tasks.lock().unwrap().contains_key(&id.0)
    }

    /// Number of tasks currently registered
    pub fn task_count(&self) -> usize {
        self.inner.tasks.lock().unwrap().len()
    }

    /// Cancel all tasks and clear every hook
    pub fn cleanup(&self) {
        for cancel in self.inner.tasks.lock().unwrap().values() {
            cancel.cancel();
        }
        *self.inner.hooks.lock().unwrap() = Hooks::default();
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Per-task handle passed into every clock task
///
/// Carries the suspension primitives and the task's cancellation state.
pub struct TaskHandle {
    inner: Arc<ClockInner>,
    cancel: Arc<CancelState>,
    id: TaskId,
}

impl TaskHandle {
    /// This task's identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current beat position
    pub fn beats(&self) -> f64 {
        self.inner.tempo.lock().unwrap().beats()
    }

    /// Seconds per beat at the current tempo
    pub fn beat_seconds(&self) -> f64 {
        self.inner.tempo.lock().unwrap().beat_seconds()
    }

    /// Suspend for a real-time duration
    pub async fn sleep(&self, seconds: f64) -> TaskResult {
        let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
        self.wait_until(deadline).await
    }

    /// Suspend until the next alignment of the beat grid
    ///
    /// Equivalent to [`TaskHandle::sync_offset`] with a zero offset.
    pub async fn sync(&self, beat: f64) -> TaskResult {
        self.sync_offset(beat, 0.0).await
    }

    /// Suspend until `beats() % beat == offset` next holds
    ///
    /// A grid point within a ten-thousandth of a beat is treated as
    /// already passed and the wait extends by one more interval. While
    /// the transport is stopped this falls back to sleeping one grid
    /// interval of wall time at the current tempo, so patterns keep
    /// ticking; they will drift if the tempo changes while stopped.
    pub async fn sync_offset(&self, beat: f64, offset: f64) -> TaskResult {
        if beat <= 0.0 {
            return if self.cancel.is_cancelled() {
                Err(Cancelled)
            } else {
                Ok(())
            };
        }
        let wait = {
            let tempo = self.inner.tempo.lock().unwrap();
            if tempo.is_running() {
                let now = tempo.beats();
                let mut target = ((now - offset) / beat).ceil() * beat + offset;
                if target - now < SYNC_EPSILON_BEATS {
                    target += beat;
                }
                (target - now) * tempo.beat_seconds()
            } else {
                beat * tempo.beat_seconds()
            }
        };
        self.sleep(wait).await
    }

    /// Two-phase wait: coarse timer, then a spin on the monotonic clock
    async fn wait_until(&self, deadline: Instant) -> TaskResult {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining > SPIN_ONLY_BELOW {
            let coarse = remaining - SPIN_WINDOW;
            let notified = self.cancel.notify.notified();
            tokio::pin!(notified);
            if self.cancel.is_cancelled() {
                return Err(Cancelled);
            }
            tokio::select! {
                _ = &mut notified => return Err(Cancelled),
                _ = tokio::time::sleep(coarse) => {}
            }
        }

        while Instant::now() < deadline {
            if self.cancel.is_cancelled() {
                return Err(Cancelled);
            }
            std::hint::spin_loop();
        }
        Ok(())
    }
}
