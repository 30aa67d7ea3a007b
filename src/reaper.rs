//! Best-effort background reclamation of values nobody tore down.
//!
//! **This is not a reliability mechanism.** A value handed to the reaper is
//! destroyed only once the reaper observes that it holds the last reference
//! to it, or once its handle is explicitly enqueued. Neither is guaranteed
//! to ever happen, and there is no bound on when it happens. Prefer a
//! [`Registry`](crate::Registry) whenever one is available.
//!
//! One thread runs the loop per [`Reaper`]. [`Reaper::global`] spawns a
//! single process-wide reaper on first use. [`Reaper::shutdown`] stops the
//! loop for good; a stopped reaper is never restarted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ScopeConfig;
use crate::error::{BoxError, TeardownError};
use crate::instance::{AnyArc, Teardown};

type Reclaimer = Box<dyn Fn(AnyArc) -> Result<(), BoxError> + Send + Sync>;

static GLOBAL: OnceCell<Option<Arc<Reaper>>> = OnceCell::new();

enum Message {
    Watch(ReclaimedHandle),
    Reclaim(ReclaimedHandle),
    Shutdown,
}

struct HandleInner {
    value: Mutex<Option<AnyArc>>,
    reclaimer: Reclaimer,
    enqueued: AtomicBool,
    claimed: AtomicBool,
    destroyed: AtomicBool,
    queue: Sender<Message>,
}

/// A value plus its destructor, waiting to be reclaimed by a [`Reaper`].
///
/// Destruction fires at most once. [`close`](Teardown::close) enqueues the
/// handle for immediate reclamation; enqueuing twice is a no-op.
#[derive(Clone)]
pub struct ReclaimedHandle {
    inner: Arc<HandleInner>,
}

impl ReclaimedHandle {
    /// True once the destructor has returned.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn is_enqueued(&self) -> bool {
        self.inner.enqueued.load(Ordering::Acquire)
    }

    /// Enqueues the handle for reclamation. Idempotent.
    pub fn enqueue(&self) {
        if self.inner.enqueued.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.inner.queue.send(Message::Reclaim(self.clone())).is_err() {
            warn!("reaper stopped; enqueued value will not be destroyed");
        }
    }

    /// True once the reaper holds the only reference to the value.
    fn unreachable(&self) -> bool {
        self.inner
            .value
            .lock()
            .as_ref()
            .is_some_and(|value| Arc::strong_count(value) == 1)
    }

    /// Runs the destructor, once. No request context exists on this path.
    fn destroy(&self) -> Result<bool, BoxError> {
        if self.inner.claimed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let value = self.inner.value.lock().take();
        let result = match value {
            Some(value) => (self.inner.reclaimer)(value).map(|()| true),
            None => Ok(false),
        };
        self.inner.destroyed.store(true, Ordering::Release);
        result
    }
}

impl Teardown for ReclaimedHandle {
    fn close(&self) -> Result<(), TeardownError> {
        self.enqueue();
        Ok(())
    }

    fn closed(&self) -> bool {
        self.is_enqueued() || self.is_destroyed()
    }
}

/// Background loop destroying reclaimed values.
///
/// # Examples
///
/// ```rust
/// use ferrous_scopes::Reaper;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let reaper = Reaper::spawn(Duration::from_millis(5)).unwrap();
/// let value = Arc::new(String::from("scratch"));
/// let handle = reaper.watch(&value, |_value| Ok(())).unwrap();
///
/// drop(value); // the reaper now holds the last reference
/// while !handle.is_destroyed() {
///     std::thread::sleep(Duration::from_millis(1));
/// }
/// reaper.shutdown();
/// ```
pub struct Reaper {
    queue: Sender<Message>,
    running: Arc<AtomicBool>,
    reclaimed: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Starts a reaper thread scanning for unreachable values every
    /// `scan_interval`.
    pub fn spawn(scan_interval: Duration) -> std::io::Result<Arc<Reaper>> {
        let (queue, receiver) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let reclaimed = Arc::new(AtomicU64::new(0));

        let thread = {
            let running = Arc::clone(&running);
            let reclaimed = Arc::clone(&reclaimed);
            thread::Builder::new()
                .name("scope-reaper".into())
                .spawn(move || run(receiver, scan_interval, &reclaimed, &running))?
        };
        debug!(?scan_interval, "reaper started");

        Ok(Arc::new(Reaper {
            queue,
            running,
            reclaimed,
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// The process-wide reaper, started on first use with the configured
    /// scan interval. `None` if its thread could not be spawned.
    pub fn global() -> Option<Arc<Reaper>> {
        GLOBAL
            .get_or_init(|| match Reaper::spawn(ScopeConfig::global().reaper_scan_interval()) {
                Ok(reaper) => Some(reaper),
                Err(error) => {
                    warn!(%error, "failed to start the global reaper");
                    None
                }
            })
            .clone()
    }

    /// Hands `value` to the reaper.
    ///
    /// `destructor` runs on the reaper thread once nothing but the reaper
    /// references the value, or once the returned handle is enqueued.
    /// Returns `None` if the reaper has stopped.
    pub fn watch<I, D>(&self, value: &Arc<I>, destructor: D) -> Option<ReclaimedHandle>
    where
        I: Send + Sync + 'static,
        D: Fn(Arc<I>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        if !self.is_running() {
            return None;
        }
        let reclaimer: Reclaimer = Box::new(move |value: AnyArc| match value.downcast::<I>() {
            Ok(value) => destructor(value),
            Err(_) => Err("reclaimed value changed type".into()),
        });
        let handle = ReclaimedHandle {
            inner: Arc::new(HandleInner {
                value: Mutex::new(Some(Arc::clone(value) as AnyArc)),
                reclaimer,
                enqueued: AtomicBool::new(false),
                claimed: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                queue: self.queue.clone(),
            }),
        };
        self.queue.send(Message::Watch(handle.clone())).ok()?;
        Some(handle)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of values destroyed so far.
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Acquire)
    }

    /// Stops the loop permanently. Values still watched are never destroyed.
    pub fn shutdown(&self) {
        let _ = self.queue.send(Message::Shutdown);
    }

    /// Stops the loop and waits for its thread to exit.
    pub fn shutdown_and_join(&self) {
        self.shutdown();
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("reaper thread panicked");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(receiver: Receiver<Message>, scan_interval: Duration, reclaimed: &AtomicU64, running: &AtomicBool) {
    let mut watched: Vec<ReclaimedHandle> = Vec::new();
    let mut last_scan = Instant::now();

    loop {
        match receiver.recv_timeout(scan_interval) {
            Ok(Message::Watch(handle)) => watched.push(handle),
            Ok(Message::Reclaim(handle)) => reap(&handle, reclaimed),
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if last_scan.elapsed() >= scan_interval {
            watched.retain(|handle| {
                if handle.is_destroyed() {
                    return false;
                }
                if handle.unreachable() {
                    reap(handle, reclaimed);
                    return false;
                }
                true
            });
            last_scan = Instant::now();
        }
    }

    running.store(false, Ordering::Release);
    debug!(abandoned = watched.len(), "reaper stopped");
}

fn reap(handle: &ReclaimedHandle, reclaimed: &AtomicU64) {
    match handle.destroy() {
        Ok(true) => {
            reclaimed.fetch_add(1, Ordering::AcqRel);
        }
        Ok(false) => {}
        Err(error) => {
            reclaimed.fetch_add(1, Ordering::AcqRel);
            warn!(%error, "background destruction failed");
        }
    }
}
