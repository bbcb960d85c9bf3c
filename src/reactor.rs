use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime;
use tokio::sync::watch;

/// Single-threaded event loop. All network I/O, timers and crawl state run
/// on the dispatching thread, so no callback can observe another mid-flight.
pub struct Reactor {
    runtime: runtime::Runtime,
    stop: StopHandle,
}

/// Outcome of a `dispatch` call: the root future ran to completion, or the
/// stop handle fired first.
#[derive(Debug)]
pub enum Dispatch<T> {
    Drained(T),
    Stopped,
}

impl<T> Dispatch<T> {
    pub fn drained(self) -> Option<T> {
        match self {
            Dispatch::Drained(value) => Some(value),
            Dispatch::Stopped => None,
        }
    }
}

#[derive(Debug)]
pub struct ReactorError(std::io::Error);

impl std::error::Error for ReactorError {}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to build event loop: {}", self.0)
    }
}

impl Reactor {
    pub fn new() -> Result<Self, ReactorError> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ReactorError)?;
        Ok(Self {
            runtime,
            stop: StopHandle::new(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Block the calling thread driving `root` until it finishes or `stop`
    /// is requested. Tasks spawned from within `root` share this thread.
    pub fn dispatch<F>(&self, root: F) -> Dispatch<F::Output>
    where
        F: Future,
    {
        let stop = self.stop.clone();
        self.runtime.block_on(async move {
            tokio::select! {
                // Stop wins ties so an already-stopped reactor never polls
                // the root future.
                biased;
                _ = stop.stopped() => Dispatch::Stopped,
                out = root => Dispatch::Drained(out),
            }
        })
    }
}

/// Cloneable stop switch. Safe to trigger from inside a dispatched task;
/// repeated calls are no-ops. State-based (a watch channel), so a stop
/// issued before anyone waits is never lost.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn stop(&self) {
        if !self.state.send_replace(true) {
            log::debug!(target: "reactor", "stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once `stop` has been called; immediately if it already was.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}
