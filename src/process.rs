//! Thread-owning process contexts.
//!
//! A [`ProcessContext`] runs one loop on one dedicated OS thread: a stateful
//! component's event loop, a GPIO pin observer, or an async IO runtime. The
//! loop is installed with [`set_process_runner`](ProcessContext::set_process_runner)
//! and receives a [`StopSignal`] it must watch.
//!
//! # Thread Model
//!
//! ```text
//! caller thread                 context thread
//! ─────────────                 ──────────────
//! start() ───── spawn ────────▶ runner(&signal)
//!                                 loop { ... signal.is_raised()? }
//! stop()  ───── raise ────────▶   returns
//!         ◀──── join ──────────
//! ```
//!
//! The runner is kept across runs, so a stopped context can be started again.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use filament_core::process::ProcessContext;
//!
//! let context = ProcessContext::new("ticker");
//! context
//!     .set_process_runner(|stop| {
//!         while !stop.wait_timeout(Duration::from_millis(5)) {}
//!     })
//!     .unwrap();
//!
//! context.start().unwrap();
//! assert!(context.is_running());
//! context.stop();
//! assert!(!context.is_running());
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::error::ProcessError;

/// Loop body run on the context's thread.
pub type ProcessRunner = Box<dyn FnMut(&StopSignal) + Send>;

// ============================================================================
// Stop Signal
// ============================================================================

/// Receiving end of a context's stop request.
///
/// Raised when the context's `stop()` drops the sending half, so it works
/// both as a flag ([`is_raised`](Self::is_raised)) and as a `select!` arm
/// ([`receiver`](Self::receiver)).
#[derive(Clone, Debug)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    /// Create a connected pair: dropping the [`StopTrigger`] raises the signal.
    pub fn pair() -> (StopTrigger, StopSignal) {
        let (tx, rx) = bounded(0);
        (StopTrigger { _tx: tx }, StopSignal { rx })
    }

    /// Returns true once stop has been requested.
    pub fn is_raised(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep up to `timeout`, waking early on stop. Returns [`is_raised`](Self::is_raised).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Channel that becomes disconnected on stop, for `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Sending half of a [`StopSignal`]; dropping it raises the signal.
#[derive(Debug)]
pub struct StopTrigger {
    _tx: Sender<()>,
}

impl StopTrigger {
    /// Raise the signal.
    pub fn raise(self) {}
}

// ============================================================================
// Process Context
// ============================================================================

struct Running {
    trigger: StopTrigger,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct ContextState {
    runner: Option<Arc<Mutex<ProcessRunner>>>,
    running: Option<Running>,
}

/// Owner of one named thread running a [`ProcessRunner`].
pub struct ProcessContext {
    name: String,
    state: Mutex<ContextState>,
}

impl ProcessContext {
    /// Creates a stopped context without a runner.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ContextState::default()),
        }
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the loop body.
    ///
    /// Refused with [`ProcessError::Running`] while the context runs; the
    /// running check and the assignment happen under one lock.
    pub fn set_process_runner<F>(&self, runner: F) -> Result<(), ProcessError>
    where
        F: FnMut(&StopSignal) + Send + 'static,
    {
        let mut state = self.state.lock();
        if Self::thread_alive(&state) {
            return Err(ProcessError::Running(self.name.clone()));
        }
        state.runner = Some(Arc::new(Mutex::new(Box::new(runner))));
        Ok(())
    }

    /// Spawn the thread and run the installed runner.
    pub fn start(&self) -> Result<(), ProcessError> {
        let mut state = self.state.lock();
        if Self::thread_alive(&state) {
            return Err(ProcessError::Running(self.name.clone()));
        }
        // Reap a runner that returned on its own.
        if let Some(finished) = state.running.take() {
            let _ = finished.thread.join();
        }

        let runner = state
            .runner
            .clone()
            .ok_or_else(|| ProcessError::NoRunner(self.name.clone()))?;
        let (trigger, signal) = StopSignal::pair();

        let name = self.name.clone();
        let thread = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                log::debug!("{}: thread started", name);
                let mut runner = runner.lock();
                (*runner)(&signal);
                log::debug!("{}: thread exiting", name);
            })
            .map_err(|source| ProcessError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        state.running = Some(Running { trigger, thread });
        log::info!("{}: process context started", self.name);
        Ok(())
    }

    /// Raise the stop signal and join the thread.
    ///
    /// Blocks until the runner notices the signal and returns. Returns false
    /// if the context was not started.
    pub fn stop(&self) -> bool {
        let Some(running) = self.state.lock().running.take() else {
            return false;
        };

        running.trigger.raise();
        if running.thread.join().is_err() {
            log::error!("{}: process runner panicked", self.name);
        }
        log::info!("{}: process context stopped", self.name);
        true
    }

    /// Returns true while the thread is alive.
    pub fn is_running(&self) -> bool {
        Self::thread_alive(&self.state.lock())
    }

    fn thread_alive(state: &ContextState) -> bool {
        state
            .running
            .as_ref()
            .is_some_and(|running| !running.thread.is_finished())
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn idle_loop(stop: &StopSignal) {
        while !stop.wait_timeout(Duration::from_millis(2)) {}
    }

    #[test]
    fn start_without_runner_fails() {
        let context = ProcessContext::new("empty");
        assert!(matches!(context.start(), Err(ProcessError::NoRunner(_))));
    }

    #[test]
    fn start_twice_fails() {
        let context = ProcessContext::new("twice");
        context.set_process_runner(idle_loop).unwrap();
        context.start().unwrap();
        assert!(matches!(context.start(), Err(ProcessError::Running(_))));
        assert!(context.stop());
    }

    #[test]
    fn runner_cannot_be_swapped_while_running() {
        let context = ProcessContext::new("swap");
        context.set_process_runner(idle_loop).unwrap();
        context.start().unwrap();
        assert!(matches!(
            context.set_process_runner(idle_loop),
            Err(ProcessError::Running(_))
        ));
        context.stop();
        assert!(context.set_process_runner(idle_loop).is_ok());
    }

    #[test]
    fn stop_without_start_is_noop() {
        let context = ProcessContext::new("idle");
        assert!(!context.stop());
    }

    #[test]
    fn context_restarts_with_same_runner() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let context = ProcessContext::new("restart");
        context
            .set_process_runner(move |stop| {
                counter.fetch_add(1, Ordering::SeqCst);
                idle_loop(stop);
            })
            .unwrap();

        for _ in 0..3 {
            context.start().unwrap();
            context.stop();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn finished_runner_is_not_running() {
        let (done_tx, done_rx) = bounded(1);
        let context = ProcessContext::new("oneshot");
        context
            .set_process_runner(move |_| {
                let _ = done_tx.send(());
            })
            .unwrap();
        context.start().unwrap();
        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        context.stop();
        assert!(!context.is_running());
        assert!(context.start().is_ok());
    }

    #[test]
    fn select_on_stop_receiver() {
        let signal_seen = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&signal_seen);
        let context = ProcessContext::new("select");
        context
            .set_process_runner(move |stop| {
                let _ = stop.receiver().recv();
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        context.start().unwrap();
        context.stop();
        assert_eq!(signal_seen.load(Ordering::SeqCst), 1);
    }
}
