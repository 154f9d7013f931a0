//! Process context hosting a tokio runtime.
//!
//! Components that talk to the network (remote control, gateways) need an
//! async reactor next to the blocking state machine threads. An
//! [`IoContext`] runs a current-thread tokio runtime on its own
//! [`ProcessContext`] thread until stopped, and hands out a
//! [`Handle`](tokio::runtime::Handle) for spawning onto it.
//!
//! ```rust
//! use filament_core::io_context::IoContext;
//!
//! let io = IoContext::new("io");
//! io.start().unwrap();
//!
//! let handle = io.handle().unwrap();
//! let (tx, rx) = std::sync::mpsc::channel();
//! handle.spawn(async move {
//!     tx.send(21 * 2).unwrap();
//! });
//! assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 42);
//!
//! io.stop();
//! assert!(io.handle().is_none());
//! ```

use std::io;
use std::sync::Arc;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};

use crate::error::ProcessError;
use crate::process::ProcessContext;

/// A [`ProcessContext`] whose thread drives a tokio runtime.
pub struct IoContext {
    context: ProcessContext,
    handle: Arc<Mutex<Option<Handle>>>,
}

impl IoContext {
    /// Creates a stopped context.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            context: ProcessContext::new(name),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Build the runtime on a new thread and wait until it accepts tasks.
    pub fn start(&self) -> Result<(), ProcessError> {
        let (ready_tx, ready_rx) = bounded::<io::Result<()>>(1);
        let slot = Arc::clone(&self.handle);
        let name = self.context.name().to_owned();

        self.context.set_process_runner(move |stop| {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::error!("{}: cannot build runtime: {}", name, err);
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            *slot.lock() = Some(runtime.handle().clone());
            let _ = ready_tx.send(Ok(()));

            // Keep the reactor turning until the stop trigger is dropped.
            let stop = stop.receiver().clone();
            let waited = runtime.block_on(runtime.spawn_blocking(move || {
                let _ = stop.recv();
            }));
            if let Err(err) = waited {
                log::error!("{}: stop watcher failed: {}", name, err);
            }
            slot.lock().take();
            log::debug!("{}: runtime stopped", name);
        })?;
        self.context.start()?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => {
                self.context.stop();
                Err(ProcessError::Spawn {
                    name: self.context.name().to_owned(),
                    source,
                })
            }
            Err(_) => {
                self.context.stop();
                Err(ProcessError::Spawn {
                    name: self.context.name().to_owned(),
                    source: io::Error::new(io::ErrorKind::Other, "runtime thread exited"),
                })
            }
        }
    }

    /// Handle to the running runtime, `None` while stopped.
    pub fn handle(&self) -> Option<Handle> {
        self.handle.lock().clone()
    }

    /// Shut the runtime down and join its thread.
    pub fn stop(&self) -> bool {
        let stopped = self.context.stop();
        self.handle.lock().take();
        stopped
    }

    /// Returns true while the runtime thread runs.
    pub fn is_running(&self) -> bool {
        self.context.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn restart_gives_fresh_runtime() {
        let io = IoContext::new("io-test");
        io.start().unwrap();
        assert!(io.handle().is_some());
        assert!(io.stop());

        io.start().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        io.handle().unwrap().spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        io.stop();
    }

    #[test]
    fn stop_when_stopped_is_false() {
        let io = IoContext::new("io-idle");
        assert!(!io.stop());
        assert!(!io.is_running());
    }
}
