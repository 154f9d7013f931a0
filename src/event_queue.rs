//! Thread-safe FIFO event queue.
//!
//! [`EventQueue`] connects the producers of a state machine's events (command
//! handlers running on broker threads, GPIO observers) to its single
//! consumer, the component's process thread.
//!
//! # Blocking and Cancellation
//!
//! [`pull`](EventQueue::pull) blocks while the queue is empty and is only woken
//! by a later push. Consumers that must shut down promptly use
//! [`pull_until`](EventQueue::pull_until), which waits on the queue and a stop
//! channel at the same time, so no sentinel event is needed.
//!
//! ```rust
//! use filament_core::event_queue::EventQueue;
//!
//! let queue = EventQueue::new();
//! queue.push(1);
//! queue.push(2);
//! assert_eq!(queue.pull(), 1);
//! assert_eq!(queue.pull(), 2);
//! assert!(queue.is_empty());
//! ```

use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender};

/// Unbounded multi-producer FIFO with a blocking pull.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug)]
pub struct EventQueue<E> {
    tx: Sender<E>,
    rx: Receiver<E>,
}

impl<E> EventQueue<E> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append to the tail. Never blocks.
    pub fn push(&self, event: E) {
        // Both ends live in `self`, so the channel cannot be disconnected here.
        let _ = self.tx.send(event);
    }

    /// Remove the head, blocking while the queue is empty.
    pub fn pull(&self) -> E {
        loop {
            if let Ok(event) = self.rx.recv() {
                return event;
            }
        }
    }

    /// Remove the head, or return `None` as soon as `stop` fires.
    ///
    /// `stop` fires when it yields a message or is disconnected. When an
    /// event and the stop signal are both ready, either may be returned.
    pub fn pull_until<T>(&self, stop: &Receiver<T>) -> Option<E> {
        select! {
            recv(self.rx) -> event => event.ok(),
            recv(stop) -> _ => None,
        }
    }

    /// Remove the head, waiting at most `timeout`.
    pub fn pull_timeout(&self, timeout: Duration) -> Option<E> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Remove the head if one is queued.
    pub fn try_pull(&self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Snapshot emptiness check.
    ///
    /// May be stale as soon as it returns if another thread pushes or pulls.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Snapshot of the number of queued events.
    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl<E> Clone for EventQueue<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fifo_order() {
        let queue = EventQueue::new();
        for i in 0..10 {
            queue.push(i);
        }
        let pulled: Vec<_> = (0..10).map(|_| queue.pull()).collect();
        assert_eq!(pulled, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn pull_blocks_until_push() {
        let queue = EventQueue::new();
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push("late");
        });
        assert_eq!(queue.pull(), "late");
        handle.join().unwrap();
    }

    #[test]
    fn pull_until_returns_none_on_disconnect() {
        let queue: EventQueue<u8> = EventQueue::new();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        drop(stop_tx);
        assert_eq!(queue.pull_until(&stop_rx), None);
    }

    #[test]
    fn pull_until_returns_queued_event() {
        let queue = EventQueue::new();
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        queue.push(7u8);
        assert_eq!(queue.pull_until(&stop_rx), Some(7));
    }

    #[test]
    fn pull_timeout_on_empty_queue() {
        let queue: EventQueue<u8> = EventQueue::new();
        assert_eq!(queue.pull_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn emptiness_snapshot() {
        let queue = EventQueue::new();
        assert!(queue.is_empty());
        queue.push(1);
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pull(), Some(1));
        assert_eq!(queue.try_pull(), None);
    }
}
