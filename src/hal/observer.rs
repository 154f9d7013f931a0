//! GPIO pin event observer.
//!
//! Turns a blocking [`GpioPin::wait_for_event`] loop into callbacks on a
//! dedicated thread. Each wait is bounded by
//! [`ObserverConfig::max_observation_timeout`], which is also how quickly the
//! thread notices [`stop`](GpioPinEventObserver::stop).
//!
//! Timeouts are never delivered; only real edges reach the handler. The
//! handler runs on the observer thread and should only enqueue work, e.g.
//! push an FSM event through a
//! [`StateMachineHandle`](crate::state_machine::StateMachineHandle).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use crossbeam_channel::unbounded;
//! use filament_core::config::{Configuration, ObserverConfig};
//! use filament_core::hal::{GpioControl, GpioPinEventObserver, HalObject, SimHardware, Simulation};
//! use filament_core::traits::PinEvent;
//!
//! let json = serde_json::json!({
//!     "chip": "gpiochip0",
//!     "gpio-pin": { "fault": { "line": 5, "direction": "in", "edge": "rising" } }
//! });
//! let sim = Arc::new(Simulation::new());
//! let mut gpio = GpioControl::new("gpio");
//! gpio.init(&Configuration::from_json(&json).unwrap(), Arc::new(SimHardware::new(Arc::clone(&sim))))
//!     .unwrap();
//!
//! let (tx, rx) = unbounded();
//! let observer = GpioPinEventObserver::new(
//!     "fault-watch",
//!     Arc::clone(gpio.gpio_pin("fault").unwrap()),
//!     &ObserverConfig::default().with_max_observation_timeout(Duration::from_millis(10)),
//! );
//! observer.set_event_handler(move |event, pin| {
//!     let _ = tx.send((event, pin.to_owned()));
//! });
//! observer.start().unwrap();
//!
//! sim.drive_line("gpiochip0", 5, true);
//! let (event, pin) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(event, PinEvent::RisingEdge);
//! assert_eq!(pin, "fault");
//! observer.stop();
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{Identifier, ObserverConfig};
use crate::error::ProcessError;
use crate::hal::{GpioPin, HalObject};
use crate::process::ProcessContext;
use crate::traits::PinEvent;

/// Callback receiving `(event, pin id)`.
pub type PinEventHandler = Box<dyn FnMut(PinEvent, &Identifier) + Send>;

/// Watches one pin on its own thread and forwards edges to a handler.
pub struct GpioPinEventObserver {
    pin: Arc<GpioPin>,
    timeout: Duration,
    handler: Arc<Mutex<Option<PinEventHandler>>>,
    context: ProcessContext,
}

impl GpioPinEventObserver {
    /// Creates a stopped observer for `pin`.
    pub fn new(name: impl Into<String>, pin: Arc<GpioPin>, config: &ObserverConfig) -> Self {
        Self {
            pin,
            timeout: config.max_observation_timeout,
            handler: Arc::new(Mutex::new(None)),
            context: ProcessContext::new(name),
        }
    }

    /// The observed pin.
    pub fn pin(&self) -> &Arc<GpioPin> {
        &self.pin
    }

    /// Install the callback. May be replaced while running.
    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: FnMut(PinEvent, &Identifier) + Send + 'static,
    {
        *self.handler.lock() = Some(Box::new(handler));
    }

    /// Start observing.
    ///
    /// Starting a running observer is a programming error: it trips a debug
    /// assertion and returns [`ProcessError::Running`] in release builds.
    pub fn start(&self) -> Result<(), ProcessError> {
        debug_assert!(
            !self.context.is_running(),
            "observer {} started twice",
            self.context.name()
        );

        let pin = Arc::clone(&self.pin);
        let handler = Arc::clone(&self.handler);
        let timeout = self.timeout;
        let pin_id: Identifier = pin.id().to_owned();

        self.context.set_process_runner(move |stop| {
            while !stop.is_raised() {
                match pin.wait_for_event(timeout) {
                    Ok(PinEvent::Timeout) => {}
                    Ok(event) => {
                        log::trace!("observer {}: {:?}", pin_id, event);
                        if let Some(handler) = handler.lock().as_mut() {
                            handler(event, &pin_id);
                        }
                    }
                    Err(err) => {
                        log::error!("observer {}: wait failed: {}", pin_id, err);
                        // Back off instead of spinning on a broken line.
                        stop.wait_timeout(timeout);
                    }
                }
            }
        })?;
        self.context.start()
    }

    /// Stop observing and join the thread. Returns false if not running.
    pub fn stop(&self) -> bool {
        self.context.stop()
    }

    /// Returns true while the observer thread runs.
    pub fn is_running(&self) -> bool {
        self.context.is_running()
    }
}
