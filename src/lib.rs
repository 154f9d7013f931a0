//! # filament-core
//!
//! Service-component execution model for a filament-processing machine.
//!
//! The machine is built from independently running **service components**
//! (feeder motor, merger heater, user interface, ...). Each one wraps a
//! piece of hardware or a coordination role, talks to the others only
//! through command and notification messages, and is driven internally by
//! a finite state machine running on its own thread.
//!
//! ## Features
//!
//! - **State machines**: table-driven transitions with actions and guards,
//!   fed by a thread-safe FIFO event queue
//! - **Process contexts**: named threads with prompt, joinable stop
//! - **HAL lifecycle**: two-phase `init`/`finalize` objects, built from a
//!   flat dotted configuration with all-or-nothing sub-component setup
//! - **Hardware backends**: driver traits plus an injected simulator
//! - **Messaging**: command handlers, notifications, an in-process broker
//!
//! ## Architecture
//!
//! - `config` - Typed option sets, prefix extraction, tuning structs
//! - `event_queue` / `state_machine` - FIFO queue and transition tables
//! - `process` - Thread ownership and stop signals
//! - `hal` - GPIO, stepper and temperature sensor controls, pin observer
//! - `traits` - Driver and broker seams
//! - `services` - Service components and the concrete machine components
//! - `locator` - Weak, type-indexed service lookup
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use filament_core::{
//!     commands::Command,
//!     config::{Configuration, HeaterConfig},
//!     hal::{GpioControl, HalObject, SimHardware, Simulation},
//!     services::{FilamentMergerHeater, HeaterState, LocalBroker},
//!     traits::MessageBroker,
//! };
//!
//! let sim = Arc::new(Simulation::new());
//! let config = Configuration::from_json(&serde_json::json!({
//!     "chip": "gpiochip0",
//!     "gpio-pin": { "element": { "line": 2, "direction": "out" } }
//! }))
//! .unwrap();
//!
//! let mut gpio = GpioControl::new("gpio");
//! gpio.init(&config, Arc::new(SimHardware::new(Arc::clone(&sim)))).unwrap();
//!
//! let broker = Arc::new(LocalBroker::new());
//! let heater = FilamentMergerHeater::new(
//!     "heater",
//!     broker.clone(),
//!     Arc::clone(gpio.gpio_pin("element").unwrap()),
//!     &HeaterConfig::default(),
//! )
//! .unwrap();
//! heater.start().unwrap();
//!
//! let response = broker.send(&Command::new("switch-on", "ui"), "heater").unwrap();
//! assert!(response.is_success());
//!
//! while heater.current_state() != HeaterState::Heating {
//!     std::thread::yield_now();
//! }
//! assert!(sim.line_level("gpiochip0", 2));
//! heater.stop();
//! ```

#![warn(missing_docs)]

/// Command and response envelopes.
pub mod commands;
/// Configuration options, prefix extraction and tuning structs.
pub mod config;
/// Error types.
pub mod error;
/// Thread-safe FIFO event queue.
pub mod event_queue;
/// Hardware abstraction layer objects and the simulator backend.
pub mod hal;
/// Weak, type-indexed service lookup.
pub mod locator;
/// Serde payloads for commands and notifications.
pub mod messages;
/// Named worker threads with joinable stop.
pub mod process;
/// Service components and the concrete machine components.
pub mod services;
/// Table-driven finite state machine.
pub mod state_machine;
/// Driver and messaging traits.
pub mod traits;

/// Process context hosting a tokio runtime.
#[cfg(feature = "io-context")]
pub mod io_context;

// Re-exports for convenience
pub use commands::{Command, CommandResponse, CommandResult};
pub use config::{ConfigOption, Configuration, HeaterConfig, Identifier, ObserverConfig, OptionValue};
pub use error::{BrokerError, ConfigError, HalError, ProcessError};
pub use event_queue::EventQueue;
pub use hal::{HalMap, HalObject, SubComponent};
pub use locator::ServiceLocator;
pub use process::{ProcessContext, StopSignal};
pub use services::{
    FilamentFeederMotor, FilamentMergerHeater, LocalBroker, ServiceComponent, StatedServiceComponent,
};
pub use state_machine::{Dispatch, StateMachine, StateMachineHandle, Transition, TransitionTable};

#[cfg(feature = "io-context")]
pub use io_context::IoContext;
