//! Service components: broker-connected units of machine behaviour.
//!
//! - [`ServiceComponent`]: identifier, broker connection and command handlers
//! - [`StatedServiceComponent`]: a service component driven by its own
//!   [`StateMachine`](crate::state_machine::StateMachine) thread
//! - [`LocalBroker`]: in-process [`MessageBroker`](crate::traits::MessageBroker)
//! - [`FilamentFeederMotor`] and [`FilamentMergerHeater`]: the concrete
//!   machine components
//!
//! # Wiring
//!
//! ```rust
//! use std::sync::Arc;
//! use filament_core::commands::{Command, CommandResult};
//! use filament_core::services::{LocalBroker, ServiceComponent};
//! use filament_core::traits::MessageBroker;
//!
//! let broker = Arc::new(LocalBroker::new());
//! let ui = ServiceComponent::new("ui", broker.clone());
//! ui.connect();
//!
//! let response = broker.send(&Command::new("beep", "remote"), "ui");
//! assert_eq!(response.unwrap().result, CommandResult::Unsupported);
//! ```

pub mod component;
pub mod feeder;
pub mod heater;
pub mod local_broker;
pub mod stated;

pub use component::{CommandHandlerFn, Notifier, ServiceComponent};
pub use feeder::{FeederEvent, FeederState, FilamentFeederMotor, FEEDER_STATE_NOTIFICATION};
pub use heater::{FilamentMergerHeater, HeaterEvent, HeaterState, HEATER_STATE_NOTIFICATION};
pub use local_broker::LocalBroker;
pub use stated::{StatedServiceComponent, GET_STATE_COMMAND};
