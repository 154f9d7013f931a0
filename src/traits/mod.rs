//! Trait definitions for hardware drivers and message routing.
//!
//! This module defines the seams that keep the core independent of both the
//! board it runs on and the transport between components:
//!
//! - `hardware`: GPIO, stepper motor board and SPI driver primitives
//! - `messaging`: Message broker and command handler
//!
//! # Hardware Abstraction
//!
//! A [`HardwareProvider`] opens the devices a controller owns. Swapping the
//! provider swaps the backend; the simulator lives in [`crate::hal::sim`].
//!
//! # Messaging
//!
//! Service components implement [`CommandHandler`] and reach each other
//! through a [`MessageBroker`].

pub mod hardware;
pub mod messaging;

pub use hardware::*;
pub use messaging::*;
