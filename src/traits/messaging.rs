//! Message broker abstraction consumed by service components.
//!
//! Components never talk to each other directly: every command and
//! notification goes through a [`MessageBroker`]. The broker's own transport
//! (in-process, a service gateway, a remote-control web socket) is hidden
//! behind this trait.
//!
//! # Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`MessageBroker`] | Routes commands to one receiver and notifications to many |
//! | [`CommandHandler`] | Receiving side, implemented by service components |
//!
//! # Delivery Model
//!
//! ```text
//! sender ── send(cmd, "heater") ──▶ broker ──▶ heater.handle(cmd) ──┐
//!        ◀───────────────────── CommandResponse ◀──────────────────┘
//!
//! heater ── notify("heater-state", subscribers) ──▶ broker ──▶ ui.handle(..)
//!                                                          └─▶ log.handle(..)
//! ```
//!
//! Brokers hold handlers weakly; a component that has been dropped simply
//! stops receiving.

use std::sync::Weak;

use crate::commands::{Command, CommandResponse};
use crate::config::Identifier;
use crate::error::BrokerError;

/// Receiving side of the broker.
pub trait CommandHandler: Send + Sync {
    /// Handle one command or notification.
    ///
    /// Must not fail: unknown ids answer with
    /// [`CommandResponse::unsupported`].
    fn handle(&self, command: &Command) -> CommandResponse;
}

/// Routes commands and notifications between components.
pub trait MessageBroker: Send + Sync {
    /// Register the handler for component `id`, replacing any previous one.
    fn register(&self, id: &str, handler: Weak<dyn CommandHandler>);

    /// Remove component `id` and its subscriptions. Returns false if it was
    /// not registered.
    fn unregister(&self, id: &str) -> bool;

    /// Deliver `command` to `receiver` and wait for its response.
    fn send(&self, command: &Command, receiver: &str) -> Result<CommandResponse, BrokerError>;

    /// Best-effort delivery of `notification` to every receiver.
    ///
    /// Returns whether the broker accepted the notification for
    /// distribution, not whether every receiver handled it.
    fn notify(&self, notification: &Command, receivers: &[Identifier]) -> bool;

    /// Subscribe `subscriber` to notifications named `notification_id`.
    fn subscribe(&self, notification_id: &str, subscriber: &str);

    /// Current subscribers of `notification_id`, in subscription order.
    fn subscribers(&self, notification_id: &str) -> Vec<Identifier>;
}
