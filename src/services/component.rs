//! Broker-connected service component.
//!
//! A [`ServiceComponent`] is the messaging half of every machine function.
//! It owns a table of command handlers and turns:
//!
//! - incoming [`Command`]s into typed [`CommandResponse`]s ([`handle_command`])
//! - outgoing requests into broker `send` calls ([`send`], [`forward`])
//! - outgoing events into broker `notify` calls ([`notify`], [`Notifier`])
//!
//! Handlers return `anyhow::Result` so parameter decoding can use `?`; an
//! `Err` is answered with [`CommandResult::InvalidParameter`] and the error
//! chain as payload. Unknown command ids get the canonical
//! [`CommandResponse::unsupported`] answer.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use filament_core::commands::{Command, CommandResponse, CommandResult};
//! use filament_core::services::{LocalBroker, ServiceComponent};
//!
//! let broker = Arc::new(LocalBroker::new());
//! let echo = ServiceComponent::new("echo", broker.clone());
//! echo.register_handler("echo", |cmd: &Command| Ok(CommandResponse::success_with(cmd.params.clone())));
//! echo.connect();
//!
//! let ui = ServiceComponent::new("ui", broker);
//! let response = ui.send("echo", "hello", "echo").unwrap();
//! assert_eq!(response.payload, "hello");
//!
//! let response = ui.send("shout", "", "echo").unwrap();
//! assert_eq!(response.result, CommandResult::Unsupported);
//! ```
//!
//! [`handle_command`]: ServiceComponent::handle_command
//! [`send`]: ServiceComponent::send
//! [`forward`]: ServiceComponent::forward
//! [`notify`]: ServiceComponent::notify
//! [`CommandResult::InvalidParameter`]: crate::commands::CommandResult::InvalidParameter

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;

use crate::commands::{Command, CommandResponse};
use crate::config::Identifier;
use crate::error::BrokerError;
use crate::traits::{CommandHandler, MessageBroker};

/// Handler for one command id.
pub type CommandHandlerFn = dyn Fn(&Command) -> anyhow::Result<CommandResponse> + Send + Sync;

// ============================================================================
// Notifier
// ============================================================================

/// Cloneable notification sender, for use inside transition actions and
/// other threads.
#[derive(Clone)]
pub struct Notifier {
    sender: Identifier,
    broker: Arc<dyn MessageBroker>,
}

impl Notifier {
    /// Creates a notifier publishing as `sender`.
    pub fn new(sender: impl Into<Identifier>, broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            sender: sender.into(),
            broker,
        }
    }

    /// Publish to every subscriber of `notification_id`.
    ///
    /// Returns whether the broker accepted the notification.
    pub fn notify(&self, notification_id: &str, params: impl Into<String>) -> bool {
        let notification = Command::new(notification_id, self.sender.as_str()).with_params(params);
        let receivers = self.broker.subscribers(notification_id);
        log::trace!(
            "{}: notify {} to {} subscribers",
            self.sender,
            notification_id,
            receivers.len()
        );
        self.broker.notify(&notification, &receivers)
    }

    /// Publish a JSON-encoded payload.
    pub fn notify_json<T: Serialize>(&self, notification_id: &str, params: &T) -> bool {
        match serde_json::to_string(params) {
            Ok(encoded) => self.notify(notification_id, encoded),
            Err(err) => {
                log::error!("{}: cannot encode {}: {}", self.sender, notification_id, err);
                false
            }
        }
    }
}

// ============================================================================
// Service Component
// ============================================================================

struct ComponentCore {
    id: Identifier,
    broker: Arc<dyn MessageBroker>,
    handlers: RwLock<HashMap<String, Arc<CommandHandlerFn>>>,
}

impl CommandHandler for ComponentCore {
    fn handle(&self, command: &Command) -> CommandResponse {
        // Clone out so a handler may register further handlers.
        let handler = self.handlers.read().get(&command.id).cloned();
        let Some(handler) = handler else {
            log::warn!(
                "{}: unsupported command {} from {}",
                self.id,
                command.id,
                command.sender
            );
            return CommandResponse::unsupported(&command.id);
        };

        match handler(command) {
            Ok(response) => {
                log::debug!(
                    "{}: {} from {} -> {}",
                    self.id,
                    command.id,
                    command.sender,
                    response.result.as_str()
                );
                response
            }
            Err(err) => {
                log::warn!("{}: {} rejected: {:#}", self.id, command.id, err);
                CommandResponse::invalid(format!("{:#}", err))
            }
        }
    }
}

/// Messaging core of a machine component.
///
/// Cheap to clone; clones share the handler table and broker registration.
/// Handlers must not capture the component itself (that would keep it alive
/// forever); capture a [`Notifier`] or a state machine handle instead.
#[derive(Clone)]
pub struct ServiceComponent {
    core: Arc<ComponentCore>,
}

impl ServiceComponent {
    /// Creates a component that is not yet registered with `broker`.
    pub fn new(id: impl Into<Identifier>, broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            core: Arc::new(ComponentCore {
                id: id.into(),
                broker,
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Component identifier (also its broker address).
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// The broker this component talks through.
    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.core.broker
    }

    /// Register this component with the broker so it can receive commands.
    pub fn connect(&self) {
        let handler: Weak<dyn CommandHandler> = Arc::downgrade(&self.core) as Weak<dyn CommandHandler>;
        self.core.broker.register(&self.core.id, handler);
        log::info!("{}: connected", self.core.id);
    }

    /// Remove this component from the broker.
    pub fn disconnect(&self) -> bool {
        self.core.broker.unregister(&self.core.id)
    }

    /// Receive notifications named `notification_id` from now on.
    pub fn subscribe(&self, notification_id: &str) {
        self.core.broker.subscribe(notification_id, &self.core.id);
    }

    /// Install the handler for `command_id`, replacing any previous one.
    pub fn register_handler<F>(&self, command_id: impl Into<String>, handler: F)
    where
        F: Fn(&Command) -> anyhow::Result<CommandResponse> + Send + Sync + 'static,
    {
        self.core
            .handlers
            .write()
            .insert(command_id.into(), Arc::new(handler));
    }

    /// Returns true if a handler exists for `command_id`.
    pub fn supports(&self, command_id: &str) -> bool {
        self.core.handlers.read().contains_key(command_id)
    }

    /// Dispatch `command` to its handler.
    pub fn handle_command(&self, command: &Command) -> CommandResponse {
        self.core.handle(command)
    }

    /// Send `command_id` with encoded `params` to `receiver` and wait for the
    /// response.
    ///
    /// A delivery failure is a broken deployment: it trips a debug assertion
    /// and is returned as the broker's error in release builds.
    pub fn send(
        &self,
        command_id: &str,
        params: impl Into<String>,
        receiver: &str,
    ) -> Result<CommandResponse, BrokerError> {
        let command = Command::new(command_id, self.core.id.as_str()).with_params(params);
        self.deliver(&command, receiver)
    }

    /// Re-send `command` under the name `command_id`, keeping its parameters.
    pub fn forward(
        &self,
        command_id: &str,
        command: &Command,
        receiver: &str,
    ) -> Result<CommandResponse, BrokerError> {
        let forwarded = command.renamed(command_id, self.core.id.as_str());
        self.deliver(&forwarded, receiver)
    }

    fn deliver(&self, command: &Command, receiver: &str) -> Result<CommandResponse, BrokerError> {
        let result = self.core.broker.send(command, receiver);
        if let Err(err) = &result {
            log::error!("{}: {} to {} failed: {}", self.core.id, command.id, receiver, err);
            debug_assert!(false, "{}: broker delivery failed: {}", self.core.id, err);
        }
        result
    }

    /// Publish to every subscriber of `notification_id`.
    pub fn notify(&self, notification_id: &str, params: impl Into<String>) -> bool {
        self.notifier().notify(notification_id, params)
    }

    /// Cloneable notification sender for this component.
    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.core.id.clone(), Arc::clone(&self.core.broker))
    }
}

impl std::fmt::Debug for ServiceComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<String> = self.core.handlers.read().keys().cloned().collect();
        commands.sort();
        f.debug_struct("ServiceComponent")
            .field("id", &self.core.id)
            .field("commands", &commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandResult;
    use crate::services::LocalBroker;
    use anyhow::Context;
    use parking_lot::Mutex;

    fn broker() -> Arc<LocalBroker> {
        Arc::new(LocalBroker::new())
    }

    // =========================================================================
    // Handler Tests
    // =========================================================================

    #[test]
    fn unknown_command_is_unsupported() {
        let component = ServiceComponent::new("heater", broker());
        let response = component.handle_command(&Command::new("fly", "ui"));
        assert_eq!(response, CommandResponse::unsupported("fly"));
    }

    #[test]
    fn handler_error_becomes_invalid_parameter() {
        let component = ServiceComponent::new("heater", broker());
        component.register_handler("set", |cmd: &Command| {
            let value: f64 = cmd.params_as().context("decoding set")?;
            Ok(CommandResponse::success_with(value.to_string()))
        });

        let response = component.handle_command(&Command::new("set", "ui").with_params("nope"));
        assert_eq!(response.result, CommandResult::InvalidParameter);
        assert!(response.payload.starts_with("decoding set"));

        let response = component.handle_command(&Command::new("set", "ui").with_params("2.5"));
        assert_eq!(response, CommandResponse::success_with("2.5"));
    }

    #[test]
    fn register_replaces_handler() {
        let component = ServiceComponent::new("c", broker());
        component.register_handler("x", |_: &Command| Ok(CommandResponse::failed("old")));
        component.register_handler("x", |_: &Command| Ok(CommandResponse::success()));
        assert!(component.supports("x"));
        assert!(component.handle_command(&Command::new("x", "t")).is_success());
    }

    // =========================================================================
    // Broker Interaction Tests
    // =========================================================================

    #[test]
    fn forward_renames_and_keeps_params() {
        let broker = broker();
        let seen = Arc::new(Mutex::new(None));
        let motor = ServiceComponent::new("motor", broker.clone());
        let sink = Arc::clone(&seen);
        motor.register_handler("start-motor", move |cmd: &Command| {
            *sink.lock() = Some(cmd.clone());
            Ok(CommandResponse::success())
        });
        motor.connect();

        let feeder = ServiceComponent::new("feeder", broker);
        let original = Command::new("feed", "ui").with_params(r#"{"speed_rpm":5.0}"#);
        assert!(feeder.forward("start-motor", &original, "motor").unwrap().is_success());

        let received = seen.lock().clone().unwrap();
        assert_eq!(received.id, "start-motor");
        assert_eq!(received.sender, "feeder");
        assert_eq!(received.params, original.params);
    }

    #[test]
    fn notify_reaches_subscribers() {
        let broker = broker();
        let count = Arc::new(Mutex::new(0));
        let ui = ServiceComponent::new("ui", broker.clone());
        let sink = Arc::clone(&count);
        ui.register_handler("heater-state", move |_: &Command| {
            *sink.lock() += 1;
            Ok(CommandResponse::success())
        });
        ui.connect();
        ui.subscribe("heater-state");

        let heater = ServiceComponent::new("heater", broker);
        assert!(heater.notify("heater-state", "{}"));
        assert!(heater.notifier().notify_json("heater-state", &[1, 2]));
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn dropped_component_stops_receiving() {
        let broker = broker();
        let target = ServiceComponent::new("target", broker.clone());
        target.register_handler("ping", |_: &Command| Ok(CommandResponse::success()));
        target.connect();

        let sender = ServiceComponent::new("sender", broker.clone());
        assert!(sender.send("ping", "", "target").unwrap().is_success());

        drop(target);
        assert!(broker.send(&Command::new("ping", "sender"), "target").is_err());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "broker delivery failed")]
    fn send_to_unknown_receiver_asserts_in_debug() {
        let component = ServiceComponent::new("c", broker());
        let _ = component.send("ping", "", "nobody");
    }
}
