//! In-process message broker.
//!
//! [`LocalBroker`] delivers commands by calling the receiver's handler
//! directly on the sender's thread. Handlers are held weakly; subscriptions
//! are kept per notification id in subscription order and go away when the
//! subscriber unregisters.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::commands::{Command, CommandResponse};
use crate::config::Identifier;
use crate::error::BrokerError;
use crate::traits::{CommandHandler, MessageBroker};

/// Synchronous broker for components living in one process.
#[derive(Default)]
pub struct LocalBroker {
    handlers: RwLock<HashMap<Identifier, Weak<dyn CommandHandler>>>,
    subscriptions: RwLock<HashMap<String, Vec<Identifier>>>,
}

impl LocalBroker {
    /// Creates a broker with no components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers of registered components whose handler is still alive.
    pub fn components(&self) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, handler)| handler.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn resolve(&self, receiver: &str) -> Result<Arc<dyn CommandHandler>, BrokerError> {
        let weak = self
            .handlers
            .read()
            .get(receiver)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownReceiver(receiver.to_owned()))?;
        weak.upgrade().ok_or_else(|| BrokerError::Delivery {
            receiver: receiver.to_owned(),
            reason: "component dropped".into(),
        })
    }
}

impl MessageBroker for LocalBroker {
    fn register(&self, id: &str, handler: Weak<dyn CommandHandler>) {
        if self
            .handlers
            .write()
            .insert(id.to_owned(), handler)
            .is_some()
        {
            log::debug!("broker: replaced handler for {}", id);
        }
    }

    fn unregister(&self, id: &str) -> bool {
        let removed = self.handlers.write().remove(id).is_some();
        let mut subscriptions = self.subscriptions.write();
        for subscribers in subscriptions.values_mut() {
            subscribers.retain(|subscriber| subscriber != id);
        }
        subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        removed
    }

    fn send(&self, command: &Command, receiver: &str) -> Result<CommandResponse, BrokerError> {
        let handler = self.resolve(receiver)?;
        log::trace!("broker: {} -> {}: {}", command.sender, receiver, command.id);
        Ok(handler.handle(command))
    }

    fn notify(&self, notification: &Command, receivers: &[Identifier]) -> bool {
        for receiver in receivers {
            match self.resolve(receiver) {
                Ok(handler) => {
                    let response = handler.handle(notification);
                    if !response.is_success() {
                        log::debug!(
                            "broker: {} answered {} with {}",
                            receiver,
                            notification.id,
                            response.result.as_str()
                        );
                    }
                }
                Err(err) => log::debug!("broker: {} not delivered: {}", notification.id, err),
            }
        }
        true
    }

    fn subscribe(&self, notification_id: &str, subscriber: &str) {
        let mut subscriptions = self.subscriptions.write();
        let subscribers = subscriptions.entry(notification_id.to_owned()).or_default();
        if !subscribers.iter().any(|s| s == subscriber) {
            subscribers.push(subscriber.to_owned());
        }
    }

    fn subscribers(&self, notification_id: &str) -> Vec<Identifier> {
        self.subscriptions
            .read()
            .get(notification_id)
            .cloned()
            .unwrap_or_default()
    }
}
