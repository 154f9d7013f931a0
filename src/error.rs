//! Error types for the service-component core.
//!
//! Each layer has its own error enum:
//!
//! | Error | Raised by |
//! |-------|-----------|
//! | [`ConfigError`] | [`Configuration`](crate::config::Configuration) lookups |
//! | [`HalError`] | HAL object `init` and driver calls |
//! | [`ProcessError`] | [`ProcessContext`](crate::process::ProcessContext) start/stop |
//! | [`BrokerError`] | [`MessageBroker`](crate::traits::MessageBroker) delivery |

use crate::config::Identifier;

/// Result type alias for the HAL layer.
pub type Result<T> = std::result::Result<T, HalError>;

/// Configuration lookup errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// No option with this name exists.
    #[error("option not found: {0}")]
    NotFound(String),

    /// The option exists but holds a different type.
    #[error("option {name}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Full option name
        name: String,
        /// Requested type
        expected: &'static str,
        /// Stored value type
        found: &'static str,
    },

    /// The option has the right type but an unusable value.
    #[error("option {name}: invalid value {value:?}")]
    InvalidValue {
        /// Full option name
        name: String,
        /// Offending value, rendered as text
        value: String,
    },

    /// A JSON document could not be flattened into options.
    #[error("configuration root must be a JSON object")]
    NotAnObject,
}

/// HAL object and driver errors.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Bus, chip or device could not be opened.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Operation on an object whose `init` has not succeeded.
    #[error("{0} is not initialized")]
    NotInitialized(Identifier),

    /// An enabled sub-component failed its `init`.
    #[error("sub-component {id} failed to initialize: {source}")]
    SubComponent {
        /// Identifier of the failing child
        id: Identifier,
        /// Underlying failure
        #[source]
        source: Box<HalError>,
    },

    /// Driver-level I/O failure.
    #[error("driver error: {0}")]
    Driver(String),

    /// Operation not valid in the object's current mode (e.g. writing an input pin).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Argument outside the accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Process context errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The context is already running.
    #[error("process context {0} is already running")]
    Running(String),

    /// The context has no runner installed.
    #[error("process context {0} has no runner")]
    NoRunner(String),

    /// The OS refused to spawn the thread.
    #[error("failed to spawn thread for {name}: {source}")]
    Spawn {
        /// Context name
        name: String,
        /// OS error
        #[source]
        source: std::io::Error,
    },
}

/// Message broker delivery errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// No component is registered under this identifier.
    #[error("unknown receiver: {0}")]
    UnknownReceiver(Identifier),

    /// The broker could not deliver the message.
    #[error("delivery to {receiver} failed: {reason}")]
    Delivery {
        /// Intended receiver
        receiver: Identifier,
        /// Failure description
        reason: String,
    },
}
