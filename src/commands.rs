//! Command, notification and response types exchanged through the broker.
//!
//! # Command Flow
//!
//! 1. A component calls [`ServiceComponent::send`](crate::services::ServiceComponent::send)
//!    with a command id and a serializable parameter struct
//! 2. The broker delivers the [`Command`] to the receiver's handler
//! 3. The handler decodes [`Command::params`], pushes at most one FSM event,
//!    and answers with a [`CommandResponse`]
//!
//! The response says whether the request was *accepted*, not whether the
//! hardware action has finished. Completion is reported later through
//! notifications, which reuse the [`Command`] type.
//!
//! Parameters travel as JSON text; this crate does not define the broker's
//! wire encoding of the envelope itself.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Identifier;

// ============================================================================
// Command
// ============================================================================

/// A named request (or notification) with an opaque JSON parameter blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command or notification name (e.g. `switch-on`)
    pub id: String,
    /// Identifier of the sending component
    pub sender: Identifier,
    /// JSON-encoded parameters (empty for none)
    #[serde(default)]
    pub params: String,
}

impl Command {
    /// Creates a command without parameters.
    pub fn new(id: impl Into<String>, sender: impl Into<Identifier>) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            params: String::new(),
        }
    }

    /// Attach already-encoded parameters.
    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }

    /// Encode `params` as JSON and attach them.
    ///
    /// ```rust
    /// use filament_core::commands::Command;
    /// use filament_core::messages::StartMotorRequest;
    ///
    /// let cmd = Command::new("start-motor", "ui")
    ///     .with_json(&StartMotorRequest::continuous(60.0))
    ///     .unwrap();
    /// let req: StartMotorRequest = cmd.params_as().unwrap();
    /// assert_eq!(req.speed_rpm, 60.0);
    /// ```
    pub fn with_json<T: Serialize>(self, params: &T) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_string(params)?;
        Ok(self.with_params(encoded))
    }

    /// Decode the parameters.
    ///
    /// An empty blob decodes as JSON `null`, so types with all-optional
    /// fields still work for parameterless commands.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if self.params.trim().is_empty() {
            serde_json::from_str("null")
        } else {
            serde_json::from_str(&self.params)
        }
    }

    /// Same parameters under a new name and sender (used by `forward`).
    pub fn renamed(&self, id: impl Into<String>, sender: impl Into<Identifier>) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            params: self.params.clone(),
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Outcome category of a handled command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResult {
    /// Request accepted.
    Success,
    /// The receiver has no handler for this command id.
    Unsupported,
    /// Parameters could not be decoded or were out of range.
    InvalidParameter,
    /// Valid request refused in the receiver's current state.
    Rejected,
    /// The receiver tried and failed.
    Failed,
}

impl CommandResult {
    /// Returns the snake_case name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandResult::Success => "success",
            CommandResult::Unsupported => "unsupported",
            CommandResult::InvalidParameter => "invalid_parameter",
            CommandResult::Rejected => "rejected",
            CommandResult::Failed => "failed",
        }
    }
}

/// Answer to a [`Command`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Outcome category
    pub result: CommandResult,
    /// Result data or error description (may be empty)
    #[serde(default)]
    pub payload: String,
}

impl CommandResponse {
    /// Accepted, no payload.
    pub fn success() -> Self {
        Self::with(CommandResult::Success, "")
    }

    /// Accepted with a payload.
    pub fn success_with(payload: impl Into<String>) -> Self {
        Self::with(CommandResult::Success, payload)
    }

    /// Canonical answer for a command id the receiver does not handle.
    pub fn unsupported(command_id: &str) -> Self {
        Self::with(
            CommandResult::Unsupported,
            format!("unsupported command: {}", command_id),
        )
    }

    /// Bad parameters.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::with(CommandResult::InvalidParameter, reason)
    }

    /// Refused in the current state.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::with(CommandResult::Rejected, reason)
    }

    /// Attempted and failed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::with(CommandResult::Failed, reason)
    }

    fn with(result: CommandResult, payload: impl Into<String>) -> Self {
        Self {
            result,
            payload: payload.into(),
        }
    }

    /// Returns true for [`CommandResult::Success`].
    pub fn is_success(&self) -> bool {
        self.result == CommandResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Speed {
        rpm: f64,
    }

    // =========================================================================
    // Command Tests
    // =========================================================================

    #[test]
    fn json_params_decode() {
        let cmd = Command::new("start", "ui")
            .with_json(&Speed { rpm: 12.5 })
            .unwrap();
        assert_eq!(cmd.params_as::<Speed>().unwrap(), Speed { rpm: 12.5 });
    }

    #[test]
    fn empty_params_decode_as_null() {
        let cmd = Command::new("stop", "ui");
        assert_eq!(cmd.params_as::<Option<Speed>>().unwrap(), None);
        assert!(cmd.params_as::<Speed>().is_err());
    }

    #[test]
    fn malformed_params_fail() {
        let cmd = Command::new("start", "ui").with_params("{rpm:");
        assert!(cmd.params_as::<Speed>().is_err());
    }

    #[test]
    fn renamed_keeps_params() {
        let cmd = Command::new("start", "ui").with_params(r#"{"rpm":1.0}"#);
        let forwarded = cmd.renamed("start-motor", "feeder");
        assert_eq!(forwarded.id, "start-motor");
        assert_eq!(forwarded.sender, "feeder");
        assert_eq!(forwarded.params, cmd.params);
    }

    // =========================================================================
    // Response Tests
    // =========================================================================

    #[test]
    fn unsupported_names_command() {
        let response = CommandResponse::unsupported("fly");
        assert_eq!(response.result, CommandResult::Unsupported);
        assert!(response.payload.contains("fly"));
        assert!(!response.is_success());
    }

    #[test]
    fn result_serializes_snake_case() {
        let json = serde_json::to_string(&CommandResponse::invalid("bad")).unwrap();
        assert!(json.contains("\"invalid_parameter\""));
        assert_eq!(CommandResult::InvalidParameter.as_str(), "invalid_parameter");
    }
}
