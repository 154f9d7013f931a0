//! Parameter and notification payloads carried in [`Command::params`].
//!
//! All types serialize to JSON with `serde_json`.
//!
//! # Example
//!
//! ```
//! use filament_core::messages::StartMotorRequest;
//!
//! let json = r#"{"speed_rpm": 30.0, "steps": 400}"#;
//! let req: StartMotorRequest = serde_json::from_str(json).unwrap();
//! assert_eq!(req.steps, Some(400));
//! ```
//!
//! [`Command::params`]: crate::commands::Command::params

use serde::{Deserialize, Serialize};

use crate::config::Identifier;
use crate::hal::stepper::MIN_SPEED_RPM;

// ============================================================================
// Request Types
// ============================================================================

/// Parameters of the feeder's `start-motor` command.
///
/// # JSON Examples
///
/// Run until `stop-motor`:
/// ```json
/// {"speed_rpm": 60.0}
/// ```
///
/// Feed a fixed number of steps:
/// ```json
/// {"speed_rpm": 30.0, "steps": 400}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StartMotorRequest {
    /// Motor speed in revolutions per minute
    pub speed_rpm: f64,
    /// Steps to feed; `None` feeds until stopped
    #[serde(default)]
    pub steps: Option<u64>,
}

impl StartMotorRequest {
    /// Feed until stopped.
    pub fn continuous(speed_rpm: f64) -> Self {
        Self {
            speed_rpm,
            steps: None,
        }
    }

    /// Feed a fixed number of steps.
    pub fn steps(speed_rpm: f64, steps: u64) -> Self {
        Self {
            speed_rpm,
            steps: Some(steps),
        }
    }

    /// Check the request is usable.
    ///
    /// The speed must be finite and at least [`MIN_SPEED_RPM`].
    pub fn validate(&self) -> Result<(), String> {
        if !(self.speed_rpm.is_finite() && self.speed_rpm >= MIN_SPEED_RPM) {
            return Err(format!(
                "speed_rpm must be at least {}, got {}",
                MIN_SPEED_RPM, self.speed_rpm
            ));
        }
        if self.steps == Some(0) {
            return Err("steps must be at least 1".into());
        }
        Ok(())
    }
}

/// Parameters of the heater's `set-temperature` command.
///
/// ```json
/// {"target_c": 215.0}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetTemperatureRequest {
    /// Target temperature in °C
    pub target_c: f64,
}

// ============================================================================
// Notification Types
// ============================================================================

/// Published by stated components after every state change, and returned
/// by their `get-state` command.
///
/// ```json
/// {"component": "feeder", "state": "running", "previous": "on"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNotification {
    /// Component identifier
    pub component: Identifier,
    /// Current state name
    pub state: String,
    /// State before the change (absent for `get-state`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

impl StateNotification {
    /// Snapshot without a previous state.
    pub fn current(component: impl Into<Identifier>, state: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            state: state.into(),
            previous: None,
        }
    }

    /// A change from `previous` to `state`.
    pub fn changed(
        component: impl Into<Identifier>,
        previous: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            state: state.into(),
            previous: Some(previous.into()),
        }
    }
}
