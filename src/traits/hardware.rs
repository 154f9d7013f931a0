//! Hardware driver abstraction for GPIO, stepper motor HATs and SPI buses.
//!
//! These traits are the narrow surface the HAL objects in [`crate::hal`] call.
//! Every backend (real board drivers or the simulator in [`crate::hal::sim`])
//! implements the same set, so controllers never know which one they run on.
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`HardwareProvider`] | Opens chips and buses by name |
//! | [`GpioChip`] | Hands out GPIO lines |
//! | [`GpioLine`] | Read, write, wait for edge events |
//! | [`MotorHat`] | Single steps and coil release on a stepper port |
//! | [`SpiBus`] | Full-duplex byte transfer |
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use filament_core::hal::sim::{SimHardware, Simulation};
//! use filament_core::traits::{HardwareProvider, PinDirection, PinEdge, PinEvent};
//!
//! let sim = Arc::new(Simulation::new());
//! let hardware = SimHardware::new(Arc::clone(&sim));
//!
//! let chip = hardware.open_gpio_chip("gpiochip0").unwrap();
//! let line = chip.request_line(4, PinDirection::Input, PinEdge::Both, "doc").unwrap();
//!
//! sim.drive_line("gpiochip0", 4, true);
//! assert_eq!(line.wait_for_event(Duration::from_millis(10)).unwrap(), PinEvent::RisingEdge);
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

// ============================================================================
// GPIO Types
// ============================================================================

/// Direction of a GPIO line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PinDirection {
    /// Line is read.
    Input,
    /// Line is driven.
    Output,
}

impl PinDirection {
    /// Returns the configuration spelling (`"in"` / `"out"`).
    pub const fn as_str(&self) -> &'static str {
        match self {
            PinDirection::Input => "in",
            PinDirection::Output => "out",
        }
    }

    /// Parse the configuration spelling.
    ///
    /// Accepts `in`/`input` and `out`/`output`, trimmed and case-insensitive.
    ///
    /// ```
    /// use filament_core::traits::PinDirection;
    ///
    /// assert_eq!(PinDirection::from_text("in"), Some(PinDirection::Input));
    /// assert_eq!(PinDirection::from_text(" OUTPUT "), Some(PinDirection::Output));
    /// assert_eq!(PinDirection::from_text("both"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" | "input" => Some(PinDirection::Input),
            "out" | "output" => Some(PinDirection::Output),
            _ => None,
        }
    }
}

/// Which level changes an input line reports as events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PinEdge {
    /// No edge detection.
    #[default]
    None,
    /// Low to high.
    Rising,
    /// High to low.
    Falling,
    /// Either direction.
    Both,
}

impl PinEdge {
    /// Returns the configuration spelling.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PinEdge::None => "none",
            PinEdge::Rising => "rising",
            PinEdge::Falling => "falling",
            PinEdge::Both => "both",
        }
    }

    /// Parse the configuration spelling (trimmed, case-insensitive).
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Some(PinEdge::None),
            "rising" => Some(PinEdge::Rising),
            "falling" => Some(PinEdge::Falling),
            "both" => Some(PinEdge::Both),
            _ => None,
        }
    }

    /// Returns true if a change to `level` should be reported.
    pub const fn reports(&self, level: bool) -> bool {
        match self {
            PinEdge::None => false,
            PinEdge::Rising => level,
            PinEdge::Falling => !level,
            PinEdge::Both => true,
        }
    }
}

/// Result of waiting on a GPIO line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PinEvent {
    /// Line went high.
    RisingEdge,
    /// Line went low.
    FallingEdge,
    /// Nothing happened within the timeout.
    Timeout,
}

impl PinEvent {
    /// Event produced by a change to `level`.
    pub const fn for_level(level: bool) -> Self {
        if level {
            PinEvent::RisingEdge
        } else {
            PinEvent::FallingEdge
        }
    }
}

// ============================================================================
// Stepper Types
// ============================================================================

/// Rotation direction for a stepper motor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum StepDirection {
    /// Clockwise (positive position).
    #[default]
    Forward,
    /// Counter-clockwise (negative position).
    Backward,
}

impl StepDirection {
    /// Sign applied to position counting.
    pub const fn sign(&self) -> i64 {
        match self {
            StepDirection::Forward => 1,
            StepDirection::Backward => -1,
        }
    }
}

/// Coil drive pattern used for each step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum StepStyle {
    /// One coil at a time.
    Single,
    /// Two coils at a time (more torque).
    #[default]
    Double,
    /// Alternating single/double (half steps).
    Interleave,
    /// PWM microstepping.
    Microstep,
}

impl StepStyle {
    /// Parse the configuration spelling (trimmed, case-insensitive).
    ///
    /// ```
    /// use filament_core::traits::StepStyle;
    ///
    /// assert_eq!(StepStyle::from_text("interleave"), Some(StepStyle::Interleave));
    /// assert_eq!(StepStyle::from_text("Double"), Some(StepStyle::Double));
    /// assert_eq!(StepStyle::from_text("quarter"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Some(StepStyle::Single),
            "double" => Some(StepStyle::Double),
            "interleave" => Some(StepStyle::Interleave),
            "microstep" => Some(StepStyle::Microstep),
            _ => None,
        }
    }
}

// ============================================================================
// Driver Traits
// ============================================================================

/// A single requested GPIO line.
///
/// Dropping the line releases it back to its chip.
pub trait GpioLine: Send + Sync {
    /// Line offset on its chip.
    fn offset(&self) -> u32;

    /// Read the raw level.
    fn read(&self) -> Result<bool>;

    /// Drive the raw level. Fails on input lines.
    fn write(&self, level: bool) -> Result<()>;

    /// Block until an edge event arrives or `timeout` elapses.
    ///
    /// Returns [`PinEvent::Timeout`] when nothing happened.
    fn wait_for_event(&self, timeout: Duration) -> Result<PinEvent>;
}

/// A GPIO chip that hands out lines.
pub trait GpioChip: Send + Sync {
    /// Chip name (e.g. `gpiochip0`).
    fn name(&self) -> &str;

    /// Request exclusive use of a line.
    fn request_line(
        &self,
        offset: u32,
        direction: PinDirection,
        edge: PinEdge,
        consumer: &str,
    ) -> Result<Box<dyn GpioLine>>;
}

/// A stepper motor driver board with numbered ports.
pub trait MotorHat: Send + Sync {
    /// Bus name the board was opened on.
    fn bus(&self) -> &str;

    /// Number of motor ports on the board.
    fn port_count(&self) -> u8;

    /// Advance one step on `port`.
    fn step(&self, port: u8, direction: StepDirection, style: StepStyle) -> Result<()>;

    /// De-energize the coils on `port`.
    fn release(&self, port: u8) -> Result<()>;
}

/// A full-duplex SPI bus.
pub trait SpiBus: Send + Sync {
    /// Device path the bus was opened on.
    fn device(&self) -> &str;

    /// Clock out `tx` and return the bytes clocked in.
    fn transfer(&self, tx: &[u8]) -> Result<Vec<u8>>;
}

/// Factory for the driver objects of one hardware backend.
///
/// Controllers receive a provider in their `init` arguments and open the
/// device they exclusively own through it.
pub trait HardwareProvider: Send + Sync {
    /// Open a GPIO chip by name.
    fn open_gpio_chip(&self, name: &str) -> Result<Arc<dyn GpioChip>>;

    /// Open a stepper motor board on a bus.
    fn open_motor_hat(&self, bus: &str) -> Result<Arc<dyn MotorHat>>;

    /// Open an SPI bus device.
    fn open_spi_bus(&self, device: &str) -> Result<Arc<dyn SpiBus>>;
}
