//! GPIO controller and pins.
//!
//! [`GpioControl`] exclusively owns one GPIO chip and the [`GpioPin`]s built
//! from its configuration section:
//!
//! | Option | Type | Required | Meaning |
//! |--------|------|----------|---------|
//! | `chip` | text | yes | Chip name opened through the provider |
//! | `gpio-pin.<id>.line` | integer | yes | Line offset on the chip |
//! | `gpio-pin.<id>.direction` | text | yes | `in` or `out` |
//! | `gpio-pin.<id>.edge` | text | no | `none` (default), `rising`, `falling`, `both` |
//! | `gpio-pin.<id>.active-low` | bool | no | Invert logical level (default false) |
//! | `gpio-pin.<id>.enabled` | bool | no | Skip the pin when false |
//!
//! Pins speak *logical* levels: `true` means active. With `active-low` the
//! raw line level and the edge direction are inverted.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use filament_core::config::Configuration;
//! use filament_core::hal::{GpioControl, HalObject, SimHardware, Simulation};
//!
//! let json = serde_json::json!({
//!     "chip": "gpiochip0",
//!     "gpio-pin": {
//!         "heater": { "line": 17, "direction": "out" },
//!         "spare": { "line": 18, "direction": "in", "enabled": false }
//!     }
//! });
//! let config = Configuration::from_json(&json).unwrap();
//!
//! let sim = Arc::new(Simulation::new());
//! let mut gpio = GpioControl::new("gpio");
//! gpio.init(&config, Arc::new(SimHardware::new(Arc::clone(&sim)))).unwrap();
//!
//! assert_eq!(gpio.gpio_pin_map().len(), 1);
//! gpio.gpio_pin("heater").unwrap().write(true).unwrap();
//! assert!(sim.line_level("gpiochip0", 17));
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::{Configuration, Identifier};
use crate::error::{ConfigError, HalError, Result};
use crate::hal::{
    finalize_sub_components, init_enabled_sub_components, HalMap, HalObject, SubComponent,
};
use crate::traits::{GpioChip, GpioLine, HardwareProvider, PinDirection, PinEdge, PinEvent};

/// Configuration prefix of the pin sections.
pub const GPIO_PIN_PREFIX: &str = "gpio-pin";

// ============================================================================
// GpioPin
// ============================================================================

/// One configured GPIO line.
///
/// A blocking [`wait_for_event`](Self::wait_for_event) holds the line for
/// its whole timeout, so detaching the pin waits for it to return.
pub struct GpioPin {
    id: Identifier,
    chip: String,
    line: RwLock<Option<Box<dyn GpioLine>>>,
    offset: u32,
    direction: PinDirection,
    edge: PinEdge,
    active_low: bool,
}

impl GpioPin {
    /// Configured direction.
    pub fn direction(&self) -> PinDirection {
        self.direction
    }

    /// Configured edge detection.
    pub fn edge(&self) -> PinEdge {
        self.edge
    }

    /// Line offset on the chip.
    pub fn line(&self) -> u32 {
        self.offset
    }

    /// Name of the chip the line belongs to.
    pub fn chip(&self) -> &str {
        &self.chip
    }

    /// Returns true if the logical level is the inverse of the raw level.
    pub fn is_active_low(&self) -> bool {
        self.active_low
    }

    fn with_line<T>(&self, f: impl FnOnce(&dyn GpioLine) -> Result<T>) -> Result<T> {
        match self.line.read().as_deref() {
            Some(line) => f(line),
            None => Err(HalError::NotInitialized(self.id.clone())),
        }
    }

    /// Read the logical level.
    pub fn read(&self) -> Result<bool> {
        Ok(self.with_line(|line| line.read())? != self.active_low)
    }

    /// Drive the logical level. Fails on input pins.
    pub fn write(&self, active: bool) -> Result<()> {
        self.with_line(|line| line.write(active != self.active_low))
    }

    /// Block until an edge arrives or `timeout` elapses.
    ///
    /// Edges are reported in logical terms: on an active-low pin a raw
    /// falling edge is a [`PinEvent::RisingEdge`].
    pub fn wait_for_event(&self, timeout: Duration) -> Result<PinEvent> {
        let event = self.with_line(|line| line.wait_for_event(timeout))?;
        Ok(match (event, self.active_low) {
            (PinEvent::RisingEdge, true) => PinEvent::FallingEdge,
            (PinEvent::FallingEdge, true) => PinEvent::RisingEdge,
            (event, _) => event,
        })
    }
}

fn parse_option<T>(config: &Configuration, name: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    let text: String = config.get(name)?;
    parse(&text).ok_or_else(|| {
        ConfigError::InvalidValue {
            name: name.to_owned(),
            value: text,
        }
        .into()
    })
}

impl HalObject for GpioPin {
    type Args = Arc<dyn GpioChip>;

    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self, config: &Configuration, chip: Arc<dyn GpioChip>) -> Result<()> {
        self.finalize();

        let offset: u32 = config.get_int("line")?;
        let direction = parse_option(config, "direction", PinDirection::from_text)?;
        let edge = if config.option("edge").is_ok() {
            parse_option(config, "edge", PinEdge::from_text)?
        } else {
            PinEdge::None
        };
        let active_low = config.get_or("active-low", false)?;

        if direction == PinDirection::Output && edge != PinEdge::None {
            return Err(HalError::InvalidArgument(format!(
                "{}: edge detection on an output pin",
                self.id
            )));
        }

        let line = chip.request_line(offset, direction, edge, &self.id)?;
        if direction == PinDirection::Output {
            line.write(active_low)?;
        }

        log::debug!(
            "gpio pin {}: {}:{} {} edge={} active-low={}",
            self.id,
            chip.name(),
            offset,
            direction.as_str(),
            edge.as_str(),
            active_low
        );

        self.chip = chip.name().to_owned();
        self.offset = offset;
        self.direction = direction;
        self.edge = edge;
        self.active_low = active_low;
        *self.line.get_mut() = Some(line);
        Ok(())
    }

    fn finalize(&mut self) {
        self.detach();
    }

    fn is_initialized(&self) -> bool {
        self.line.read().is_some()
    }
}

impl SubComponent for GpioPin {
    fn create(id: Identifier) -> Self {
        Self {
            id,
            chip: String::new(),
            line: RwLock::new(None),
            offset: 0,
            direction: PinDirection::Input,
            edge: PinEdge::None,
            active_low: false,
        }
    }

    fn detach(&self) {
        let Some(line) = self.line.write().take() else {
            return;
        };
        if self.direction == PinDirection::Output {
            if let Err(err) = line.write(self.active_low) {
                log::warn!("gpio pin {}: release to inactive failed: {}", self.id, err);
            }
        }
        log::trace!("gpio pin {}: released {}:{}", self.id, self.chip, self.offset);
    }
}

impl Drop for GpioPin {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for GpioPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioPin")
            .field("id", &self.id)
            .field("chip", &self.chip)
            .field("line", &self.offset)
            .field("direction", &self.direction)
            .field("edge", &self.edge)
            .field("active_low", &self.active_low)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(feature = "embedded-hal")]
mod embedded {
    use super::GpioPin;
    use crate::error::HalError;
    use embedded_hal::digital::{Error, ErrorKind, ErrorType, InputPin, OutputPin};

    impl Error for HalError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    impl ErrorType for &GpioPin {
        type Error = HalError;
    }

    impl OutputPin for &GpioPin {
        fn set_low(&mut self) -> Result<(), HalError> {
            self.write(false)
        }

        fn set_high(&mut self) -> Result<(), HalError> {
            self.write(true)
        }
    }

    impl InputPin for &GpioPin {
        fn is_high(&mut self) -> Result<bool, HalError> {
            self.read()
        }

        fn is_low(&mut self) -> Result<bool, HalError> {
            self.read().map(|level| !level)
        }
    }
}

// ============================================================================
// GpioControl
// ============================================================================

/// Owns one GPIO chip and its configured pins.
pub struct GpioControl {
    id: Identifier,
    chip: Option<Arc<dyn GpioChip>>,
    pins: HalMap<GpioPin>,
}

impl GpioControl {
    /// Creates an uninitialized controller.
    pub fn new(id: impl Into<Identifier>) -> Self {
        Self {
            id: id.into(),
            chip: None,
            pins: HalMap::new(),
        }
    }

    /// Read-only view of the initialized pins.
    pub fn gpio_pin_map(&self) -> &HalMap<GpioPin> {
        &self.pins
    }

    /// Look up one pin.
    pub fn gpio_pin(&self, id: &str) -> Option<&Arc<GpioPin>> {
        self.pins.get(id)
    }

    /// Drive every output pin to its inactive level.
    pub fn reset(&self) -> Result<()> {
        for pin in self.pins.values() {
            if pin.direction() == PinDirection::Output {
                pin.write(false)?;
            }
        }
        Ok(())
    }
}

impl HalObject for GpioControl {
    type Args = Arc<dyn HardwareProvider>;

    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self, config: &Configuration, hardware: Arc<dyn HardwareProvider>) -> Result<()> {
        self.finalize();

        let chip_name: String = config.get("chip")?;
        let chip = hardware.open_gpio_chip(&chip_name).map_err(|err| {
            log::error!("{}: cannot open {}: {}", self.id, chip_name, err);
            err
        })?;

        let count =
            init_enabled_sub_components(config, GPIO_PIN_PREFIX, &mut self.pins, Arc::clone(&chip))?;
        self.chip = Some(chip);
        log::info!("{}: {} pins on {}", self.id, count, chip_name);
        Ok(())
    }

    fn finalize(&mut self) {
        finalize_sub_components(&mut self.pins);
        if self.chip.take().is_some() {
            log::debug!("{}: finalized", self.id);
        }
    }

    fn is_initialized(&self) -> bool {
        self.chip.is_some()
    }
}

impl Drop for GpioControl {
    fn drop(&mut self) {
        self.finalize();
    }
}
