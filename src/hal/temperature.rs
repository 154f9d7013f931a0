//! SPI temperature sensors.
//!
//! [`TemperatureSensorControl`] owns one SPI bus. Each [`TemperatureSensor`]
//! is selected through a GPIO output pin taken from a pin map the controller
//! does *not* own (normally [`GpioControl::gpio_pin_map`]).
//!
//! | Option | Type | Required | Meaning |
//! |--------|------|----------|---------|
//! | `bus` | text | yes | SPI device opened through the provider |
//! | `sensor.<id>.chip-select` | text | yes | Id of an output pin in the pin map |
//! | `sensor.<id>.offset` | float | no | Calibration offset in °C (default 0) |
//! | `sensor.<id>.enabled` | bool | no | Skip the sensor when false |
//!
//! A reading asserts chip-select, clocks two bytes, and releases it. The
//! reply is a big-endian `i16` in 1/16 °C; `0xFFFF` means nobody answered.
//!
//! [`GpioControl::gpio_pin_map`]: crate::hal::GpioControl::gpio_pin_map

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::{Configuration, Identifier};
use crate::error::{ConfigError, HalError, Result};
use crate::hal::{
    finalize_sub_components, init_enabled_sub_components, GpioPin, HalMap, HalObject,
    SubComponent,
};
use crate::traits::{HardwareProvider, PinDirection, SpiBus};

/// Configuration prefix of the sensor sections.
pub const SENSOR_PREFIX: &str = "sensor";

const NO_RESPONSE: [u8; 2] = [0xFF, 0xFF];

/// Shared bus access handed to every sensor.
#[derive(Clone)]
pub struct TemperatureSensorArgs {
    /// The controller's SPI bus
    pub bus: Arc<dyn SpiBus>,
    /// Serializes select/transfer/deselect sequences on the bus
    pub bus_lock: Arc<Mutex<()>>,
    /// Pins available as chip-selects
    pub pins: HalMap<GpioPin>,
}

// ============================================================================
// TemperatureSensor
// ============================================================================

struct Attached {
    bus: Arc<dyn SpiBus>,
    bus_lock: Arc<Mutex<()>>,
    chip_select: Arc<GpioPin>,
}

/// One SPI temperature sensor.
pub struct TemperatureSensor {
    id: Identifier,
    attached: RwLock<Option<Attached>>,
    offset_c: f64,
}

impl TemperatureSensor {
    /// Calibration offset added to every reading.
    pub fn offset_c(&self) -> f64 {
        self.offset_c
    }

    /// Id of the chip-select pin, `None` while uninitialized.
    pub fn chip_select(&self) -> Option<Identifier> {
        self.attached
            .read()
            .as_ref()
            .map(|attached| attached.chip_select.id().to_owned())
    }

    fn deselect(&self) -> Result<()> {
        match self.attached.read().as_ref() {
            Some(attached) => attached.chip_select.write(false),
            None => Ok(()),
        }
    }

    /// Read the current temperature in °C.
    pub fn read_celsius(&self) -> Result<f64> {
        let rx = {
            let attached = self.attached.read();
            let Some(Attached { bus, bus_lock, chip_select: cs }) = attached.as_ref() else {
                return Err(HalError::NotInitialized(self.id.clone()));
            };
            let _bus = bus_lock.lock();
            cs.write(true)?;
            let rx = bus.transfer(&[0, 0]);
            let released = cs.write(false);
            let rx = rx?;
            released?;
            rx
        };

        match rx.as_slice() {
            [hi, lo] if [*hi, *lo] != NO_RESPONSE => {
                let raw = i16::from_be_bytes([*hi, *lo]);
                Ok(f64::from(raw) / 16.0 + self.offset_c)
            }
            _ => {
                log::warn!("sensor {}: no response", self.id);
                Err(HalError::Driver(format!("sensor {}: no response", self.id)))
            }
        }
    }
}

impl HalObject for TemperatureSensor {
    type Args = TemperatureSensorArgs;

    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self, config: &Configuration, args: TemperatureSensorArgs) -> Result<()> {
        self.finalize();

        let cs_id: String = config.get("chip-select")?;
        let cs = args
            .pins
            .get(&cs_id)
            .cloned()
            .ok_or_else(|| ConfigError::InvalidValue {
                name: "chip-select".into(),
                value: cs_id.clone(),
            })?;
        if cs.direction() != PinDirection::Output {
            return Err(HalError::InvalidArgument(format!(
                "sensor {}: chip-select {} is not an output",
                self.id, cs_id
            )));
        }

        let offset_c = config.get_or("offset", 0.0)?;
        log::debug!(
            "sensor {}: {} cs={} offset={}",
            self.id,
            args.bus.device(),
            cs_id,
            offset_c
        );
        self.offset_c = offset_c;
        *self.attached.get_mut() = Some(Attached {
            bus: args.bus,
            bus_lock: args.bus_lock,
            chip_select: cs,
        });
        Ok(())
    }

    fn finalize(&mut self) {
        self.detach();
    }

    fn is_initialized(&self) -> bool {
        self.attached.read().is_some()
    }
}

impl SubComponent for TemperatureSensor {
    fn create(id: Identifier) -> Self {
        Self {
            id,
            attached: RwLock::new(None),
            offset_c: 0.0,
        }
    }

    fn detach(&self) {
        self.attached.write().take();
    }
}

// ============================================================================
// TemperatureSensorControl
// ============================================================================

/// Owns one SPI bus and its configured sensors.
pub struct TemperatureSensorControl {
    id: Identifier,
    bus: Option<Arc<dyn SpiBus>>,
    sensors: HalMap<TemperatureSensor>,
}

impl TemperatureSensorControl {
    /// Creates an uninitialized controller.
    pub fn new(id: impl Into<Identifier>) -> Self {
        Self {
            id: id.into(),
            bus: None,
            sensors: HalMap::new(),
        }
    }

    /// Read-only view of the initialized sensors.
    pub fn temperature_sensor_map(&self) -> &HalMap<TemperatureSensor> {
        &self.sensors
    }

    /// Look up one sensor.
    pub fn temperature_sensor(&self, id: &str) -> Option<&Arc<TemperatureSensor>> {
        self.sensors.get(id)
    }

    /// Deselect every sensor.
    pub fn reset(&self) -> Result<()> {
        for sensor in self.sensors.values() {
            sensor.deselect()?;
        }
        Ok(())
    }
}

impl HalObject for TemperatureSensorControl {
    type Args = (Arc<dyn HardwareProvider>, HalMap<GpioPin>);

    fn id(&self) -> &str {
        &self.id
    }

    fn init(
        &mut self,
        config: &Configuration,
        (hardware, pins): (Arc<dyn HardwareProvider>, HalMap<GpioPin>),
    ) -> Result<()> {
        self.finalize();

        let device: String = config.get("bus")?;
        let bus = hardware.open_spi_bus(&device).map_err(|err| {
            log::error!("{}: cannot open {}: {}", self.id, device, err);
            err
        })?;

        let args = TemperatureSensorArgs {
            bus: Arc::clone(&bus),
            bus_lock: Arc::new(Mutex::new(())),
            pins,
        };
        let count = init_enabled_sub_components(config, SENSOR_PREFIX, &mut self.sensors, args)?;
        self.bus = Some(bus);
        log::info!("{}: {} sensors on {}", self.id, count, device);
        Ok(())
    }

    fn finalize(&mut self) {
        finalize_sub_components(&mut self.sensors);
        if self.bus.take().is_some() {
            log::debug!("{}: finalized", self.id);
        }
    }

    fn is_initialized(&self) -> bool {
        self.bus.is_some()
    }
}

impl Drop for TemperatureSensorControl {
    fn drop(&mut self) {
        self.finalize();
    }
}
