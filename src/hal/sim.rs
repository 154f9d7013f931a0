//! Simulated hardware backend for testing without a board.
//!
//! A [`Simulation`] holds the whole simulated world: line levels and pending
//! edge events, stepper positions, and the temperature each SPI sensor
//! reports. [`SimHardware`] is the [`HardwareProvider`] that opens devices on
//! it. The simulation is injected where it is needed (no global instance),
//! so every test gets its own.
//!
//! # What is Simulated
//!
//! | Device | Behavior |
//! |--------|----------|
//! | GPIO chip | 64 lines, exclusive requests, edge FIFO per input line |
//! | Motor HAT | 2 stepper ports, position counting, stall injection |
//! | SPI bus | Replies with the temperature of the selected sensor |
//!
//! Any device name can be marked unavailable with
//! [`Simulation::set_unavailable`] to exercise open failures.
//!
//! # Sensor Protocol
//!
//! A sensor is selected when its chip-select line is requested as an output
//! and driven low. The reply is a big-endian `i16` in 1/16 °C. With no
//! sensor selected the bus floats and every byte reads `0xFF`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use filament_core::hal::sim::{SimHardware, Simulation};
//! use filament_core::traits::{HardwareProvider, StepDirection, StepStyle};
//!
//! let sim = Arc::new(Simulation::new());
//! let hardware = SimHardware::new(Arc::clone(&sim));
//!
//! let hat = hardware.open_motor_hat("i2c-1").unwrap();
//! hat.step(1, StepDirection::Forward, StepStyle::Double).unwrap();
//! hat.step(1, StepDirection::Forward, StepStyle::Double).unwrap();
//! assert_eq!(sim.motor_position("i2c-1", 1), 2);
//!
//! sim.set_unavailable("spidev0.0", true);
//! assert!(hardware.open_spi_bus("spidev0.0").is_err());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use heapless::Deque;
use parking_lot::{Condvar, Mutex};

use crate::error::{HalError, Result};
use crate::traits::{
    GpioChip, GpioLine, HardwareProvider, MotorHat, PinDirection, PinEdge, PinEvent, SpiBus,
    StepDirection, StepStyle,
};

/// Lines per simulated GPIO chip.
pub const SIM_LINE_COUNT: u32 = 64;

/// Stepper ports per simulated motor HAT (numbered from 1).
pub const SIM_MOTOR_PORTS: u8 = 2;

/// Pending edge events kept per line before the oldest is dropped.
pub const EDGE_FIFO_DEPTH: usize = 16;

type LineKey = (String, u32);
type PortKey = (String, u8);

fn line_key(chip: &str, offset: u32) -> LineKey {
    (chip.to_owned(), offset)
}

fn port_key(bus: &str, port: u8) -> PortKey {
    (bus.to_owned(), port)
}

// ============================================================================
// Simulation State
// ============================================================================

struct LineRequest {
    direction: PinDirection,
    edge: PinEdge,
    consumer: String,
}

#[derive(Default)]
struct SimLine {
    level: bool,
    request: Option<LineRequest>,
    events: Deque<PinEvent, EDGE_FIFO_DEPTH>,
}

#[derive(Default)]
struct SimMotor {
    position: i64,
    steps: u64,
    energized: bool,
    stalled: bool,
}

#[derive(Default)]
struct SimState {
    unavailable: HashSet<String>,
    lines: HashMap<LineKey, SimLine>,
    motors: HashMap<PortKey, SimMotor>,
    temperatures: HashMap<LineKey, f64>,
}

/// The simulated world shared by every device opened through [`SimHardware`].
#[derive(Default)]
pub struct Simulation {
    state: Mutex<SimState>,
    edges: Condvar,
}

impl Simulation {
    /// Creates an empty simulation: all lines low, all devices available.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Stimulus and inspection
    // ------------------------------------------------------------------------

    /// Make opening `device` (chip, bus or SPI device name) fail.
    pub fn set_unavailable(&self, device: &str, unavailable: bool) {
        let mut state = self.state.lock();
        if unavailable {
            state.unavailable.insert(device.to_owned());
        } else {
            state.unavailable.remove(device);
        }
    }

    /// Drive a line from outside, as the attached circuit would.
    ///
    /// A level change on a line requested as an input queues an edge event
    /// if the requested edge mode reports it. When the FIFO is full the
    /// oldest event is dropped.
    pub fn drive_line(&self, chip: &str, offset: u32, level: bool) {
        let mut state = self.state.lock();
        let line = state.lines.entry(line_key(chip, offset)).or_default();
        if line.level == level {
            return;
        }
        line.level = level;

        let reports = match &line.request {
            Some(request) => {
                request.direction == PinDirection::Input && request.edge.reports(level)
            }
            None => false,
        };
        if !reports {
            return;
        }

        if line.events.is_full() {
            line.events.pop_front();
            log::warn!("sim {}:{}: edge FIFO overflow, oldest event dropped", chip, offset);
        }
        // Cannot fail, a slot was freed above.
        let _ = line.events.push_back(PinEvent::for_level(level));
        self.edges.notify_all();
    }

    /// Current raw level of a line (low if never touched).
    pub fn line_level(&self, chip: &str, offset: u32) -> bool {
        self.state
            .lock()
            .lines
            .get(&line_key(chip, offset))
            .map(|line| line.level)
            .unwrap_or(false)
    }

    /// Consumer label of a requested line, `None` if the line is free.
    pub fn line_consumer(&self, chip: &str, offset: u32) -> Option<String> {
        self.state
            .lock()
            .lines
            .get(&line_key(chip, offset))
            .and_then(|line| line.request.as_ref())
            .map(|request| request.consumer.clone())
    }

    /// Net step count of a motor port (forward minus backward).
    pub fn motor_position(&self, bus: &str, port: u8) -> i64 {
        self.motor(bus, port, |motor| motor.position)
    }

    /// Total steps taken by a motor port in either direction.
    pub fn motor_steps(&self, bus: &str, port: u8) -> u64 {
        self.motor(bus, port, |motor| motor.steps)
    }

    /// Returns true while the port's coils are energized.
    pub fn motor_energized(&self, bus: &str, port: u8) -> bool {
        self.motor(bus, port, |motor| motor.energized)
    }

    /// Make every step on this port fail, as a stalled or unpowered motor would.
    pub fn set_motor_stalled(&self, bus: &str, port: u8, stalled: bool) {
        self.state
            .lock()
            .motors
            .entry(port_key(bus, port))
            .or_default()
            .stalled = stalled;
    }

    /// Temperature reported by the sensor whose chip-select is `chip:offset`.
    pub fn set_temperature(&self, chip: &str, chip_select: u32, celsius: f64) {
        self.state
            .lock()
            .temperatures
            .insert(line_key(chip, chip_select), celsius);
    }

    /// Disconnect the sensor on `chip:offset`; reads see a floating bus.
    pub fn remove_sensor(&self, chip: &str, chip_select: u32) {
        self.state
            .lock()
            .temperatures
            .remove(&line_key(chip, chip_select));
    }

    fn motor<T: Default>(&self, bus: &str, port: u8, f: impl FnOnce(&SimMotor) -> T) -> T {
        self.state
            .lock()
            .motors
            .get(&port_key(bus, port))
            .map(f)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Driver side
    // ------------------------------------------------------------------------

    fn check_available(&self, device: &str) -> Result<()> {
        if self.state.lock().unavailable.contains(device) {
            log::warn!("sim: {} unavailable", device);
            return Err(HalError::DeviceUnavailable(device.to_owned()));
        }
        Ok(())
    }

    fn request_line(&self, key: &LineKey, request: LineRequest) -> Result<()> {
        let mut state = self.state.lock();
        let line = state.lines.entry(key.clone()).or_default();
        if let Some(existing) = &line.request {
            return Err(HalError::DeviceUnavailable(format!(
                "{}:{} busy (held by {})",
                key.0, key.1, existing.consumer
            )));
        }
        line.events.clear();
        line.request = Some(request);
        Ok(())
    }

    fn release_line(&self, key: &LineKey) {
        if let Some(line) = self.state.lock().lines.get_mut(key) {
            line.request = None;
            line.events.clear();
        }
    }

    fn line_request<T>(&self, key: &LineKey, f: impl FnOnce(&mut SimLine) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        match state.lines.get_mut(key) {
            Some(line) if line.request.is_some() => f(line),
            _ => Err(HalError::DeviceUnavailable(format!(
                "{}:{} not requested",
                key.0, key.1
            ))),
        }
    }

    fn wait_for_edge(&self, key: &LineKey, timeout: Duration) -> PinEvent {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.lines.get_mut(key).and_then(|l| l.events.pop_front()) {
                return event;
            }
            if self.edges.wait_until(&mut state, deadline).timed_out() {
                return state
                    .lines
                    .get_mut(key)
                    .and_then(|l| l.events.pop_front())
                    .unwrap_or(PinEvent::Timeout);
            }
        }
    }

    fn step(&self, key: PortKey, direction: StepDirection) -> Result<()> {
        let mut state = self.state.lock();
        let motor = state.motors.entry(key).or_default();
        if motor.stalled {
            return Err(HalError::Driver("motor stalled".into()));
        }
        motor.position += direction.sign();
        motor.steps += 1;
        motor.energized = true;
        Ok(())
    }

    fn release_motor(&self, key: PortKey) {
        self.state.lock().motors.entry(key).or_default().energized = false;
    }

    fn spi_transfer(&self, tx: &[u8]) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let selected: Vec<f64> = state
            .temperatures
            .iter()
            .filter(|(key, _)| {
                state.lines.get(*key).is_some_and(|line| {
                    !line.level
                        && line
                            .request
                            .as_ref()
                            .is_some_and(|r| r.direction == PinDirection::Output)
                })
            })
            .map(|(_, celsius)| *celsius)
            .collect();

        match selected.as_slice() {
            [] => Ok(vec![0xFF; tx.len()]),
            [celsius] => {
                let raw = (celsius * 16.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                let mut rx = vec![0u8; tx.len()];
                for (slot, byte) in rx.iter_mut().zip(raw.to_be_bytes()) {
                    *slot = byte;
                }
                Ok(rx)
            }
            _ => Err(HalError::Driver(
                "bus contention: several chip selects asserted".into(),
            )),
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// [`HardwareProvider`] backed by a shared [`Simulation`].
#[derive(Clone)]
pub struct SimHardware {
    sim: Arc<Simulation>,
}

impl SimHardware {
    /// Creates a provider operating on `sim`.
    pub fn new(sim: Arc<Simulation>) -> Self {
        Self { sim }
    }

    /// The simulation this provider drives.
    pub fn simulation(&self) -> &Arc<Simulation> {
        &self.sim
    }
}

impl HardwareProvider for SimHardware {
    fn open_gpio_chip(&self, name: &str) -> Result<Arc<dyn GpioChip>> {
        self.sim.check_available(name)?;
        Ok(Arc::new(SimGpioChip {
            name: name.to_owned(),
            sim: Arc::clone(&self.sim),
        }))
    }

    fn open_motor_hat(&self, bus: &str) -> Result<Arc<dyn MotorHat>> {
        self.sim.check_available(bus)?;
        Ok(Arc::new(SimMotorHat {
            bus: bus.to_owned(),
            sim: Arc::clone(&self.sim),
        }))
    }

    fn open_spi_bus(&self, device: &str) -> Result<Arc<dyn SpiBus>> {
        self.sim.check_available(device)?;
        Ok(Arc::new(SimSpiBus {
            device: device.to_owned(),
            sim: Arc::clone(&self.sim),
        }))
    }
}

// ============================================================================
// GPIO
// ============================================================================

struct SimGpioChip {
    name: String,
    sim: Arc<Simulation>,
}

impl GpioChip for SimGpioChip {
    fn name(&self) -> &str {
        &self.name
    }

    fn request_line(
        &self,
        offset: u32,
        direction: PinDirection,
        edge: PinEdge,
        consumer: &str,
    ) -> Result<Box<dyn GpioLine>> {
        if offset >= SIM_LINE_COUNT {
            return Err(HalError::InvalidArgument(format!(
                "{} has no line {}",
                self.name, offset
            )));
        }
        let key = line_key(&self.name, offset);
        self.sim.request_line(
            &key,
            LineRequest {
                direction,
                edge,
                consumer: consumer.to_owned(),
            },
        )?;
        Ok(Box::new(SimGpioLine {
            key,
            sim: Arc::clone(&self.sim),
        }))
    }
}

struct SimGpioLine {
    key: LineKey,
    sim: Arc<Simulation>,
}

impl GpioLine for SimGpioLine {
    fn offset(&self) -> u32 {
        self.key.1
    }

    fn read(&self) -> Result<bool> {
        self.sim.line_request(&self.key, |line| Ok(line.level))
    }

    fn write(&self, level: bool) -> Result<()> {
        self.sim.line_request(&self.key, |line| {
            match line.request.as_ref().map(|r| r.direction) {
                Some(PinDirection::Output) => {
                    line.level = level;
                    Ok(())
                }
                _ => Err(HalError::Unsupported("write to an input line".into())),
            }
        })
    }

    fn wait_for_event(&self, timeout: Duration) -> Result<PinEvent> {
        self.sim.line_request(&self.key, |line| {
            match line.request.as_ref() {
                Some(r) if r.direction == PinDirection::Input && r.edge != PinEdge::None => Ok(()),
                _ => Err(HalError::Unsupported(
                    "line not requested with edge detection".into(),
                )),
            }
        })?;
        Ok(self.sim.wait_for_edge(&self.key, timeout))
    }
}

impl Drop for SimGpioLine {
    fn drop(&mut self) {
        self.sim.release_line(&self.key);
    }
}

// ============================================================================
// Motor HAT
// ============================================================================

struct SimMotorHat {
    bus: String,
    sim: Arc<Simulation>,
}

impl SimMotorHat {
    fn check_port(&self, port: u8) -> Result<()> {
        if port == 0 || port > SIM_MOTOR_PORTS {
            return Err(HalError::InvalidArgument(format!(
                "{} has no stepper port {}",
                self.bus, port
            )));
        }
        Ok(())
    }
}

impl MotorHat for SimMotorHat {
    fn bus(&self) -> &str {
        &self.bus
    }

    fn port_count(&self) -> u8 {
        SIM_MOTOR_PORTS
    }

    fn step(&self, port: u8, direction: StepDirection, _style: StepStyle) -> Result<()> {
        self.check_port(port)?;
        self.sim.step(port_key(&self.bus, port), direction)
    }

    fn release(&self, port: u8) -> Result<()> {
        self.check_port(port)?;
        self.sim.release_motor(port_key(&self.bus, port));
        Ok(())
    }
}

// ============================================================================
// SPI
// ============================================================================

struct SimSpiBus {
    device: String,
    sim: Arc<Simulation>,
}

impl SpiBus for SimSpiBus {
    fn device(&self) -> &str {
        &self.device
    }

    fn transfer(&self, tx: &[u8]) -> Result<Vec<u8>> {
        self.sim.spi_transfer(tx)
    }
}
