//! Stepper motor controller and motors.
//!
//! [`StepperMotorControl`] exclusively owns one motor HAT and the
//! [`StepperMotor`]s configured on its ports:
//!
//! | Option | Type | Required | Meaning |
//! |--------|------|----------|---------|
//! | `bus` | text | yes | Bus the HAT is opened on |
//! | `motor.<id>.port` | integer | yes | Stepper port, 1-based |
//! | `motor.<id>.steps-per-revolution` | integer | no | Default 200 |
//! | `motor.<id>.style` | text | no | `single`, `double` (default), `interleave`, `microstep` |
//! | `motor.<id>.speed-rpm` | float | no | Default 60 |
//! | `motor.<id>.enabled` | bool | no | Skip the motor when false |
//!
//! Motion is blocking: [`StepperMotor::step`] returns after the last step
//! or as soon as [`StepperMotor::stop`] is called. The wait between two steps
//! wakes up on stop, so even a very slow motion stops promptly.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::{Configuration, Identifier};
use crate::error::{ConfigError, HalError, Result};
use crate::hal::{
    finalize_sub_components, init_enabled_sub_components, HalMap, HalObject, SubComponent,
};
use crate::traits::{HardwareProvider, MotorHat, StepDirection, StepStyle};

/// Configuration prefix of the motor sections.
pub const MOTOR_PREFIX: &str = "motor";

/// Full steps per revolution of a standard 1.8° motor.
pub const DEFAULT_STEPS_PER_REVOLUTION: u32 = 200;

/// Speed used when `speed-rpm` is not configured.
pub const DEFAULT_SPEED_RPM: f64 = 60.0;

/// Slowest accepted speed. Keeps the step interval representable.
pub const MIN_SPEED_RPM: f64 = 0.001;

// ============================================================================
// StepperMotor
// ============================================================================

/// One stepper motor on a HAT port.
pub struct StepperMotor {
    id: Identifier,
    hat: RwLock<Option<Arc<dyn MotorHat>>>,
    port: u8,
    steps_per_revolution: u32,
    style: StepStyle,
    speed_rpm: Mutex<f64>,
    position: AtomicI64,
    stop_requested: Mutex<bool>,
    stop_wake: Condvar,
    motion: Mutex<()>,
}

impl StepperMotor {
    fn hat(&self) -> Result<Arc<dyn MotorHat>> {
        self.hat
            .read()
            .clone()
            .ok_or_else(|| HalError::NotInitialized(self.id.clone()))
    }

    /// HAT port number.
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Configured steps per revolution.
    pub fn steps_per_revolution(&self) -> u32 {
        self.steps_per_revolution
    }

    /// Configured step style.
    pub fn style(&self) -> StepStyle {
        self.style
    }

    /// Current speed setting.
    pub fn speed_rpm(&self) -> f64 {
        *self.speed_rpm.lock()
    }

    /// Change the speed used by the next motion.
    ///
    /// Fails unless `rpm` is finite and at least [`MIN_SPEED_RPM`].
    pub fn set_speed_rpm(&self, rpm: f64) -> Result<()> {
        if !(rpm.is_finite() && rpm >= MIN_SPEED_RPM) {
            return Err(HalError::InvalidArgument(format!(
                "{}: speed must be at least {} rpm, got {}",
                self.id, MIN_SPEED_RPM, rpm
            )));
        }
        *self.speed_rpm.lock() = rpm;
        Ok(())
    }

    /// Delay between two steps at the current speed.
    pub fn step_interval(&self) -> Duration {
        let steps_per_minute = self.speed_rpm() * f64::from(self.steps_per_revolution);
        Duration::from_secs_f64(60.0 / steps_per_minute)
    }

    /// Net steps taken since `init` (forward positive).
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    /// Advance `steps` steps, blocking at the configured speed.
    ///
    /// Returns the number of steps actually taken, which is lower than
    /// `steps` when [`stop`](Self::stop) interrupted the motion. Concurrent
    /// calls run one after another.
    pub fn step(&self, steps: u64, direction: StepDirection) -> Result<u64> {
        self.step_unless(steps, direction, &AtomicBool::new(false))
    }

    /// Like [`step`](Self::step), but also gives up once `cancel` is set.
    ///
    /// `step` forgets a [`stop`](Self::stop) that arrived before it
    /// started. A caller that sets `cancel` before calling `stop` can never
    /// lose its stop that way.
    pub fn step_unless(&self, steps: u64, direction: StepDirection, cancel: &AtomicBool) -> Result<u64> {
        let _motion = self.motion.lock();
        let hat = self.hat()?;
        *self.stop_requested.lock() = false;

        let interval = self.step_interval();
        let mut taken = 0;
        while taken < steps {
            if *self.stop_requested.lock() || cancel.load(Ordering::Acquire) {
                log::debug!("motor {}: stopped after {} of {} steps", self.id, taken, steps);
                break;
            }
            hat.step(self.port, direction, self.style).map_err(|err| {
                log::error!("motor {}: step failed: {}", self.id, err);
                err
            })?;
            self.position.fetch_add(direction.sign(), Ordering::AcqRel);
            taken += 1;
            if taken < steps {
                self.pause(interval, cancel);
            }
        }
        Ok(taken)
    }

    /// Wait `interval` or until stopped.
    fn pause(&self, interval: Duration, cancel: &AtomicBool) {
        let mut stopped = self.stop_requested.lock();
        if !*stopped && !cancel.load(Ordering::Acquire) {
            self.stop_wake.wait_for(&mut stopped, interval);
        }
    }

    /// Turn by `degrees` (negative turns backward), rounded to whole steps.
    pub fn rotate(&self, degrees: f64) -> Result<u64> {
        if !degrees.is_finite() {
            return Err(HalError::InvalidArgument(format!(
                "{}: cannot rotate {} degrees",
                self.id, degrees
            )));
        }
        let direction = if degrees < 0.0 {
            StepDirection::Backward
        } else {
            StepDirection::Forward
        };
        let steps = (degrees.abs() / 360.0 * f64::from(self.steps_per_revolution)).round() as u64;
        self.step(steps, direction)
    }

    /// Ask a running [`step`](Self::step) to return before its next step.
    pub fn stop(&self) {
        *self.stop_requested.lock() = true;
        self.stop_wake.notify_all();
    }

    /// De-energize the coils.
    pub fn release(&self) -> Result<()> {
        self.hat()?.release(self.port)
    }
}

impl HalObject for StepperMotor {
    type Args = Arc<dyn MotorHat>;

    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self, config: &Configuration, hat: Arc<dyn MotorHat>) -> Result<()> {
        self.finalize();

        let port: u8 = config.get_int("port")?;
        if port == 0 || port > hat.port_count() {
            return Err(ConfigError::InvalidValue {
                name: "port".into(),
                value: port.to_string(),
            }
            .into());
        }

        let steps_per_revolution: u32 = match config.option("steps-per-revolution") {
            Ok(_) => config.get_int("steps-per-revolution")?,
            Err(_) => DEFAULT_STEPS_PER_REVOLUTION,
        };
        if steps_per_revolution == 0 {
            return Err(ConfigError::InvalidValue {
                name: "steps-per-revolution".into(),
                value: "0".into(),
            }
            .into());
        }

        let style_text: String = config.get_or("style", "double".to_owned())?;
        let style = StepStyle::from_text(&style_text).ok_or(ConfigError::InvalidValue {
            name: "style".into(),
            value: style_text.clone(),
        })?;

        self.port = port;
        self.steps_per_revolution = steps_per_revolution;
        self.style = style;
        self.set_speed_rpm(config.get_or("speed-rpm", DEFAULT_SPEED_RPM)?)?;
        self.position.store(0, Ordering::Release);
        *self.stop_requested.get_mut() = false;

        log::debug!(
            "motor {}: {} port {} {} steps/rev {:?}",
            self.id,
            hat.bus(),
            port,
            steps_per_revolution,
            style
        );
        *self.hat.get_mut() = Some(hat);
        Ok(())
    }

    fn finalize(&mut self) {
        self.detach();
    }

    fn is_initialized(&self) -> bool {
        self.hat.read().is_some()
    }
}

impl SubComponent for StepperMotor {
    fn create(id: Identifier) -> Self {
        Self {
            id,
            hat: RwLock::new(None),
            port: 0,
            steps_per_revolution: DEFAULT_STEPS_PER_REVOLUTION,
            style: StepStyle::default(),
            speed_rpm: Mutex::new(DEFAULT_SPEED_RPM),
            position: AtomicI64::new(0),
            stop_requested: Mutex::new(false),
            stop_wake: Condvar::new(),
            motion: Mutex::new(()),
        }
    }

    fn detach(&self) {
        self.stop();
        // Wait out a running motion so no step reaches a released HAT.
        let _motion = self.motion.lock();
        if let Some(hat) = self.hat.write().take() {
            if let Err(err) = hat.release(self.port) {
                log::warn!("motor {}: release failed: {}", self.id, err);
            }
        }
    }
}

impl Drop for StepperMotor {
    fn drop(&mut self) {
        self.finalize();
    }
}

// ============================================================================
// StepperMotorControl
// ============================================================================

/// Owns one motor HAT and its configured motors.
pub struct StepperMotorControl {
    id: Identifier,
    hat: Option<Arc<dyn MotorHat>>,
    motors: HalMap<StepperMotor>,
}

impl StepperMotorControl {
    /// Creates an uninitialized controller.
    pub fn new(id: impl Into<Identifier>) -> Self {
        Self {
            id: id.into(),
            hat: None,
            motors: HalMap::new(),
        }
    }

    /// Read-only view of the initialized motors.
    pub fn stepper_motor_map(&self) -> &HalMap<StepperMotor> {
        &self.motors
    }

    /// Look up one motor.
    pub fn stepper_motor(&self, id: &str) -> Option<&Arc<StepperMotor>> {
        self.motors.get(id)
    }

    /// Stop every motor and release its coils.
    pub fn reset(&self) -> Result<()> {
        for motor in self.motors.values() {
            motor.stop();
            motor.release()?;
        }
        Ok(())
    }
}

impl HalObject for StepperMotorControl {
    type Args = Arc<dyn HardwareProvider>;

    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self, config: &Configuration, hardware: Arc<dyn HardwareProvider>) -> Result<()> {
        self.finalize();

        let bus: String = config.get("bus")?;
        let hat = hardware.open_motor_hat(&bus).map_err(|err| {
            log::error!("{}: cannot open motor HAT on {}: {}", self.id, bus, err);
            err
        })?;

        let count =
            init_enabled_sub_components(config, MOTOR_PREFIX, &mut self.motors, Arc::clone(&hat))?;
        self.hat = Some(hat);
        log::info!("{}: {} motors on {}", self.id, count, bus);
        Ok(())
    }

    fn finalize(&mut self) {
        finalize_sub_components(&mut self.motors);
        if self.hat.take().is_some() {
            log::debug!("{}: finalized", self.id);
        }
    }

    fn is_initialized(&self) -> bool {
        self.hat.is_some()
    }
}

impl Drop for StepperMotorControl {
    fn drop(&mut self) {
        self.finalize();
    }
}
