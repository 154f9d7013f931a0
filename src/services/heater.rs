//! Filament merger heater.
//!
//! The heater element is switched through an output [`GpioPin`]. Its driver
//! board raises an error line on over-temperature or an open element; when
//! a fault pin is attached, a [`GpioPinEventObserver`] turns its rising
//! edge into a `HeaterFault` event.
//!
//! ```text
//!   Off ──SwitchOn──▶ Heating ──SwitchOff──▶ Off
//!    │                   │
//!    └──HeaterFault──▶ Error ◀──HeaterFault──┘
//!                        │
//!                        └──Reset──▶ Off
//! ```
//!
//! `set-temperature` only records the target (°C); it never changes state.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::commands::{Command, CommandResponse};
use crate::config::{HeaterConfig, Identifier, ObserverConfig};
use crate::error::{HalError, ProcessError, Result};
use crate::hal::{GpioPin, GpioPinEventObserver, HalObject};
use crate::messages::SetTemperatureRequest;
use crate::services::{ServiceComponent, StatedServiceComponent};
use crate::state_machine::{StateMachine, StateMachineHandle, TransitionTable};
use crate::traits::{MessageBroker, PinDirection, PinEvent};

/// Notification published after every heater transition.
pub const HEATER_STATE_NOTIFICATION: &str = "heater-state";

/// Heater states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaterState {
    /// Element off.
    Off,
    /// Element on.
    Heating,
    /// Fault reported; element forced off until `reset`.
    Error,
}

impl HeaterState {
    /// Lowercase state name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            HeaterState::Off => "off",
            HeaterState::Heating => "heating",
            HeaterState::Error => "error",
        }
    }
}

impl fmt::Display for HeaterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heater events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaterEvent {
    /// Turn the element on.
    SwitchOn,
    /// Turn the element off.
    SwitchOff,
    /// Driver board or output failure.
    HeaterFault,
    /// Leave the error state.
    Reset,
}

/// State owned by the heater's transition actions.
pub struct HeaterContext {
    output: Arc<GpioPin>,
    events: StateMachineHandle<HeaterState, HeaterEvent>,
}

impl HeaterContext {
    fn energize(&mut self) {
        if let Err(err) = self.output.write(true) {
            log::error!("heater: cannot switch on: {}", err);
            self.events.push(HeaterEvent::HeaterFault);
        }
    }

    fn deenergize(&mut self) {
        if let Err(err) = self.output.write(false) {
            log::error!("heater: cannot switch off: {}", err);
        }
    }
}

fn transitions() -> TransitionTable<HeaterState, HeaterEvent, HeaterContext> {
    use HeaterEvent::*;
    use HeaterState::*;

    TransitionTable::new()
        .on_with(Off, SwitchOn, Heating, |ctx: &mut HeaterContext, _, _| ctx.energize())
        .on_with(Heating, SwitchOff, Off, |ctx: &mut HeaterContext, _, _| ctx.deenergize())
        .on_with(Off, HeaterFault, Error, |ctx: &mut HeaterContext, _, _| ctx.deenergize())
        .on_with(Heating, HeaterFault, Error, |ctx: &mut HeaterContext, _, _| {
            log::warn!("heater: fault while heating");
            ctx.deenergize();
        })
        .on(Error, Reset, Off)
}

/// Service component switching the filament merger heater.
pub struct FilamentMergerHeater {
    stated: StatedServiceComponent<HeaterState, HeaterEvent, HeaterContext>,
    target: Arc<Mutex<f64>>,
    fault: Option<GpioPinEventObserver>,
}

impl FilamentMergerHeater {
    /// Create the heater and register it with `broker`.
    ///
    /// `output` must be an output pin.
    pub fn new(
        id: impl Into<Identifier>,
        broker: Arc<dyn MessageBroker>,
        output: Arc<GpioPin>,
        config: &HeaterConfig,
    ) -> Result<Self> {
        if output.direction() != PinDirection::Output {
            return Err(HalError::InvalidArgument(format!(
                "heater output {} is not an output pin",
                output.id()
            )));
        }

        let machine = StateMachine::new(HeaterState::Off, transitions());
        let events = machine.handle();
        let target = Arc::new(Mutex::new(config.default_target_c));

        let component = ServiceComponent::new(id, broker);
        register_handlers(&component, &events, &target, config.max_target_c);
        let context = HeaterContext { output, events };
        let stated = StatedServiceComponent::new(component, machine, context)
            .with_state_notification(HEATER_STATE_NOTIFICATION);
        stated.component().connect();

        Ok(Self {
            stated,
            target,
            fault: None,
        })
    }

    /// Watch `pin` and fault the heater on its rising edge.
    ///
    /// `pin` must be an input reporting rising edges.
    pub fn with_fault_pin(mut self, pin: Arc<GpioPin>, config: &ObserverConfig) -> Result<Self> {
        if pin.direction() != PinDirection::Input || !pin.edge().reports(true) {
            return Err(HalError::InvalidArgument(format!(
                "heater fault pin {} must be an input reporting rising edges",
                pin.id()
            )));
        }

        let observer = GpioPinEventObserver::new(format!("{}-fault", self.id()), pin, config);
        let events = self.stated.handle();
        observer.set_event_handler(move |event, pin| {
            if event == PinEvent::RisingEdge {
                log::warn!("heater: fault signalled on {}", pin);
                events.push(HeaterEvent::HeaterFault);
            }
        });
        self.fault = Some(observer);
        Ok(self)
    }

    /// Component identifier.
    pub fn id(&self) -> &str {
        self.stated.id()
    }

    /// The messaging half.
    pub fn component(&self) -> &ServiceComponent {
        self.stated.component()
    }

    /// Current state.
    pub fn current_state(&self) -> HeaterState {
        self.stated.current_state()
    }

    /// Last accepted target temperature (°C).
    pub fn target_c(&self) -> f64 {
        *self.target.lock()
    }

    /// Start processing commands and watching the fault pin.
    pub fn start(&self) -> std::result::Result<(), ProcessError> {
        self.stated.start()?;
        if let Some(fault) = &self.fault {
            if let Err(err) = fault.start() {
                self.stated.stop();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop the fault observer and the processing thread.
    pub fn stop(&self) -> bool {
        if let Some(fault) = &self.fault {
            fault.stop();
        }
        self.stated.stop()
    }

    /// Returns true while the processing thread runs.
    pub fn is_running(&self) -> bool {
        self.stated.is_running()
    }
}

impl Drop for FilamentMergerHeater {
    fn drop(&mut self) {
        self.stop();
    }
}

fn register_handlers(
    component: &ServiceComponent,
    events: &StateMachineHandle<HeaterState, HeaterEvent>,
    target: &Arc<Mutex<f64>>,
    max_target_c: f64,
) {
    let simple = [
        ("switch-on", HeaterEvent::SwitchOn, HeaterState::Off),
        ("switch-off", HeaterEvent::SwitchOff, HeaterState::Heating),
        ("reset", HeaterEvent::Reset, HeaterState::Error),
    ];
    for (command_id, event, accepted) in simple {
        let events = events.clone();
        component.register_handler(command_id, move |cmd: &Command| {
            let state = events.current_state();
            if state != accepted {
                return Ok(CommandResponse::rejected(format!("{} not possible while {}", cmd.id, state)));
            }
            events.push(event);
            Ok(CommandResponse::success())
        });
    }

    let target = Arc::clone(target);
    component.register_handler("set-temperature", move |cmd: &Command| {
        let request: SetTemperatureRequest = cmd.params_as()?;
        let valid = request.target_c.is_finite() && request.target_c > 0.0 && request.target_c <= max_target_c;
        if !valid {
            return Ok(CommandResponse::invalid(format!(
                "target_c must be in (0, {}], got {}",
                max_target_c, request.target_c
            )));
        }
        *target.lock() = request.target_c;
        log::info!("heater: target set to {:.1} °C", request.target_c);
        Ok(CommandResponse::success())
    });
}
