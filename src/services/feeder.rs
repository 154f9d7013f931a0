//! Filament feeder: a stepper motor pushing filament into the merger.
//!
//! # States
//!
//! ```text
//!            SwitchOn            Start
//!   ┌─────┐ ─────────▶ ┌────┐ ─────────▶ ┌─────────┐
//!   │ Off │            │ On │            │ Running │
//!   └─────┘ ◀───────── └────┘ ◀───────── └─────────┘
//!      ▲     SwitchOff    │   Stop/Finished    │
//!      │                  │ Fail               │ Fail
//!      │  Reset/SwitchOff ▼                    │
//!      └──────────── ┌───────┐ ◀───────────────┘
//!                    │ Error │
//!                    └───────┘
//! ```
//!
//! `Running` moves the motor on a worker thread so the component thread
//! stays free for `stop-motor`. A fixed-step feed returns to `On` by itself
//! (`Finished`); a continuous feed runs until stopped. Any motor error
//! pushes `Fail`.
//!
//! # Commands
//!
//! | Command | Params | Accepted in |
//! |---------|--------|-------------|
//! | `switch-on` | | `off` |
//! | `switch-off` | | `on`, `running`, `error` |
//! | `start-motor` | [`StartMotorRequest`] | `on` |
//! | `stop-motor` | | `running` |
//! | `reset` | | `error` |
//! | `get-state` | | any |

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::commands::{Command, CommandResponse};
use crate::config::Identifier;
use crate::error::ProcessError;
use crate::hal::StepperMotor;
use crate::messages::StartMotorRequest;
use crate::services::{ServiceComponent, StatedServiceComponent};
use crate::state_machine::{StateMachine, StateMachineHandle, TransitionTable};
use crate::traits::{MessageBroker, StepDirection};

/// Notification published after every feeder transition.
pub const FEEDER_STATE_NOTIFICATION: &str = "feeder-state";

// ============================================================================
// States and Events
// ============================================================================

/// Feeder states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeederState {
    /// Motor released.
    Off,
    /// Ready to feed.
    On,
    /// Feeding.
    Running,
    /// Motor failure; needs `reset` or `switch-off`.
    Error,
}

impl FeederState {
    /// Lowercase state name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FeederState::Off => "off",
            FeederState::On => "on",
            FeederState::Running => "running",
            FeederState::Error => "error",
        }
    }
}

impl fmt::Display for FeederState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feeder events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeederEvent {
    /// Power the feeder up.
    SwitchOn,
    /// Stop and release the motor.
    SwitchOff,
    /// Begin the pending feed request.
    Start,
    /// Interrupt the running feed.
    Stop,
    /// A fixed-step feed completed.
    Finished,
    /// The motor reported an error.
    Fail,
    /// Leave the error state.
    Reset,
}

// ============================================================================
// Action Context
// ============================================================================

/// State owned by the feeder's transition actions.
pub struct FeederContext {
    motor: Arc<StepperMotor>,
    events: StateMachineHandle<FeederState, FeederEvent>,
    pending: Arc<Mutex<Option<StartMotorRequest>>>,
    feed: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl FeederContext {
    fn start_feed(&mut self) {
        let Some(request) = self.pending.lock().take() else {
            log::error!("feeder: start without a pending request");
            self.events.push(FeederEvent::Fail);
            return;
        };
        if let Err(err) = self.motor.set_speed_rpm(request.speed_rpm) {
            log::error!("feeder: {}", err);
            self.events.push(FeederEvent::Fail);
            return;
        }

        let motor = Arc::clone(&self.motor);
        let events = self.events.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Arc::clone(&cancel);
        let spawned = thread::Builder::new()
            .name("feeder-motion".into())
            .spawn(move || feed(&motor, request, &events, &cancel));
        match spawned {
            Ok(handle) => self.feed = Some(handle),
            Err(err) => {
                log::error!("feeder: cannot spawn motion thread: {}", err);
                self.events.push(FeederEvent::Fail);
            }
        }
    }

    fn halt(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.motor.stop();
        if let Some(handle) = self.feed.take() {
            if handle.join().is_err() {
                log::error!("feeder: motion thread panicked");
            }
        }
    }

    fn release(&mut self) {
        self.halt();
        if let Err(err) = self.motor.release() {
            log::warn!("feeder: release failed: {}", err);
        }
    }
}

impl Drop for FeederContext {
    fn drop(&mut self) {
        self.halt();
    }
}

fn feed(
    motor: &StepperMotor,
    request: StartMotorRequest,
    events: &StateMachineHandle<FeederState, FeederEvent>,
    cancel: &AtomicBool,
) {
    let outcome = match request.steps {
        Some(steps) => motor
            .step_unless(steps, StepDirection::Forward, cancel)
            .map(|taken| {
                if taken == steps {
                    events.push(FeederEvent::Finished);
                }
            }),
        None => {
            // One revolution per chunk; a short chunk means stop was requested.
            let chunk = u64::from(motor.steps_per_revolution().max(1));
            loop {
                match motor.step_unless(chunk, StepDirection::Forward, cancel) {
                    Ok(taken) if taken == chunk => continue,
                    Ok(_) => break Ok(()),
                    Err(err) => break Err(err),
                }
            }
        }
    };
    if let Err(err) = outcome {
        log::error!("feeder: motion failed: {}", err);
        events.push(FeederEvent::Fail);
    }
}

fn transitions() -> TransitionTable<FeederState, FeederEvent, FeederContext> {
    use FeederEvent::*;
    use FeederState::*;

    TransitionTable::new()
        .on(Off, SwitchOn, On)
        .on_with(On, SwitchOff, Off, |ctx: &mut FeederContext, _, _| ctx.release())
        .on_with(On, Start, Running, |ctx: &mut FeederContext, _, _| ctx.start_feed())
        .on_with(On, Fail, Error, |ctx: &mut FeederContext, _, _| ctx.release())
        .on_with(Running, Stop, On, |ctx: &mut FeederContext, _, _| ctx.halt())
        .on_with(Running, Finished, On, |ctx: &mut FeederContext, _, _| ctx.halt())
        .on_with(Running, SwitchOff, Off, |ctx: &mut FeederContext, _, _| ctx.release())
        .on_with(Running, Fail, Error, |ctx: &mut FeederContext, _, _| ctx.release())
        .on_with(Error, SwitchOff, Off, |ctx: &mut FeederContext, _, _| ctx.release())
        .on(Error, Reset, Off)
}

// ============================================================================
// Filament Feeder Motor
// ============================================================================

/// Service component driving the filament feeder stepper.
pub struct FilamentFeederMotor {
    stated: StatedServiceComponent<FeederState, FeederEvent, FeederContext>,
    motor: Arc<StepperMotor>,
}

impl FilamentFeederMotor {
    /// Create the feeder and register it with `broker`.
    ///
    /// The processing thread is not started; call [`start`](Self::start).
    pub fn new(id: impl Into<Identifier>, broker: Arc<dyn MessageBroker>, motor: Arc<StepperMotor>) -> Self {
        let machine = StateMachine::new(FeederState::Off, transitions());
        let events = machine.handle();
        let pending = Arc::new(Mutex::new(None));
        let context = FeederContext {
            motor: Arc::clone(&motor),
            events: events.clone(),
            pending: Arc::clone(&pending),
            feed: None,
            cancel: Arc::new(AtomicBool::new(false)),
        };

        let component = ServiceComponent::new(id, broker);
        register_handlers(&component, &events, &pending);
        let stated = StatedServiceComponent::new(component, machine, context)
            .with_state_notification(FEEDER_STATE_NOTIFICATION);
        stated.component().connect();

        Self { stated, motor }
    }

    /// Component identifier.
    pub fn id(&self) -> &str {
        self.stated.id()
    }

    /// The messaging half.
    pub fn component(&self) -> &ServiceComponent {
        self.stated.component()
    }

    /// The driven motor.
    pub fn motor(&self) -> &Arc<StepperMotor> {
        &self.motor
    }

    /// Current state.
    pub fn current_state(&self) -> FeederState {
        self.stated.current_state()
    }

    /// Start processing commands.
    pub fn start(&self) -> Result<(), ProcessError> {
        self.stated.start()
    }

    /// Stop processing commands; a running feed keeps going until the
    /// feeder is switched off or dropped.
    pub fn stop(&self) -> bool {
        self.stated.stop()
    }

    /// Returns true while the processing thread runs.
    pub fn is_running(&self) -> bool {
        self.stated.is_running()
    }
}

fn register_handlers(
    component: &ServiceComponent,
    events: &StateMachineHandle<FeederState, FeederEvent>,
    pending: &Arc<Mutex<Option<StartMotorRequest>>>,
) {
    let simple: [(&str, FeederEvent, &'static [FeederState]); 4] = [
        ("switch-on", FeederEvent::SwitchOn, &[FeederState::Off]),
        (
            "switch-off",
            FeederEvent::SwitchOff,
            &[FeederState::On, FeederState::Running, FeederState::Error],
        ),
        ("stop-motor", FeederEvent::Stop, &[FeederState::Running]),
        ("reset", FeederEvent::Reset, &[FeederState::Error]),
    ];
    for (command_id, event, accepted) in simple {
        let events = events.clone();
        component.register_handler(command_id, move |cmd: &Command| {
            let state = events.current_state();
            if !accepted.contains(&state) {
                return Ok(CommandResponse::rejected(format!("{} not possible while {}", cmd.id, state)));
            }
            events.push(event);
            Ok(CommandResponse::success())
        });
    }

    let events = events.clone();
    let pending = Arc::clone(pending);
    component.register_handler("start-motor", move |cmd: &Command| {
        let request: StartMotorRequest = cmd.params_as()?;
        if let Err(reason) = request.validate() {
            return Ok(CommandResponse::invalid(reason));
        }
        let state = events.current_state();
        if state != FeederState::On {
            return Ok(CommandResponse::rejected(format!("start-motor not possible while {}", state)));
        }
        *pending.lock() = Some(request);
        events.push(FeederEvent::Start);
        Ok(CommandResponse::success())
    });
}
