//! Service component driven by its own state machine thread.
//!
//! A [`StatedServiceComponent`] couples a [`ServiceComponent`] with a
//! [`StateMachine`] and the action context `C` its transitions operate on.
//!
//! ```text
//! broker thread                         component thread (ProcessContext)
//! ─────────────                         ─────────────────────────────────
//! handler(cmd)                          loop {
//!   validate params                       select! { event | stop }
//!   handle.push(Event) ──── queue ────▶   action(&mut ctx, event, old)
//!   return accepted/rejected              state = target
//!                                         notify("<id>-state")
//!                                       }
//! ```
//!
//! Command handlers never touch hardware; they push at most one event and
//! answer whether the request was accepted. Transition actions run on the
//! component thread, one at a time, and are the only code that drives the
//! HAL objects held in `C`.
//!
//! The processing loop selects over the event queue and the context's stop
//! signal, so [`stop`](StatedServiceComponent::stop) returns promptly even
//! when no event is pending. An action already running finishes first.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::commands::{Command, CommandResponse};
use crate::error::ProcessError;
use crate::messages::StateNotification;
use crate::process::ProcessContext;
use crate::services::{Notifier, ServiceComponent};
use crate::state_machine::{Dispatch, MachineSymbol, StateMachine, StateMachineHandle};

/// Built-in command answering with the current state.
pub const GET_STATE_COMMAND: &str = "get-state";

struct Machine<S, E, C> {
    machine: StateMachine<S, E, C>,
    context: C,
}

/// A [`ServiceComponent`] whose commands feed a state machine.
pub struct StatedServiceComponent<S, E, C> {
    component: ServiceComponent,
    handle: StateMachineHandle<S, E>,
    machine: Arc<Mutex<Machine<S, E, C>>>,
    process: ProcessContext,
    state_notification: Option<String>,
}

impl<S, E, C> StatedServiceComponent<S, E, C>
where
    S: MachineSymbol + fmt::Display,
    E: MachineSymbol,
    C: Send + 'static,
{
    /// Wrap `component` around `machine` and its action `context`.
    ///
    /// Registers the built-in `get-state` handler. The machine is renamed
    /// after the component so log lines and notifications carry its id.
    pub fn new(component: ServiceComponent, machine: StateMachine<S, E, C>, context: C) -> Self {
        let machine = machine.with_name(component.id());
        let handle = machine.handle();

        let state = handle.clone();
        let id = component.id().to_owned();
        component.register_handler(GET_STATE_COMMAND, move |_: &Command| {
            let snapshot = StateNotification::current(id.clone(), state.current_state().to_string());
            Ok(CommandResponse::success_with(serde_json::to_string(&snapshot)?))
        });

        let process = ProcessContext::new(component.id());
        Self {
            component,
            handle,
            machine: Arc::new(Mutex::new(Machine { machine, context })),
            process,
            state_notification: None,
        }
    }

    /// Publish a [`StateNotification`] under `notification_id` after every
    /// transition.
    pub fn with_state_notification(mut self, notification_id: impl Into<String>) -> Self {
        self.state_notification = Some(notification_id.into());
        self
    }

    /// The messaging half.
    pub fn component(&self) -> &ServiceComponent {
        &self.component
    }

    /// Component identifier.
    pub fn id(&self) -> &str {
        self.component.id()
    }

    /// Producer handle for command handlers and observers.
    pub fn handle(&self) -> StateMachineHandle<S, E> {
        self.handle.clone()
    }

    /// Current state.
    pub fn current_state(&self) -> S {
        self.handle.current_state()
    }

    /// Enqueue an event.
    pub fn push(&self, event: E) {
        self.handle.push(event);
    }

    /// Start the processing thread.
    pub fn start(&self) -> Result<(), ProcessError> {
        let machine = Arc::clone(&self.machine);
        let notifier = self.component.notifier();
        let notification = self.state_notification.clone();

        self.process.set_process_runner(move |stop| {
            let mut guard = machine.lock();
            let Machine { machine: fsm, context } = &mut *guard;
            while let Some(dispatch) = fsm.process_next_event_until(context, stop.receiver()) {
                publish_transition(fsm, dispatch, &notifier, notification.as_deref());
            }
        })?;
        self.process.start()
    }

    /// Stop the processing thread and join it.
    ///
    /// Events still queued stay queued and are processed after the next
    /// `start`. Returns false if the component was not running.
    pub fn stop(&self) -> bool {
        self.process.stop()
    }

    /// Returns true while the processing thread runs.
    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    /// Process one event on the calling thread, blocking until one arrives.
    ///
    /// For driving the machine by hand while the thread is stopped; fails
    /// with [`ProcessError::Running`] otherwise.
    pub fn process_next_event(&self) -> Result<Dispatch<S, E>, ProcessError> {
        self.with_stopped(|machine, notifier, notification| {
            let Machine { machine: fsm, context } = machine;
            let dispatch = fsm.process_next_event(context);
            publish_transition(fsm, dispatch, notifier, notification);
            dispatch
        })
    }

    /// Process every queued event on the calling thread; see
    /// [`process_next_event`](Self::process_next_event).
    pub fn process_pending(&self) -> Result<usize, ProcessError> {
        self.with_stopped(|machine, notifier, notification| {
            let Machine { machine: fsm, context } = machine;
            let mut count = 0;
            while let Some(dispatch) = fsm.try_process_next_event(context) {
                publish_transition(fsm, dispatch, notifier, notification);
                count += 1;
            }
            count
        })
    }

    /// Run `f` with the action context while the thread is stopped.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R, ProcessError> {
        self.with_stopped(|machine, _, _| f(&mut machine.context))
    }

    fn with_stopped<R>(
        &self,
        f: impl FnOnce(&mut Machine<S, E, C>, &Notifier, Option<&str>) -> R,
    ) -> Result<R, ProcessError> {
        if self.process.is_running() {
            return Err(ProcessError::Running(self.id().to_owned()));
        }
        let notifier = self.component.notifier();
        let mut machine = self.machine.lock();
        Ok(f(&mut machine, &notifier, self.state_notification.as_deref()))
    }
}

fn publish_transition<S, E, C>(
    fsm: &StateMachine<S, E, C>,
    dispatch: Dispatch<S, E>,
    notifier: &Notifier,
    notification: Option<&str>,
) where
    S: MachineSymbol + fmt::Display,
    E: MachineSymbol,
{
    if let (Dispatch::Transitioned { from, to }, Some(notification)) = (dispatch, notification) {
        let change = StateNotification::changed(fsm.name(), from.to_string(), to.to_string());
        notifier.notify_json(notification, &change);
    }
}

impl<S, E, C> Drop for StatedServiceComponent<S, E, C> {
    fn drop(&mut self) {
        self.process.stop();
    }
}
