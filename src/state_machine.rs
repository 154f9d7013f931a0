//! Generic table-driven finite state machine.
//!
//! A [`StateMachine`] holds the current state, a [`TransitionTable`] keyed by
//! `(state, event)`, and an [`EventQueue`] of pending events. Events are pushed
//! from any thread; exactly one thread (the owning component's process
//! context) calls [`process_next_event`](StateMachine::process_next_event),
//! which pops one event, runs the transition action and commits the new state.
//!
//! # Transition Semantics
//!
//! | Table lookup | Guard | Effect |
//! |--------------|-------|--------|
//! | entry found | passes / none | action runs once with `(event, old state)`, then state = target |
//! | entry found | fails | nothing runs, state unchanged |
//! | no entry | - | logged and ignored, state unchanged |
//!
//! Actions run synchronously on the processing thread. A long hardware
//! operation inside an action delays every later event of the same machine.
//!
//! # Example
//!
//! ```rust
//! use filament_core::state_machine::{Dispatch, StateMachine, TransitionTable};
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum State { Off, On }
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum Event { SwitchOn, SwitchOff }
//!
//! #[derive(Default)]
//! struct Heater { switched_on: u32 }
//!
//! let table = TransitionTable::new()
//!     .on_with(State::Off, Event::SwitchOn, State::On, |heater: &mut Heater, _, _| {
//!         heater.switched_on += 1;
//!     })
//!     .on(State::On, Event::SwitchOff, State::Off);
//!
//! let mut machine = StateMachine::new(State::Off, table);
//! let mut heater = Heater::default();
//!
//! machine.push(Event::SwitchOn);
//! let dispatch = machine.process_next_event(&mut heater);
//!
//! assert_eq!(dispatch, Dispatch::Transitioned { from: State::Off, to: State::On });
//! assert_eq!(machine.current_state(), State::On);
//! assert_eq!(heater.switched_on, 1);
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::RwLock;

use crate::event_queue::EventQueue;

/// Bounds shared by state and event enumerations.
pub trait MachineSymbol: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> MachineSymbol for T {}

/// Side effect run when a transition fires: `(context, event, previous state)`.
pub type Action<S, E, C> = Box<dyn FnMut(&mut C, &E, S) + Send>;

/// Predicate that must hold for a transition to fire.
pub type Guard<E, C> = Box<dyn Fn(&C, &E) -> bool + Send>;

// ============================================================================
// Transitions
// ============================================================================

/// Target state plus optional guard and action for one table entry.
pub struct Transition<S, E, C> {
    target: S,
    action: Option<Action<S, E, C>>,
    guard: Option<Guard<E, C>>,
}

impl<S: MachineSymbol, E: MachineSymbol, C> Transition<S, E, C> {
    /// A transition to `target` with no action.
    pub fn to(target: S) -> Self {
        Self {
            target,
            action: None,
            guard: None,
        }
    }

    /// Run `action` when the transition fires.
    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: FnMut(&mut C, &E, S) + Send + 'static,
    {
        self.action = Some(Box::new(action));
        self
    }

    /// Only fire when `guard` returns true.
    pub fn with_guard<G>(mut self, guard: G) -> Self
    where
        G: Fn(&C, &E) -> bool + Send + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }

    /// State the machine moves to.
    pub fn target(&self) -> S {
        self.target
    }

    /// Returns true if an action is attached.
    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

/// Mapping from `(state, event)` to [`Transition`].
pub struct TransitionTable<S, E, C> {
    transitions: HashMap<(S, E), Transition<S, E, C>>,
}

impl<S: MachineSymbol, E: MachineSymbol, C> TransitionTable<S, E, C> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            transitions: HashMap::new(),
        }
    }

    /// Add an entry, replacing any previous entry for the same pair.
    pub fn add(mut self, from: S, event: E, transition: Transition<S, E, C>) -> Self {
        self.insert(from, event, transition);
        self
    }

    /// Add an action-less entry.
    pub fn on(self, from: S, event: E, to: S) -> Self {
        self.add(from, event, Transition::to(to))
    }

    /// Add an entry with an action.
    pub fn on_with<F>(self, from: S, event: E, to: S, action: F) -> Self
    where
        F: FnMut(&mut C, &E, S) + Send + 'static,
    {
        self.add(from, event, Transition::to(to).with_action(action))
    }

    /// Insert through a mutable reference (for tables built in loops).
    pub fn insert(&mut self, from: S, event: E, transition: Transition<S, E, C>) {
        self.transitions.insert((from, event), transition);
    }

    /// Look up the entry for a pair.
    pub fn get(&self, state: S, event: E) -> Option<&Transition<S, E, C>> {
        self.transitions.get(&(state, event))
    }

    /// Returns true if the pair has an entry.
    pub fn contains(&self, state: S, event: E) -> bool {
        self.transitions.contains_key(&(state, event))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

impl<S: MachineSymbol, E: MachineSymbol, C> Default for TransitionTable<S, E, C> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Dispatch Outcome
// ============================================================================

/// What processing one event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch<S, E> {
    /// A transition fired (its action, if any, ran once).
    Transitioned {
        /// State before the event
        from: S,
        /// State after the event
        to: S,
    },
    /// The table had an entry but its guard refused the event.
    Refused {
        /// Unchanged state
        state: S,
        /// Refused event
        event: E,
    },
    /// No entry for `(state, event)`; the event was dropped.
    Ignored {
        /// Unchanged state
        state: S,
        /// Dropped event
        event: E,
    },
}

impl<S: Copy, E> Dispatch<S, E> {
    /// State after processing.
    pub fn state(&self) -> S {
        match self {
            Dispatch::Transitioned { to, .. } => *to,
            Dispatch::Refused { state, .. } | Dispatch::Ignored { state, .. } => *state,
        }
    }

    /// Returns true if a transition fired.
    pub fn is_transition(&self) -> bool {
        matches!(self, Dispatch::Transitioned { .. })
    }
}

// ============================================================================
// State Machine
// ============================================================================

/// Deterministic FSM driven by a queue of events.
///
/// The action context `C` is passed to each processing call rather than
/// owned, so components can keep hardware handles next to the machine.
pub struct StateMachine<S, E, C> {
    name: String,
    state: Arc<RwLock<S>>,
    table: TransitionTable<S, E, C>,
    queue: EventQueue<E>,
}

impl<S: MachineSymbol, E: MachineSymbol, C> StateMachine<S, E, C> {
    /// Creates a machine in `initial` with the given table.
    pub fn new(initial: S, table: TransitionTable<S, E, C>) -> Self {
        Self {
            name: "fsm".to_owned(),
            state: Arc::new(RwLock::new(initial)),
            table,
            queue: EventQueue::new(),
        }
    }

    /// Name used in log messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Name used in log messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. Safe to call while another thread processes events.
    pub fn current_state(&self) -> S {
        *self.state.read()
    }

    /// Enqueue an event. Never blocks.
    pub fn push(&self, event: E) {
        self.queue.push(event);
    }

    /// Returns true if no events are waiting (snapshot).
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Cloneable producer-side handle for other threads.
    pub fn handle(&self) -> StateMachineHandle<S, E> {
        StateMachineHandle {
            state: Arc::clone(&self.state),
            queue: self.queue.clone(),
        }
    }

    /// Block for the next event and dispatch it.
    pub fn process_next_event(&mut self, ctx: &mut C) -> Dispatch<S, E> {
        let event = self.queue.pull();
        self.dispatch(ctx, event)
    }

    /// Block for the next event or until `stop` fires.
    ///
    /// Returns `None` when stopped without dispatching anything.
    pub fn process_next_event_until<T>(
        &mut self,
        ctx: &mut C,
        stop: &Receiver<T>,
    ) -> Option<Dispatch<S, E>> {
        let event = self.queue.pull_until(stop)?;
        Some(self.dispatch(ctx, event))
    }

    /// Dispatch the next event if one is queued, without blocking.
    pub fn try_process_next_event(&mut self, ctx: &mut C) -> Option<Dispatch<S, E>> {
        let event = self.queue.try_pull()?;
        Some(self.dispatch(ctx, event))
    }

    /// Dispatch every event currently queued; returns how many were handled.
    pub fn process_pending(&mut self, ctx: &mut C) -> usize {
        let mut count = 0;
        while self.try_process_next_event(ctx).is_some() {
            count += 1;
        }
        count
    }

    fn dispatch(&mut self, ctx: &mut C, event: E) -> Dispatch<S, E> {
        let from = self.current_state();

        let Some(transition) = self.table.transitions.get_mut(&(from, event)) else {
            log::warn!(
                "{}: no transition for event {:?} in state {:?}, ignoring",
                self.name,
                event,
                from
            );
            return Dispatch::Ignored { state: from, event };
        };

        if let Some(guard) = &transition.guard {
            if !guard(ctx, &event) {
                log::debug!("{}: guard refused {:?} in state {:?}", self.name, event, from);
                return Dispatch::Refused { state: from, event };
            }
        }

        if let Some(action) = transition.action.as_mut() {
            action(ctx, &event, from);
        }

        let to = transition.target;
        *self.state.write() = to;
        log::debug!("{}: {:?} --{:?}--> {:?}", self.name, from, event, to);

        Dispatch::Transitioned { from, to }
    }
}

/// Producer-side view of a [`StateMachine`]: push events, read the state.
///
/// Handed to command handlers and GPIO observers running on other threads.
pub struct StateMachineHandle<S, E> {
    state: Arc<RwLock<S>>,
    queue: EventQueue<E>,
}

impl<S: MachineSymbol, E: MachineSymbol> StateMachineHandle<S, E> {
    /// Enqueue an event. Never blocks.
    pub fn push(&self, event: E) {
        self.queue.push(event);
    }

    /// Current state of the machine.
    pub fn current_state(&self) -> S {
        *self.state.read()
    }
}

impl<S, E> Clone for StateMachineHandle<S, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            queue: self.queue.clone(),
        }
    }
}
