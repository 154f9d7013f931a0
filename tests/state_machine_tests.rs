//! Integration tests for the event queue, state machine and stated components

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use filament_core::{
    process::StopSignal, Dispatch, EventQueue, StateMachine, Transition, TransitionTable,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum State {
    Off,
    On,
    Running,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Event {
    SwitchOn,
    SwitchOff,
    Start,
}

#[derive(Default)]
struct Counters {
    switched_on: usize,
}

// ============================================================================
// Event Queue Tests
// ============================================================================

#[test]
fn queue_is_fifo_across_producers() {
    init_logging();
    let queue: EventQueue<u32> = EventQueue::new();
    let producer = queue.clone();
    thread::spawn(move || {
        for n in 0..100 {
            producer.push(n);
        }
    })
    .join()
    .unwrap();

    let pulled: Vec<u32> = (0..100).map(|_| queue.pull()).collect();
    assert_eq!(pulled, (0..100).collect::<Vec<_>>());
    assert!(queue.is_empty());
}

#[test]
fn blocked_pull_wakes_on_push() {
    init_logging();
    let queue: EventQueue<&str> = EventQueue::new();
    let producer = queue.clone();
    let consumer = thread::spawn(move || queue.pull());
    thread::sleep(Duration::from_millis(20));
    producer.push("wake");
    assert_eq!(consumer.join().unwrap(), "wake");
}

#[test]
fn pull_until_returns_none_on_stop() {
    init_logging();
    let queue: EventQueue<u8> = EventQueue::new();
    let (trigger, signal) = StopSignal::pair();
    let waiter = thread::spawn(move || queue.pull_until(signal.receiver()));
    thread::sleep(Duration::from_millis(20));
    trigger.raise();
    assert_eq!(waiter.join().unwrap(), None);
}

// ============================================================================
// Transition Table Tests
// ============================================================================

#[test]
fn switch_on_runs_action_exactly_once() {
    init_logging();
    let table = TransitionTable::new().on_with(
        State::Off,
        Event::SwitchOn,
        State::On,
        |ctx: &mut Counters, _, from| {
            assert_eq!(from, State::Off);
            ctx.switched_on += 1;
        },
    );
    let mut machine = StateMachine::new(State::Off, table);
    let mut counters = Counters::default();

    machine.push(Event::SwitchOn);
    let dispatch = machine.process_next_event(&mut counters);

    assert_eq!(dispatch, Dispatch::Transitioned { from: State::Off, to: State::On });
    assert_eq!(machine.current_state(), State::On);
    assert_eq!(counters.switched_on, 1);
}

#[test]
fn missing_pair_keeps_state_and_runs_nothing() {
    init_logging();
    let table = TransitionTable::new().on_with(
        State::Off,
        Event::SwitchOn,
        State::On,
        |ctx: &mut Counters, _, _| ctx.switched_on += 1,
    );
    let mut machine = StateMachine::new(State::Off, table);
    let mut counters = Counters::default();

    machine.push(Event::Start);
    let dispatch = machine.process_next_event(&mut counters);

    assert_eq!(dispatch, Dispatch::Ignored { state: State::Off, event: Event::Start });
    assert_eq!(machine.current_state(), State::Off);
    assert_eq!(counters.switched_on, 0);
}

#[test]
fn guard_refuses_without_running_action() {
    init_logging();
    let ran = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&ran);
    let table = TransitionTable::new().add(
        State::On,
        Event::Start,
        Transition::to(State::Running)
            .with_guard(|ctx: &Counters, _| ctx.switched_on > 0)
            .with_action(move |_: &mut Counters, _, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
    );
    let mut machine = StateMachine::new(State::On, table);

    machine.push(Event::Start);
    let dispatch = machine.process_next_event(&mut Counters::default());
    assert_eq!(dispatch, Dispatch::Refused { state: State::On, event: Event::Start });
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    machine.push(Event::Start);
    let dispatch = machine.process_next_event(&mut Counters { switched_on: 1 });
    assert!(dispatch.is_transition());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn events_processed_in_push_order() {
    init_logging();
    let table = TransitionTable::new()
        .on(State::Off, Event::SwitchOn, State::On)
        .on(State::On, Event::Start, State::Running)
        .on(State::Running, Event::SwitchOff, State::Off);
    let mut machine = StateMachine::new(State::Off, table);
    let handle = machine.handle();

    handle.push(Event::SwitchOn);
    handle.push(Event::Start);
    handle.push(Event::SwitchOff);

    let mut ctx = Counters::default();
    let states: Vec<State> = (0..3)
        .map(|_| machine.process_next_event(&mut ctx).state())
        .collect();
    assert_eq!(states, [State::On, State::Running, State::Off]);
    assert_eq!(handle.current_state(), State::Off);
}

#[test]
fn handle_pushes_from_other_threads() {
    init_logging();
    let table = TransitionTable::new()
        .on(State::Off, Event::SwitchOn, State::On)
        .on(State::On, Event::SwitchOff, State::Off);
    let mut machine = StateMachine::new(State::Off, table);
    let handle = machine.handle();

    let producer = thread::spawn(move || {
        for _ in 0..10 {
            handle.push(Event::SwitchOn);
            handle.push(Event::SwitchOff);
        }
    });
    producer.join().unwrap();

    assert_eq!(machine.process_pending(&mut Counters::default()), 20);
    assert_eq!(machine.current_state(), State::Off);
}
