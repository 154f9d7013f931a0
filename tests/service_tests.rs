//! End-to-end tests: components wired through the local broker on simulated hardware

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use filament_core::{
    commands::{Command, CommandResponse, CommandResult},
    config::{Configuration, HeaterConfig, ObserverConfig},
    hal::{GpioControl, HalObject, SimHardware, Simulation, StepperMotorControl},
    messages::{SetTemperatureRequest, StartMotorRequest, StateNotification},
    services::{
        FeederState, FilamentFeederMotor, FilamentMergerHeater, HeaterState, LocalBroker,
        ServiceComponent, FEEDER_STATE_NOTIFICATION, HEATER_STATE_NOTIFICATION,
    },
    traits::{HardwareProvider, MessageBroker},
    ServiceLocator,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Machine {
    sim: Arc<Simulation>,
    broker: Arc<LocalBroker>,
    gpio: GpioControl,
    motors: StepperMotorControl,
}

fn machine() -> Machine {
    init_logging();
    let sim = Arc::new(Simulation::new());
    let hardware: Arc<dyn HardwareProvider> = Arc::new(SimHardware::new(Arc::clone(&sim)));
    let config = Configuration::from_json(&serde_json::json!({
        "gpio": {
            "chip": "gpiochip0",
            "gpio-pin": {
                "heater": { "line": 17, "direction": "out" },
                "heater-fault": { "line": 27, "direction": "in", "edge": "rising" }
            }
        },
        "motors": {
            "bus": "i2c-1",
            "motor": { "feeder": { "port": 1, "steps-per-revolution": 50 } }
        }
    }))
    .unwrap();

    let mut gpio = GpioControl::new("gpio");
    gpio.init(&config.extract("gpio."), Arc::clone(&hardware)).unwrap();
    let mut motors = StepperMotorControl::new("motors");
    motors.init(&config.extract("motors."), hardware).unwrap();

    Machine {
        sim,
        broker: Arc::new(LocalBroker::new()),
        gpio,
        motors,
    }
}

/// A component recording every notification it is subscribed to.
fn listener(broker: &Arc<LocalBroker>, topics: &[&str]) -> (ServiceComponent, Receiver<StateNotification>) {
    let (tx, rx) = unbounded();
    let ui = ServiceComponent::new("ui", broker.clone());
    for topic in topics {
        let tx = tx.clone();
        ui.register_handler(*topic, move |cmd: &Command| {
            let _ = tx.send(cmd.params_as::<StateNotification>()?);
            Ok(CommandResponse::success())
        });
        ui.subscribe(topic);
    }
    ui.connect();
    (ui, rx)
}

fn send(broker: &LocalBroker, command: Command, receiver: &str) -> CommandResponse {
    broker.send(&command, receiver).unwrap()
}

fn next_state(rx: &Receiver<StateNotification>) -> String {
    rx.recv_timeout(WAIT).unwrap().state
}

// ============================================================================
// Feeder Tests
// ============================================================================

#[test]
fn feeder_runs_fixed_feed_and_publishes_states() {
    let machine = machine();
    let (_ui, states) = listener(&machine.broker, &[FEEDER_STATE_NOTIFICATION]);
    let feeder = FilamentFeederMotor::new(
        "feeder",
        machine.broker.clone(),
        Arc::clone(machine.motors.stepper_motor("feeder").unwrap()),
    );
    feeder.start().unwrap();

    assert!(send(&machine.broker, Command::new("switch-on", "ui"), "feeder").is_success());
    assert_eq!(next_state(&states), "on");

    let start = Command::new("start-motor", "ui")
        .with_json(&StartMotorRequest::steps(1200.0, 25))
        .unwrap();
    assert!(send(&machine.broker, start, "feeder").is_success());
    assert_eq!(next_state(&states), "running");
    let finished = states.recv_timeout(WAIT).unwrap();
    assert_eq!(finished, StateNotification::changed("feeder", "running", "on"));
    assert_eq!(machine.sim.motor_steps("i2c-1", 1), 25);

    assert!(send(&machine.broker, Command::new("switch-off", "ui"), "feeder").is_success());
    assert_eq!(next_state(&states), "off");
    assert!(!machine.sim.motor_energized("i2c-1", 1));
    assert_eq!(feeder.current_state(), FeederState::Off);
    feeder.stop();
}

#[test]
fn feeder_switch_off_interrupts_continuous_feed() {
    let machine = machine();
    let (_ui, states) = listener(&machine.broker, &[FEEDER_STATE_NOTIFICATION]);
    let feeder = FilamentFeederMotor::new(
        "feeder",
        machine.broker.clone(),
        Arc::clone(machine.motors.stepper_motor("feeder").unwrap()),
    );
    feeder.start().unwrap();

    send(&machine.broker, Command::new("switch-on", "ui"), "feeder");
    assert_eq!(next_state(&states), "on");
    let start = Command::new("start-motor", "ui")
        .with_json(&StartMotorRequest::continuous(1200.0))
        .unwrap();
    send(&machine.broker, start, "feeder");
    assert_eq!(next_state(&states), "running");

    let response = send(&machine.broker, Command::new("switch-on", "ui"), "feeder");
    assert_eq!(response.result, CommandResult::Rejected);

    send(&machine.broker, Command::new("switch-off", "ui"), "feeder");
    assert_eq!(next_state(&states), "off");

    let position = machine.sim.motor_position("i2c-1", 1);
    assert!(position > 0);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(machine.sim.motor_position("i2c-1", 1), position);
    feeder.stop();
}

#[test]
fn get_state_answers_without_thread() {
    let machine = machine();
    let _feeder = FilamentFeederMotor::new(
        "feeder",
        machine.broker.clone(),
        Arc::clone(machine.motors.stepper_motor("feeder").unwrap()),
    );
    let response = send(&machine.broker, Command::new("get-state", "ui"), "feeder");
    let state: StateNotification = serde_json::from_str(&response.payload).unwrap();
    assert_eq!(state, StateNotification::current("feeder", "off"));
}

// ============================================================================
// Heater Tests
// ============================================================================

fn heater(machine: &Machine) -> FilamentMergerHeater {
    FilamentMergerHeater::new(
        "heater",
        machine.broker.clone(),
        Arc::clone(machine.gpio.gpio_pin("heater").unwrap()),
        &HeaterConfig::default(),
    )
    .unwrap()
    .with_fault_pin(
        Arc::clone(machine.gpio.gpio_pin("heater-fault").unwrap()),
        &ObserverConfig::default().with_max_observation_timeout(Duration::from_millis(10)),
    )
    .unwrap()
}

#[test]
fn heater_fault_pin_forces_error_state() {
    let machine = machine();
    let (_ui, states) = listener(&machine.broker, &[HEATER_STATE_NOTIFICATION]);
    let heater = heater(&machine);
    heater.start().unwrap();

    send(&machine.broker, Command::new("switch-on", "ui"), "heater");
    assert_eq!(next_state(&states), "heating");
    assert!(machine.sim.line_level("gpiochip0", 17));

    machine.sim.drive_line("gpiochip0", 27, true);
    assert_eq!(next_state(&states), "error");
    assert!(!machine.sim.line_level("gpiochip0", 17));

    send(&machine.broker, Command::new("reset", "ui"), "heater");
    assert_eq!(next_state(&states), "off");
    heater.stop();
}

#[test]
fn heater_temperature_target_is_independent_of_state() {
    let machine = machine();
    let heater = heater(&machine);

    let set = Command::new("set-temperature", "ui")
        .with_json(&SetTemperatureRequest { target_c: 230.0 })
        .unwrap();
    assert!(send(&machine.broker, set, "heater").is_success());
    assert_eq!(heater.target_c(), 230.0);
    assert_eq!(heater.current_state(), HeaterState::Off);

    let bad = Command::new("set-temperature", "ui").with_params("{\"target_c\": \"hot\"}");
    let response = send(&machine.broker, bad, "heater");
    assert_eq!(response.result, CommandResult::InvalidParameter);
}

#[test]
fn unknown_command_is_unsupported() {
    let machine = machine();
    let _heater = heater(&machine);
    let response = send(&machine.broker, Command::new("defrost", "ui"), "heater");
    assert_eq!(response.result, CommandResult::Unsupported);
}

// ============================================================================
// Wiring Tests
// ============================================================================

#[test]
fn components_share_hal_maps_through_locator() {
    let machine = machine();
    let mut locator = ServiceLocator::new();
    let pins = Arc::new(machine.gpio.gpio_pin_map().clone());
    locator.add(&pins);

    let found = locator.get::<filament_core::HalMap<filament_core::hal::GpioPin>>();
    assert_eq!(found.len(), 2);
    drop(found);

    drop(pins);
    assert!(locator.try_get::<filament_core::HalMap<filament_core::hal::GpioPin>>().is_none());
}

#[test]
fn dropped_component_stops_receiving() {
    let machine = machine();
    let heater = heater(&machine);
    heater.start().unwrap();
    assert_eq!(machine.broker.components(), ["heater"]);

    drop(heater);
    assert!(machine.broker.components().is_empty());
    assert!(machine.broker.send(&Command::new("switch-on", "ui"), "heater").is_err());
    assert!(!machine.sim.line_level("gpiochip0", 17));
}
