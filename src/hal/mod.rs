//! Hardware abstraction layer objects.
//!
//! Every hardware-facing entity (pin, motor, sensor, and the controllers that
//! own them) is a [`HalObject`] with a two-phase lifecycle:
//!
//! ```text
//!              init() ok
//! Uninitialized ─────────▶ Initialized
//!       ▲                      │
//!       └──── finalize() ──────┘   (also on Drop, and before a re-init)
//! ```
//!
//! Children are handed out as `Arc`s, so a controller cannot rely on
//! dropping its own references. When it finalizes it [`detach`]es every
//! child first: a pin or motor still held by a component stays alive as an
//! object but no longer holds a device handle.
//!
//! [`detach`]: SubComponent::detach
//!
//! Controllers build their children with [`init_enabled_sub_components`],
//! which is the same routine for GPIO pins, stepper motors and temperature
//! sensors; only the child type and the shared constructor arguments differ.
//!
//! # Modules
//!
//! - `gpio`: [`GpioControl`] and [`GpioPin`]
//! - `stepper`: [`StepperMotorControl`] and [`StepperMotor`]
//! - `temperature`: [`TemperatureSensorControl`] and [`TemperatureSensor`]
//! - `observer`: [`GpioPinEventObserver`], bridging pin events onto a thread
//! - `sim`: Simulated backend with an injected [`Simulation`](sim::Simulation) context

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Configuration, Identifier, ENABLED_OPTION};
use crate::error::{HalError, Result};

pub mod gpio;
pub mod observer;
pub mod sim;
pub mod stepper;
pub mod temperature;

pub use gpio::{GpioControl, GpioPin};
pub use observer::GpioPinEventObserver;
pub use sim::{SimHardware, Simulation};
pub use stepper::{StepperMotor, StepperMotorControl};
pub use temperature::{TemperatureSensor, TemperatureSensorArgs, TemperatureSensorControl};

/// Children of a controller, keyed by identifier.
///
/// Entries exist only for children whose `init` succeeded.
pub type HalMap<T> = BTreeMap<Identifier, Arc<T>>;

// ============================================================================
// Lifecycle Traits
// ============================================================================

/// Identity and two-phase lifecycle shared by every hardware object.
pub trait HalObject {
    /// Extra constructor arguments passed to `init` (shared bus handles etc.).
    type Args;

    /// Identifier, unique within the owning map.
    fn id(&self) -> &str;

    /// Acquire resources described by `config`.
    ///
    /// Calling `init` on an initialized object first finalizes it.
    fn init(&mut self, config: &Configuration, args: Self::Args) -> Result<()>;

    /// Release every resource. Safe to call repeatedly.
    fn finalize(&mut self);

    /// Returns true between a successful `init` and the next `finalize`.
    fn is_initialized(&self) -> bool;
}

/// A [`HalObject`] that a controller instantiates from configuration.
pub trait SubComponent: HalObject + Sized {
    /// Construct an uninitialized object.
    fn create(id: Identifier) -> Self;

    /// Release every resource through a shared reference.
    ///
    /// Afterwards the object reports itself uninitialized and its
    /// operations fail with [`HalError::NotInitialized`].
    fn detach(&self);
}

// ============================================================================
// Sub-Component Instantiation
// ============================================================================

/// Build, initialize and register every enabled child under `prefix`.
///
/// For each child name found below `prefix.` (see
/// [`Configuration::child_names`]):
///
/// 1. read `<prefix>.<id>.enabled` (missing means enabled); disabled
///    children are skipped entirely
/// 2. extract the child's own view `<prefix>.<id>.*` with the prefix stripped
/// 3. construct it with [`SubComponent::create`] and `init` it with that view
///    and a clone of `args`
/// 4. insert it into `map`
///
/// If any enabled child fails, the children registered by this call are
/// finalized and removed again, so `map` holds none of them, and the error
/// names the failing child. Returns the number of children registered.
pub fn init_enabled_sub_components<T>(
    config: &Configuration,
    prefix: &str,
    map: &mut HalMap<T>,
    args: T::Args,
) -> Result<usize>
where
    T: SubComponent,
    T::Args: Clone,
{
    let mut registered: Vec<Identifier> = Vec::new();

    for id in config.child_names(prefix) {
        let section = config.extract(&format!("{}.{}.", prefix, id));

        let enabled = match section.get_or(ENABLED_OPTION, true) {
            Ok(enabled) => enabled,
            Err(err) => {
                unregister(map, &registered);
                return Err(HalError::SubComponent {
                    id,
                    source: Box::new(err.into()),
                });
            }
        };
        if !enabled {
            log::debug!("{} {}: disabled, skipping", prefix, id);
            continue;
        }

        let mut child = T::create(id.clone());
        if let Err(err) = child.init(&section, args.clone()) {
            log::error!("{} {}: init failed: {}", prefix, id, err);
            child.finalize();
            unregister(map, &registered);
            return Err(HalError::SubComponent {
                id,
                source: Box::new(err),
            });
        }

        log::debug!("{} {}: initialized", prefix, id);
        map.insert(id.clone(), Arc::new(child));
        registered.push(id);
    }

    Ok(registered.len())
}

fn unregister<T: SubComponent>(map: &mut HalMap<T>, ids: &[Identifier]) {
    for id in ids {
        if let Some(child) = map.remove(id) {
            child.detach();
        }
    }
}

/// Detach every child and empty `map`.
///
/// Copies of the children held elsewhere keep existing, uninitialized.
pub fn finalize_sub_components<T: SubComponent>(map: &mut HalMap<T>) {
    for child in map.values() {
        child.detach();
    }
    map.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOption;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Shared counters observed by the test children.
    #[derive(Default)]
    struct Tally {
        finalized: AtomicUsize,
    }

    struct Widget {
        id: Identifier,
        level: i64,
        tally: Mutex<Option<Arc<Tally>>>,
    }

    impl HalObject for Widget {
        type Args = Arc<Tally>;

        fn id(&self) -> &str {
            &self.id
        }

        fn init(&mut self, config: &Configuration, tally: Arc<Tally>) -> Result<()> {
            *self.tally.get_mut() = Some(tally);
            self.level = config.get("level")?;
            if self.level < 0 {
                return Err(HalError::InvalidArgument("negative level".into()));
            }
            Ok(())
        }

        fn finalize(&mut self) {
            self.detach();
        }

        fn is_initialized(&self) -> bool {
            self.tally.lock().is_some()
        }
    }

    impl SubComponent for Widget {
        fn create(id: Identifier) -> Self {
            Self {
                id,
                level: 0,
                tally: Mutex::new(None),
            }
        }

        fn detach(&self) {
            if let Some(tally) = self.tally.lock().take() {
                tally.finalized.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn config(entries: &[(&str, i64)]) -> Configuration {
        entries
            .iter()
            .map(|(name, value)| ConfigOption::new(*name, *value))
            .collect()
    }

    #[test]
    fn registers_enabled_children_only() {
        let mut cfg = config(&[("widget.a.level", 1), ("widget.b.level", 2)]);
        cfg.add(ConfigOption::new("widget.b.enabled", false));
        cfg.add(ConfigOption::new("widget.c.level", 3));

        let mut map = HalMap::new();
        let count =
            init_enabled_sub_components::<Widget>(&cfg, "widget", &mut map, Arc::default())
                .unwrap();

        assert_eq!(count, 2);
        assert_eq!(map.keys().collect::<Vec<_>>(), ["a", "c"]);
        assert_eq!(map["c"].level, 3);
    }

    #[test]
    fn failing_child_leaves_no_entries() {
        let cfg = config(&[
            ("widget.a.level", 1),
            ("widget.b.level", 2),
            ("widget.c.level", -1),
        ]);
        let tally = Arc::new(Tally::default());

        let mut map = HalMap::new();
        let err = init_enabled_sub_components::<Widget>(&cfg, "widget", &mut map, tally.clone())
            .unwrap_err();

        assert!(map.is_empty());
        assert!(matches!(err, HalError::SubComponent { ref id, .. } if id == "c"));
        // a and b rolled back, c finalized after its failed init
        assert_eq!(tally.finalized.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn missing_required_option_fails() {
        let mut cfg = Configuration::new();
        cfg.add(ConfigOption::new("widget.a.enabled", true));

        let mut map: HalMap<Widget> = HalMap::new();
        let result = init_enabled_sub_components(&cfg, "widget", &mut map, Arc::default());
        assert!(result.is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn mistyped_enabled_flag_fails() {
        let mut cfg = config(&[("widget.a.level", 1)]);
        cfg.add(ConfigOption::new("widget.a.enabled", "yes"));

        let mut map: HalMap<Widget> = HalMap::new();
        let result = init_enabled_sub_components(&cfg, "widget", &mut map, Arc::default());
        assert!(matches!(result, Err(HalError::SubComponent { .. })));
    }

    #[test]
    fn finalize_detaches_shared_children() {
        let cfg = config(&[("widget.a.level", 1), ("widget.b.level", 2)]);
        let tally = Arc::new(Tally::default());
        let mut map = HalMap::new();
        init_enabled_sub_components::<Widget>(&cfg, "widget", &mut map, tally.clone()).unwrap();

        let held = Arc::clone(&map["a"]);
        finalize_sub_components(&mut map);

        assert!(map.is_empty());
        assert!(!held.is_initialized());
        assert_eq!(tally.finalized.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_children_is_not_an_error() {
        let cfg = config(&[("other.a.level", 1)]);
        let mut map: HalMap<Widget> = HalMap::new();
        assert_eq!(
            init_enabled_sub_components(&cfg, "widget", &mut map, Arc::default()).unwrap(),
            0
        );
    }
}
