//! Configuration views and component tuning.
//!
//! [`Configuration`] is the read-side of the machine configuration: an
//! insertion-ordered list of dotted option paths. The file parser and the
//! command-line merging that produce it live outside this crate; the core only
//! reads options and hands each sub-component its own extracted view.
//!
//! # Example
//!
//! ```rust
//! use filament_core::config::{ConfigOption, Configuration};
//!
//! let mut config = Configuration::new();
//! config.add(ConfigOption::new("motor.a.speed-rpm", 10));
//! config.add(ConfigOption::new("motor.b.speed-rpm", 20));
//!
//! let a = config.extract("motor.a.");
//! assert_eq!(a.get::<i64>("speed-rpm").unwrap(), 10);
//! assert!(a.get::<i64>("motor.b.speed-rpm").is_err());
//! ```

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Name of a HAL object or service component.
///
/// Unique within its map; doubles as the configuration section key.
pub type Identifier = String;

/// Option name that switches a sub-component on or off.
pub const ENABLED_OPTION: &str = "enabled";

// ============================================================================
// Option Values
// ============================================================================

/// Value held by a [`ConfigOption`].
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    /// `true` / `false`
    Bool(bool),
    /// Signed integer
    Integer(i64),
    /// Floating point
    Float(f64),
    /// Free text
    Text(String),
}

impl OptionValue {
    /// Name of the value's type, used in mismatch diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Integer(_) => "integer",
            OptionValue::Float(_) => "float",
            OptionValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{}", v),
            OptionValue::Integer(v) => write!(f, "{}", v),
            OptionValue::Float(v) => write!(f, "{}", v),
            OptionValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Integer(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Integer(v.into())
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        OptionValue::Integer(v.into())
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Text(v.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Text(v)
    }
}

/// Conversion from a stored [`OptionValue`] into a typed value.
///
/// Conversions are strict: a text option is never parsed as a number. The
/// only widening allowed is integer to float.
pub trait FromOptionValue: Sized {
    /// Type name reported in mismatch errors.
    const TYPE_NAME: &'static str;

    /// Convert, or `None` when the stored type does not match.
    fn from_option_value(value: &OptionValue) -> Option<Self>;
}

impl FromOptionValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromOptionValue for i64 {
    const TYPE_NAME: &'static str = "integer";

    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromOptionValue for f64 {
    const TYPE_NAME: &'static str = "float";

    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Float(v) => Some(*v),
            OptionValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromOptionValue for String {
    const TYPE_NAME: &'static str = "text";

    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// A single named configuration entry.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigOption {
    /// Dotted option path (e.g. `motor.a.speed-rpm`)
    pub name: String,
    /// Stored value
    pub value: OptionValue,
    /// Human-readable description (may be empty)
    pub description: String,
}

impl ConfigOption {
    /// Creates an option without a description.
    pub fn new(name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            description: String::new(),
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Ordered mapping from dotted option path to [`ConfigOption`].
///
/// Keys are unique; [`add`](Self::add) replaces an existing option in place
/// so that insertion order is preserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Configuration {
    options: Vec<ConfigOption>,
}

impl Configuration {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a JSON object into dotted options.
    ///
    /// Nested objects contribute path segments; arrays are indexed by
    /// position (`pins.0`, `pins.1`). `null` leaves are skipped.
    ///
    /// ```rust
    /// use filament_core::config::Configuration;
    ///
    /// let json = serde_json::json!({ "gpio-pin": { "a": { "line": 4 } } });
    /// let config = Configuration::from_json(&json).unwrap();
    /// assert_eq!(config.get::<i64>("gpio-pin.a.line").unwrap(), 4);
    /// ```
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let serde_json::Value::Object(map) = value else {
            return Err(ConfigError::NotAnObject);
        };
        let mut config = Self::new();
        for (key, child) in map {
            config.flatten_json(key, child);
        }
        Ok(config)
    }

    fn flatten_json(&mut self, path: &str, value: &serde_json::Value) {
        use serde_json::Value;

        match value {
            Value::Null => {}
            Value::Bool(b) => self.add(ConfigOption::new(path, *b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    self.add(ConfigOption::new(path, i));
                } else if let Some(f) = n.as_f64() {
                    self.add(ConfigOption::new(path, f));
                }
            }
            Value::String(s) => self.add(ConfigOption::new(path, s.as_str())),
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.flatten_json(&format!("{}.{}", path, index), item);
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    self.flatten_json(&format!("{}.{}", path, key), child);
                }
            }
        }
    }

    /// Add an option, replacing any option with the same name.
    pub fn add(&mut self, option: ConfigOption) {
        match self.options.iter_mut().find(|o| o.name == option.name) {
            Some(existing) => *existing = option,
            None => self.options.push(option),
        }
    }

    /// Look up an option by full name.
    pub fn option(&self, name: &str) -> Result<&ConfigOption, ConfigError> {
        self.options
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| ConfigError::NotFound(name.to_owned()))
    }

    /// Typed option access.
    ///
    /// Fails with [`ConfigError::NotFound`] if absent and
    /// [`ConfigError::TypeMismatch`] if stored with another type.
    pub fn get<T: FromOptionValue>(&self, name: &str) -> Result<T, ConfigError> {
        let option = self.option(name)?;
        T::from_option_value(&option.value).ok_or_else(|| ConfigError::TypeMismatch {
            name: name.to_owned(),
            expected: T::TYPE_NAME,
            found: option.value.type_name(),
        })
    }

    /// Typed access for options that are documented as defaulted.
    ///
    /// A missing option yields `default`; a mistyped one is still an error.
    pub fn get_or<T: FromOptionValue>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            Err(ConfigError::NotFound(_)) => Ok(default),
            other => other,
        }
    }

    /// Integer option converted into a narrower integer type.
    pub fn get_int<T: TryFrom<i64>>(&self, name: &str) -> Result<T, ConfigError> {
        let raw: i64 = self.get(name)?;
        T::try_from(raw).map_err(|_| ConfigError::InvalidValue {
            name: name.to_owned(),
            value: raw.to_string(),
        })
    }

    /// All options whose name starts with `prefix`, in insertion order.
    pub fn option_list(&self, prefix: &str) -> Vec<&ConfigOption> {
        self.options
            .iter()
            .filter(|o| o.name.starts_with(prefix))
            .collect()
    }

    /// Copy of the sub-tree under `prefix`, with the prefix stripped.
    ///
    /// Prefix matching is plain string partitioning: pass the trailing dot
    /// (`"motor.a."`) to select a section. An empty prefix copies everything.
    pub fn extract(&self, prefix: &str) -> Configuration {
        let options = self
            .options
            .iter()
            .filter_map(|o| {
                o.name.strip_prefix(prefix).map(|rest| ConfigOption {
                    name: rest.to_owned(),
                    value: o.value.clone(),
                    description: o.description.clone(),
                })
            })
            .filter(|o| !o.name.is_empty())
            .collect();
        Configuration { options }
    }

    /// Unique first path segments below `prefix.`, in first-seen order.
    ///
    /// For `motor.a.port` and `motor.b.port`, `child_names("motor")`
    /// returns `["a", "b"]`.
    pub fn child_names(&self, prefix: &str) -> Vec<Identifier> {
        let section = format!("{}.", prefix);
        let mut names: Vec<Identifier> = Vec::new();
        for option in &self.options {
            let Some(rest) = option.name.strip_prefix(&section) else {
                continue;
            };
            let name = rest.split('.').next().unwrap_or_default();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_owned());
            }
        }
        names
    }

    /// Number of options.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Returns true if there are no options.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Iterate options in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigOption> {
        self.options.iter()
    }
}

impl FromIterator<ConfigOption> for Configuration {
    fn from_iter<I: IntoIterator<Item = ConfigOption>>(iter: I) -> Self {
        let mut config = Configuration::new();
        for option in iter {
            config.add(option);
        }
        config
    }
}

// ============================================================================
// Observer Config
// ============================================================================

/// GPIO pin observation tuning.
#[derive(Clone, Debug)]
pub struct ObserverConfig {
    /// Upper bound for one blocking wait on a pin.
    ///
    /// Also the worst-case latency between `stop()` and the observer
    /// thread exiting.
    pub max_observation_timeout: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            max_observation_timeout: Duration::from_millis(100),
        }
    }
}

impl ObserverConfig {
    /// Set the maximum observation timeout
    pub fn with_max_observation_timeout(mut self, timeout: Duration) -> Self {
        self.max_observation_timeout = timeout;
        self
    }
}

// ============================================================================
// Heater Config
// ============================================================================

/// Filament merger heater tuning.
#[derive(Clone, Debug)]
pub struct HeaterConfig {
    /// Target temperature applied when none was requested (°C)
    pub default_target_c: f64,
    /// Highest target a `set-temperature` command may request (°C)
    pub max_target_c: f64,
}

impl Default for HeaterConfig {
    fn default() -> Self {
        Self {
            default_target_c: 200.0,
            max_target_c: 300.0,
        }
    }
}

impl HeaterConfig {
    /// Set the default target temperature
    pub fn with_default_target_c(mut self, target: f64) -> Self {
        self.default_target_c = target;
        self
    }

    /// Set the maximum target temperature
    pub fn with_max_target_c(mut self, max: f64) -> Self {
        self.max_target_c = max;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn motors() -> Configuration {
        [
            ConfigOption::new("motor.a.speed", 10),
            ConfigOption::new("motor.b.speed", 20),
            ConfigOption::new("motor.a.style", "double"),
            ConfigOption::new("bus", "hat-0x60"),
        ]
        .into_iter()
        .collect()
    }

    // =========================================================================
    // Lookup Tests
    // =========================================================================

    #[test]
    fn get_typed_option() {
        let config = motors();
        assert_eq!(config.get::<i64>("motor.a.speed").unwrap(), 10);
        assert_eq!(config.get::<String>("bus").unwrap(), "hat-0x60");
    }

    #[test]
    fn missing_option_is_not_found() {
        let config = motors();
        assert_eq!(
            config.get::<i64>("motor.c.speed"),
            Err(ConfigError::NotFound("motor.c.speed".into()))
        );
    }

    #[test]
    fn mistyped_option_is_mismatch() {
        let config = motors();
        let err = config.get::<bool>("motor.a.speed").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TypeMismatch {
                expected: "bool",
                found: "integer",
                ..
            }
        ));
    }

    #[test]
    fn integer_widens_to_float() {
        let config = motors();
        assert_eq!(config.get::<f64>("motor.b.speed").unwrap(), 20.0);
    }

    #[test]
    fn get_or_defaults_only_when_missing() {
        let config = motors();
        assert!(config.get_or("motor.a.enabled", true).unwrap());
        assert!(config.get_or("motor.a.style", true).is_err());
    }

    #[test]
    fn get_int_rejects_overflow() {
        let mut config = Configuration::new();
        config.add(ConfigOption::new("port", 300));
        assert!(config.get_int::<u8>("port").is_err());
        assert_eq!(config.get_int::<u16>("port").unwrap(), 300);
    }

    #[test]
    fn add_replaces_in_place() {
        let mut config = motors();
        config.add(ConfigOption::new("motor.b.speed", 25));
        assert_eq!(config.len(), 4);
        assert_eq!(config.iter().nth(1).unwrap().value, OptionValue::Integer(25));
    }

    // =========================================================================
    // Extraction Tests
    // =========================================================================

    #[test]
    fn extract_strips_prefix_and_excludes_siblings() {
        let a = motors().extract("motor.a.");
        assert_eq!(a.len(), 2);
        assert_eq!(a.get::<i64>("speed").unwrap(), 10);
        assert!(a.get::<i64>("motor.b.speed").is_err());
    }

    #[test]
    fn extract_with_empty_prefix_is_identity() {
        let a = motors().extract("motor.a.");
        assert_eq!(a.extract(""), a);
    }

    #[test]
    fn option_list_preserves_order() {
        let config = motors();
        let names: Vec<_> = config
            .option_list("motor.")
            .iter()
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(names, ["motor.a.speed", "motor.b.speed", "motor.a.style"]);
    }

    #[test]
    fn child_names_unique_in_first_seen_order() {
        assert_eq!(motors().child_names("motor"), ["a", "b"]);
        assert!(motors().child_names("sensor").is_empty());
    }

    // =========================================================================
    // JSON Tests
    // =========================================================================

    #[test]
    fn from_json_flattens_nested_objects() {
        let json = serde_json::json!({
            "chip": "gpiochip0",
            "gpio-pin": {
                "a": { "line": 4, "direction": "in" },
                "b": { "enabled": false, "scale": 0.5 }
            },
            "unused": null
        });
        let config = Configuration::from_json(&json).unwrap();
        assert_eq!(config.get::<String>("chip").unwrap(), "gpiochip0");
        assert_eq!(config.get::<i64>("gpio-pin.a.line").unwrap(), 4);
        assert!(!config.get::<bool>("gpio-pin.b.enabled").unwrap());
        assert_eq!(config.get::<f64>("gpio-pin.b.scale").unwrap(), 0.5);
        assert!(config.option("unused").is_err());
    }

    #[test]
    fn from_json_rejects_non_object() {
        let json = serde_json::json!([1, 2]);
        assert_eq!(Configuration::from_json(&json), Err(ConfigError::NotAnObject));
    }

    // =========================================================================
    // Tuning Tests
    // =========================================================================

    #[test]
    fn observer_config_builder() {
        let config =
            ObserverConfig::default().with_max_observation_timeout(Duration::from_millis(20));
        assert_eq!(config.max_observation_timeout, Duration::from_millis(20));
    }

    #[test]
    fn heater_config_defaults() {
        let config = HeaterConfig::default();
        assert_eq!(config.default_target_c, 200.0);
        assert_eq!(config.max_target_c, 300.0);
    }
}
