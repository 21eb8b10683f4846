use std::{collections::BTreeMap, sync::Arc};

use getset::Getters;
use serde::Serialize;
use serde_json::Value;

use super::{Storage, Validator};
use crate::{CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// When a changed setting takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Applied by the next `crc start`.
    RequiresRestart,

    /// Applied immediately.
    Immediate,
}

/// A registered setting.
#[derive(Debug, Clone)]
pub struct Setting {
    name: String,
    default: Value,
    validator: Validator,
    apply: ApplyMode,
}

/// The resolved value of a setting.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub with_prefix")]
pub struct SettingValue {
    /// The stored value coerced to the setting's type, or the default.
    value: Value,

    /// `true` if the key is unknown or its stored value cannot be coerced.
    invalid: bool,

    /// `true` if nothing is stored for the key.
    is_default: bool,
}

/// A registry of typed settings backed by a [`Storage`].
///
/// Every value has the type of its setting's default. Values that arrive as strings, such as
/// `"5"` for `cpus`, are converted before validation.
#[derive(Clone)]
pub struct Config {
    storage: Arc<dyn Storage>,
    settings: BTreeMap<String, Setting>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Creates a registry with no settings over `storage`.
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
            settings: BTreeMap::new(),
        }
    }

    /// Registers a setting.
    pub fn add_setting(
        &mut self,
        name: &str,
        default: impl Into<Value>,
        validator: Validator,
        apply: ApplyMode,
    ) {
        self.settings.insert(
            name.to_string(),
            Setting {
                name: name.to_string(),
                default: default.into(),
                validator,
                apply,
            },
        );
    }

    /// Returns `true` if `key` is a registered setting.
    pub fn is_registered(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }

    /// Resolves the value of `key`.
    pub fn get(&self, key: &str) -> SettingValue {
        let Some(setting) = self.settings.get(key) else {
            return SettingValue {
                value: Value::Null,
                invalid: true,
                is_default: false,
            };
        };

        match self.storage.get(key) {
            None => SettingValue {
                value: setting.default.clone(),
                invalid: false,
                is_default: true,
            },
            Some(raw) => match coerce(&setting.default, raw) {
                Ok(value) => SettingValue {
                    value,
                    invalid: false,
                    is_default: false,
                },
                Err(reason) => {
                    tracing::warn!("ignoring invalid stored value for '{}': {}", key, reason);
                    SettingValue {
                        value: setting.default.clone(),
                        invalid: true,
                        is_default: false,
                    }
                }
            },
        }
    }

    /// Validates and stores `value` under `key`, returning a message for the user.
    pub fn set(&self, key: &str, value: Value) -> CrcResult<String> {
        let setting = self
            .settings
            .get(key)
            .ok_or_else(|| CrcError::UnknownConfigKey(key.to_string()))?;

        let invalid = |reason: String| CrcError::InvalidConfigValue {
            key: key.to_string(),
            value: display_value(&value),
            reason,
        };

        let coerced = coerce(&setting.default, value.clone()).map_err(invalid)?;
        (setting.validator)(&coerced).map_err(invalid)?;

        self.storage.set(key, coerced.clone())?;
        Ok(setting.applied_message(&coerced))
    }

    /// Removes the stored value of `key`, returning a message for the user.
    pub fn unset(&self, key: &str) -> CrcResult<String> {
        if !self.is_registered(key) {
            return Err(CrcError::UnknownConfigKey(key.to_string()));
        }

        self.storage.unset(key)?;
        Ok(format!("Successfully unset configuration property '{key}'"))
    }

    /// Resolves every registered setting.
    pub fn all_configs(&self) -> BTreeMap<String, SettingValue> {
        self.settings
            .keys()
            .map(|key| (key.clone(), self.get(key)))
            .collect()
    }

    /// Resolves `key` as an unsigned integer, falling back to `0`.
    pub fn get_u32(&self, key: &str) -> u32 {
        self.get(key)
            .value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or_default()
    }

    /// Resolves `key` as a string, falling back to an empty string.
    pub fn get_string(&self, key: &str) -> String {
        match self.get(key).value {
            Value::String(s) => s,
            _ => String::new(),
        }
    }

    /// Resolves `key` as a bool, falling back to `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).value.as_bool().unwrap_or(false)
    }
}

impl Setting {
    fn applied_message(&self, value: &Value) -> String {
        match self.apply {
            ApplyMode::RequiresRestart => format!(
                "Changes to configuration property '{}' are only applied when the CRC instance is started.\n\
                 If you already have a running CRC instance, then for this configuration change to take effect, \
                 stop the CRC instance with 'crc stop' and restart it with 'crc start'.",
                self.name
            ),
            ApplyMode::Immediate => {
                format!("Successfully configured {} to {}", self.name, display_value(value))
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Converts `value` to the JSON type of `default`.
fn coerce(default: &Value, value: Value) -> Result<Value, String> {
    match (default, value) {
        (Value::Number(_), Value::Number(n)) if n.is_u64() => Ok(Value::Number(n)),
        (Value::Number(_), Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| "requires integer value".to_string()),
        (Value::Number(_), _) => Err("requires integer value".to_string()),

        (Value::Bool(_), Value::Bool(b)) => Ok(Value::Bool(b)),
        (Value::Bool(_), Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "t" => Ok(Value::Bool(true)),
            "false" | "0" | "f" => Ok(Value::Bool(false)),
            _ => Err("requires boolean value".to_string()),
        },
        (Value::Bool(_), _) => Err("requires boolean value".to_string()),

        (Value::String(_), Value::String(s)) => Ok(Value::String(s)),
        (Value::String(_), Value::Number(n)) => Ok(Value::String(n.to_string())),
        (Value::String(_), Value::Bool(b)) => Ok(Value::String(b.to_string())),
        (Value::String(_), _) => Err("requires string value".to_string()),

        (_, value) => Ok(value),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::{self, InMemoryStorage};

    fn config() -> Config {
        let mut cfg = Config::new(InMemoryStorage::default());
        config::register_settings(&mut cfg, &config::CrcPaths::new("/tmp/crc-test"));
        cfg
    }

    #[test]
    fn test_config_defaults() {
        let cfg = config();

        let cpus = cfg.get(config::CPUS);
        assert_eq!(cpus.get_value(), &json!(4));
        assert!(*cpus.get_is_default());
        assert!(!*cpus.get_invalid());

        assert_eq!(cfg.get_u32(config::DISK_SIZE), 31);
        assert_eq!(cfg.get_string(config::NETWORK_MODE), "default");
        assert!(!cfg.get_bool(config::ENABLE_CLUSTER_MONITORING));
    }

    #[test]
    fn test_config_set_coerces_string_values() -> anyhow::Result<()> {
        let cfg = config();

        cfg.set(config::CPUS, json!("5"))?;
        cfg.set(config::ENABLE_CLUSTER_MONITORING, json!("true"))?;

        assert_eq!(cfg.get(config::CPUS).get_value(), &json!(5));
        assert!(!*cfg.get(config::CPUS).get_is_default());
        assert!(cfg.get_bool(config::ENABLE_CLUSTER_MONITORING));

        Ok(())
    }

    #[test]
    fn test_config_set_rejects_invalid_values() {
        let cfg = config();

        let error = cfg.set(config::CPUS, json!(2)).unwrap_err();
        assert!(matches!(error, CrcError::InvalidConfigValue { .. }));
        assert!(error.to_string().contains("requires CPUs >= 4"));

        let error = cfg.set(config::CPUS, json!("many")).unwrap_err();
        assert!(error.to_string().contains("requires integer value"));

        let error = cfg.set("no-such-key", json!(1)).unwrap_err();
        assert!(matches!(error, CrcError::UnknownConfigKey(_)));

        assert_eq!(cfg.get(config::CPUS).get_value(), &json!(4));
    }

    #[test]
    fn test_config_unset_restores_default() -> anyhow::Result<()> {
        let cfg = config();

        cfg.set(config::NAMESERVER, json!("10.0.0.1"))?;
        assert_eq!(cfg.get_string(config::NAMESERVER), "10.0.0.1");

        cfg.unset(config::NAMESERVER)?;
        assert!(*cfg.get(config::NAMESERVER).get_is_default());
        assert!(cfg.unset("no-such-key").is_err());

        Ok(())
    }

    #[test]
    fn test_config_unknown_key_is_invalid() {
        let cfg = config();
        let value = cfg.get("no-such-key");

        assert!(*value.get_invalid());
        assert_eq!(value.get_value(), &Value::Null);
    }
}
