//! Process configuration: TOML file loading plus per-unit override merging.

mod model;

pub use model::{
    AggregationConfig, Api, Config, InputStreamConfig, LoggerSection, LoopConfig, MonitorConfig,
    StoreConfig,
};

use crate::errors::{ConfigError, Result};
use serde_json::Value;
use std::sync::Arc;

/// Per-launch override for one unit: an optional loop-delay plus free-form
/// parameters merged over the unit's declared defaults.
#[derive(Debug, Clone, Default)]
pub struct UnitOverrides {
    pub loop_delay: Option<String>,
    pub params: Value,
}

impl UnitOverrides {
    pub fn with_loop_delay(mut self, delay: impl Into<String>) -> Self {
        self.loop_delay = Some(delay.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// The merged view a unit sees: process config, merged parameters, and the
/// raw loop-delay string (parsed strictly at instance construction).
#[derive(Debug, Clone)]
pub struct UnitConfig {
    pub base: Arc<Config>,
    pub params: Value,
    pub loop_delay: String,
}

impl UnitConfig {
    /// Merge order: process config < unit defaults < launch override.
    pub fn merge(base: Arc<Config>, defaults: &UnitOverrides, overrides: &UnitOverrides) -> Self {
        let mut params = defaults.params.clone();
        merge_json(&mut params, &overrides.params);
        let loop_delay = overrides
            .loop_delay
            .clone()
            .or_else(|| defaults.loop_delay.clone())
            .unwrap_or_else(|| base.unit_loop.delay.clone());
        Self {
            base,
            params,
            loop_delay,
        }
    }

    /// String parameter lookup, `None` when absent or not a string.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }
}

/// Strict non-negative integer parse: the input must be the canonical decimal
/// rendering of the value. Leading zeroes, signs, whitespace, or trailing
/// garbage are configuration errors, not lenient parses.
pub fn parse_delay_strict(raw: &str) -> Result<u64> {
    let value: u64 = raw
        .parse()
        .map_err(|_| ConfigError::InvalidLoopDelay(raw.to_string()))?;
    if raw != value.to_string() {
        return Err(ConfigError::InvalidLoopDelay(raw.to_string()).into());
    }
    Ok(value)
}

/// Recursive JSON merge: objects merge key-wise, everything else in `over`
/// replaces `base`. A `Null` override leaves `base` untouched.
pub fn merge_json(base: &mut Value, over: &Value) {
    match (base, over) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(over_map)) => {
            for (key, over_value) in over_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_json(base_value, over_value),
                    None => {
                        base_map.insert(key.clone(), over_value.clone());
                    }
                }
            }
        }
        (base, over) => *base = over.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_delay_strict_valid() {
        assert_eq!(parse_delay_strict("0").unwrap(), 0);
        assert_eq!(parse_delay_strict("500").unwrap(), 500);
        assert_eq!(parse_delay_strict("2000").unwrap(), 2000);
    }

    #[test]
    fn test_parse_delay_strict_rejects() {
        for raw in ["", " 5", "5 ", "05", "+5", "-1", "2.5", "2000ms", "abc"] {
            let err = parse_delay_strict(raw).unwrap_err();
            assert!(err.is_config(), "'{raw}' should be a config error");
        }
    }

    #[test]
    fn test_merge_json_objects() {
        let mut base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        merge_json(&mut base, &json!({"nested": {"y": 3, "z": 4}, "b": 2}));
        assert_eq!(base, json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn test_merge_json_null_override_is_noop() {
        let mut base = json!({"a": 1});
        merge_json(&mut base, &Value::Null);
        assert_eq!(base, json!({"a": 1}));
    }

    #[test]
    fn test_unit_config_delay_precedence() {
        let base = Arc::new(Config::default());
        let defaults = UnitOverrides::default().with_loop_delay("750");
        let overrides = UnitOverrides::default();
        let merged = UnitConfig::merge(base.clone(), &defaults, &overrides);
        assert_eq!(merged.loop_delay, "750");

        let overrides = UnitOverrides::default().with_loop_delay("500");
        let merged = UnitConfig::merge(base.clone(), &defaults, &overrides);
        assert_eq!(merged.loop_delay, "500");

        let merged = UnitConfig::merge(base, &UnitOverrides::default(), &UnitOverrides::default());
        assert_eq!(merged.loop_delay, "2000");
    }

    #[test]
    fn test_unit_config_param_merge() {
        let base = Arc::new(Config::default());
        let defaults = UnitOverrides::default().with_params(json!({"audience_label": "world"}));
        let overrides =
            UnitOverrides::default().with_params(json!({"audience_label": "wide world"}));
        let merged = UnitConfig::merge(base, &defaults, &overrides);
        assert_eq!(merged.param_str("audience_label"), Some("wide world"));
    }
}
