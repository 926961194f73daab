//! Per-middleware configuration maps.

use crate::error::AppError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Key-value configuration attached to a registered middleware.
///
/// Every middleware understands the `enabled` key (default `true`); all
/// other keys are interpreted by the middleware itself, usually by
/// deserializing the whole map into a typed settings struct via
/// [`MiddlewareConfig::deserialize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MiddlewareConfig {
    values: Map<String, Value>,
}

impl MiddlewareConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from a JSON object. Non-object values yield an empty config.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn enabled(&self) -> bool {
        self.get_bool("enabled").unwrap_or(true)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_map(&self, key: &str) -> HashMap<String, Value> {
        self.values
            .get(key)
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Deserializes the whole map into a typed settings struct.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidValue`] naming the offending key when the
    /// map does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|e| AppError::invalid_value(format!("Invalid middleware config: {}", e)))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

impl From<Value> for MiddlewareConfig {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_enabled_defaults_to_true() {
        assert!(MiddlewareConfig::new().enabled());
        assert!(!MiddlewareConfig::new().with("enabled", false).enabled());
    }

    #[test]
    fn test_typed_getters() {
        let config = MiddlewareConfig::from_value(json!({
            "capacity": 100,
            "refill_rate": 2.5,
            "algorithm": "token_bucket",
            "excluded_paths": ["/health", 7, "/docs*"],
            "endpoint_ttls": {"/api/products": 600}
        }));

        assert_eq!(config.get_u64("capacity"), Some(100));
        assert_eq!(config.get_f64("refill_rate"), Some(2.5));
        assert_eq!(config.get_str("algorithm"), Some("token_bucket"));
        assert_eq!(config.get_string_list("excluded_paths"), vec!["/health", "/docs*"]);
        assert_eq!(config.get_map("endpoint_ttls").get("/api/products"), Some(&json!(600)));
        assert!(config.get_string_list("missing").is_empty());
    }

    #[test]
    fn test_deserialize_reports_bad_shape() {
        #[derive(Debug, Deserialize)]
        struct Settings {
            #[allow(dead_code)]
            capacity: u64,
        }

        let ok = MiddlewareConfig::new().with("capacity", 5);
        assert!(ok.deserialize::<Settings>().is_ok());

        let bad = MiddlewareConfig::new().with("capacity", "lots");
        let err = bad.deserialize::<Settings>().unwrap_err();
        assert!(matches!(err, AppError::InvalidValue(_)));
    }
}
