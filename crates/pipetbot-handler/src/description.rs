//! Serializable backend descriptions and the registry that rebuilds backends
//!
//! A description is a flat key-value map with a `type` key naming the
//! backend, e.g. `{"type": "OpentronsBackend", "host": "localhost", "port": 31950}`.
//! It round-trips configuration only; live connection state is never part of it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::backend::{BackendError, LiquidHandlerBackend};

/// Plain description of a backend's configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescription {
    /// Backend type name, e.g. "OpentronsBackend"
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Remaining configuration keys
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl BackendDescription {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
            params: Map::new(),
        }
    }

    /// Builder-style parameter insertion
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Fail unless the description names `expected`
    pub fn expect_type(&self, expected: &str) -> Result<(), BackendError> {
        if self.backend_type != expected {
            return Err(BackendError::InvalidDescription(format!(
                "expected type {}, got {}",
                expected, self.backend_type
            )));
        }
        Ok(())
    }

    pub fn get_str(&self, key: &str) -> Result<&str, BackendError> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(key, "string"))
    }

    pub fn get_u64(&self, key: &str) -> Result<u64, BackendError> {
        self.params
            .get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| missing(key, "unsigned integer"))
    }

    pub fn get_u16(&self, key: &str) -> Result<u16, BackendError> {
        let value = self.get_u64(key)?;
        u16::try_from(value).map_err(|_| {
            BackendError::InvalidDescription(format!("{} = {} does not fit in 16 bits", key, value))
        })
    }

    /// Optional boolean with a default when absent
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, BackendError> {
        match self.params.get(key) {
            None => Ok(default),
            Some(value) => value.as_bool().ok_or_else(|| missing(key, "boolean")),
        }
    }

    /// The description as a JSON object
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(self.backend_type.clone()));
        map.extend(self.params.clone());
        Value::Object(map)
    }
}

fn missing(key: &str, expected: &str) -> BackendError {
    BackendError::InvalidDescription(format!("missing or invalid {} field {:?}", expected, key))
}

/// Backends that can be rebuilt from their own description
pub trait DeserializeBackend: LiquidHandlerBackend + Sized + 'static {
    /// Value of the `type` key this backend serializes as
    const TYPE_NAME: &'static str;

    fn deserialize(description: &BackendDescription) -> Result<Self, BackendError>;
}

type Constructor =
    Box<dyn Fn(&BackendDescription) -> Result<Box<dyn LiquidHandlerBackend>, BackendError> + Send + Sync>;

/// Maps backend type names to constructors
#[derive(Default)]
pub struct BackendRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that knows the backends shipped with this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<crate::recording::RecordingBackend>();
        registry
    }

    /// Register a backend type by its [`DeserializeBackend`] impl
    pub fn register<B: DeserializeBackend>(&mut self) {
        self.register_fn(B::TYPE_NAME, |description| {
            Ok(Box::new(B::deserialize(description)?) as Box<dyn LiquidHandlerBackend>)
        });
    }

    /// Register an arbitrary constructor under `backend_type`
    pub fn register_fn<F>(&mut self, backend_type: &str, constructor: F)
    where
        F: Fn(&BackendDescription) -> Result<Box<dyn LiquidHandlerBackend>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(backend_type.to_string(), Box::new(constructor));
    }

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Build a backend from its description
    pub fn deserialize(
        &self,
        description: &BackendDescription,
    ) -> Result<Box<dyn LiquidHandlerBackend>, BackendError> {
        let constructor = self
            .constructors
            .get(&description.backend_type)
            .ok_or_else(|| BackendError::UnknownType(description.backend_type.clone()))?;
        constructor(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_description_serializes_flat() {
        let description = BackendDescription::new("OpentronsBackend")
            .with("host", "localhost")
            .with("port", 1337);

        let value = serde_json::to_value(&description).unwrap();
        assert_eq!(value, json!({"type": "OpentronsBackend", "host": "localhost", "port": 1337}));
        assert_eq!(description.to_json(), value);

        let parsed: BackendDescription = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, description);
    }

    #[test]
    fn test_typed_getters() {
        let description = BackendDescription::new("X")
            .with("host", "localhost")
            .with("port", 70000)
            .with("flag", true);

        assert_eq!(description.get_str("host").unwrap(), "localhost");
        assert!(description.get_str("port").is_err());
        assert!(description.get_u16("port").is_err());
        assert_eq!(description.get_u64("port").unwrap(), 70000);
        assert!(description.get_bool_or("flag", false).unwrap());
        assert!(!description.get_bool_or("absent", false).unwrap());
        assert!(description.expect_type("Y").is_err());
    }

    #[test]
    fn test_registry_unknown_type() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.types(), vec!["RecordingBackend"]);

        let Err(err) = registry.deserialize(&BackendDescription::new("NoSuchBackend")) else {
            panic!("NoSuchBackend should not deserialize");
        };
        assert!(matches!(err, BackendError::UnknownType(name) if name == "NoSuchBackend"));
    }
}
