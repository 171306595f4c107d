use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Outcome of a checked configuration lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Present(T),
    /// Unknown root, unknown field or unsupported path shape
    Absent,
    /// The value exists but does not decode as the requested type
    Mismatch(Value),
}

impl<T> Lookup<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Lookup::Present(_))
    }

    pub fn present(self) -> Option<T> {
        match self {
            Lookup::Present(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Default> Lookup<T> {
    /// Collapses absence and mismatch to the type's zero value
    pub fn or_zero(self) -> T {
        self.present().unwrap_or_default()
    }
}

/// Merged configuration tree: top-level key -> JSON object.
///
/// Paths are `root` or `root.field`; any other shape is absent. Clones share
/// the same tree, which only the synchronizer writes.
#[derive(Clone, Default)]
pub struct ConfigStore {
    tree: Arc<RwLock<HashMap<String, Value>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value at `path`
    pub fn get(
        &self,
        path: &str,
    ) -> Option<Value> {
        let tree = self.tree.read();
        let mut segments = path.split('.');
        let root = tree.get(segments.next()?)?;

        match (segments.next(), segments.next()) {
            (None, _) => Some(root.clone()),
            (Some(field), None) => root.get(field).cloned(),
            (Some(_), Some(_)) => None,
        }
    }

    pub fn try_get<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Lookup<T> {
        match self.get(path) {
            None => Lookup::Absent,
            Some(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(decoded) => Lookup::Present(decoded),
                Err(_) => Lookup::Mismatch(value),
            },
        }
    }

    /// Strings verbatim; anything else in its JSON text form
    pub fn get_string(
        &self,
        path: &str,
    ) -> String {
        match self.get(path) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn get_int(
        &self,
        path: &str,
    ) -> i64 {
        self.try_get::<i64>(path).or_zero()
    }

    pub fn get_float(
        &self,
        path: &str,
    ) -> f64 {
        self.try_get::<f64>(path).or_zero()
    }

    pub fn get_bool(
        &self,
        path: &str,
    ) -> bool {
        self.try_get::<bool>(path).or_zero()
    }

    /// Top-level keys currently held, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.tree.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn insert(
        &self,
        key: &str,
        value: Value,
    ) {
        self.tree.write().insert(key.to_string(), value);
    }

    pub(crate) fn current(
        &self,
        key: &str,
    ) -> Option<Value> {
        self.tree.read().get(key).cloned()
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ConfigStore").field("keys", &self.keys()).finish()
    }
}
