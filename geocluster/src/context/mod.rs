//! Run context: the typed key/value configuration threaded through a run.
//!
//! One `RunContext` is created per top-level invocation and passed by
//! `&mut` to every stage and hook. Later writes shadow earlier ones; nothing
//! is ever rolled back.

pub mod keys;
mod options;

pub use options::{OptionSchema, OptionSpec};

use crate::strategy::Strategies;
use crate::types::Location;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Location(Location),
    /// Reference to a pluggable strategy, resolved by [`crate::strategy::Strategies`].
    Strategy(String),
}

impl ContextValue {
    fn kind(&self) -> &'static str {
        match self {
            ContextValue::Int(_) => "int",
            ContextValue::Float(_) => "float",
            ContextValue::Bool(_) => "bool",
            ContextValue::Str(_) => "string",
            ContextValue::Location(_) => "location",
            ContextValue::Strategy(_) => "strategy",
        }
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        ContextValue::Int(v)
    }
}

impl From<u32> for ContextValue {
    fn from(v: u32) -> Self {
        ContextValue::Int(i64::from(v))
    }
}

impl From<f64> for ContextValue {
    fn from(v: f64) -> Self {
        ContextValue::Float(v)
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        ContextValue::Bool(v)
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        ContextValue::Str(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        ContextValue::Str(v)
    }
}

impl From<Location> for ContextValue {
    fn from(v: Location) -> Self {
        ContextValue::Location(v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    values: BTreeMap<String, ContextValue>,
    /// Bundle resolved from the strategy keys; dropped when one of them changes.
    strategies: Option<Strategies>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a flat JSON object.
    ///
    /// Keys listed in [`keys::LOCATION_KEYS`] and [`keys::STRATEGY_KEYS`] are
    /// typed accordingly; other values follow their JSON type.
    pub fn from_json(json: &Value) -> ClusterResult<Self> {
        let object = json.as_object().ok_or_else(|| {
            ClusterError::Config("configuration must be a JSON object".into())
        })?;

        let mut ctx = Self::new();
        for (key, value) in object {
            let value = match value {
                Value::Bool(b) => ContextValue::Bool(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => ContextValue::Int(i),
                    None => ContextValue::Float(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) if keys::LOCATION_KEYS.contains(&key.as_str()) => {
                    ContextValue::Location(Location::new(s.clone()))
                }
                Value::String(s) if keys::STRATEGY_KEYS.contains(&key.as_str()) => {
                    ContextValue::Strategy(s.clone())
                }
                Value::String(s) => ContextValue::Str(s.clone()),
                other => {
                    return Err(ClusterError::Config(format!(
                        "unsupported value for '{}': {}",
                        key, other
                    )));
                }
            };
            ctx.values.insert(key.clone(), value);
        }
        Ok(ctx)
    }

    /// Load a context from a JSON file.
    pub fn load(path: &Path) -> ClusterResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let json: Value = serde_json::from_str(&raw)?;
        Self::from_json(&json)
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<ContextValue>) {
        self.touch(key);
        self.values.insert(key.to_string(), value.into());
    }

    /// Store `value` only if `key` has no value yet.
    pub fn set_if_absent(&mut self, key: &str, value: impl Into<ContextValue>) {
        if !self.values.contains_key(key) {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.touch(key);
        self.values.remove(key)
    }

    /// Copy the value of `from` to `to`. A missing `from` leaves `to` untouched.
    pub fn copy(&mut self, from: &str, to: &str) {
        if let Some(value) = self.values.get(from).cloned() {
            self.set(to, value);
        }
    }

    fn touch(&mut self, key: &str) {
        if keys::STRATEGY_KEYS.contains(&key) {
            self.strategies = None;
        }
    }

    /// Resolve the strategy keys once and keep the bundle for the rest of the run.
    pub fn bind_strategies(&mut self) -> ClusterResult<Strategies> {
        let strategies = Strategies::resolve(self)?;
        self.strategies = Some(strategies.clone());
        Ok(strategies)
    }

    /// The bound strategy bundle, or a fresh resolution when none is bound.
    pub fn strategies(&self) -> ClusterResult<Strategies> {
        match &self.strategies {
            Some(strategies) => Ok(strategies.clone()),
            None => Strategies::resolve(self),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    // ------------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------------

    pub fn get_int(&self, key: &str, default: i64) -> ClusterResult<i64> {
        match self.values.get(key) {
            None => Ok(default),
            Some(ContextValue::Int(i)) => Ok(*i),
            Some(ContextValue::Str(s)) => s.trim().parse().map_err(|_| mismatch(key, "int", s)),
            Some(other) => Err(mismatch(key, "int", other.kind())),
        }
    }

    /// Integer value that must be non-negative, as `usize`.
    pub fn get_count(&self, key: &str, default: usize) -> ClusterResult<usize> {
        let value = self.get_int(key, default as i64)?;
        usize::try_from(value).map_err(|_| {
            ClusterError::Config(format!("'{}' must be non-negative, got {}", key, value))
        })
    }

    pub fn get_float(&self, key: &str, default: f64) -> ClusterResult<f64> {
        match self.values.get(key) {
            None => Ok(default),
            Some(ContextValue::Float(f)) => Ok(*f),
            Some(ContextValue::Int(i)) => Ok(*i as f64),
            Some(ContextValue::Str(s)) => {
                s.trim().parse().map_err(|_| mismatch(key, "float", s))
            }
            Some(other) => Err(mismatch(key, "float", other.kind())),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> ClusterResult<bool> {
        match self.values.get(key) {
            None => Ok(default),
            Some(ContextValue::Bool(b)) => Ok(*b),
            Some(ContextValue::Str(s)) => match s.trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(mismatch(key, "bool", s)),
            },
            Some(other) => Err(mismatch(key, "bool", other.kind())),
        }
    }

    pub fn get_str(&self, key: &str, default: &str) -> ClusterResult<String> {
        Ok(self.get_str_opt(key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn require_str(&self, key: &str) -> ClusterResult<String> {
        self.get_str_opt(key)?.ok_or_else(|| missing(key))
    }

    fn get_str_opt(&self, key: &str) -> ClusterResult<Option<String>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ContextValue::Str(s)) | Some(ContextValue::Strategy(s)) => Ok(Some(s.clone())),
            Some(ContextValue::Location(l)) => Ok(Some(l.to_string())),
            Some(ContextValue::Int(i)) => Ok(Some(i.to_string())),
            Some(other) => Err(mismatch(key, "string", other.kind())),
        }
    }

    pub fn get_location(&self, key: &str, default: &str) -> ClusterResult<Location> {
        Ok(self
            .get_location_opt(key)?
            .unwrap_or_else(|| Location::new(default)))
    }

    pub fn require_location(&self, key: &str) -> ClusterResult<Location> {
        self.get_location_opt(key)?.ok_or_else(|| missing(key))
    }

    fn get_location_opt(&self, key: &str) -> ClusterResult<Option<Location>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ContextValue::Location(l)) => Ok(Some(l.clone())),
            Some(ContextValue::Str(s)) => Ok(Some(Location::new(s.clone()))),
            Some(other) => Err(mismatch(key, "location", other.kind())),
        }
    }

    pub fn get_strategy(&self, key: &str, default: &str) -> ClusterResult<String> {
        match self.values.get(key) {
            None => Ok(default.to_string()),
            Some(ContextValue::Strategy(s)) | Some(ContextValue::Str(s)) => Ok(s.clone()),
            Some(other) => Err(mismatch(key, "strategy", other.kind())),
        }
    }
}

fn missing(key: &str) -> ClusterError {
    ClusterError::Config(format!("missing required key '{}'", key))
}

fn mismatch(key: &str, expected: &str, got: &str) -> ClusterError {
    ClusterError::Config(format!("'{}' expected {}, got {}", key, expected, got))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_with_default() {
        let ctx = RunContext::new();
        assert_eq!(ctx.get_int(keys::sample::MIN_SIZE, 2).unwrap(), 2);
        assert!(!ctx.get_bool(keys::clustering::RETAIN_GROUP_ASSIGNMENTS, false).unwrap());
        assert_eq!(ctx.get_location(keys::global::BASE_DIR, "/tmp").unwrap().as_str(), "/tmp");
    }

    #[test]
    fn test_later_writes_shadow_earlier() {
        let mut ctx = RunContext::new();
        ctx.set(keys::centroid::ZOOM_LEVEL, 1u32);
        ctx.set(keys::centroid::ZOOM_LEVEL, 3u32);
        assert_eq!(ctx.get_int(keys::centroid::ZOOM_LEVEL, 1).unwrap(), 3);
    }

    #[test]
    fn test_set_if_absent_keeps_existing() {
        let mut ctx = RunContext::new();
        ctx.set(keys::global::BATCH_ID, "b1");
        ctx.set_if_absent(keys::global::BATCH_ID, "b2");
        ctx.set_if_absent(keys::global::NAMESPACE, "roads");
        assert_eq!(ctx.require_str(keys::global::BATCH_ID).unwrap(), "b1");
        assert_eq!(ctx.require_str(keys::global::NAMESPACE).unwrap(), "roads");
    }

    #[test]
    fn test_copy() {
        let mut ctx = RunContext::new();
        ctx.set(keys::centroid::DATA_TYPE_ID, "centroid");
        ctx.copy(keys::centroid::DATA_TYPE_ID, keys::sample::DATA_TYPE_ID);
        ctx.copy("absent.key", keys::sample::INDEX_ID);
        assert_eq!(ctx.require_str(keys::sample::DATA_TYPE_ID).unwrap(), "centroid");
        assert!(!ctx.contains(keys::sample::INDEX_ID));
    }

    #[test]
    fn test_type_mismatch_is_config_error() {
        let mut ctx = RunContext::new();
        ctx.set(keys::sample::MIN_SIZE, true);
        let err = ctx.get_int(keys::sample::MIN_SIZE, 2).unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
        assert!(err.to_string().contains("sample.min_size"));
    }

    #[test]
    fn test_require_missing_key() {
        let ctx = RunContext::new();
        let err = ctx.require_str(keys::global::NAMESPACE).unwrap_err();
        assert!(err.to_string().contains("missing required key"));
    }

    #[test]
    fn test_from_json_types_values() {
        let ctx = RunContext::from_json(&json!({
            "global.namespace": "roads",
            "global.base_dir": "/data/out/",
            "common.distance_fn": "haversine",
            "clustering.zoom_levels": 2,
            "kmeans.tolerance": 0.5,
            "clustering.retain_group_assignments": true
        }))
        .unwrap();

        assert_eq!(
            ctx.get(keys::global::BASE_DIR),
            Some(&ContextValue::Location(Location::new("/data/out")))
        );
        assert_eq!(
            ctx.get(keys::common::DISTANCE_FN),
            Some(&ContextValue::Strategy("haversine".into()))
        );
        assert_eq!(ctx.get_int(keys::clustering::ZOOM_LEVELS, 1).unwrap(), 2);
        assert_eq!(ctx.get_float(keys::kmeans::TOLERANCE, 0.0).unwrap(), 0.5);
        assert!(ctx.get_bool(keys::clustering::RETAIN_GROUP_ASSIGNMENTS, false).unwrap());
    }

    #[test]
    fn test_from_json_rejects_nested_values() {
        let err = RunContext::from_json(&json!({ "global.namespace": ["a"] })).unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
        assert!(RunContext::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut ctx = RunContext::new();
        ctx.set(keys::sample::MAX_SIZE, -4i64);
        assert!(ctx.get_count(keys::sample::MAX_SIZE, 1000).is_err());
    }

    #[test]
    fn test_bound_strategies_are_reused() {
        let mut ctx = RunContext::new();
        let bound = ctx.bind_strategies().unwrap();
        let again = ctx.strategies().unwrap();
        assert!(std::sync::Arc::ptr_eq(&bound.distance, &again.distance));

        // unrelated writes keep the binding
        ctx.set(keys::centroid::ZOOM_LEVEL, 2u32);
        assert!(std::sync::Arc::ptr_eq(&bound.distance, &ctx.strategies().unwrap().distance));
    }

    #[test]
    fn test_strategy_key_change_drops_binding() {
        let mut ctx = RunContext::new();
        assert_eq!(ctx.bind_strategies().unwrap().distance.name(), "euclidean");

        ctx.set(keys::common::DISTANCE_FN, ContextValue::Strategy("haversine".into()));
        assert_eq!(ctx.strategies().unwrap().distance.name(), "haversine");

        ctx.set(keys::common::DISTANCE_FN, ContextValue::Strategy("manhattan".into()));
        assert!(ctx.strategies().is_err());
    }
}
