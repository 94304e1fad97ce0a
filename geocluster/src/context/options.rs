//! Declared configuration schema.
//!
//! Every stage lists the keys it consumes through `fill_options`; a runner
//! that wraps other stages folds their declarations into one schema and
//! validates it before anything executes.

use super::RunContext;
use geocluster_shared::errors::{ClusterError, ClusterResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub description: &'static str,
    /// Must be present in the context before the run starts.
    pub required: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OptionSchema {
    options: Vec<OptionSpec>,
}

impl OptionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an optional key. Re-declaring a key keeps the first entry.
    pub fn optional(&mut self, key: &'static str, description: &'static str) -> &mut Self {
        self.insert(OptionSpec {
            key,
            description,
            required: false,
        })
    }

    /// Declare a key that has no default. A later optional declaration of the
    /// same key does not weaken it.
    pub fn required(&mut self, key: &'static str, description: &'static str) -> &mut Self {
        if let Some(existing) = self.options.iter_mut().find(|o| o.key == key) {
            existing.required = true;
            return self;
        }
        self.insert(OptionSpec {
            key,
            description,
            required: true,
        })
    }

    fn insert(&mut self, spec: OptionSpec) -> &mut Self {
        if !self.contains(spec.key) {
            self.options.push(spec);
        }
        self
    }

    /// Hide a key the caller sets itself.
    pub fn remove(&mut self, key: &str) -> &mut Self {
        self.options.retain(|o| o.key != key);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.options.iter().any(|o| o.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionSpec> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Report every required key missing from `ctx` in one error.
    pub fn validate(&self, ctx: &RunContext) -> ClusterResult<()> {
        let missing: Vec<&str> = self
            .options
            .iter()
            .filter(|o| o.required && !ctx.contains(o.key))
            .map(|o| o.key)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ClusterError::Config(format!(
                "missing required keys: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::keys;

    #[test]
    fn test_duplicate_declarations_collapse() {
        let mut schema = OptionSchema::new();
        schema
            .optional(keys::sample::MIN_SIZE, "min")
            .optional(keys::sample::MIN_SIZE, "again");
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.get(keys::sample::MIN_SIZE).unwrap().description, "min");
    }

    #[test]
    fn test_required_wins_over_optional() {
        let mut schema = OptionSchema::new();
        schema.optional(keys::global::NAMESPACE, "ns");
        schema.required(keys::global::NAMESPACE, "ns");
        schema.optional(keys::global::NAMESPACE, "ns");
        assert!(schema.get(keys::global::NAMESPACE).unwrap().required);
    }

    #[test]
    fn test_remove_hides_key() {
        let mut schema = OptionSchema::new();
        schema
            .required(keys::common::INPUT_LOCATION, "input")
            .optional(keys::centroid::ZOOM_LEVEL, "zoom");
        schema.remove(keys::common::INPUT_LOCATION);
        assert!(!schema.contains(keys::common::INPUT_LOCATION));
        assert!(schema.validate(&RunContext::new()).is_ok());
    }

    #[test]
    fn test_validate_lists_all_missing() {
        let mut schema = OptionSchema::new();
        schema
            .required(keys::global::NAMESPACE, "ns")
            .required(keys::extract::INPUT_LOCATION, "input");

        let err = schema.validate(&RunContext::new()).unwrap_err().to_string();
        assert!(err.contains(keys::global::NAMESPACE));
        assert!(err.contains(keys::extract::INPUT_LOCATION));

        let mut ctx = RunContext::new();
        ctx.set(keys::global::NAMESPACE, "roads");
        ctx.set(keys::extract::INPUT_LOCATION, "/in");
        assert!(schema.validate(&ctx).is_ok());
    }
}
