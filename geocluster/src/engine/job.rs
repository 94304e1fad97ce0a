//! Job description handed to a compute engine.

use crate::types::{Feature, Location};
use geocluster_shared::errors::ClusterResult;
use serde_json::Value;
use std::sync::Arc;

/// Map phase: invoked once per input feature.
pub trait MapUnit: Send + Sync {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()>;
}

/// Aggregate phase: invoked once per emitted key, keys in sorted order
/// within an aggregation unit.
pub trait ReduceUnit: Send + Sync {
    fn reduce(&self, key: &str, values: Vec<Value>, ctx: &mut ReduceContext) -> ClusterResult<()>;
}

/// Collector for one map partition.
#[derive(Debug, Default)]
pub struct MapContext {
    pub(crate) emitted: Vec<(String, Value)>,
    pub(crate) written: Vec<Feature>,
}

impl MapContext {
    /// Shuffle a value to the aggregate phase.
    pub fn emit(&mut self, key: impl Into<String>, value: Value) {
        self.emitted.push((key.into(), value));
    }

    /// Write a record straight to the job output.
    pub fn write(&mut self, feature: Feature) {
        self.written.push(feature);
    }
}

#[derive(Debug, Default)]
pub struct ReduceContext {
    pub(crate) written: Vec<Feature>,
}

impl ReduceContext {
    pub fn write(&mut self, feature: Feature) {
        self.written.push(feature);
    }
}

pub struct JobSpec {
    pub name: String,
    pub input: Location,
    pub output: Option<Location>,
    pub mapper: Arc<dyn MapUnit>,
    pub reducer: Option<Arc<dyn ReduceUnit>>,
    pub reducer_count: usize,
}

impl JobSpec {
    /// Map-only job without an output location.
    pub fn new(name: impl Into<String>, input: Location, mapper: Arc<dyn MapUnit>) -> Self {
        Self {
            name: name.into(),
            input,
            output: None,
            mapper,
            reducer: None,
            reducer_count: 1,
        }
    }

    pub fn with_output(mut self, output: Location) -> Self {
        self.output = Some(output);
        self
    }

    /// Attach an aggregate phase. A count of zero is raised to one.
    pub fn with_reducer(mut self, reducer: Arc<dyn ReduceUnit>, reducer_count: usize) -> Self {
        self.reducer = Some(reducer);
        self.reducer_count = reducer_count.max(1);
        self
    }
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("has_reducer", &self.reducer.is_some())
            .field("reducer_count", &self.reducer_count)
            .finish()
    }
}
