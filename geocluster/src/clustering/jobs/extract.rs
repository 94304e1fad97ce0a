//! Job: extract the raw features into the run's working location.
//!
//! Deduplicates by feature id (first occurrence wins) and clears any group
//! label so every item starts in the root group.

use super::{log_job_error, max_reducers};
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::{ClusterEnv, JobSpec, MapContext, MapUnit, ReduceContext, ReduceUnit};
use crate::pipeline::Stage;
use crate::types::{Feature, Location};
use async_trait::async_trait;
use geocluster_shared::errors::ClusterResult;
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

struct ByIdMapper;

impl MapUnit for ByIdMapper {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
        ctx.emit(feature.id.clone(), serde_json::to_value(feature)?);
        Ok(())
    }
}

struct FirstOccurrenceReducer;

impl ReduceUnit for FirstOccurrenceReducer {
    fn reduce(&self, _id: &str, values: Vec<Value>, ctx: &mut ReduceContext) -> ClusterResult<()> {
        if let Some(first) = values.into_iter().next() {
            let mut feature: Feature = serde_json::from_value(first)?;
            feature.group_id = None;
            ctx.write(feature);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ExtractJob {
    output: Mutex<Option<Location>>,
}

impl ExtractJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Location written by the last run.
    pub fn output_location(&self) -> Option<Location> {
        self.output.lock().clone()
    }
}

#[async_trait]
impl Stage for ExtractJob {
    fn name(&self) -> &str {
        "extract"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        schema
            .required(keys::extract::INPUT_LOCATION, "raw features to cluster")
            .required(keys::global::NAMESPACE, "namespace of derived locations")
            .optional(keys::global::BASE_DIR, "base of derived locations")
            .optional(keys::extract::OUTPUT_DATA_TYPE_ID, "data type of extracted centroids");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        tracing::debug!(stage, "Starting job");
        run_extract(self, env, ctx)
            .await
            .inspect_err(|e| log_job_error(stage, 0, e))
    }
}

async fn run_extract(job: &ExtractJob, env: &ClusterEnv, ctx: &RunContext) -> ClusterResult<Status> {
    let input = ctx.require_location(keys::extract::INPUT_LOCATION)?;
    let namespace = ctx.require_str(keys::global::NAMESPACE)?;
    let base = ctx.get_location(keys::global::BASE_DIR, keys::global::DEFAULT_BASE_DIR)?;
    let output = Location::extract_output(&base, &namespace);

    if env.store.exists(&output)? {
        let removed = env.store.delete_recursive(&output)?;
        tracing::debug!(output = %output, removed, "Removed previous extract");
    }

    let spec = JobSpec::new("extract", input.clone(), Arc::new(ByIdMapper))
        .with_output(output.clone())
        .with_reducer(Arc::new(FirstOccurrenceReducer), max_reducers(ctx)?);

    let status = env.engine.submit(spec).await?;
    if status.is_success() {
        tracing::info!(input = %input, output = %output, "Features extracted");
        *job.output.lock() = Some(output);
    }
    Ok(status)
}
