//! Job: relabel items with their nearest centroid.
//!
//! Map-only. Each item's group becomes the id of its nearest centroid within
//! its current group; an item whose group has no centroid keeps its label.

use super::{JobTarget, job_start, log_job_error};
use crate::centroid::{self, NestedGroupCentroidAssignment, centroid_scope};
use crate::clustering::ClusteringAlgorithm;
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::{ClusterEnv, JobSpec, MapContext, MapUnit};
use crate::pipeline::Stage;
use crate::strategy::Strategies;
use crate::types::{Feature, Location};
use async_trait::async_trait;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use std::sync::Arc;

struct RelabelMapper {
    strategies: Strategies,
    assignment: NestedGroupCentroidAssignment,
}

impl MapUnit for RelabelMapper {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
        let item = self.strategies.wrap(feature);
        let mut relabelled = feature.clone();
        match self.assignment.find_nearest(&item) {
            Some((nearest, _)) => relabelled.group_id = Some(nearest.id.clone()),
            None => tracing::trace!(item_id = %item.id, group_id = %item.group_id, "Group has no centroid"),
        }
        ctx.write(relabelled);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct GroupAssignmentJob {
    target: JobTarget,
    output: Mutex<Option<Location>>,
}

impl GroupAssignmentJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_output_location(&self, location: Location) {
        *self.output.lock() = Some(location);
    }

    /// Where the relabelled items are written.
    pub fn output_location(&self) -> Option<Location> {
        self.output.lock().clone()
    }
}

#[async_trait]
impl Stage for GroupAssignmentJob {
    fn name(&self) -> &str {
        "group_assignment"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        centroid::fill_options(schema);
        schema
            .optional(keys::common::INPUT_LOCATION, "items to relabel")
            .optional(keys::common::DISTANCE_FN, "distance function");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        let zoom_level = job_start(stage, &self.target, ctx)?;
        run_assignment(self, env, ctx, zoom_level)
            .await
            .inspect_err(|e| log_job_error(stage, zoom_level, e))
    }
}

impl ClusteringAlgorithm for GroupAssignmentJob {
    fn set_zoom_level(&self, zoom_level: u32) {
        self.target.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        self.target.set_input_location(location);
    }
}

async fn run_assignment(
    job: &GroupAssignmentJob,
    env: &ClusterEnv,
    ctx: &RunContext,
    zoom_level: u32,
) -> ClusterResult<Status> {
    let output = job
        .output_location()
        .ok_or_else(|| ClusterError::Config("group assignment has no output location".into()))?;
    let input = job.target.input_location(ctx)?;
    let strategies = ctx.strategies()?;
    let scope = centroid_scope(ctx)?;
    let assignment = NestedGroupCentroidAssignment::load(
        env.centroids.as_ref(),
        &scope,
        zoom_level,
        Arc::clone(&strategies.distance),
    )?;

    let spec = JobSpec::new(
        format!("group-assignment-{}", zoom_level),
        input,
        Arc::new(RelabelMapper {
            strategies,
            assignment,
        }),
    )
    .with_output(output.clone());

    let status = env.engine.submit(spec).await?;
    if status.is_success() {
        tracing::info!(zoom_level, output = %output, "Items assigned to groups");
    }
    Ok(status)
}
