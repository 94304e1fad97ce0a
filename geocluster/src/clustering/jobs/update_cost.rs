//! Job: update centroid costs.
//!
//! Every item contributes its squared distance to the nearest centroid in
//! its group. Each centroid ends up with the summed cost and the number of
//! items it supports.

use super::{JobTarget, job_start, log_job_error};
use crate::centroid::{self, CentroidCost, NestedGroupCentroidAssignment, centroid_scope};
use crate::clustering::ClusteringAlgorithm;
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::{ClusterEnv, JobSpec, MapContext, MapUnit, ReduceContext, ReduceUnit};
use crate::pipeline::Stage;
use crate::strategy::Strategies;
use crate::types::{Feature, Location};
use async_trait::async_trait;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct NearestCostMapper {
    strategies: Strategies,
    assignment: NestedGroupCentroidAssignment,
}

impl MapUnit for NearestCostMapper {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
        let item = self.strategies.wrap(feature);
        match self.assignment.find_nearest(&item) {
            Some((nearest, distance)) => ctx.emit(nearest.id.clone(), json!(distance * distance)),
            None => tracing::trace!(item_id = %item.id, group_id = %item.group_id, "No centroid in group"),
        }
        Ok(())
    }
}

#[derive(Default)]
struct CostReducer {
    sink: Mutex<Vec<CentroidCost>>,
}

impl ReduceUnit for CostReducer {
    fn reduce(&self, centroid_id: &str, values: Vec<Value>, _ctx: &mut ReduceContext) -> ClusterResult<()> {
        let mut cost = 0.0;
        for value in &values {
            cost += value.as_f64().ok_or_else(|| {
                ClusterError::Internal(format!("non-numeric cost for centroid {}", centroid_id))
            })?;
        }
        self.sink.lock().push(CentroidCost {
            id: centroid_id.to_string(),
            cost,
            support: values.len() as u64,
        });
        Ok(())
    }
}

#[derive(Debug)]
pub struct UpdateCentroidCostJob {
    target: JobTarget,
    reducer_count: AtomicUsize,
    total_cost: Mutex<f64>,
}

impl Default for UpdateCentroidCostJob {
    fn default() -> Self {
        Self {
            target: JobTarget::default(),
            reducer_count: AtomicUsize::new(1),
            total_cost: Mutex::new(0.0),
        }
    }
}

impl UpdateCentroidCostJob {
    /// Cost update with a single aggregation unit.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reducer_count(&self, count: usize) {
        self.reducer_count.store(count.max(1), Ordering::SeqCst);
    }

    pub fn reducer_count(&self) -> usize {
        self.reducer_count.load(Ordering::SeqCst)
    }

    /// Sum of every centroid's cost after the last run.
    pub fn total_cost(&self) -> f64 {
        *self.total_cost.lock()
    }
}

#[async_trait]
impl Stage for UpdateCentroidCostJob {
    fn name(&self) -> &str {
        "update_centroid_cost"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        centroid::fill_options(schema);
        schema
            .optional(keys::common::INPUT_LOCATION, "items to measure")
            .optional(keys::common::DISTANCE_FN, "distance function")
            .optional(keys::centroid::ZOOM_LEVEL, "level of the centroid pool");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        let zoom_level = job_start(stage, &self.target, ctx)?;
        run_update_cost(self, env, ctx, zoom_level)
            .await
            .inspect_err(|e| log_job_error(stage, zoom_level, e))
    }
}

impl ClusteringAlgorithm for UpdateCentroidCostJob {
    fn set_zoom_level(&self, zoom_level: u32) {
        self.target.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        self.target.set_input_location(location);
    }
}

async fn run_update_cost(
    job: &UpdateCentroidCostJob,
    env: &ClusterEnv,
    ctx: &RunContext,
    zoom_level: u32,
) -> ClusterResult<Status> {
    let input = job.target.input_location(ctx)?;
    let strategies = ctx.strategies()?;
    let scope = centroid_scope(ctx)?;
    let assignment = NestedGroupCentroidAssignment::load(
        env.centroids.as_ref(),
        &scope,
        zoom_level,
        Arc::clone(&strategies.distance),
    )?;
    if assignment.is_empty() {
        tracing::warn!(zoom_level, "Updating costs against an empty centroid pool");
    }

    let reducer = Arc::new(CostReducer::default());
    let reducer_count = job.reducer_count();
    let spec = JobSpec::new(
        format!("update-cost-{}", zoom_level),
        input,
        Arc::new(NearestCostMapper {
            strategies,
            assignment,
        }),
    )
    .with_reducer(reducer.clone(), reducer_count);

    let status = env.engine.submit(spec).await?;
    if !status.is_success() {
        return Ok(status);
    }

    let mut costs = std::mem::take(&mut *reducer.sink.lock());
    costs.sort_by(|a, b| a.id.cmp(&b.id));
    env.centroids.update_costs(&scope, zoom_level, &costs)?;

    let total: f64 = costs.iter().map(|c| c.cost).sum();
    *job.total_cost.lock() = total;
    tracing::debug!(zoom_level, reducer_count, centroids = costs.len(), total_cost = total, "Centroid costs updated");
    Ok(status)
}
