//! Job: Lloyd refinement.
//!
//! Each pass reassigns items to their nearest in-group centroid and moves
//! every centroid to the mean of its members. Centroids without members stay
//! where they are. Stops after `kmeans.max_iterations` passes or once no
//! centroid moves further than `kmeans.tolerance`.

use super::{JobTarget, job_start, log_job_error};
use crate::centroid::{self, NestedGroupCentroidAssignment, centroid_scope};
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
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct AssignMapper {
    strategies: Strategies,
    assignment: NestedGroupCentroidAssignment,
}

impl MapUnit for AssignMapper {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
        let item = self.strategies.wrap(feature);
        if let Some((nearest, _)) = self.assignment.find_nearest(&item) {
            ctx.emit(nearest.id.clone(), serde_json::to_value(&item.coordinate)?);
        }
        Ok(())
    }
}

#[derive(Default)]
struct MeanReducer {
    sink: Mutex<Vec<(String, Vec<f64>)>>,
}

impl ReduceUnit for MeanReducer {
    fn reduce(&self, centroid_id: &str, values: Vec<Value>, _ctx: &mut ReduceContext) -> ClusterResult<()> {
        let mut sum: Vec<f64> = Vec::new();
        for value in &values {
            let coordinate: Vec<f64> = serde_json::from_value(value.clone())?;
            if sum.is_empty() {
                sum = vec![0.0; coordinate.len()];
            } else if sum.len() != coordinate.len() {
                return Err(ClusterError::Internal(format!(
                    "mixed dimensions among members of centroid {}",
                    centroid_id
                )));
            }
            for (acc, v) in sum.iter_mut().zip(&coordinate) {
                *acc += v;
            }
        }
        let n = values.len() as f64;
        let mean = sum.into_iter().map(|acc| acc / n).collect();
        self.sink.lock().push((centroid_id.to_string(), mean));
        Ok(())
    }
}

#[derive(Debug)]
pub struct KMeansIterationsJob {
    target: JobTarget,
    reducer_count: AtomicUsize,
    iterations_run: AtomicUsize,
}

impl Default for KMeansIterationsJob {
    fn default() -> Self {
        Self {
            target: JobTarget::default(),
            reducer_count: AtomicUsize::new(1),
            iterations_run: AtomicUsize::new(0),
        }
    }
}

impl KMeansIterationsJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reducer_count(&self, count: usize) {
        self.reducer_count.store(count.max(1), Ordering::SeqCst);
    }

    pub fn reducer_count(&self) -> usize {
        self.reducer_count.load(Ordering::SeqCst)
    }

    /// Passes completed by the last run.
    pub fn iterations_run(&self) -> usize {
        self.iterations_run.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for KMeansIterationsJob {
    fn name(&self) -> &str {
        "kmeans_iterations"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        centroid::fill_options(schema);
        schema
            .optional(keys::common::INPUT_LOCATION, "items to cluster")
            .optional(keys::common::DISTANCE_FN, "distance function")
            .optional(keys::kmeans::MAX_ITERATIONS, "most refinement passes")
            .optional(keys::kmeans::TOLERANCE, "largest centroid shift considered converged");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        let zoom_level = job_start(stage, &self.target, ctx)?;
        run_kmeans(self, env, ctx, zoom_level)
            .await
            .inspect_err(|e| log_job_error(stage, zoom_level, e))
    }
}

impl ClusteringAlgorithm for KMeansIterationsJob {
    fn set_zoom_level(&self, zoom_level: u32) {
        self.target.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        self.target.set_input_location(location);
    }
}

async fn run_kmeans(
    job: &KMeansIterationsJob,
    env: &ClusterEnv,
    ctx: &RunContext,
    zoom_level: u32,
) -> ClusterResult<Status> {
    let input = job.target.input_location(ctx)?;
    let strategies = ctx.strategies()?;
    let scope = centroid_scope(ctx)?;
    let max_iterations = ctx.get_count(
        keys::kmeans::MAX_ITERATIONS,
        keys::kmeans::DEFAULT_MAX_ITERATIONS as usize,
    )?;
    let tolerance = ctx.get_float(keys::kmeans::TOLERANCE, keys::kmeans::DEFAULT_TOLERANCE)?;
    let reducer_count = job.reducer_count();

    job.iterations_run.store(0, Ordering::SeqCst);
    for iteration in 0..max_iterations {
        let centroids = env.centroids.centroids(&scope, zoom_level)?;
        if centroids.is_empty() {
            tracing::warn!(zoom_level, "No centroids to refine");
            break;
        }
        let previous: HashMap<String, Vec<f64>> = centroids
            .iter()
            .map(|c| (c.id.clone(), c.coordinate.clone()))
            .collect();

        let reducer = Arc::new(MeanReducer::default());
        let spec = JobSpec::new(
            format!("kmeans-{}-{}", zoom_level, iteration),
            input.clone(),
            Arc::new(AssignMapper {
                strategies: strategies.clone(),
                assignment: NestedGroupCentroidAssignment::from_centroids(
                    centroids,
                    Arc::clone(&strategies.distance),
                ),
            }),
        )
        .with_reducer(reducer.clone(), reducer_count);

        let status = env.engine.submit(spec).await?;
        if !status.is_success() {
            return Ok(status);
        }

        let mut means = std::mem::take(&mut *reducer.sink.lock());
        means.sort_by(|a, b| a.0.cmp(&b.0));
        let shift = means
            .iter()
            .filter_map(|(id, mean)| {
                previous
                    .get(id)
                    .map(|old| strategies.distance.distance(old, mean))
            })
            .fold(0.0, f64::max);
        env.centroids.update_locations(&scope, zoom_level, &means)?;
        job.iterations_run.store(iteration + 1, Ordering::SeqCst);

        tracing::debug!(zoom_level, iteration, reducer_count, shift, "Refinement pass complete");
        if shift <= tolerance {
            break;
        }
    }

    tracing::info!(zoom_level, iterations = job.iterations_run(), "Centroids refined");
    Ok(Status::SUCCESS)
}
