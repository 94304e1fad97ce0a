//! k-means|| clustering of one level.
//!
//! ```text
//! 1. SampleMultipleSets  (scalable sampling of the centroid pool)
//! 2. Strip               (down to clustering.max_k per group)
//! 3. KMeansIterations    (one aggregation unit per surviving centroid)
//! ```

use super::jobs::{KMeansIterationsJob, StripWeakCentroidsJob};
use super::{ClusteringAlgorithm, SampleMultipleSetsRunner};
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::ClusterEnv;
use crate::pipeline::{ExecutionPlan, PipelineController, PostStageHook, SharedStage, Stage};
use crate::strategy::Strategies;
use crate::types::Location;
use async_trait::async_trait;
use geocluster_shared::errors::ClusterResult;
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub struct KMeansParallelRunner {
    sampler: Arc<SampleMultipleSetsRunner>,
    strip: Arc<StripWeakCentroidsJob>,
    kmeans: Arc<KMeansIterationsJob>,
    zoom_level: Mutex<Option<u32>>,
    input: Mutex<Option<Location>>,
}

impl Default for KMeansParallelRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl KMeansParallelRunner {
    pub fn new() -> Self {
        Self {
            sampler: Arc::new(SampleMultipleSetsRunner::new()),
            strip: Arc::new(StripWeakCentroidsJob::with_bounds(
                keys::clustering::MIN_K,
                keys::clustering::MAX_K,
            )),
            kmeans: Arc::new(KMeansIterationsJob::new()),
            zoom_level: Mutex::new(None),
            input: Mutex::new(None),
        }
    }

    pub fn sampler(&self) -> &SampleMultipleSetsRunner {
        &self.sampler
    }

    /// Centroids that survived the final strip of the last run.
    pub fn centroid_count(&self) -> usize {
        self.strip.current_centroid_count()
    }

    pub fn kmeans_iterations_run(&self) -> usize {
        self.kmeans.iterations_run()
    }

    /// Aggregation units given to the Lloyd iterations of the last run.
    pub fn kmeans_reducer_count(&self) -> usize {
        self.kmeans.reducer_count()
    }

    fn plan(&self) -> ClusterResult<ExecutionPlan> {
        let strip = Arc::clone(&self.strip);
        let kmeans = Arc::clone(&self.kmeans);
        ExecutionPlan::new(
            vec![
                self.sampler.clone() as SharedStage,
                self.strip.clone(),
                self.kmeans.clone(),
            ],
            vec![
                PostStageHook::noop(),
                PostStageHook::new(move |_, _, _| {
                    kmeans.set_reducer_count(strip.current_centroid_count());
                    Ok(())
                }),
                PostStageHook::noop(),
            ],
        )
    }
}

/// Fill run-wide defaults a standalone run needs.
pub(crate) fn prepare_context(ctx: &mut RunContext) -> ClusterResult<Strategies> {
    ctx.set_if_absent(keys::global::BATCH_ID, Uuid::new_v4().to_string());
    let data_type_id = ctx.get_str(
        keys::extract::OUTPUT_DATA_TYPE_ID,
        keys::extract::DEFAULT_OUTPUT_DATA_TYPE_ID,
    )?;
    ctx.set_if_absent(keys::centroid::DATA_TYPE_ID, data_type_id);
    Strategies::store_defaults(ctx);
    ctx.bind_strategies()
}

#[async_trait]
impl Stage for KMeansParallelRunner {
    fn name(&self) -> &str {
        "kmeans_parallel"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        self.sampler.fill_options(schema);
        self.strip.fill_options(schema);
        self.kmeans.fill_options(schema);
        // both are supplied by whoever drives this runner
        schema
            .remove(keys::common::INPUT_LOCATION)
            .remove(keys::centroid::ZOOM_LEVEL);
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        if let Some(zoom_level) = *self.zoom_level.lock() {
            ctx.set(keys::centroid::ZOOM_LEVEL, zoom_level);
        }
        if let Some(input) = self.input.lock().clone() {
            ctx.set(keys::common::INPUT_LOCATION, input);
        }
        let strategies = prepare_context(ctx)?;

        let mut schema = OptionSchema::new();
        self.fill_options(&mut schema);
        schema.validate(ctx)?;

        let zoom_level = ctx.get_int(keys::centroid::ZOOM_LEVEL, 1)?;
        let input = ctx.require_location(keys::common::INPUT_LOCATION)?;
        tracing::info!(zoom_level, input = %input, strategies = ?strategies, "Starting k-means|| clustering");

        let mut controller = PipelineController::new();
        controller.init(self.plan()?);
        let status = controller.run(env, ctx).await?;
        if status.is_success() {
            tracing::info!(
                zoom_level,
                centroids = self.centroid_count(),
                kmeans_iterations = self.kmeans_iterations_run(),
                "k-means|| clustering complete"
            );
        } else {
            tracing::warn!(zoom_level, status = %status, "k-means|| clustering failed");
        }
        Ok(status)
    }
}

impl ClusteringAlgorithm for KMeansParallelRunner {
    fn set_zoom_level(&self, zoom_level: u32) {
        *self.zoom_level.lock() = Some(zoom_level);
        self.sampler.set_zoom_level(zoom_level);
        self.strip.set_zoom_level(zoom_level);
        self.kmeans.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        *self.input.lock() = Some(location.clone());
        self.sampler.set_input_location(location.clone());
        self.strip.set_input_location(location.clone());
        self.kmeans.set_input_location(location);
    }
}
