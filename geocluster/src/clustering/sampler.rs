//! Scalable sampling (k-means||) of a level's centroid pool.
//!
//! ## Phases
//!
//! ```text
//! Bootstrap (once):
//!   1. KSampler        (uniform seed sample per group)
//!   2. UpdateCost      (single aggregation unit: one global ψ)
//!   3. IterationCount  (t from ψ; configuration can only raise it)
//!
//! Growth (t rounds):
//!   1. RankSampler     (cost-proportional oversampling)
//!   2. UpdateCost      (aggregation units sized from the last strip)
//!   3. Strip           (trim groups above sample.max_size)
//! ```
//!
//! Both phases are immutable plans installed on the same controller. A
//! non-success status in either phase stops sampling; the pool keeps whatever
//! the last completed stage persisted.

use super::ClusteringAlgorithm;
use super::jobs::{
    IterationCountJob, KSamplerJob, RankSamplerJob, StripWeakCentroidsJob, UpdateCentroidCostJob,
};
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::ClusterEnv;
use crate::pipeline::{ExecutionPlan, PipelineController, PostStageHook, SharedStage, Stage};
use crate::types::Location;
use async_trait::async_trait;
use geocluster_shared::errors::ClusterResult;
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pool sizes seen during one growth round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSizes {
    pub round: usize,
    /// Before the round's draw.
    pub start: usize,
    pub after_grow: usize,
    pub after_strip: usize,
}

#[derive(Debug)]
pub struct SampleMultipleSetsRunner {
    ksampler: Arc<KSamplerJob>,
    bootstrap_cost: Arc<UpdateCentroidCostJob>,
    iteration_count: Arc<IterationCountJob>,
    rank_sampler: Arc<RankSamplerJob>,
    growth_cost: Arc<UpdateCentroidCostJob>,
    strip: Arc<StripWeakCentroidsJob>,
    current_count: AtomicUsize,
    rounds_run: AtomicUsize,
    round_sizes: Mutex<Vec<RoundSizes>>,
}

impl Default for SampleMultipleSetsRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleMultipleSetsRunner {
    pub fn new() -> Self {
        Self {
            ksampler: Arc::new(KSamplerJob::new()),
            bootstrap_cost: Arc::new(UpdateCentroidCostJob::new()),
            iteration_count: Arc::new(IterationCountJob::new()),
            rank_sampler: Arc::new(RankSamplerJob::new()),
            growth_cost: Arc::new(UpdateCentroidCostJob::new()),
            strip: Arc::new(StripWeakCentroidsJob::new()),
            current_count: AtomicUsize::new(0),
            rounds_run: AtomicUsize::new(0),
            round_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Pool size after the last run.
    pub fn current_centroid_count(&self) -> usize {
        self.current_count.load(Ordering::SeqCst)
    }

    /// Growth rounds completed by the last run.
    pub fn rounds_run(&self) -> usize {
        self.rounds_run.load(Ordering::SeqCst)
    }

    /// Pool sizes of every completed growth round of the last run.
    pub fn round_sizes(&self) -> Vec<RoundSizes> {
        self.round_sizes.lock().clone()
    }

    /// Aggregation units the next growth cost update would use.
    pub fn growth_reducer_count(&self) -> usize {
        self.growth_cost.reducer_count()
    }

    fn jobs(&self) -> [Arc<dyn ClusteringAlgorithm>; 6] {
        [
            self.ksampler.clone(),
            self.bootstrap_cost.clone(),
            self.iteration_count.clone(),
            self.rank_sampler.clone(),
            self.growth_cost.clone(),
            self.strip.clone(),
        ]
    }

    fn bootstrap_plan(&self) -> ClusterResult<ExecutionPlan> {
        let iteration_count = Arc::clone(&self.iteration_count);
        ExecutionPlan::new(
            vec![
                self.ksampler.clone() as SharedStage,
                self.bootstrap_cost.clone(),
                self.iteration_count.clone(),
            ],
            vec![
                PostStageHook::noop(),
                PostStageHook::noop(),
                PostStageHook::new(move |_, _, ctx| {
                    let configured = ctx.get_count(
                        keys::sample::ITERATIONS,
                        keys::sample::DEFAULT_ITERATIONS as usize,
                    )?;
                    let iterations = configured.max(iteration_count.iterations());
                    ctx.set(keys::sample::ITERATIONS, iterations as i64);
                    Ok(())
                }),
            ],
        )
    }

    fn growth_plan(&self, max_reducers: usize) -> ClusterResult<ExecutionPlan> {
        let strip = Arc::clone(&self.strip);
        let growth_cost = Arc::clone(&self.growth_cost);
        ExecutionPlan::new(
            vec![
                self.rank_sampler.clone() as SharedStage,
                self.growth_cost.clone(),
                self.strip.clone(),
            ],
            vec![
                PostStageHook::noop(),
                PostStageHook::noop(),
                PostStageHook::new(move |_, _, _| {
                    // the next round's cost update gets one unit per surviving centroid
                    growth_cost.set_reducer_count(strip.current_centroid_count().min(max_reducers));
                    Ok(())
                }),
            ],
        )
    }
}

#[async_trait]
impl Stage for SampleMultipleSetsRunner {
    fn name(&self) -> &str {
        "sample_multiple_sets"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        for job in self.jobs() {
            job.fill_options(schema);
        }
        schema
            .optional(keys::sample::MIN_SIZE, "fewest centroids per group")
            .optional(keys::sample::MAX_SIZE, "most centroids per group")
            .optional(keys::sample::DATA_TYPE_ID, "data type of sampled centroids")
            .optional(keys::sample::INDEX_ID, "index of sampled centroids")
            .optional(keys::clustering::MAX_REDUCER_COUNT, "most aggregation units per cost update");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let max_size = ctx.get_int(keys::sample::MAX_SIZE, keys::sample::DEFAULT_MAX_SIZE)?;
        ctx.set(keys::sample::SIZE, max_size);
        let data_type_id = ctx.get_str(
            keys::centroid::DATA_TYPE_ID,
            keys::extract::DEFAULT_OUTPUT_DATA_TYPE_ID,
        )?;
        let index_id = ctx.get_str(keys::centroid::INDEX_ID, keys::centroid::DEFAULT_INDEX_ID)?;
        ctx.set_if_absent(keys::sample::DATA_TYPE_ID, data_type_id);
        ctx.set_if_absent(keys::sample::INDEX_ID, index_id);
        let configured_iterations = ctx.get(keys::sample::ITERATIONS).cloned();
        let max_reducers = super::jobs::max_reducers(ctx)?.max(1);
        self.rounds_run.store(0, Ordering::SeqCst);
        self.round_sizes.lock().clear();

        let status = run_phases(self, env, ctx, max_reducers).await;

        // the computed round count belongs to this level only
        match configured_iterations {
            Some(value) => ctx.set(keys::sample::ITERATIONS, value),
            None => {
                ctx.remove(keys::sample::ITERATIONS);
            }
        }
        status
    }
}

async fn run_phases(
    runner: &SampleMultipleSetsRunner,
    env: &ClusterEnv,
    ctx: &mut RunContext,
    max_reducers: usize,
) -> ClusterResult<Status> {
    let mut controller = PipelineController::new();

    runner.bootstrap_cost.set_reducer_count(1);
    controller.init(runner.bootstrap_plan()?);
    let status = controller.run(env, ctx).await?;
    if !status.is_success() {
        tracing::warn!(status = %status, "Bootstrap sample failed");
        return Ok(status);
    }

    let iterations = ctx.get_count(
        keys::sample::ITERATIONS,
        keys::sample::DEFAULT_ITERATIONS as usize,
    )?;
    let bootstrap_size = runner.ksampler.sampled_count();
    runner
        .growth_cost
        .set_reducer_count(bootstrap_size.min(max_reducers));
    tracing::info!(bootstrap_size, iterations, "Bootstrap complete, growing sample");

    controller.init(runner.growth_plan(max_reducers)?);
    let mut start = bootstrap_size;
    for round in 1..=iterations {
        runner.rank_sampler.set_round(round as u64);
        let status = controller.run(env, ctx).await?;
        if !status.is_success() {
            tracing::warn!(round, status = %status, "Growth round failed");
            return Ok(status);
        }
        let sizes = RoundSizes {
            round,
            start,
            after_grow: runner.rank_sampler.pool_size(),
            after_strip: runner.strip.current_centroid_count(),
        };
        tracing::debug!(?sizes, "Growth round complete");
        runner.round_sizes.lock().push(sizes);
        runner.rounds_run.store(round, Ordering::SeqCst);
        runner.current_count.store(sizes.after_strip, Ordering::SeqCst);
        start = sizes.after_strip;
    }

    if iterations == 0 {
        runner.current_count.store(bootstrap_size, Ordering::SeqCst);
    }
    tracing::info!(
        rounds = iterations,
        centroids = runner.current_centroid_count(),
        "Sampling complete"
    );
    Ok(Status::SUCCESS)
}

impl ClusteringAlgorithm for SampleMultipleSetsRunner {
    fn set_zoom_level(&self, zoom_level: u32) {
        for job in self.jobs() {
            job.set_zoom_level(zoom_level);
        }
    }

    fn set_input_location(&self, location: Location) {
        for job in self.jobs() {
            job.set_input_location(location.clone());
        }
    }
}
