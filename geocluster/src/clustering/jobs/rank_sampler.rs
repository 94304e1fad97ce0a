//! Job: cost-proportional growth sample.
//!
//! An item at distance `d` from its nearest in-group centroid joins the pool
//! with probability `ℓ·d²/ψ_g`, where `ψ_g` is its group's total cost and
//! `ℓ = max(1, sample.size / rounds)` spreads the sample budget over the
//! growth rounds.

use super::ksampler::{Candidate, CandidateReducer};
use super::{JobTarget, job_start, log_job_error, max_reducers, seeded_unit};
use crate::centroid::{self, NestedGroupCentroidAssignment, centroid_scope};
use crate::clustering::ClusteringAlgorithm;
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::{ClusterEnv, JobSpec, MapContext, MapUnit};
use crate::pipeline::Stage;
use crate::strategy::Strategies;
use crate::types::{Feature, Location};
use async_trait::async_trait;
use geocluster_shared::errors::ClusterResult;
use geocluster_shared::status::Status;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

struct D2Mapper {
    strategies: Strategies,
    assignment: NestedGroupCentroidAssignment,
    group_costs: HashMap<String, f64>,
    oversampling: f64,
    seed: i64,
    zoom_level: u32,
    round: u64,
}

impl MapUnit for D2Mapper {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
        let item = self.strategies.wrap(feature);
        let Some((_, distance)) = self.assignment.find_nearest(&item) else {
            return Ok(());
        };
        if distance <= 0.0 {
            return Ok(());
        }
        let group_cost = self.group_costs.get(&item.group_id).copied().unwrap_or(0.0);
        if group_cost <= 0.0 {
            return Ok(());
        }

        let probability = self.oversampling * distance * distance / group_cost;
        let draw = seeded_unit(self.seed, self.zoom_level, self.round, &item.id);
        if draw < probability {
            let candidate = Candidate {
                id: item.id,
                coordinate: item.coordinate,
                rank: draw,
            };
            ctx.emit(item.group_id, serde_json::to_value(candidate)?);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RankSamplerJob {
    target: JobTarget,
    round: AtomicU64,
    sampled: AtomicUsize,
    pool_size: AtomicUsize,
}

impl RankSamplerJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Growth round the next run draws for; rounds draw independently.
    pub fn set_round(&self, round: u64) {
        self.round.store(round, Ordering::SeqCst);
    }

    /// Centroids added by the last run.
    pub fn sampled_count(&self) -> usize {
        self.sampled.load(Ordering::SeqCst)
    }

    /// Level pool size once the last run's draw was added.
    pub fn pool_size(&self) -> usize {
        self.pool_size.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for RankSamplerJob {
    fn name(&self) -> &str {
        "rank_sampler"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        centroid::fill_options(schema);
        schema
            .optional(keys::common::INPUT_LOCATION, "items to sample from")
            .optional(keys::common::DISTANCE_FN, "distance function")
            .optional(keys::sample::SIZE, "sample budget across all growth rounds")
            .optional(keys::sample::ITERATIONS, "number of growth rounds")
            .optional(keys::sample::SEED, "seed for the sample draws");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        let zoom_level = job_start(stage, &self.target, ctx)?;
        run_rank_sampler(self, env, ctx, zoom_level)
            .await
            .inspect_err(|e| log_job_error(stage, zoom_level, e))
    }
}

impl ClusteringAlgorithm for RankSamplerJob {
    fn set_zoom_level(&self, zoom_level: u32) {
        self.target.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        self.target.set_input_location(location);
    }
}

async fn run_rank_sampler(
    job: &RankSamplerJob,
    env: &ClusterEnv,
    ctx: &RunContext,
    zoom_level: u32,
) -> ClusterResult<Status> {
    let input = job.target.input_location(ctx)?;
    let strategies = ctx.strategies()?;
    let scope = centroid_scope(ctx)?;
    let seed = ctx.get_int(keys::sample::SEED, 0)?;
    let rounds = ctx
        .get_count(
            keys::sample::ITERATIONS,
            keys::sample::DEFAULT_ITERATIONS as usize,
        )?
        .max(1);
    let sample_size = ctx.get_count(
        keys::sample::SIZE,
        ctx.get_count(
            keys::sample::MAX_SIZE,
            keys::sample::DEFAULT_MAX_SIZE as usize,
        )?,
    )?;
    let oversampling = (sample_size as f64 / rounds as f64).max(1.0);
    let round = job.round.load(Ordering::SeqCst);

    let centroids = env.centroids.centroids(&scope, zoom_level)?;
    let mut group_costs: HashMap<String, f64> = HashMap::new();
    for centroid in &centroids {
        *group_costs.entry(centroid.group_id.clone()).or_default() += centroid.cost;
    }
    let before = centroids.len();
    let assignment =
        NestedGroupCentroidAssignment::from_centroids(centroids, Arc::clone(&strategies.distance));

    let reducer = Arc::new(CandidateReducer::new(None, zoom_level, scope.batch_id.clone()));
    let spec = JobSpec::new(
        format!("rank-sampler-{}-{}", zoom_level, round),
        input,
        Arc::new(D2Mapper {
            strategies,
            assignment,
            group_costs,
            oversampling,
            seed,
            zoom_level,
            round,
        }),
    )
    .with_reducer(reducer.clone(), max_reducers(ctx)?);

    let status = env.engine.submit(spec).await?;
    if !status.is_success() {
        return Ok(status);
    }

    let sampled = reducer.take();
    env.centroids.add(&scope, &sampled)?;
    let after = env.centroids.count(&scope, zoom_level)?;
    job.sampled.store(sampled.len(), Ordering::SeqCst);
    job.pool_size.store(after, Ordering::SeqCst);
    tracing::debug!(zoom_level, round, before, after, sampled = sampled.len(), oversampling, "Growth sample drawn");
    Ok(status)
}
