//! Job: initial uniform sample.
//!
//! Clears the level's centroid pool, then picks the `sample.initial_size`
//! items with the smallest seeded rank in every group.

use super::{JobTarget, job_start, log_job_error, max_reducers, seeded_unit};
use crate::centroid::{self, centroid_scope};
use crate::clustering::ClusteringAlgorithm;
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::{ClusterEnv, JobSpec, MapContext, MapUnit, ReduceContext, ReduceUnit};
use crate::pipeline::Stage;
use crate::strategy::Strategies;
use crate::types::{Centroid, Feature, Location};
use async_trait::async_trait;
use geocluster_shared::errors::ClusterResult;
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An item proposed as a centroid, shuffled by group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct Candidate {
    pub id: String,
    pub coordinate: Vec<f64>,
    pub rank: f64,
}

/// Turns each group's candidates into centroids, keeping at most `limit` of
/// the lowest-ranked.
pub(super) struct CandidateReducer {
    limit: Option<usize>,
    zoom_level: u32,
    batch_id: String,
    sink: Mutex<Vec<Centroid>>,
}

impl CandidateReducer {
    pub(super) fn new(limit: Option<usize>, zoom_level: u32, batch_id: String) -> Self {
        Self {
            limit,
            zoom_level,
            batch_id,
            sink: Mutex::new(Vec::new()),
        }
    }

    /// Centroids collected so far, ordered by id.
    pub(super) fn take(&self) -> Vec<Centroid> {
        let mut centroids = std::mem::take(&mut *self.sink.lock());
        centroids.sort_by(|a, b| a.id.cmp(&b.id));
        centroids
    }
}

impl ReduceUnit for CandidateReducer {
    fn reduce(&self, group_id: &str, values: Vec<Value>, _ctx: &mut ReduceContext) -> ClusterResult<()> {
        let mut candidates = values
            .into_iter()
            .map(serde_json::from_value::<Candidate>)
            .collect::<Result<Vec<_>, _>>()?;
        candidates.sort_by(|a, b| a.rank.total_cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = self.limit {
            candidates.truncate(limit);
        }

        let mut sink = self.sink.lock();
        sink.extend(candidates.into_iter().map(|candidate| Centroid {
            id: Centroid::id_for(self.zoom_level, &candidate.id),
            group_id: group_id.to_string(),
            batch_id: self.batch_id.clone(),
            zoom_level: self.zoom_level,
            coordinate: candidate.coordinate,
            cost: 0.0,
            support: 0,
        }));
        Ok(())
    }
}

struct RankMapper {
    strategies: Strategies,
    seed: i64,
    zoom_level: u32,
}

impl MapUnit for RankMapper {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
        let item = self.strategies.wrap(feature);
        let rank = seeded_unit(self.seed, self.zoom_level, 0, &item.id);
        let candidate = Candidate {
            id: item.id,
            coordinate: item.coordinate,
            rank,
        };
        ctx.emit(item.group_id, serde_json::to_value(candidate)?);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct KSamplerJob {
    target: JobTarget,
    sampled: AtomicUsize,
}

impl KSamplerJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Centroids drawn by the last run.
    pub fn sampled_count(&self) -> usize {
        self.sampled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for KSamplerJob {
    fn name(&self) -> &str {
        "ksampler"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        centroid::fill_options(schema);
        schema
            .optional(keys::common::INPUT_LOCATION, "items to sample from")
            .optional(keys::centroid::ZOOM_LEVEL, "level the centroids belong to")
            .optional(keys::sample::INITIAL_SIZE, "items drawn per group")
            .optional(keys::sample::SEED, "seed for the sample ranks");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        let zoom_level = job_start(stage, &self.target, ctx)?;
        run_ksampler(self, env, ctx, zoom_level)
            .await
            .inspect_err(|e| log_job_error(stage, zoom_level, e))
    }
}

impl ClusteringAlgorithm for KSamplerJob {
    fn set_zoom_level(&self, zoom_level: u32) {
        self.target.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        self.target.set_input_location(location);
    }
}

async fn run_ksampler(
    job: &KSamplerJob,
    env: &ClusterEnv,
    ctx: &RunContext,
    zoom_level: u32,
) -> ClusterResult<Status> {
    let input = job.target.input_location(ctx)?;
    let strategies = ctx.strategies()?;
    let scope = centroid_scope(ctx)?;
    let per_group = ctx.get_count(
        keys::sample::INITIAL_SIZE,
        keys::sample::DEFAULT_INITIAL_SIZE as usize,
    )?;
    let seed = ctx.get_int(keys::sample::SEED, 0)?;

    let cleared = env.centroids.clear_level(&scope, zoom_level)?;
    if cleared > 0 {
        tracing::debug!(zoom_level, cleared, "Cleared previous centroid pool");
    }

    let reducer = Arc::new(CandidateReducer::new(
        Some(per_group),
        zoom_level,
        scope.batch_id.clone(),
    ));
    let spec = JobSpec::new(
        format!("ksampler-{}", zoom_level),
        input,
        Arc::new(RankMapper {
            strategies,
            seed,
            zoom_level,
        }),
    )
    .with_reducer(reducer.clone(), max_reducers(ctx)?);

    let status = env.engine.submit(spec).await?;
    if !status.is_success() {
        return Ok(status);
    }

    let centroids = reducer.take();
    env.centroids.add(&scope, &centroids)?;
    job.sampled.store(centroids.len(), Ordering::SeqCst);
    tracing::info!(zoom_level, sampled = centroids.len(), "Initial sample drawn");
    Ok(status)
}
