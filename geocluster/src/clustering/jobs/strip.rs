//! Job: strip weak centroids.
//!
//! Counts the items nearest to each centroid, then trims every group that
//! holds more than `max` centroids down to its `max` best-supported ones.
//! Groups at or under `max` are left alone, so a pool below `min` never
//! shrinks further.

use super::{JobTarget, job_start, log_job_error, max_reducers};
use crate::centroid::{self, NestedGroupCentroidAssignment, centroid_scope};
use crate::clustering::ClusteringAlgorithm;
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::{ClusterEnv, JobSpec, MapContext, MapUnit, ReduceContext, ReduceUnit};
use crate::pipeline::Stage;
use crate::strategy::Strategies;
use crate::types::{Centroid, Feature, Location};
use async_trait::async_trait;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct SupportMapper {
    strategies: Strategies,
    assignment: NestedGroupCentroidAssignment,
}

impl MapUnit for SupportMapper {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
        let item = self.strategies.wrap(feature);
        if let Some((nearest, _)) = self.assignment.find_nearest(&item) {
            ctx.emit(nearest.id.clone(), json!(1));
        }
        Ok(())
    }
}

#[derive(Default)]
struct SupportReducer {
    sink: Mutex<HashMap<String, u64>>,
}

impl ReduceUnit for SupportReducer {
    fn reduce(&self, centroid_id: &str, values: Vec<Value>, _ctx: &mut ReduceContext) -> ClusterResult<()> {
        self.sink
            .lock()
            .insert(centroid_id.to_string(), values.len() as u64);
        Ok(())
    }
}

/// Ids to drop from one group so at most `max` remain.
///
/// Best-supported centroids are kept; ties go to the smaller id. `min`
/// only matters when it exceeds `max`, which callers reject.
pub(crate) fn weakest(members: &[Centroid], support: &HashMap<String, u64>, min: usize, max: usize) -> Vec<String> {
    let keep = max.max(min);
    if members.len() <= keep {
        return Vec::new();
    }
    let mut ranked: Vec<(&str, u64)> = members
        .iter()
        .map(|c| (c.id.as_str(), support.get(&c.id).copied().unwrap_or(0)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked[keep..].iter().map(|(id, _)| id.to_string()).collect()
}

#[derive(Debug)]
pub struct StripWeakCentroidsJob {
    target: JobTarget,
    min_key: &'static str,
    max_key: &'static str,
    current_count: AtomicUsize,
}

impl Default for StripWeakCentroidsJob {
    fn default() -> Self {
        Self::with_bounds(keys::sample::MIN_SIZE, keys::sample::MAX_SIZE)
    }
}

impl StripWeakCentroidsJob {
    /// Strip bounded by `sample.min_size` / `sample.max_size`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip bounded by other keys. Unset keys fall back to the sample bounds.
    pub fn with_bounds(min_key: &'static str, max_key: &'static str) -> Self {
        Self {
            target: JobTarget::default(),
            min_key,
            max_key,
            current_count: AtomicUsize::new(0),
        }
    }

    /// Centroids left in the level's pool after the last run.
    pub fn current_centroid_count(&self) -> usize {
        self.current_count.load(Ordering::SeqCst)
    }

    pub fn bounds(&self, ctx: &RunContext) -> ClusterResult<(usize, usize)> {
        let min = ctx.get_count(
            self.min_key,
            ctx.get_count(
                keys::sample::MIN_SIZE,
                keys::sample::DEFAULT_MIN_SIZE as usize,
            )?,
        )?;
        let max = ctx.get_count(
            self.max_key,
            ctx.get_count(
                keys::sample::MAX_SIZE,
                keys::sample::DEFAULT_MAX_SIZE as usize,
            )?,
        )?;
        if min > max {
            return Err(ClusterError::Config(format!(
                "{} ({}) exceeds {} ({})",
                self.min_key, min, self.max_key, max
            )));
        }
        Ok((min, max))
    }
}

#[async_trait]
impl Stage for StripWeakCentroidsJob {
    fn name(&self) -> &str {
        "strip_weak_centroids"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        centroid::fill_options(schema);
        schema
            .optional(keys::common::INPUT_LOCATION, "items supporting the centroids")
            .optional(keys::common::DISTANCE_FN, "distance function")
            .optional(self.min_key, "fewest centroids a group is stripped to")
            .optional(self.max_key, "most centroids a group may keep");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        let zoom_level = job_start(stage, &self.target, ctx)?;
        run_strip(self, env, ctx, zoom_level)
            .await
            .inspect_err(|e| log_job_error(stage, zoom_level, e))
    }
}

impl ClusteringAlgorithm for StripWeakCentroidsJob {
    fn set_zoom_level(&self, zoom_level: u32) {
        self.target.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        self.target.set_input_location(location);
    }
}

async fn run_strip(
    job: &StripWeakCentroidsJob,
    env: &ClusterEnv,
    ctx: &RunContext,
    zoom_level: u32,
) -> ClusterResult<Status> {
    let (min, max) = job.bounds(ctx)?;
    let input = job.target.input_location(ctx)?;
    let strategies = ctx.strategies()?;
    let scope = centroid_scope(ctx)?;
    let assignment = NestedGroupCentroidAssignment::load(
        env.centroids.as_ref(),
        &scope,
        zoom_level,
        Arc::clone(&strategies.distance),
    )?;
    let before = assignment.centroid_count();

    let reducer = Arc::new(SupportReducer::default());
    let groups = assignment.clone();
    let spec = JobSpec::new(
        format!("strip-{}", zoom_level),
        input,
        Arc::new(SupportMapper {
            strategies,
            assignment,
        }),
    )
    .with_reducer(reducer.clone(), max_reducers(ctx)?);

    let status = env.engine.submit(spec).await?;
    if !status.is_success() {
        return Ok(status);
    }

    let support = std::mem::take(&mut *reducer.sink.lock());
    let mut removed: Vec<String> = Vec::new();
    for group_id in groups.group_ids() {
        removed.extend(weakest(groups.group(group_id), &support, min, max));
    }
    if !removed.is_empty() {
        env.centroids.remove(&scope, zoom_level, &removed)?;
    }

    let remaining = env.centroids.count(&scope, zoom_level)?;
    job.current_count.store(remaining, Ordering::SeqCst);
    tracing::debug!(zoom_level, min, max, before, removed = removed.len(), remaining, "Weak centroids stripped");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: usize) -> Vec<Centroid> {
        (0..n)
            .map(|i| Centroid {
                id: format!("1-{:02}", i),
                group_id: "root".into(),
                batch_id: "b".into(),
                zoom_level: 1,
                coordinate: vec![i as f64, 0.0],
                cost: 0.0,
                support: 0,
            })
            .collect()
    }

    #[test]
    fn test_group_under_max_is_untouched() {
        let support = HashMap::new();
        assert!(weakest(&members(1), &support, 2, 1000).is_empty());
        assert!(weakest(&members(5), &support, 2, 5).is_empty());
    }

    #[test]
    fn test_keeps_best_supported() {
        let mut support = HashMap::new();
        support.insert("1-00".to_string(), 1);
        support.insert("1-01".to_string(), 9);
        support.insert("1-02".to_string(), 5);
        support.insert("1-03".to_string(), 5);

        let removed = weakest(&members(4), &support, 1, 2);
        assert_eq!(removed, vec!["1-03".to_string(), "1-00".to_string()]);
    }

    #[test]
    fn test_unsupported_centroids_go_first() {
        let mut support = HashMap::new();
        support.insert("1-04".to_string(), 2);
        let removed = weakest(&members(5), &support, 2, 3);
        assert_eq!(removed.len(), 2);
        assert!(!removed.contains(&"1-04".to_string()));
    }

    #[test]
    fn test_bounds_validation() {
        let job = StripWeakCentroidsJob::new();
        let mut ctx = RunContext::new();
        assert_eq!(job.bounds(&ctx).unwrap(), (2, 1000));

        ctx.set(keys::sample::MIN_SIZE, 10i64);
        ctx.set(keys::sample::MAX_SIZE, 3i64);
        assert!(job.bounds(&ctx).is_err());

        let final_strip = StripWeakCentroidsJob::with_bounds(keys::clustering::MIN_K, keys::clustering::MAX_K);
        ctx.set(keys::clustering::MIN_K, 1i64);
        assert_eq!(final_strip.bounds(&ctx).unwrap(), (1, 3));
    }
}
