//! Job: compute the number of growth rounds from the total cost.

use super::{JobTarget, job_start, log_job_error};
use crate::centroid::{self, centroid_scope};
use crate::clustering::ClusteringAlgorithm;
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::ClusterEnv;
use crate::pipeline::Stage;
use crate::types::Location;
use async_trait::async_trait;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Growth round count as a function of total cost ψ.
///
/// `t = max(minimum, ⌈log_base ψ⌉)`, and `minimum` whenever `ψ ≤ 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationPolicy {
    log_base: f64,
    minimum: usize,
}

impl IterationPolicy {
    pub fn new(log_base: f64, minimum: usize) -> ClusterResult<Self> {
        if log_base <= 1.0 || !log_base.is_finite() {
            return Err(ClusterError::Config(format!(
                "{} must be a finite number greater than 1, got {}",
                keys::sample::LOG_BASE,
                log_base
            )));
        }
        Ok(Self { log_base, minimum })
    }

    pub fn from_context(ctx: &RunContext) -> ClusterResult<Self> {
        Self::new(
            ctx.get_float(keys::sample::LOG_BASE, std::f64::consts::E)?,
            ctx.get_count(
                keys::sample::ITERATIONS,
                keys::sample::DEFAULT_ITERATIONS as usize,
            )?,
        )
    }

    pub fn minimum(&self) -> usize {
        self.minimum
    }

    pub fn iterations(&self, total_cost: f64) -> usize {
        if total_cost.is_nan() || total_cost <= 1.0 {
            return self.minimum;
        }
        let psi = total_cost.min(f64::MAX);
        let rounds = (psi.ln() / self.log_base.ln()).ceil() as usize;
        rounds.max(self.minimum)
    }
}

#[derive(Debug, Default)]
pub struct IterationCountJob {
    target: JobTarget,
    iterations: AtomicUsize,
    total_cost: Mutex<f64>,
}

impl IterationCountJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Growth rounds computed by the last run.
    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::SeqCst)
    }

    /// Largest per-group total cost seen by the last run.
    pub fn total_cost(&self) -> f64 {
        *self.total_cost.lock()
    }
}

#[async_trait]
impl Stage for IterationCountJob {
    fn name(&self) -> &str {
        "iteration_count"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        centroid::fill_options(schema);
        schema
            .optional(keys::sample::ITERATIONS, "minimum number of growth rounds")
            .optional(keys::sample::LOG_BASE, "logarithm base of the round count");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        let zoom_level = job_start(stage, &self.target, ctx)?;
        count_iterations(self, env, ctx, zoom_level).inspect_err(|e| log_job_error(stage, zoom_level, e))
    }
}

impl ClusteringAlgorithm for IterationCountJob {
    fn set_zoom_level(&self, zoom_level: u32) {
        self.target.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        self.target.set_input_location(location);
    }
}

fn count_iterations(
    job: &IterationCountJob,
    env: &ClusterEnv,
    ctx: &RunContext,
    zoom_level: u32,
) -> ClusterResult<Status> {
    let policy = IterationPolicy::from_context(ctx)?;
    let scope = centroid_scope(ctx)?;

    // groups are sampled independently, so the costliest one bounds the rounds
    let mut group_costs: BTreeMap<String, f64> = BTreeMap::new();
    for centroid in env.centroids.centroids(&scope, zoom_level)? {
        *group_costs.entry(centroid.group_id).or_default() += centroid.cost;
    }
    let psi = group_costs.values().copied().fold(0.0, f64::max);
    let iterations = policy.iterations(psi);

    *job.total_cost.lock() = psi;
    job.iterations.store(iterations, Ordering::SeqCst);
    tracing::info!(zoom_level, total_cost = psi, groups = group_costs.len(), iterations, "Growth rounds computed");
    Ok(Status::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_cost_uses_minimum() {
        let policy = IterationPolicy::new(std::f64::consts::E, 3).unwrap();
        assert_eq!(policy.iterations(0.0), 3);
        assert_eq!(policy.iterations(1.0), 3);
        assert_eq!(policy.iterations(f64::NAN), 3);
    }

    #[test]
    fn test_rounds_are_ceiling_of_log() {
        let policy = IterationPolicy::new(10.0, 1).unwrap();
        assert_eq!(policy.iterations(10.0), 1);
        assert_eq!(policy.iterations(11.0), 2);
        assert_eq!(policy.iterations(999.0), 3);
    }

    #[test]
    fn test_non_decreasing_in_cost() {
        let policy = IterationPolicy::new(2.0, 2).unwrap();
        let mut last = 0;
        for cost in [0.5, 1.0, 3.0, 9.0, 100.0, 1e6, 1e300, f64::INFINITY] {
            let t = policy.iterations(cost);
            assert!(t >= last);
            assert!(t >= policy.minimum());
            last = t;
        }
    }

    #[test]
    fn test_invalid_base_rejected() {
        assert!(IterationPolicy::new(1.0, 1).is_err());
        assert!(IterationPolicy::new(0.5, 1).is_err());
    }

    #[test]
    fn test_policy_from_context() {
        let mut ctx = RunContext::new();
        ctx.set(keys::sample::ITERATIONS, 4i64);
        ctx.set(keys::sample::LOG_BASE, 2.0);
        let policy = IterationPolicy::from_context(&ctx).unwrap();
        assert_eq!(policy.minimum(), 4);
        assert_eq!(policy.iterations(1000.0), 10);
    }
}
