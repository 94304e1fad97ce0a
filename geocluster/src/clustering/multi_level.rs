//! Multi-level clustering.
//!
//! ## State machine
//!
//! ```text
//! Extract → for level in 1..=Z { Cluster(level) → [AssignGroups(level)] → Hull(level) } → Done
//! ```
//!
//! Every level's output location is derived from the namespace and level and
//! removed before the level runs, so re-running with the same configuration
//! regenerates it from scratch. The first non-success status ends the run in
//! `Failed(status)`.

use super::jobs::{ConvexHullJob, ExtractJob, GroupAssignmentJob};
use super::kmeans_parallel::prepare_context;
use super::{ClusteringAlgorithm, KMeansParallelRunner};
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::ClusterEnv;
use crate::pipeline::{ExecutionPlan, PipelineController, PostStageHook, SharedStage, Stage};
use crate::types::Location;
use async_trait::async_trait;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    Extract,
    Cluster(u32),
    AssignGroups(u32),
    Hull(u32),
    Done,
    Failed(Status),
}

/// Runs a clustering algorithm as a stage of a level plan.
struct ClusterStage(Arc<dyn ClusteringAlgorithm>);

#[async_trait]
impl Stage for ClusterStage {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        self.0.fill_options(schema);
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        self.0.execute(env, ctx).await
    }
}

pub struct MultiLevelClusteringRunner {
    algorithm: Arc<dyn ClusteringAlgorithm>,
    extract: Arc<ExtractJob>,
    assign: Arc<GroupAssignmentJob>,
    hull: Arc<ConvexHullJob>,
    trace: Mutex<Vec<LevelState>>,
}

impl MultiLevelClusteringRunner {
    pub fn new(algorithm: Arc<dyn ClusteringAlgorithm>) -> Self {
        Self {
            algorithm,
            extract: Arc::new(ExtractJob::new()),
            assign: Arc::new(GroupAssignmentJob::new()),
            hull: Arc::new(ConvexHullJob::new()),
            trace: Mutex::new(Vec::new()),
        }
    }

    /// Multi-level runner clustering each level with k-means||.
    pub fn kmeans_parallel() -> Self {
        Self::new(Arc::new(KMeansParallelRunner::new()))
    }

    /// States visited by the last run, in order.
    pub fn trace(&self) -> Vec<LevelState> {
        self.trace.lock().clone()
    }

    fn record(&self, state: LevelState) {
        tracing::debug!(state = ?state, "Multi-level transition");
        self.trace.lock().push(state);
    }

    fn fail(&self, status: Status) -> Status {
        self.record(LevelState::Failed(status));
        tracing::warn!(status = %status, "Multi-level clustering stopped");
        status
    }

    fn extract_plan(&self) -> ClusterResult<ExecutionPlan> {
        let extract = Arc::clone(&self.extract);
        ExecutionPlan::new(
            vec![self.extract.clone() as SharedStage],
            vec![PostStageHook::new(move |_, _, ctx| {
                let output = extract
                    .output_location()
                    .ok_or_else(|| ClusterError::Internal("extract produced no output".into()))?;
                ctx.set(keys::common::INPUT_LOCATION, output);
                Ok(())
            })],
        )
    }

    fn level_plan(&self, level: u32, retain: bool) -> ClusterResult<(ExecutionPlan, Vec<LevelState>)> {
        let mut stages: Vec<SharedStage> = vec![Arc::new(ClusterStage(Arc::clone(&self.algorithm)))];
        let mut hooks = vec![PostStageHook::noop()];
        let mut states = vec![LevelState::Cluster(level)];

        if retain {
            let assign = Arc::clone(&self.assign);
            stages.push(self.assign.clone());
            // the next level clusters within the groups just assigned
            hooks.push(PostStageHook::new(move |_, _, ctx| {
                let output = assign.output_location().ok_or_else(|| {
                    ClusterError::Internal("group assignment has no output location".into())
                })?;
                ctx.set(keys::common::INPUT_LOCATION, output);
                Ok(())
            }));
            states.push(LevelState::AssignGroups(level));
        }

        stages.push(self.hull.clone());
        hooks.push(PostStageHook::noop());
        states.push(LevelState::Hull(level));

        Ok((ExecutionPlan::new(stages, hooks)?, states))
    }

    fn level_stages(&self) -> [Arc<dyn ClusteringAlgorithm>; 3] {
        [
            Arc::clone(&self.algorithm),
            self.assign.clone(),
            self.hull.clone(),
        ]
    }
}

impl std::fmt::Debug for MultiLevelClusteringRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiLevelClusteringRunner")
            .field("algorithm", &self.algorithm.name())
            .field("trace", &self.trace())
            .finish()
    }
}

#[async_trait]
impl Stage for MultiLevelClusteringRunner {
    fn name(&self) -> &str {
        "multi_level_clustering"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        self.extract.fill_options(schema);
        self.algorithm.fill_options(schema);
        self.assign.fill_options(schema);
        self.hull.fill_options(schema);
        schema
            .optional(keys::clustering::ZOOM_LEVELS, "number of levels to build")
            .optional(
                keys::clustering::RETAIN_GROUP_ASSIGNMENTS,
                "cluster each level within the groups of the level above",
            )
            .remove(keys::common::INPUT_LOCATION)
            .remove(keys::centroid::ZOOM_LEVEL);
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        self.trace.lock().clear();
        prepare_context(ctx)?;

        let mut schema = OptionSchema::new();
        self.fill_options(&mut schema);
        schema.validate(ctx)?;

        let zoom_levels = ctx.get_count(keys::clustering::ZOOM_LEVELS, 1)?;
        let zoom_levels = u32::try_from(zoom_levels).map_err(|_| {
            ClusterError::Config(format!(
                "'{}' is too large: {}",
                keys::clustering::ZOOM_LEVELS,
                zoom_levels
            ))
        })?;
        let retain = ctx.get_bool(keys::clustering::RETAIN_GROUP_ASSIGNMENTS, false)?;
        let namespace = ctx.require_str(keys::global::NAMESPACE)?;
        let base = ctx.get_location(keys::global::BASE_DIR, keys::global::DEFAULT_BASE_DIR)?;
        tracing::info!(
            batch_id = %ctx.require_str(keys::global::BATCH_ID)?,
            namespace = %namespace,
            zoom_levels,
            retain,
            "Starting multi-level clustering"
        );

        let mut controller = PipelineController::new();

        self.record(LevelState::Extract);
        controller.init(self.extract_plan()?);
        let status = controller.run(env, ctx).await?;
        if !status.is_success() {
            return Ok(self.fail(status));
        }

        for level in 1..=zoom_levels {
            let input = ctx.require_location(keys::common::INPUT_LOCATION)?;
            let output = Location::level_output(&base, &namespace, level);
            if env.store.exists(&output)? {
                let removed = env.store.delete_recursive(&output)?;
                tracing::info!(level, output = %output, removed, "Removed previous level output");
            }

            ctx.set(keys::centroid::ZOOM_LEVEL, level);
            for stage in self.level_stages() {
                stage.set_zoom_level(level);
                stage.set_input_location(input.clone());
            }
            self.assign.set_output_location(output);

            let (plan, states) = self.level_plan(level, retain)?;
            controller.init(plan);
            let metrics = controller.run_with_metrics(env, ctx).await?;
            for (_, state) in metrics.stages.iter().zip(states) {
                self.record(state);
            }
            if !metrics.status.is_success() {
                return Ok(self.fail(metrics.status));
            }
            tracing::info!(level, input = %input, hulls = self.hull.hull_count(), "Level complete");
        }

        self.record(LevelState::Done);
        Ok(Status::SUCCESS)
    }
}
