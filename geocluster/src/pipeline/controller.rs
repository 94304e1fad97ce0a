//! Sequential pipeline controller.

use super::metrics::{PipelineMetrics, StageMetrics};
use super::stage::{PostStageHook, SharedStage};
use crate::context::{OptionSchema, RunContext};
use crate::engine::ClusterEnv;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use geocluster_shared::status::Status;
use std::time::Instant;

/// Ordered (stage, hook) pairs for one phase of work.
#[derive(Clone)]
pub struct ExecutionPlan {
    steps: Vec<(SharedStage, PostStageHook)>,
}

impl ExecutionPlan {
    /// Pair `stages[i]` with `hooks[i]`. Both lists must have equal length.
    pub fn new(stages: Vec<SharedStage>, hooks: Vec<PostStageHook>) -> ClusterResult<Self> {
        if stages.len() != hooks.len() {
            return Err(ClusterError::Internal(format!(
                "pipeline has {} stages but {} hooks",
                stages.len(),
                hooks.len()
            )));
        }
        Ok(Self {
            steps: stages.into_iter().zip(hooks).collect(),
        })
    }

    /// Plan whose stages have nothing to propagate.
    pub fn without_hooks(stages: Vec<SharedStage>) -> Self {
        Self {
            steps: stages
                .into_iter()
                .map(|stage| (stage, PostStageHook::noop()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|(stage, _)| stage.name().to_string())
            .collect()
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Runs the installed plan one stage at a time.
///
/// After each stage the returned status is checked: a non-success status is
/// returned immediately and neither that stage's hook nor any later stage
/// runs. `init` may be called again to switch to a different plan.
#[derive(Debug, Default)]
pub struct PipelineController {
    plan: Option<ExecutionPlan>,
}

impl PipelineController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, plan: ExecutionPlan) {
        self.plan = Some(plan);
    }

    /// Union of the option sets of every installed stage.
    pub fn fill_options(&self, schema: &mut OptionSchema) {
        if let Some(plan) = &self.plan {
            for (stage, _) in &plan.steps {
                stage.fill_options(schema);
            }
        }
    }

    pub async fn run(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        Ok(self.run_with_metrics(env, ctx).await?.status)
    }

    pub async fn run_with_metrics(
        &self,
        env: &ClusterEnv,
        ctx: &mut RunContext,
    ) -> ClusterResult<PipelineMetrics> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| ClusterError::Internal("pipeline controller not initialized".into()))?;

        let total_start = Instant::now();
        let mut stages = Vec::with_capacity(plan.len());
        let mut status = Status::SUCCESS;

        for (index, (stage, hook)) in plan.steps.iter().enumerate() {
            let stage_start = Instant::now();
            let stage_status = stage.execute(env, ctx).await?;

            stages.push(StageMetrics {
                index,
                name: stage.name().to_string(),
                status: stage_status,
                duration_ms: stage_start.elapsed().as_millis(),
            });

            if !stage_status.is_success() {
                tracing::debug!(stage = stage.name(), index, status = %stage_status, "Stage stopped the pipeline");
                status = stage_status;
                break;
            }

            hook.call(env, stage.as_ref(), ctx)?;
        }

        let metrics = PipelineMetrics {
            status,
            total_duration_ms: total_start.elapsed().as_millis(),
            stages,
        };
        tracing::debug!(
            status = %metrics.status,
            stages = ?metrics.executed(),
            duration_ms = metrics.total_duration_ms as u64,
            "Pipeline finished"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::pipeline::Stage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        name: String,
        status: Status,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Stage for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn fill_options(&self, schema: &mut OptionSchema) {
            schema.optional("test.key", "recorded");
        }

        async fn execute(&self, _env: &ClusterEnv, _ctx: &mut RunContext) -> ClusterResult<Status> {
            self.log.lock().push(self.name.clone());
            Ok(self.status)
        }
    }

    fn recorder(name: &str, status: i32, log: &Arc<Mutex<Vec<String>>>) -> SharedStage {
        Arc::new(Recorder {
            name: name.to_string(),
            status: Status::new(status),
            log: Arc::clone(log),
        })
    }

    fn counting_hook(counter: &Arc<AtomicUsize>) -> PostStageHook {
        let counter = Arc::clone(counter);
        PostStageHook::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn env() -> ClusterEnv {
        ClusterEnv::local(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_plan_rejects_mismatched_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = ExecutionPlan::new(vec![recorder("a", 0, &log)], vec![]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_runs_all_stages_and_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = Arc::new(AtomicUsize::new(0));
        let mut controller = PipelineController::new();
        controller.init(
            ExecutionPlan::new(
                vec![recorder("a", 0, &log), recorder("b", 0, &log)],
                vec![counting_hook(&hooks), counting_hook(&hooks)],
            )
            .unwrap(),
        );

        let metrics = controller
            .run_with_metrics(&env(), &mut RunContext::new())
            .await
            .unwrap();
        assert_eq!(metrics.status, Status::SUCCESS);
        assert_eq!(metrics.executed(), vec!["a", "b"]);
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hook_sees_completed_stage_and_context() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut controller = PipelineController::new();
        let hook = PostStageHook::new(|_, stage, ctx| {
            ctx.set("test.after", stage.name());
            Ok(())
        });
        controller.init(ExecutionPlan::new(vec![recorder("a", 0, &log)], vec![hook]).unwrap());

        let mut ctx = RunContext::new();
        controller.run(&env(), &mut ctx).await.unwrap();
        assert_eq!(ctx.get_str("test.after", "").unwrap(), "a");
    }

    #[tokio::test]
    async fn test_reinit_switches_plan() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut controller = PipelineController::new();
        controller.init(ExecutionPlan::without_hooks(vec![recorder("first", 0, &log)]));
        controller.run(&env(), &mut RunContext::new()).await.unwrap();
        controller.init(ExecutionPlan::without_hooks(vec![recorder("second", 0, &log)]));
        controller.run(&env(), &mut RunContext::new()).await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_uninitialized_controller_errors() {
        let controller = PipelineController::new();
        assert!(controller.run(&env(), &mut RunContext::new()).await.is_err());
    }

    #[test]
    fn test_fill_options_collects_stage_keys() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut controller = PipelineController::new();
        controller.init(ExecutionPlan::without_hooks(vec![recorder("a", 0, &log)]));
        let mut schema = OptionSchema::default();
        controller.fill_options(&mut schema);
        assert!(schema.contains("test.key"));
    }
}
