//! Stage and post-stage hook definitions.

use crate::context::{OptionSchema, RunContext};
use crate::engine::ClusterEnv;
use async_trait::async_trait;
use geocluster_shared::errors::ClusterResult;
use geocluster_shared::status::Status;
use std::sync::Arc;

/// One unit of work in a pipeline.
///
/// Stages are shared (`Arc<dyn Stage>`) so hooks can hold onto them; anything
/// a hook reconfigures lives behind interior mutability.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Human-readable stage name for logging and metrics.
    fn name(&self) -> &str;

    /// Declare the configuration keys this stage reads.
    fn fill_options(&self, schema: &mut OptionSchema);

    /// Run the stage. A non-success status stops the enclosing pipeline.
    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status>;
}

pub type SharedStage = Arc<dyn Stage>;

type HookFn = dyn Fn(&ClusterEnv, &dyn Stage, &mut RunContext) -> ClusterResult<()> + Send + Sync;

/// Callback run after a stage succeeds, before the next stage starts.
///
/// Hooks read whatever the completed stage exposes through its getters and
/// may write the context or reconfigure stages that have not run yet.
#[derive(Clone)]
pub struct PostStageHook {
    f: Arc<HookFn>,
}

impl PostStageHook {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ClusterEnv, &dyn Stage, &mut RunContext) -> ClusterResult<()> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn noop() -> Self {
        Self::new(|_, _, _| Ok(()))
    }

    pub fn call(&self, env: &ClusterEnv, stage: &dyn Stage, ctx: &mut RunContext) -> ClusterResult<()> {
        (self.f)(env, stage, ctx)
    }
}

impl Default for PostStageHook {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for PostStageHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PostStageHook")
    }
}
