//! Stage sequencing with post-stage hooks.
//!
//! ## Architecture
//!
//! ```text
//! PipelineController → ExecutionPlan → (Stage, PostStageHook)*
//!
//! - Controller: runs the installed plan in order, stops on the first
//!   non-success status
//! - Plan: immutable list of stages paired with the hook that runs after each
//! - Hook: reads the finished stage's getters, writes the RunContext or
//!   reconfigures a stage that has not run yet
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let mut controller = PipelineController::new();
//! controller.init(ExecutionPlan::new(
//!     vec![strip.clone(), kmeans.clone()],
//!     vec![
//!         PostStageHook::new(move |_, _, _| {
//!             kmeans.set_reducer_count(strip.current_centroid_count());
//!             Ok(())
//!         }),
//!         PostStageHook::noop(),
//!     ],
//! )?);
//! let status = controller.run(&env, &mut ctx).await?;
//! ```

mod controller;
mod metrics;
mod stage;

pub use controller::{ExecutionPlan, PipelineController};
pub use metrics::{PipelineMetrics, StageMetrics};
pub use stage::{PostStageHook, SharedStage, Stage};
