//! Centroid pool management.

mod assignment;
mod manager;

pub use assignment::NestedGroupCentroidAssignment;
pub use manager::{CentroidCost, CentroidManager, StoreCentroidManager};

use crate::context::{OptionSchema, RunContext, keys};
use crate::types::Scope;
use geocluster_shared::errors::ClusterResult;

/// Scope of the centroid records for the current run.
pub fn centroid_scope(ctx: &RunContext) -> ClusterResult<Scope> {
    Ok(Scope::new(
        ctx.get_str(
            keys::centroid::DATA_TYPE_ID,
            keys::extract::DEFAULT_OUTPUT_DATA_TYPE_ID,
        )?,
        ctx.get_str(keys::centroid::INDEX_ID, keys::centroid::DEFAULT_INDEX_ID)?,
        ctx.require_str(keys::global::BATCH_ID)?,
    ))
}

/// Keys read by [`centroid_scope`].
pub fn fill_options(schema: &mut OptionSchema) {
    schema
        .optional(keys::centroid::DATA_TYPE_ID, "data type of centroid records")
        .optional(keys::centroid::INDEX_ID, "index of centroid records")
        .optional(keys::global::BATCH_ID, "batch id scoping this run's records");
}
