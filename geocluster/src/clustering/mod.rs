//! Clustering stages and runners.
//!
//! ## Architecture
//!
//! ```text
//! MultiLevelClusteringRunner
//!   1. Extract                       (dedup raw features into the extract location)
//!   for level in 1..=zoom_levels:
//!   2. ClusteringAlgorithm           (KMeansParallelRunner by default)
//!        SampleMultipleSetsRunner
//!          bootstrap: KSampler → UpdateCost → IterationCount
//!          growth ×t: RankSampler → UpdateCost → Strip
//!        Strip (final bounds) → KMeansIterations
//!   3. GroupAssignment               (only when group assignments are retained)
//!   4. ConvexHull
//! ```

pub mod jobs;
mod kmeans_parallel;
mod multi_level;
mod sampler;

pub use kmeans_parallel::KMeansParallelRunner;
pub use multi_level::{LevelState, MultiLevelClusteringRunner};
pub use sampler::{RoundSizes, SampleMultipleSetsRunner};

use crate::pipeline::Stage;
use crate::types::Location;

/// A stage that clusters one level of one input location.
///
/// Options are declared through [`Stage::fill_options`] so a surrounding
/// runner can assemble one combined schema.
pub trait ClusteringAlgorithm: Stage {
    fn set_zoom_level(&self, zoom_level: u32);

    fn set_input_location(&self, location: Location);
}
