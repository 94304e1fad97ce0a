//! Multi-level k-means|| clustering over a partitioned feature store.
//!
//! A run extracts raw features, then builds one clustering level per zoom
//! level: scalable sampling of candidate centroids, a final strip, Lloyd
//! refinement, optional group reassignment and one convex hull per centroid.
//! Every stage is driven by a [`PipelineController`] over immutable
//! [`ExecutionPlan`]s and reports a [`Status`].

pub mod centroid;
pub mod clustering;
pub mod context;
pub mod db;
pub mod engine;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod strategy;
pub mod types;

pub use geocluster_shared::{ClusterError, ClusterResult, Status};

pub use clustering::{
    ClusteringAlgorithm, KMeansParallelRunner, LevelState, MultiLevelClusteringRunner,
    SampleMultipleSetsRunner,
};
pub use context::{OptionSchema, RunContext};
pub use db::Database;
pub use engine::{ClusterEnv, ComputeEngine, LocalEngine};
pub use pipeline::{ExecutionPlan, PipelineController, PipelineMetrics, PostStageHook, Stage};
pub use types::{Centroid, Feature, Geometry, HullRecord, Location, Scope};
