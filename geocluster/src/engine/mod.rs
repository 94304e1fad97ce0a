//! Compute engine boundary.
//!
//! Stages never touch partitioned data directly: they describe a job (input,
//! output, map unit, optional aggregate unit and its parallelism) and submit
//! it. [`ClusterEnv`] is the handle stages and hooks receive; it bundles the
//! engine with the stores the jobs read and write.

mod job;
mod local;

pub use job::{JobSpec, MapContext, MapUnit, ReduceContext, ReduceUnit};
pub use local::LocalEngine;

use crate::centroid::{CentroidManager, StoreCentroidManager};
use crate::db::{CentroidStore, Database, FeatureStore, HullStore};
use async_trait::async_trait;
use geocluster_shared::errors::ClusterResult;
use geocluster_shared::status::Status;
use std::sync::Arc;

/// Executes one job to completion.
///
/// A failure inside a map or aggregate unit is reported as a non-success
/// status; `Err` is reserved for the engine being unable to run the job at
/// all (store unavailable, worker lost).
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    async fn submit(&self, job: JobSpec) -> ClusterResult<Status>;
}

#[derive(Clone)]
pub struct ClusterEnv {
    pub engine: Arc<dyn ComputeEngine>,
    pub store: Arc<dyn FeatureStore>,
    pub centroids: Arc<dyn CentroidManager>,
    pub hulls: HullStore,
}

impl ClusterEnv {
    pub fn new(
        engine: Arc<dyn ComputeEngine>,
        store: Arc<dyn FeatureStore>,
        centroids: Arc<dyn CentroidManager>,
        hulls: HullStore,
    ) -> Self {
        Self {
            engine,
            store,
            centroids,
            hulls,
        }
    }

    /// In-process engine and every store on one database.
    pub fn local(db: Database) -> Self {
        let store: Arc<dyn FeatureStore> = Arc::new(db.clone());
        Self {
            engine: Arc::new(LocalEngine::new(Arc::clone(&store))),
            store,
            centroids: Arc::new(StoreCentroidManager::new(CentroidStore::new(db.clone()))),
            hulls: HullStore::new(db),
        }
    }
}

impl std::fmt::Debug for ClusterEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEnv").finish_non_exhaustive()
    }
}
