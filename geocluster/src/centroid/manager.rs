//! Store-backed centroid manager.

use crate::db::CentroidStore;
use crate::types::{Centroid, Scope};
use geocluster_shared::errors::ClusterResult;

/// Aggregated cost of one centroid after a cost update.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidCost {
    pub id: String,
    pub cost: f64,
    pub support: u64,
}

/// Registry of candidate cluster centers.
///
/// Records live in the store only; every job reloads the level it needs.
pub trait CentroidManager: Send + Sync {
    /// Every centroid of a level, ordered by group then id.
    fn centroids(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<Vec<Centroid>>;

    fn centroids_for_group(
        &self,
        scope: &Scope,
        zoom_level: u32,
        group_id: &str,
    ) -> ClusterResult<Vec<Centroid>>;

    /// Insert or replace by id.
    fn add(&self, scope: &Scope, centroids: &[Centroid]) -> ClusterResult<()>;

    fn remove(&self, scope: &Scope, zoom_level: u32, ids: &[String]) -> ClusterResult<usize>;

    fn clear_level(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<usize>;

    /// Replace cost/support for the level; centroids not listed drop to zero.
    fn update_costs(
        &self,
        scope: &Scope,
        zoom_level: u32,
        costs: &[CentroidCost],
    ) -> ClusterResult<()>;

    fn update_locations(
        &self,
        scope: &Scope,
        zoom_level: u32,
        locations: &[(String, Vec<f64>)],
    ) -> ClusterResult<()>;

    fn count(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<usize>;
}

#[derive(Clone, Debug)]
pub struct StoreCentroidManager {
    store: CentroidStore,
}

impl StoreCentroidManager {
    pub fn new(store: CentroidStore) -> Self {
        Self { store }
    }
}

impl CentroidManager for StoreCentroidManager {
    fn centroids(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<Vec<Centroid>> {
        self.store.list(scope, zoom_level)
    }

    fn centroids_for_group(
        &self,
        scope: &Scope,
        zoom_level: u32,
        group_id: &str,
    ) -> ClusterResult<Vec<Centroid>> {
        self.store.list_group(scope, zoom_level, group_id)
    }

    fn add(&self, scope: &Scope, centroids: &[Centroid]) -> ClusterResult<()> {
        tracing::trace!(batch_id = %scope.batch_id, count = centroids.len(), "Adding centroids");
        self.store.upsert(scope, centroids)
    }

    fn remove(&self, scope: &Scope, zoom_level: u32, ids: &[String]) -> ClusterResult<usize> {
        let removed = self.store.delete(scope, zoom_level, ids)?;
        tracing::debug!(batch_id = %scope.batch_id, zoom_level, removed, "Removed centroids");
        Ok(removed)
    }

    fn clear_level(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<usize> {
        self.store.delete_level(scope, zoom_level)
    }

    fn update_costs(
        &self,
        scope: &Scope,
        zoom_level: u32,
        costs: &[CentroidCost],
    ) -> ClusterResult<()> {
        let updates: Vec<(String, f64, u64)> = costs
            .iter()
            .map(|c| (c.id.clone(), c.cost, c.support))
            .collect();
        self.store.set_costs(scope, zoom_level, &updates)
    }

    fn update_locations(
        &self,
        scope: &Scope,
        zoom_level: u32,
        locations: &[(String, Vec<f64>)],
    ) -> ClusterResult<()> {
        self.store.set_coordinates(scope, zoom_level, locations)
    }

    fn count(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<usize> {
        self.store.count(scope, zoom_level)
    }
}
