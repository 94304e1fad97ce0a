//! Nearest-centroid lookup scoped to an item's group.

use super::CentroidManager;
use crate::strategy::{AnalyticItem, DistanceFn};
use crate::types::{Centroid, Scope};
use geocluster_shared::errors::ClusterResult;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable snapshot of one level's centroids, bucketed by group.
///
/// Lookups never cross groups: an item whose group has no centroid at this
/// level has no nearest centroid.
#[derive(Clone)]
pub struct NestedGroupCentroidAssignment {
    groups: BTreeMap<String, Vec<Centroid>>,
    distance: Arc<dyn DistanceFn>,
}

impl NestedGroupCentroidAssignment {
    pub fn load(
        manager: &dyn CentroidManager,
        scope: &Scope,
        zoom_level: u32,
        distance: Arc<dyn DistanceFn>,
    ) -> ClusterResult<Self> {
        let centroids = manager.centroids(scope, zoom_level)?;
        Ok(Self::from_centroids(centroids, distance))
    }

    pub fn from_centroids(centroids: Vec<Centroid>, distance: Arc<dyn DistanceFn>) -> Self {
        let mut groups: BTreeMap<String, Vec<Centroid>> = BTreeMap::new();
        for centroid in centroids {
            groups
                .entry(centroid.group_id.clone())
                .or_default()
                .push(centroid);
        }
        for members in groups.values_mut() {
            members.sort_by(|a, b| a.id.cmp(&b.id));
        }
        Self { groups, distance }
    }

    /// Nearest centroid in the item's group and its distance. Ties go to the
    /// smaller centroid id.
    pub fn find_nearest(&self, item: &AnalyticItem) -> Option<(&Centroid, f64)> {
        let mut best: Option<(&Centroid, f64)> = None;
        for centroid in self.groups.get(&item.group_id)? {
            let d = self.distance.distance(&item.coordinate, &centroid.coordinate);
            match best {
                Some((_, best_d)) if best_d <= d => {}
                _ => best = Some((centroid, d)),
            }
        }
        best
    }

    pub fn group(&self, group_id: &str) -> &[Centroid] {
        self.groups.get(group_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn group_ids(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn centroid_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
