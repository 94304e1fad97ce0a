//! Core record types shared by stores, jobs and runners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group id shared by every item before its first group assignment.
pub const ROOT_GROUP_ID: &str = "root";

// ============================================================================
// LOCATION
// ============================================================================

/// Hierarchical store location, e.g. `/tmp/roads_level_1`.
///
/// Locations behave like directories: a scan or a recursive delete of
/// `/a` covers `/a` itself and every `/a/...` below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    pub fn new(path: impl Into<String>) -> Self {
        let mut path = path.into();
        while path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        Self(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        if self.0 == "/" {
            Self::new(format!("/{}", name))
        } else {
            Self::new(format!("{}/{}", self.0, name))
        }
    }

    /// Extract output for a namespace: `{base}/{namespace}_extract`.
    pub fn extract_output(base: &Location, namespace: &str) -> Self {
        base.join(&format!("{}_extract", namespace))
    }

    /// Per-level output: `{base}/{namespace}_level_{level}`.
    pub fn level_output(base: &Location, namespace: &str, level: u32) -> Self {
        base.join(&format!("{}_level_{}", namespace, level))
    }

    /// Prefix used to match sub-locations in the store.
    pub(crate) fn child_prefix(&self) -> String {
        if self.0 == "/" {
            "/".to_string()
        } else {
            format!("{}/", self.0)
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Location {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for Location {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

// ============================================================================
// FEATURES
// ============================================================================

/// Planar geometry carried by a feature, `[x, y]` per vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
    Polygon(Vec<[f64; 2]>),
}

impl Geometry {
    pub fn vertices(&self) -> &[[f64; 2]] {
        match self {
            Geometry::Point(p) => std::slice::from_ref(p),
            Geometry::LineString(points) | Geometry::Polygon(points) => points,
        }
    }
}

/// A stored record. Payload and identity belong to the store; jobs only
/// read the geometry and relabel `group_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Feature {
    pub fn point(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            geometry: Geometry::Point([x, y]),
            group_id: None,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Group the feature currently belongs to.
    pub fn group(&self) -> &str {
        self.group_id.as_deref().unwrap_or(ROOT_GROUP_ID)
    }
}

// ============================================================================
// CENTROIDS AND HULLS
// ============================================================================

/// Store namespace for centroid and hull records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub data_type_id: String,
    pub index_id: String,
    pub batch_id: String,
}

impl Scope {
    pub fn new(
        data_type_id: impl Into<String>,
        index_id: impl Into<String>,
        batch_id: impl Into<String>,
    ) -> Self {
        Self {
            data_type_id: data_type_id.into(),
            index_id: index_id.into(),
            batch_id: batch_id.into(),
        }
    }
}

/// Candidate cluster center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub id: String,
    /// Coarser-level group this centroid subdivides.
    pub group_id: String,
    pub batch_id: String,
    pub zoom_level: u32,
    pub coordinate: Vec<f64>,
    /// Summed squared distance of the items nearest to this centroid.
    pub cost: f64,
    /// Number of items nearest to this centroid.
    pub support: u64,
}

impl Centroid {
    /// Deterministic id for a centroid seeded from `item_id` at `zoom_level`.
    pub fn id_for(zoom_level: u32, item_id: &str) -> String {
        format!("{}-{}", zoom_level, item_id)
    }
}

/// Boundary of one group at one zoom level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HullRecord {
    pub group_id: String,
    pub parent_group_id: String,
    pub batch_id: String,
    pub zoom_level: u32,
    pub count: u64,
    pub area: f64,
    /// Closed ring; first and last vertex are equal.
    pub polygon: Vec<[f64; 2]>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_normalizes_and_joins() {
        let base = Location::new("/tmp/");
        assert_eq!(base.as_str(), "/tmp");
        assert_eq!(base.join("roads_extract").as_str(), "/tmp/roads_extract");
        assert_eq!(Location::new("/").join("a").as_str(), "/a");
        assert_eq!(
            Location::level_output(&base, "roads", 2).as_str(),
            "/tmp/roads_level_2"
        );
    }

    #[test]
    fn test_feature_defaults_to_root_group() {
        let feature = Feature::point("a", 1.0, 2.0);
        assert_eq!(feature.group(), ROOT_GROUP_ID);
        assert_eq!(feature.with_group("1-x").group(), "1-x");
    }

    #[test]
    fn test_geometry_serde_shape() {
        let feature = Feature::point("a", 1.0, 2.0);
        let json = serde_json::to_value(&feature).unwrap();
        assert_eq!(json["geometry"]["type"], "Point");
        assert_eq!(json["geometry"]["coordinates"][1], 2.0);
        assert!(json.get("group_id").is_none());

        let back: Feature = serde_json::from_value(json).unwrap();
        assert_eq!(back, feature);
    }
}
