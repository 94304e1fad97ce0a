//! Coordinate and dimension extraction from features.

use crate::types::{Feature, Geometry};

/// Produces the coordinate an item is clustered by.
pub trait CentroidExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn centroid(&self, feature: &Feature) -> Vec<f64>;
}

/// Produces the planar vertices that bound a feature, for hulls.
pub trait DimensionExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn dimension_names(&self) -> &'static [&'static str];

    fn vertices(&self, feature: &Feature) -> Vec<[f64; 2]>;
}

/// Mean of the geometry's distinct vertices.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryCentroidExtractor;

impl CentroidExtractor for GeometryCentroidExtractor {
    fn name(&self) -> &'static str {
        "geometry-centroid"
    }

    fn centroid(&self, feature: &Feature) -> Vec<f64> {
        let mut vertices = feature.geometry.vertices();
        // a closed ring repeats its first vertex
        if matches!(feature.geometry, Geometry::Polygon(_))
            && vertices.len() > 1
            && vertices.first() == vertices.last()
        {
            vertices = &vertices[..vertices.len() - 1];
        }
        if vertices.is_empty() {
            return vec![0.0, 0.0];
        }
        let n = vertices.len() as f64;
        let (sx, sy) = vertices
            .iter()
            .fold((0.0, 0.0), |(sx, sy), [x, y]| (sx + x, sy + y));
        vec![sx / n, sy / n]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FirstVertexExtractor;

impl CentroidExtractor for FirstVertexExtractor {
    fn name(&self) -> &'static str {
        "first-vertex"
    }

    fn centroid(&self, feature: &Feature) -> Vec<f64> {
        feature
            .geometry
            .vertices()
            .first()
            .map(|[x, y]| vec![*x, *y])
            .unwrap_or_else(|| vec![0.0, 0.0])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryDimensionExtractor;

impl DimensionExtractor for GeometryDimensionExtractor {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn dimension_names(&self) -> &'static [&'static str] {
        &["x", "y"]
    }

    fn vertices(&self, feature: &Feature) -> Vec<[f64; 2]> {
        feature.geometry.vertices().to_vec()
    }
}
