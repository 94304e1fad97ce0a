//! Pluggable per-domain strategies.
//!
//! Strategies are named in the run context and resolved once into a
//! [`Strategies`] bundle that is handed to every job needing it. The set of
//! implementations is closed: an unknown name fails resolution.

mod distance;
mod extract;
mod wrapper;

pub use distance::{DistanceFn, EuclideanDistance, HaversineDistance};
pub use extract::{
    CentroidExtractor, DimensionExtractor, FirstVertexExtractor, GeometryCentroidExtractor,
    GeometryDimensionExtractor,
};
pub use wrapper::{AnalyticItem, FeatureItemWrapperFactory, ItemWrapperFactory};

use crate::context::{ContextValue, RunContext, keys};
use crate::types::Feature;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use std::sync::Arc;

pub const DEFAULT_DISTANCE_FN: &str = "euclidean";
pub const DEFAULT_CENTROID_EXTRACTOR: &str = "geometry-centroid";
pub const DEFAULT_DIMENSION_EXTRACTOR: &str = "geometry";
pub const DEFAULT_WRAPPER_FACTORY: &str = "feature";

#[derive(Clone)]
pub struct Strategies {
    pub distance: Arc<dyn DistanceFn>,
    pub extractor: Arc<dyn CentroidExtractor>,
    pub dimensions: Arc<dyn DimensionExtractor>,
    pub wrapper: Arc<dyn ItemWrapperFactory>,
}

impl std::fmt::Debug for Strategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategies")
            .field("distance", &self.distance.name())
            .field("extractor", &self.extractor.name())
            .field("dimensions", &self.dimensions.name())
            .field("wrapper", &self.wrapper.name())
            .finish()
    }
}

impl Strategies {
    /// Resolve every strategy reference in `ctx`, falling back to defaults.
    pub fn resolve(ctx: &RunContext) -> ClusterResult<Self> {
        let distance: Arc<dyn DistanceFn> =
            match ctx.get_strategy(keys::common::DISTANCE_FN, DEFAULT_DISTANCE_FN)?.as_str() {
                "euclidean" => Arc::new(EuclideanDistance),
                "haversine" => Arc::new(HaversineDistance),
                other => return Err(unknown(keys::common::DISTANCE_FN, other)),
            };

        let extractor: Arc<dyn CentroidExtractor> = match ctx
            .get_strategy(keys::centroid::EXTRACTOR, DEFAULT_CENTROID_EXTRACTOR)?
            .as_str()
        {
            "geometry-centroid" => Arc::new(GeometryCentroidExtractor),
            "first-vertex" => Arc::new(FirstVertexExtractor),
            other => return Err(unknown(keys::centroid::EXTRACTOR, other)),
        };

        let dimensions: Arc<dyn DimensionExtractor> = match ctx
            .get_strategy(keys::common::DIMENSION_EXTRACTOR, DEFAULT_DIMENSION_EXTRACTOR)?
            .as_str()
        {
            "geometry" => Arc::new(GeometryDimensionExtractor),
            other => return Err(unknown(keys::common::DIMENSION_EXTRACTOR, other)),
        };

        let wrapper: Arc<dyn ItemWrapperFactory> = match ctx
            .get_strategy(keys::centroid::WRAPPER_FACTORY, DEFAULT_WRAPPER_FACTORY)?
            .as_str()
        {
            "feature" => Arc::new(FeatureItemWrapperFactory),
            other => return Err(unknown(keys::centroid::WRAPPER_FACTORY, other)),
        };

        Ok(Self {
            distance,
            extractor,
            dimensions,
            wrapper,
        })
    }

    /// Record the default strategy references for any key left unset.
    pub fn store_defaults(ctx: &mut RunContext) {
        for (key, default) in [
            (keys::common::DISTANCE_FN, DEFAULT_DISTANCE_FN),
            (keys::centroid::EXTRACTOR, DEFAULT_CENTROID_EXTRACTOR),
            (keys::common::DIMENSION_EXTRACTOR, DEFAULT_DIMENSION_EXTRACTOR),
            (keys::centroid::WRAPPER_FACTORY, DEFAULT_WRAPPER_FACTORY),
        ] {
            ctx.set_if_absent(key, ContextValue::Strategy(default.to_string()));
        }
    }

    /// Wrap a feature using the configured extractor and wrapper factory.
    pub fn wrap(&self, feature: &Feature) -> AnalyticItem {
        self.wrapper.wrap(feature, self.extractor.centroid(feature))
    }
}

fn unknown(key: &str, name: &str) -> ClusterError {
    ClusterError::Strategy(format!("'{}' for key '{}'", name, key))
}
