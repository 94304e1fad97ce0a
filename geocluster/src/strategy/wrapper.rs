//! Item wrapping: the view of a feature that clustering jobs operate on.

use crate::types::Feature;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticItem {
    pub id: String,
    pub coordinate: Vec<f64>,
    /// Current group; the root group before any assignment.
    pub group_id: String,
}

pub trait ItemWrapperFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn wrap(&self, feature: &Feature, coordinate: Vec<f64>) -> AnalyticItem;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureItemWrapperFactory;

impl ItemWrapperFactory for FeatureItemWrapperFactory {
    fn name(&self) -> &'static str {
        "feature"
    }

    fn wrap(&self, feature: &Feature, coordinate: Vec<f64>) -> AnalyticItem {
        AnalyticItem {
            id: feature.id.clone(),
            coordinate,
            group_id: feature.group().to_string(),
        }
    }
}
