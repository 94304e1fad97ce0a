//! Job: one convex hull per centroid of the level.
//!
//! Items are grouped by their nearest in-group centroid; each group's hull
//! is persisted under the centroid id with the centroid's own group as
//! parent. Previous hulls of the level are replaced.

use super::{JobTarget, job_start, log_job_error, max_reducers};
use crate::centroid::{self, NestedGroupCentroidAssignment, centroid_scope};
use crate::clustering::ClusteringAlgorithm;
use crate::context::{OptionSchema, RunContext, keys};
use crate::engine::{ClusterEnv, JobSpec, MapContext, MapUnit, ReduceContext, ReduceUnit};
use crate::pipeline::Stage;
use crate::strategy::Strategies;
use crate::types::{Feature, HullRecord, Location, ROOT_GROUP_ID, Scope};
use async_trait::async_trait;
use chrono::Utc;
use geo::{Area, ConvexHull, MultiPoint, Point};
use geocluster_shared::errors::ClusterResult;
use geocluster_shared::status::Status;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Closed hull ring and its planar area.
///
/// Fewer than three distinct points cannot enclose an area; they are kept as
/// a degenerate ring.
pub(crate) fn convex_ring(points: &[[f64; 2]]) -> (Vec<[f64; 2]>, f64) {
    let mut distinct = points.to_vec();
    distinct.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    distinct.dedup();

    if distinct.len() < 3 {
        let mut ring = distinct.clone();
        if let Some(first) = distinct.first() {
            ring.push(*first);
        }
        return (ring, 0.0);
    }

    let multi_point = MultiPoint::new(distinct.iter().map(|[x, y]| Point::new(*x, *y)).collect());
    let hull = multi_point.convex_hull();
    let ring = hull.exterior().coords().map(|c| [c.x, c.y]).collect();
    (ring, hull.unsigned_area())
}

struct HullMapper {
    strategies: Strategies,
    assignment: NestedGroupCentroidAssignment,
}

impl MapUnit for HullMapper {
    fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
        let item = self.strategies.wrap(feature);
        if let Some((nearest, _)) = self.assignment.find_nearest(&item) {
            let vertices = self.strategies.dimensions.vertices(feature);
            ctx.emit(nearest.id.clone(), serde_json::to_value(vertices)?);
        }
        Ok(())
    }
}

struct HullReducer {
    parents: HashMap<String, String>,
    zoom_level: u32,
    batch_id: String,
    sink: Mutex<Vec<HullRecord>>,
}

impl ReduceUnit for HullReducer {
    fn reduce(&self, centroid_id: &str, values: Vec<Value>, _ctx: &mut ReduceContext) -> ClusterResult<()> {
        let count = values.len() as u64;
        let mut points: Vec<[f64; 2]> = Vec::new();
        for value in values {
            let vertices: Vec<[f64; 2]> = serde_json::from_value(value)?;
            points.extend(vertices);
        }
        let (polygon, area) = convex_ring(&points);

        self.sink.lock().push(HullRecord {
            group_id: centroid_id.to_string(),
            parent_group_id: self
                .parents
                .get(centroid_id)
                .cloned()
                .unwrap_or_else(|| ROOT_GROUP_ID.to_string()),
            batch_id: self.batch_id.clone(),
            zoom_level: self.zoom_level,
            count,
            area,
            polygon,
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConvexHullJob {
    target: JobTarget,
    hull_count: AtomicUsize,
}

impl ConvexHullJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hulls written by the last run.
    pub fn hull_count(&self) -> usize {
        self.hull_count.load(Ordering::SeqCst)
    }
}

/// Scope of the hull records for the current run.
pub fn hull_scope(ctx: &RunContext) -> ClusterResult<Scope> {
    Ok(Scope::new(
        ctx.get_str(keys::hull::DATA_TYPE_ID, keys::hull::DEFAULT_DATA_TYPE_ID)?,
        ctx.get_str(keys::hull::INDEX_ID, keys::centroid::DEFAULT_INDEX_ID)?,
        ctx.require_str(keys::global::BATCH_ID)?,
    ))
}

#[async_trait]
impl Stage for ConvexHullJob {
    fn name(&self) -> &str {
        "convex_hull"
    }

    fn fill_options(&self, schema: &mut OptionSchema) {
        centroid::fill_options(schema);
        schema
            .optional(keys::common::INPUT_LOCATION, "items to bound")
            .optional(keys::common::DIMENSION_EXTRACTOR, "vertex extractor")
            .optional(keys::hull::DATA_TYPE_ID, "data type of hull records")
            .optional(keys::hull::INDEX_ID, "index of hull records");
    }

    async fn execute(&self, env: &ClusterEnv, ctx: &mut RunContext) -> ClusterResult<Status> {
        let stage = self.name();
        let zoom_level = job_start(stage, &self.target, ctx)?;
        run_hulls(self, env, ctx, zoom_level)
            .await
            .inspect_err(|e| log_job_error(stage, zoom_level, e))
    }
}

impl ClusteringAlgorithm for ConvexHullJob {
    fn set_zoom_level(&self, zoom_level: u32) {
        self.target.set_zoom_level(zoom_level);
    }

    fn set_input_location(&self, location: Location) {
        self.target.set_input_location(location);
    }
}

async fn run_hulls(
    job: &ConvexHullJob,
    env: &ClusterEnv,
    ctx: &RunContext,
    zoom_level: u32,
) -> ClusterResult<Status> {
    let input = job.target.input_location(ctx)?;
    let strategies = ctx.strategies()?;
    let scope = centroid_scope(ctx)?;
    let hull_scope = hull_scope(ctx)?;

    let centroids = env.centroids.centroids(&scope, zoom_level)?;
    let parents: HashMap<String, String> = centroids
        .iter()
        .map(|c| (c.id.clone(), c.group_id.clone()))
        .collect();
    let assignment =
        NestedGroupCentroidAssignment::from_centroids(centroids, Arc::clone(&strategies.distance));

    let reducer = Arc::new(HullReducer {
        parents,
        zoom_level,
        batch_id: hull_scope.batch_id.clone(),
        sink: Mutex::new(Vec::new()),
    });
    let spec = JobSpec::new(
        format!("convex-hull-{}", zoom_level),
        input,
        Arc::new(HullMapper {
            strategies,
            assignment,
        }),
    )
    .with_reducer(reducer.clone(), max_reducers(ctx)?);

    let status = env.engine.submit(spec).await?;
    if !status.is_success() {
        return Ok(status);
    }

    let mut hulls = std::mem::take(&mut *reducer.sink.lock());
    hulls.sort_by(|a, b| a.group_id.cmp(&b.group_id));
    env.hulls.delete_level(&hull_scope, zoom_level)?;
    env.hulls.upsert(&hull_scope, &hulls)?;
    job.hull_count.store(hulls.len(), Ordering::SeqCst);
    tracing::info!(zoom_level, hulls = hulls.len(), "Hulls computed");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_hull_drops_interior_point() {
        let (ring, area) = convex_ring(&[
            [0.0, 0.0],
            [2.0, 0.0],
            [2.0, 2.0],
            [0.0, 2.0],
            [1.0, 1.0],
        ]);
        assert!((area - 4.0).abs() < 1e-9);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        assert!(!ring.contains(&[1.0, 1.0]));
    }

    #[test]
    fn test_degenerate_sets_keep_distinct_points() {
        let (ring, area) = convex_ring(&[[1.0, 1.0], [1.0, 1.0]]);
        assert_eq!(ring, vec![[1.0, 1.0], [1.0, 1.0]]);
        assert_eq!(area, 0.0);

        let (ring, area) = convex_ring(&[[0.0, 0.0], [3.0, 0.0]]);
        assert_eq!(ring.len(), 3);
        assert_eq!(area, 0.0);

        let (ring, _) = convex_ring(&[]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_hull_scope_defaults() {
        let mut ctx = RunContext::new();
        ctx.set(keys::global::BATCH_ID, "b");
        assert_eq!(hull_scope(&ctx).unwrap(), Scope::new("convex_hull", "spatial", "b"));
    }

    #[test]
    fn test_hull_scope_overrides() {
        let mut ctx = RunContext::new();
        ctx.set(keys::global::BATCH_ID, "b");
        ctx.set(keys::hull::DATA_TYPE_ID, "road_hull");
        ctx.set(keys::hull::INDEX_ID, "mercator");
        assert_eq!(hull_scope(&ctx).unwrap(), Scope::new("road_hull", "mercator", "b"));
    }
}
