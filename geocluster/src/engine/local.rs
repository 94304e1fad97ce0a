//! In-process compute engine.
//!
//! Runs the map phase over fixed-size partitions of the scanned input and the
//! aggregate phase over hash-partitioned keys, both on the rayon pool. The
//! whole job runs on a blocking thread so the async controller is never
//! stalled by CPU-bound work.

use super::job::{JobSpec, MapContext, ReduceContext};
use super::ComputeEngine;
use crate::db::FeatureStore;
use crate::types::Feature;
use async_trait::async_trait;
use geocluster_shared::errors::{ClusterError, ClusterResult};
use geocluster_shared::status::Status;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

/// Features handed to one map task.
const PARTITION_SIZE: usize = 256;

pub struct LocalEngine {
    store: Arc<dyn FeatureStore>,
}

impl LocalEngine {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ComputeEngine for LocalEngine {
    async fn submit(&self, job: JobSpec) -> ClusterResult<Status> {
        let store = Arc::clone(&self.store);
        let name = job.name.clone();
        tokio::task::spawn_blocking(move || run_job(store.as_ref(), job))
            .await
            .map_err(|e| ClusterError::Engine(format!("job '{}' worker failed: {}", name, e)))?
    }
}

fn run_job(store: &dyn FeatureStore, job: JobSpec) -> ClusterResult<Status> {
    let start = Instant::now();
    let input = store.scan(&job.input)?;

    let partitions: Vec<MapContext> = match input
        .par_chunks(PARTITION_SIZE)
        .map(|chunk| -> Result<MapContext, (String, ClusterError)> {
            let mut ctx = MapContext::default();
            for feature in chunk {
                job.mapper
                    .map(feature, &mut ctx)
                    .map_err(|e| (feature.id.clone(), e))?;
            }
            Ok(ctx)
        })
        .collect::<Result<Vec<_>, (String, ClusterError)>>()
    {
        Ok(partitions) => partitions,
        Err((feature_id, e)) => {
            tracing::error!(job = %job.name, feature_id = %feature_id, error = %e, "Map phase failed");
            return Ok(Status::FAILED);
        }
    };

    let mut written: Vec<Feature> = Vec::new();
    let mut emitted: Vec<(String, Value)> = Vec::new();
    for partition in partitions {
        written.extend(partition.written);
        emitted.extend(partition.emitted);
    }

    if let Some(reducer) = &job.reducer {
        let units = shuffle(emitted, job.reducer_count);
        let reduced = units
            .into_par_iter()
            .map(|unit| -> Result<Vec<Feature>, (String, ClusterError)> {
                let mut ctx = ReduceContext::default();
                for (key, values) in unit {
                    reducer
                        .reduce(&key, values, &mut ctx)
                        .map_err(|e| (key.clone(), e))?;
                }
                Ok(ctx.written)
            })
            .collect::<Result<Vec<_>, (String, ClusterError)>>();
        match reduced {
            Ok(outputs) => written.extend(outputs.into_iter().flatten()),
            Err((key, e)) => {
                tracing::error!(job = %job.name, key = %key, error = %e, "Aggregate phase failed");
                return Ok(Status::FAILED);
            }
        }
    } else if !emitted.is_empty() {
        tracing::warn!(
            job = %job.name,
            dropped = emitted.len(),
            "Values emitted by a job without an aggregate phase"
        );
    }

    match &job.output {
        Some(output) if !written.is_empty() => store.write(output, &written)?,
        None if !written.is_empty() => {
            tracing::warn!(job = %job.name, dropped = written.len(), "Job has no output location");
        }
        _ => {}
    }

    tracing::debug!(
        job = %job.name,
        input = %job.input,
        records_in = input.len(),
        records_out = written.len(),
        reducer_count = job.reducer_count,
        duration_ms = start.elapsed().as_millis() as u64,
        "Job completed"
    );
    Ok(Status::SUCCESS)
}

/// Group emitted values by key and spread keys over `units` aggregation
/// units. Values keep their emission order.
fn shuffle(emitted: Vec<(String, Value)>, units: usize) -> Vec<BTreeMap<String, Vec<Value>>> {
    let units = units.max(1);
    let mut buckets: Vec<BTreeMap<String, Vec<Value>>> = vec![BTreeMap::new(); units];
    for (key, value) in emitted {
        let unit = partition_for(&key, units);
        buckets[unit].entry(key).or_default().push(value);
    }
    buckets
}

fn partition_for(key: &str, units: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % units as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::{MapUnit, ReduceUnit};
    use crate::types::Location;
    use serde_json::json;

    struct GroupCountMapper;

    impl MapUnit for GroupCountMapper {
        fn map(&self, feature: &Feature, ctx: &mut MapContext) -> ClusterResult<()> {
            ctx.emit(feature.group(), json!(1));
            Ok(())
        }
    }

    struct GroupCountReducer;

    impl ReduceUnit for GroupCountReducer {
        fn reduce(&self, key: &str, values: Vec<Value>, ctx: &mut ReduceContext) -> ClusterResult<()> {
            ctx.write(Feature::point(key, values.len() as f64, 0.0));
            Ok(())
        }
    }

    struct FailingMapper;

    impl MapUnit for FailingMapper {
        fn map(&self, feature: &Feature, _ctx: &mut MapContext) -> ClusterResult<()> {
            if feature.id == "bad" {
                return Err(ClusterError::Internal("unreadable".into()));
            }
            Ok(())
        }
    }

    fn create_test_engine() -> (Arc<Database>, LocalEngine) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = LocalEngine::new(db.clone());
        (db, engine)
    }

    #[tokio::test]
    async fn test_map_reduce_counts_per_key() {
        let (db, engine) = create_test_engine();
        let input = Location::new("/in");
        let features: Vec<Feature> = (0..600)
            .map(|i| Feature::point(format!("f{i}"), 0.0, 0.0).with_group(if i % 3 == 0 { "a" } else { "b" }))
            .collect();
        db.write(&input, &features).unwrap();

        let job = JobSpec::new("count", input, Arc::new(GroupCountMapper))
            .with_output(Location::new("/out"))
            .with_reducer(Arc::new(GroupCountReducer), 4);
        assert_eq!(engine.submit(job).await.unwrap(), Status::SUCCESS);

        let out = db.scan(&Location::new("/out")).unwrap();
        let counts: Vec<(String, f64)> = out
            .iter()
            .map(|f| (f.id.clone(), f.geometry.vertices()[0][0]))
            .collect();
        assert_eq!(counts, vec![("a".to_string(), 200.0), ("b".to_string(), 400.0)]);
    }

    #[tokio::test]
    async fn test_map_failure_is_failed_status() {
        let (db, engine) = create_test_engine();
        let input = Location::new("/in");
        db.write(&input, &[Feature::point("ok", 0.0, 0.0), Feature::point("bad", 0.0, 0.0)])
            .unwrap();

        let job = JobSpec::new("fail", input, Arc::new(FailingMapper));
        assert_eq!(engine.submit(job).await.unwrap(), Status::FAILED);
    }

    #[tokio::test]
    async fn test_empty_input_succeeds() {
        let (_db, engine) = create_test_engine();
        let job = JobSpec::new("empty", Location::new("/nothing"), Arc::new(GroupCountMapper))
            .with_reducer(Arc::new(GroupCountReducer), 0);
        assert_eq!(job.reducer_count, 1);
        assert_eq!(engine.submit(job).await.unwrap(), Status::SUCCESS);
    }

    #[test]
    fn test_shuffle_is_stable() {
        let emitted = vec![
            ("k2".to_string(), json!(1)),
            ("k1".to_string(), json!(2)),
            ("k2".to_string(), json!(3)),
        ];
        let units = shuffle(emitted, 1);
        assert_eq!(units.len(), 1);
        let keys: Vec<&String> = units[0].keys().collect();
        assert_eq!(keys, vec!["k1", "k2"]);
        assert_eq!(units[0]["k2"], vec![json!(1), json!(3)]);
    }
}
