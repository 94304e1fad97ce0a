//! Sampling sub-pipeline and strip behavior against an in-memory store.

use geocluster::clustering::jobs::StripWeakCentroidsJob;
use geocluster::context::keys;
use geocluster::db::FeatureStore;
use geocluster::{
    Centroid, ClusterEnv, Database, Feature, KMeansParallelRunner, Location, RunContext,
    SampleMultipleSetsRunner, Scope, Stage,
};

const BATCH: &str = "batch-1";
const INPUT: &str = "/raw/points";

fn setup(features: &[Feature]) -> (ClusterEnv, RunContext) {
    let db = Database::open_in_memory().unwrap();
    db.write(&Location::new(INPUT), features).unwrap();

    let mut ctx = RunContext::new();
    ctx.set(keys::global::BATCH_ID, BATCH);
    ctx.set(keys::common::INPUT_LOCATION, Location::new(INPUT));
    (ClusterEnv::local(db), ctx)
}

fn scope() -> Scope {
    Scope::new("centroid", "spatial", BATCH)
}

fn centroid(id: &str, group: &str, x: f64, y: f64) -> Centroid {
    Centroid {
        id: id.to_string(),
        group_id: group.to_string(),
        batch_id: BATCH.to_string(),
        zoom_level: 1,
        coordinate: vec![x, y],
        cost: 0.0,
        support: 0,
    }
}

fn corners() -> Vec<Feature> {
    vec![
        Feature::point("a", 0.0, 0.0),
        Feature::point("b", 1000.0, 0.0),
        Feature::point("c", 0.0, 1000.0),
        Feature::point("d", 1000.0, 1000.0),
    ]
}

fn grid(n: usize) -> Vec<Feature> {
    (0..n)
        .map(|i| Feature::point(format!("p{:03}", i), (i % 10) as f64 * 7.0, (i / 10) as f64 * 11.0))
        .collect()
}

// ============================================================================
// STRIP
// ============================================================================

#[tokio::test]
async fn test_strip_trims_to_best_supported() {
    // supports: near0 = 4, near10 = 3, near20 = 2, the rest 1
    let mut features = Vec::new();
    for (x, n) in [(0.0, 4), (10.0, 3), (20.0, 2), (30.0, 1), (40.0, 1), (50.0, 1)] {
        for i in 0..n {
            features.push(Feature::point(format!("f{}-{}", x, i), x, 0.1 * i as f64));
        }
    }
    let (env, mut ctx) = setup(&features);
    let pool: Vec<Centroid> = (0..6)
        .map(|i| centroid(&format!("1-c{}", i), "root", i as f64 * 10.0, 0.0))
        .collect();
    env.centroids.add(&scope(), &pool).unwrap();

    ctx.set(keys::sample::MIN_SIZE, 1i64);
    ctx.set(keys::sample::MAX_SIZE, 3i64);
    let strip = StripWeakCentroidsJob::new();
    let status = strip.execute(&env, &mut ctx).await.unwrap();

    assert!(status.is_success());
    assert_eq!(strip.current_centroid_count(), 3);
    let kept: Vec<String> = env
        .centroids
        .centroids(&scope(), 1)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(kept, vec!["1-c0", "1-c1", "1-c2"]);
}

#[tokio::test]
async fn test_strip_never_shrinks_pool_under_floor() {
    let (env, mut ctx) = setup(&grid(20));
    env.centroids
        .add(&scope(), &[centroid("1-only", "root", 0.0, 0.0)])
        .unwrap();

    ctx.set(keys::sample::MIN_SIZE, 2i64);
    ctx.set(keys::sample::MAX_SIZE, 1000i64);
    let strip = StripWeakCentroidsJob::new();
    assert!(strip.execute(&env, &mut ctx).await.unwrap().is_success());
    assert_eq!(strip.current_centroid_count(), 1);
    assert_eq!(env.centroids.count(&scope(), 1).unwrap(), 1);
}

#[tokio::test]
async fn test_strip_bounds_each_group_separately() {
    let mut features = Vec::new();
    for i in 0..8 {
        features.push(Feature::point(format!("g1-{}", i), i as f64, 0.0).with_group("g1"));
    }
    features.push(Feature::point("g2-0", 100.0, 100.0).with_group("g2"));
    let (env, mut ctx) = setup(&features);

    let mut pool: Vec<Centroid> = (0..4)
        .map(|i| centroid(&format!("1-g1-{}", i), "g1", i as f64 * 2.0, 0.0))
        .collect();
    pool.push(centroid("1-g2-0", "g2", 100.0, 100.0));
    env.centroids.add(&scope(), &pool).unwrap();

    ctx.set(keys::sample::MIN_SIZE, 1i64);
    ctx.set(keys::sample::MAX_SIZE, 2i64);
    let strip = StripWeakCentroidsJob::new();
    assert!(strip.execute(&env, &mut ctx).await.unwrap().is_success());

    assert_eq!(env.centroids.centroids_for_group(&scope(), 1, "g1").unwrap().len(), 2);
    assert_eq!(env.centroids.centroids_for_group(&scope(), 1, "g2").unwrap().len(), 1);
    assert_eq!(strip.current_centroid_count(), 3);
}

#[tokio::test]
async fn test_strip_rejects_inverted_bounds() {
    let (env, mut ctx) = setup(&grid(5));
    ctx.set(keys::sample::MIN_SIZE, 5i64);
    ctx.set(keys::sample::MAX_SIZE, 2i64);
    assert!(StripWeakCentroidsJob::new().execute(&env, &mut ctx).await.is_err());
}

// ============================================================================
// SAMPLER
// ============================================================================

#[tokio::test]
async fn test_pool_respects_ceiling() {
    let (env, mut ctx) = setup(&grid(40));
    ctx.set(keys::sample::MIN_SIZE, 1i64);
    ctx.set(keys::sample::MAX_SIZE, 3i64);

    let sampler = SampleMultipleSetsRunner::new();
    let status = sampler.execute(&env, &mut ctx).await.unwrap();

    assert!(status.is_success());
    let count = env.centroids.count(&scope(), 1).unwrap();
    assert!((1..=3).contains(&count), "pool size {}", count);
    assert_eq!(sampler.current_centroid_count(), count);
}

#[tokio::test]
async fn test_small_bootstrap_survives_default_bounds() {
    // bootstrap of one centroid is below the default floor of two
    let (env, mut ctx) = setup(&grid(12));
    let sampler = SampleMultipleSetsRunner::new();
    assert!(sampler.execute(&env, &mut ctx).await.unwrap().is_success());

    let count = env.centroids.count(&scope(), 1).unwrap();
    assert!(count >= 1);
    assert!(count <= 12);
    assert!(sampler.rounds_run() >= 1);
}

#[tokio::test]
async fn test_rounds_follow_bootstrap_cost() {
    // any corner as seed leaves a cost of 1e6 + 1e6 + 2e6; ⌈ln 4e6⌉ = 16
    let (env, mut ctx) = setup(&corners());
    let sampler = SampleMultipleSetsRunner::new();
    assert!(sampler.execute(&env, &mut ctx).await.unwrap().is_success());

    assert_eq!(sampler.rounds_run(), 16);
    // the computed count does not leak into the caller's context
    assert!(ctx.get(keys::sample::ITERATIONS).is_none());
}

#[tokio::test]
async fn test_configured_rounds_only_raise() {
    let features: Vec<Feature> = (0..6)
        .map(|i| Feature::point(format!("u{}", i), (i % 2) as f64 * 0.5, (i / 2) as f64 * 0.3))
        .collect();
    let (env, mut ctx) = setup(&features);
    ctx.set(keys::sample::ITERATIONS, 7i64);

    let sampler = SampleMultipleSetsRunner::new();
    assert!(sampler.execute(&env, &mut ctx).await.unwrap().is_success());

    assert_eq!(sampler.rounds_run(), 7);
    assert_eq!(ctx.get_int(keys::sample::ITERATIONS, 0).unwrap(), 7);
}

#[tokio::test]
async fn test_sampling_is_reproducible() {
    let mut pools = Vec::new();
    for _ in 0..2 {
        let (env, mut ctx) = setup(&grid(30));
        ctx.set(keys::sample::MAX_SIZE, 4i64);
        ctx.set(keys::sample::MIN_SIZE, 1i64);
        let sampler = SampleMultipleSetsRunner::new();
        assert!(sampler.execute(&env, &mut ctx).await.unwrap().is_success());
        let ids: Vec<String> = env
            .centroids
            .centroids(&scope(), 1)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        pools.push(ids);
    }
    assert_eq!(pools[0], pools[1]);
}

#[tokio::test]
async fn test_missing_batch_id_is_config_error() {
    let db = Database::open_in_memory().unwrap();
    db.write(&Location::new(INPUT), &grid(3)).unwrap();
    let env = ClusterEnv::local(db);
    let mut ctx = RunContext::new();
    ctx.set(keys::common::INPUT_LOCATION, Location::new(INPUT));

    let err = SampleMultipleSetsRunner::new()
        .execute(&env, &mut ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, geocluster::ClusterError::Config(_)), "{}", err);
}

// ============================================================================
// HOOK-DRIVEN RECONFIGURATION
// ============================================================================

#[tokio::test]
async fn test_growth_cost_units_track_last_strip() {
    // (max reducers, max pool size)
    for (max_reducers, max_size) in [(4i64, 50i64), (64, 3)] {
        let (env, mut ctx) = setup(&grid(200));
        ctx.set(keys::clustering::MAX_REDUCER_COUNT, max_reducers);
        ctx.set(keys::sample::MIN_SIZE, 1i64);
        ctx.set(keys::sample::MAX_SIZE, max_size);

        let sampler = SampleMultipleSetsRunner::new();
        assert!(sampler.execute(&env, &mut ctx).await.unwrap().is_success());
        assert!(sampler.rounds_run() >= 1);

        let surviving = sampler.current_centroid_count();
        assert!((1..=max_size as usize).contains(&surviving), "pool size {}", surviving);
        assert_eq!(
            sampler.growth_reducer_count(),
            surviving.min(max_reducers as usize),
            "max_reducers={} max_size={}",
            max_reducers,
            max_size
        );
    }
}

#[tokio::test]
async fn test_kmeans_units_match_final_strip() {
    let (env, mut ctx) = setup(&grid(200));
    ctx.set(keys::clustering::MAX_REDUCER_COUNT, 4i64);
    ctx.set(keys::sample::MAX_SIZE, 50i64);
    ctx.set(keys::clustering::MIN_K, 1i64);
    ctx.set(keys::clustering::MAX_K, 6i64);

    let runner = KMeansParallelRunner::new();
    assert!(runner.execute(&env, &mut ctx).await.unwrap().is_success());

    let k = runner.centroid_count();
    assert!((1..=6).contains(&k), "k = {}", k);
    assert_eq!(runner.kmeans_reducer_count(), k);
    assert_eq!(env.centroids.count(&scope(), 1).unwrap(), k);

    let sampler = runner.sampler();
    assert_eq!(
        sampler.growth_reducer_count(),
        sampler.current_centroid_count().min(4)
    );
}

#[tokio::test]
async fn test_pool_grows_then_strips_each_round() {
    let (env, mut ctx) = setup(&grid(60));
    ctx.set(keys::sample::MIN_SIZE, 1i64);
    ctx.set(keys::sample::MAX_SIZE, 5i64);

    let sampler = SampleMultipleSetsRunner::new();
    assert!(sampler.execute(&env, &mut ctx).await.unwrap().is_success());

    let rounds = sampler.round_sizes();
    assert!(!rounds.is_empty());
    assert_eq!(rounds.len(), sampler.rounds_run());
    for (i, sizes) in rounds.iter().enumerate() {
        assert_eq!(sizes.round, i + 1);
        assert!(sizes.after_grow >= sizes.start, "{:?}", sizes);
        assert!(sizes.after_strip <= sizes.after_grow, "{:?}", sizes);
        assert!(sizes.after_strip <= 5, "{:?}", sizes);
    }
    for pair in rounds.windows(2) {
        assert_eq!(pair[1].start, pair[0].after_strip);
    }
    assert_eq!(
        rounds.last().map(|sizes| sizes.after_strip),
        Some(sampler.current_centroid_count())
    );
}
