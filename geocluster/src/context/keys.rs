//! Configuration keys.
//!
//! Centralized location for every key a component reads from or writes to
//! the [`RunContext`](super::RunContext). Keys are unique process-wide.

/// Run-wide identity and placement
pub mod global {
    /// Batch id scoping centroid and hull records (generated if absent)
    pub const BATCH_ID: &str = "global.batch_id";

    /// Base location for intermediate outputs
    pub const BASE_DIR: &str = "global.base_dir";

    /// Namespace used to derive output location names
    pub const NAMESPACE: &str = "global.namespace";

    pub const DEFAULT_BASE_DIR: &str = "/tmp";
}

/// Keys shared by most jobs
pub mod common {
    /// Input location of the current clustering stage
    pub const INPUT_LOCATION: &str = "common.input_location";

    /// Distance function strategy
    pub const DISTANCE_FN: &str = "common.distance_fn";

    /// Dimension extractor strategy
    pub const DIMENSION_EXTRACTOR: &str = "common.dimension_extractor";
}

pub mod extract {
    /// Location holding the raw features to cluster
    pub const INPUT_LOCATION: &str = "extract.input_location";

    pub const OUTPUT_DATA_TYPE_ID: &str = "extract.output_data_type_id";

    pub const DEFAULT_OUTPUT_DATA_TYPE_ID: &str = "centroid";
}

pub mod centroid {
    pub const DATA_TYPE_ID: &str = "centroid.data_type_id";

    pub const INDEX_ID: &str = "centroid.index_id";

    /// Coordinate extractor strategy
    pub const EXTRACTOR: &str = "centroid.extractor";

    /// Item wrapper factory strategy
    pub const WRAPPER_FACTORY: &str = "centroid.wrapper_factory";

    pub const ZOOM_LEVEL: &str = "centroid.zoom_level";

    pub const DEFAULT_INDEX_ID: &str = "spatial";
}

/// Scalable sampling (k-means||) parameters
pub mod sample {
    pub const MIN_SIZE: &str = "sample.min_size";

    pub const MAX_SIZE: &str = "sample.max_size";

    /// Oversampling budget spread across the growth rounds
    pub const SIZE: &str = "sample.size";

    /// Seed items drawn per group by the bootstrap sample
    pub const INITIAL_SIZE: &str = "sample.initial_size";

    /// Lower bound on growth rounds; the computed count can only raise it
    pub const ITERATIONS: &str = "sample.iterations";

    pub const SEED: &str = "sample.seed";

    /// Logarithm base for the growth round count
    pub const LOG_BASE: &str = "sample.log_base";

    pub const DATA_TYPE_ID: &str = "sample.data_type_id";

    pub const INDEX_ID: &str = "sample.index_id";

    pub const DEFAULT_MIN_SIZE: i64 = 2;
    pub const DEFAULT_MAX_SIZE: i64 = 1000;
    pub const DEFAULT_INITIAL_SIZE: i64 = 1;
    pub const DEFAULT_ITERATIONS: i64 = 1;
}

pub mod clustering {
    pub const ZOOM_LEVELS: &str = "clustering.zoom_levels";

    pub const RETAIN_GROUP_ASSIGNMENTS: &str = "clustering.retain_group_assignments";

    /// Upper bound on aggregation units for cost updates
    pub const MAX_REDUCER_COUNT: &str = "clustering.max_reducer_count";

    /// Final centroid bounds after sampling
    pub const MIN_K: &str = "clustering.min_k";
    pub const MAX_K: &str = "clustering.max_k";

    pub const DEFAULT_MAX_REDUCER_COUNT: i64 = 32;
}

/// Lloyd refinement
pub mod kmeans {
    pub const MAX_ITERATIONS: &str = "kmeans.max_iterations";

    /// Largest centroid shift still considered converged
    pub const TOLERANCE: &str = "kmeans.tolerance";

    pub const DEFAULT_MAX_ITERATIONS: i64 = 10;
    pub const DEFAULT_TOLERANCE: f64 = 1e-4;
}

pub mod hull {
    pub const DATA_TYPE_ID: &str = "hull.data_type_id";

    pub const INDEX_ID: &str = "hull.index_id";

    pub const DEFAULT_DATA_TYPE_ID: &str = "convex_hull";
}

/// Keys whose string values are loaded as locations.
pub const LOCATION_KEYS: &[&str] = &[
    global::BASE_DIR,
    common::INPUT_LOCATION,
    extract::INPUT_LOCATION,
];

/// Keys whose string values are loaded as strategy references.
pub const STRATEGY_KEYS: &[&str] = &[
    common::DISTANCE_FN,
    common::DIMENSION_EXTRACTOR,
    centroid::EXTRACTOR,
    centroid::WRAPPER_FACTORY,
];
