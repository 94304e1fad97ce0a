//! Table definitions.

pub(crate) const SCHEMA_VERSION: i32 = 1;

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

const FEATURES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS features (
    location TEXT NOT NULL,
    id TEXT NOT NULL,
    group_id TEXT,
    json TEXT NOT NULL,
    PRIMARY KEY (location, id)
);
";

const CENTROIDS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS centroids (
    data_type_id TEXT NOT NULL,
    index_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    zoom_level INTEGER NOT NULL,
    id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    coordinate TEXT NOT NULL,
    cost REAL NOT NULL DEFAULT 0,
    support INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (data_type_id, index_id, batch_id, zoom_level, id)
);
CREATE INDEX IF NOT EXISTS idx_centroids_group
    ON centroids (data_type_id, index_id, batch_id, zoom_level, group_id);
";

const HULLS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS hulls (
    data_type_id TEXT NOT NULL,
    index_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    zoom_level INTEGER NOT NULL,
    group_id TEXT NOT NULL,
    parent_group_id TEXT NOT NULL,
    count INTEGER NOT NULL,
    area REAL NOT NULL,
    polygon TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (data_type_id, index_id, batch_id, zoom_level, group_id)
);
";

pub(crate) fn all_schemas() -> [&'static str; 4] {
    [SCHEMA_VERSION_TABLE, FEATURES_TABLE, CENTROIDS_TABLE, HULLS_TABLE]
}
