//! Loading raw features into the store.
//!
//! Input is JSON lines, one feature per line:
//!
//! ```text
//! {"id": "a", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}, "attributes": {...}}
//! ```
//!
//! Lines without an id get the hex SHA-256 of the line, so re-ingesting the
//! same file is stable. Blank lines are skipped.

use crate::db::FeatureStore;
use crate::types::{Feature, Geometry, Location};
use geocluster_shared::errors::{ClusterError, ClusterResult};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<String>,
    geometry: Geometry,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

fn parse_line(line: &str, line_number: usize) -> ClusterResult<Feature> {
    let raw: RawFeature = serde_json::from_str(line)
        .map_err(|e| ClusterError::Storage(format!("line {}: {}", line_number, e)))?;
    let id = match raw.id {
        Some(id) => id,
        None => hex::encode(Sha256::digest(line.trim().as_bytes())),
    };
    Ok(Feature {
        id,
        geometry: raw.geometry,
        group_id: raw.group_id,
        attributes: raw.attributes,
    })
}

/// Parse a JSON-lines reader into features.
pub fn read_features(reader: impl BufRead) -> ClusterResult<Vec<Feature>> {
    let mut features = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        features.push(parse_line(&line, index + 1)?);
    }
    Ok(features)
}

/// Write every feature in `path` to `location`. Returns the number written.
pub fn ingest_file(store: &dyn FeatureStore, path: &Path, location: &Location) -> ClusterResult<usize> {
    let file = std::fs::File::open(path)?;
    let features = read_features(BufReader::new(file))?;
    store.write(location, &features)?;
    tracing::info!(
        path = %path.display(),
        location = %location,
        features = features.len(),
        "Features ingested"
    );
    Ok(features.len())
}
