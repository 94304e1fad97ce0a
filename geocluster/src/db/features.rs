//! Location-addressed feature storage.

use super::{Database, db_err};
use crate::types::{Feature, Location};
use geocluster_shared::errors::{ClusterError, ClusterResult};
use rusqlite::params;

/// Store contract the engine and runners use for item records.
pub trait FeatureStore: Send + Sync {
    /// All features at `location` and its sub-locations, ordered by
    /// location then id.
    fn scan(&self, location: &Location) -> ClusterResult<Vec<Feature>>;

    /// Upsert features at `location`, keyed by feature id.
    fn write(&self, location: &Location, features: &[Feature]) -> ClusterResult<()>;

    fn exists(&self, location: &Location) -> ClusterResult<bool>;

    /// Delete `location` and everything below it. Returns the removed count.
    fn delete_recursive(&self, location: &Location) -> ClusterResult<usize>;
}

const LOCATION_MATCH: &str = "(location = ?1 OR substr(location, 1, length(?2)) = ?2)";

impl FeatureStore for Database {
    fn scan(&self, location: &Location) -> ClusterResult<Vec<Feature>> {
        let conn = self.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT json FROM features WHERE {} ORDER BY location, id",
            LOCATION_MATCH
        )))?;

        let rows = db_err!(stmt.query_map(
            params![location.as_str(), location.child_prefix()],
            |row| row.get::<_, String>(0),
        ))?;

        let mut features = Vec::new();
        for row in rows {
            let json = db_err!(row)?;
            let feature: Feature = serde_json::from_str(&json).map_err(|e| {
                ClusterError::Storage(format!("corrupt feature at {}: {}", location, e))
            })?;
            features.push(feature);
        }
        Ok(features)
    }

    fn write(&self, location: &Location, features: &[Feature]) -> ClusterResult<()> {
        let mut conn = self.conn();
        let tx = db_err!(conn.transaction())?;
        {
            let mut stmt = db_err!(tx.prepare(
                "INSERT OR REPLACE INTO features (location, id, group_id, json) VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for feature in features {
                let json = serde_json::to_string(feature)?;
                db_err!(stmt.execute(params![
                    location.as_str(),
                    feature.id,
                    feature.group_id,
                    json
                ]))?;
            }
        }
        db_err!(tx.commit())?;

        tracing::trace!(location = %location, count = features.len(), "Wrote features");
        Ok(())
    }

    fn exists(&self, location: &Location) -> ClusterResult<bool> {
        let conn = self.conn();
        let found: bool = db_err!(conn.query_row(
            &format!("SELECT EXISTS (SELECT 1 FROM features WHERE {})", LOCATION_MATCH),
            params![location.as_str(), location.child_prefix()],
            |row| row.get(0),
        ))?;
        Ok(found)
    }

    fn delete_recursive(&self, location: &Location) -> ClusterResult<usize> {
        let conn = self.conn();
        let removed = db_err!(conn.execute(
            &format!("DELETE FROM features WHERE {}", LOCATION_MATCH),
            params![location.as_str(), location.child_prefix()],
        ))?;

        tracing::debug!(location = %location, removed, "Deleted location");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_write_and_scan() {
        let db = create_test_db();
        let loc = Location::new("/tmp/roads_extract");
        db.write(
            &loc,
            &[Feature::point("b", 1.0, 1.0), Feature::point("a", 0.0, 0.0)],
        )
        .unwrap();

        let features = db.scan(&loc).unwrap();
        let ids: Vec<&str> = features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_write_upserts_by_id() {
        let db = create_test_db();
        let loc = Location::new("/in");
        db.write(&loc, &[Feature::point("a", 0.0, 0.0)]).unwrap();
        db.write(&loc, &[Feature::point("a", 5.0, 5.0).with_group("g")])
            .unwrap();

        let features = db.scan(&loc).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].group(), "g");
    }

    #[test]
    fn test_scan_includes_sub_locations_only() {
        let db = create_test_db();
        db.write(&Location::new("/in/part-0"), &[Feature::point("a", 0.0, 0.0)])
            .unwrap();
        db.write(&Location::new("/in/part-1"), &[Feature::point("b", 0.0, 0.0)])
            .unwrap();
        db.write(&Location::new("/input"), &[Feature::point("c", 0.0, 0.0)])
            .unwrap();

        assert_eq!(db.scan(&Location::new("/in")).unwrap().len(), 2);
        assert_eq!(db.scan(&Location::new("/input")).unwrap().len(), 1);
    }

    #[test]
    fn test_underscore_is_not_a_wildcard() {
        let db = create_test_db();
        db.write(&Location::new("/tmp/ns_level_1"), &[Feature::point("a", 0.0, 0.0)])
            .unwrap();
        db.write(&Location::new("/tmp/nsXlevelX1/x"), &[Feature::point("b", 0.0, 0.0)])
            .unwrap();

        assert_eq!(db.delete_recursive(&Location::new("/tmp/ns_level_1")).unwrap(), 1);
        assert!(db.exists(&Location::new("/tmp/nsXlevelX1")).unwrap());
    }

    #[test]
    fn test_exists_and_delete_recursive() {
        let db = create_test_db();
        let loc = Location::new("/tmp/out");
        assert!(!db.exists(&loc).unwrap());

        db.write(&loc.join("part-0"), &[Feature::point("a", 0.0, 0.0)])
            .unwrap();
        assert!(db.exists(&loc).unwrap());

        assert_eq!(db.delete_recursive(&loc).unwrap(), 1);
        assert!(!db.exists(&loc).unwrap());
    }
}
