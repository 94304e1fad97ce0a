//! Hull persistence.

use super::{Database, db_err};
use crate::types::{HullRecord, Scope};
use chrono::{DateTime, Utc};
use geocluster_shared::errors::{ClusterError, ClusterResult};
use rusqlite::params;

#[derive(Clone, Debug)]
pub struct HullStore {
    db: Database,
}

impl HullStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace hulls keyed by (scope, zoom level, group).
    pub fn upsert(&self, scope: &Scope, hulls: &[HullRecord]) -> ClusterResult<()> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;
        {
            let mut stmt = db_err!(tx.prepare(
                "INSERT OR REPLACE INTO hulls
                    (data_type_id, index_id, batch_id, zoom_level, group_id, parent_group_id,
                     count, area, polygon, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ))?;
            for hull in hulls {
                let polygon = serde_json::to_string(&hull.polygon)?;
                db_err!(stmt.execute(params![
                    scope.data_type_id,
                    scope.index_id,
                    scope.batch_id,
                    hull.zoom_level,
                    hull.group_id,
                    hull.parent_group_id,
                    hull.count as i64,
                    hull.area,
                    polygon,
                    hull.created_at.to_rfc3339(),
                ]))?;
            }
        }
        db_err!(tx.commit())?;
        Ok(())
    }

    pub fn delete_level(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<usize> {
        let conn = self.db.conn();
        db_err!(conn.execute(
            "DELETE FROM hulls
             WHERE data_type_id = ?1 AND index_id = ?2 AND batch_id = ?3 AND zoom_level = ?4",
            params![scope.data_type_id, scope.index_id, scope.batch_id, zoom_level],
        ))
    }

    /// Hulls of one level, ordered by group id.
    pub fn list(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<Vec<HullRecord>> {
        self.query(scope, Some(zoom_level))
    }

    /// Hulls of every level, ordered by level then group id.
    pub fn list_all(&self, scope: &Scope) -> ClusterResult<Vec<HullRecord>> {
        self.query(scope, None)
    }

    fn query(&self, scope: &Scope, zoom_level: Option<u32>) -> ClusterResult<Vec<HullRecord>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT group_id, parent_group_id, batch_id, zoom_level, count, area, polygon, created_at
             FROM hulls
             WHERE data_type_id = ?1 AND index_id = ?2 AND batch_id = ?3
               AND (?4 IS NULL OR zoom_level = ?4)
             ORDER BY zoom_level, group_id"
        ))?;

        let rows = db_err!(stmt.query_map(
            params![scope.data_type_id, scope.index_id, scope.batch_id, zoom_level],
            |row| {
                let count: i64 = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    count.max(0) as u64,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        ))?;

        let mut hulls = Vec::new();
        for row in rows {
            let (group_id, parent_group_id, batch_id, zoom_level, count, area, polygon, created_at) =
                db_err!(row)?;
            let polygon = serde_json::from_str(&polygon).map_err(|e| {
                ClusterError::Storage(format!("corrupt hull {}: {}", group_id, e))
            })?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| ClusterError::Storage(format!("corrupt hull {}: {}", group_id, e)))?;
            hulls.push(HullRecord {
                group_id,
                parent_group_id,
                batch_id,
                zoom_level,
                count,
                area,
                polygon,
                created_at,
            });
        }
        Ok(hulls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hull(group: &str, level: u32) -> HullRecord {
        HullRecord {
            group_id: group.to_string(),
            parent_group_id: "root".to_string(),
            batch_id: "b".to_string(),
            zoom_level: level,
            count: 3,
            area: 0.5,
            polygon: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_replaces_per_group() {
        let store = HullStore::new(Database::open_in_memory().unwrap());
        let scope = Scope::new("convex_hull", "spatial", "b");

        store.upsert(&scope, &[hull("1-a", 1), hull("1-b", 1)]).unwrap();
        let mut replaced = hull("1-a", 1);
        replaced.count = 10;
        store.upsert(&scope, &[replaced, hull("2-c", 2)]).unwrap();

        let level1 = store.list(&scope, 1).unwrap();
        assert_eq!(level1.len(), 2);
        assert_eq!(level1[0].count, 10);
        assert_eq!(level1[0].polygon.len(), 4);

        let all = store.list_all(&scope).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].zoom_level, 2);
    }

    #[test]
    fn test_delete_level_keeps_other_levels() {
        let store = HullStore::new(Database::open_in_memory().unwrap());
        let scope = Scope::new("convex_hull", "spatial", "b");
        store.upsert(&scope, &[hull("1-a", 1), hull("2-a", 2)]).unwrap();

        assert_eq!(store.delete_level(&scope, 1).unwrap(), 1);
        assert!(store.list(&scope, 1).unwrap().is_empty());
        assert_eq!(store.list(&scope, 2).unwrap().len(), 1);
    }
}
