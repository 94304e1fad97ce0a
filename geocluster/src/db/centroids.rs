//! Centroid persistence.

use super::{Database, db_err};
use crate::types::{Centroid, Scope};
use geocluster_shared::errors::{ClusterError, ClusterResult};
use rusqlite::{Row, params};

const SELECT_COLUMNS: &str =
    "SELECT id, group_id, batch_id, zoom_level, coordinate, cost, support FROM centroids";

const SCOPE_MATCH: &str = "data_type_id = ?1 AND index_id = ?2 AND batch_id = ?3 AND zoom_level = ?4";

/// Centroid table wrapper.
#[derive(Clone, Debug)]
pub struct CentroidStore {
    db: Database,
}

impl CentroidStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace centroids. `batch_id` on each record is taken from `scope`.
    pub fn upsert(&self, scope: &Scope, centroids: &[Centroid]) -> ClusterResult<()> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;
        {
            let mut stmt = db_err!(tx.prepare(
                "INSERT OR REPLACE INTO centroids
                    (data_type_id, index_id, batch_id, zoom_level, id, group_id, coordinate, cost, support)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ))?;
            for c in centroids {
                let coordinate = serde_json::to_string(&c.coordinate)?;
                db_err!(stmt.execute(params![
                    scope.data_type_id,
                    scope.index_id,
                    scope.batch_id,
                    c.zoom_level,
                    c.id,
                    c.group_id,
                    coordinate,
                    c.cost,
                    c.support as i64,
                ]))?;
            }
        }
        db_err!(tx.commit())?;
        Ok(())
    }

    /// All centroids of a level, ordered by group then id.
    pub fn list(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<Vec<Centroid>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "{} WHERE {} ORDER BY group_id, id",
            SELECT_COLUMNS, SCOPE_MATCH
        )))?;
        let rows = db_err!(stmt.query_map(
            params![scope.data_type_id, scope.index_id, scope.batch_id, zoom_level],
            read_row,
        ))?;
        collect_rows(rows)
    }

    pub fn list_group(
        &self,
        scope: &Scope,
        zoom_level: u32,
        group_id: &str,
    ) -> ClusterResult<Vec<Centroid>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "{} WHERE {} AND group_id = ?5 ORDER BY id",
            SELECT_COLUMNS, SCOPE_MATCH
        )))?;
        let rows = db_err!(stmt.query_map(
            params![
                scope.data_type_id,
                scope.index_id,
                scope.batch_id,
                zoom_level,
                group_id
            ],
            read_row,
        ))?;
        collect_rows(rows)
    }

    pub fn count(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<usize> {
        let conn = self.db.conn();
        let count: i64 = db_err!(conn.query_row(
            &format!("SELECT COUNT(*) FROM centroids WHERE {}", SCOPE_MATCH),
            params![scope.data_type_id, scope.index_id, scope.batch_id, zoom_level],
            |row| row.get(0),
        ))?;
        Ok(count as usize)
    }

    pub fn delete(&self, scope: &Scope, zoom_level: u32, ids: &[String]) -> ClusterResult<usize> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;
        let mut removed = 0;
        {
            let mut stmt = db_err!(tx.prepare(&format!(
                "DELETE FROM centroids WHERE {} AND id = ?5",
                SCOPE_MATCH
            )))?;
            for id in ids {
                removed += db_err!(stmt.execute(params![
                    scope.data_type_id,
                    scope.index_id,
                    scope.batch_id,
                    zoom_level,
                    id
                ]))?;
            }
        }
        db_err!(tx.commit())?;
        Ok(removed)
    }

    pub fn delete_level(&self, scope: &Scope, zoom_level: u32) -> ClusterResult<usize> {
        let conn = self.db.conn();
        let removed = db_err!(conn.execute(
            &format!("DELETE FROM centroids WHERE {}", SCOPE_MATCH),
            params![scope.data_type_id, scope.index_id, scope.batch_id, zoom_level],
        ))?;
        Ok(removed)
    }

    /// Overwrite cost and support. Centroids missing from `updates` are reset to zero.
    pub fn set_costs(
        &self,
        scope: &Scope,
        zoom_level: u32,
        updates: &[(String, f64, u64)],
    ) -> ClusterResult<()> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;
        db_err!(tx.execute(
            &format!("UPDATE centroids SET cost = 0, support = 0 WHERE {}", SCOPE_MATCH),
            params![scope.data_type_id, scope.index_id, scope.batch_id, zoom_level],
        ))?;
        {
            let mut stmt = db_err!(tx.prepare(&format!(
                "UPDATE centroids SET cost = ?6, support = ?7 WHERE {} AND id = ?5",
                SCOPE_MATCH
            )))?;
            for (id, cost, support) in updates {
                db_err!(stmt.execute(params![
                    scope.data_type_id,
                    scope.index_id,
                    scope.batch_id,
                    zoom_level,
                    id,
                    cost,
                    *support as i64
                ]))?;
            }
        }
        db_err!(tx.commit())?;
        Ok(())
    }

    pub fn set_coordinates(
        &self,
        scope: &Scope,
        zoom_level: u32,
        updates: &[(String, Vec<f64>)],
    ) -> ClusterResult<()> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;
        {
            let mut stmt = db_err!(tx.prepare(&format!(
                "UPDATE centroids SET coordinate = ?6 WHERE {} AND id = ?5",
                SCOPE_MATCH
            )))?;
            for (id, coordinate) in updates {
                let coordinate = serde_json::to_string(coordinate)?;
                db_err!(stmt.execute(params![
                    scope.data_type_id,
                    scope.index_id,
                    scope.batch_id,
                    zoom_level,
                    id,
                    coordinate
                ]))?;
            }
        }
        db_err!(tx.commit())?;
        Ok(())
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(Centroid, String)> {
    let support: i64 = row.get(6)?;
    let coordinate: String = row.get(4)?;
    Ok((
        Centroid {
            id: row.get(0)?,
            group_id: row.get(1)?,
            batch_id: row.get(2)?,
            zoom_level: row.get(3)?,
            coordinate: Vec::new(),
            cost: row.get(5)?,
            support: support.max(0) as u64,
        },
        coordinate,
    ))
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<(Centroid, String)>>,
) -> ClusterResult<Vec<Centroid>> {
    let mut centroids = Vec::new();
    for row in rows {
        let (mut centroid, coordinate) = db_err!(row)?;
        centroid.coordinate = serde_json::from_str(&coordinate).map_err(|e| {
            ClusterError::Storage(format!("corrupt centroid {}: {}", centroid.id, e))
        })?;
        centroids.push(centroid);
    }
    Ok(centroids)
}
