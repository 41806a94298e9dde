//! Dead-letter queries.
//!
//! Failed tasks are never dropped silently; they accumulate here with
//! their cause and retry count for operator inspection.

use chrono::Utc;
use rusqlite::params;

use crate::pool::{DbPool, DbResult};

/// Dead-letter row from the database.
#[derive(Debug, Clone)]
pub struct DeadLetterRow {
    pub id: i64,
    pub kind: String,
    pub external_id: String,
    pub cause: String,
    pub retries: i64,
    pub failed_at: String,
}

pub fn insert_dead_letter(
    pool: &DbPool,
    kind: &str,
    external_id: &str,
    cause: &str,
    retries: u32,
) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();
    pool.with_conn(|conn| {
        conn.execute(
            "INSERT INTO dead_letter (kind, external_id, cause, retries, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![kind, external_id, cause, retries, now],
        )?;
        Ok(())
    })
}

pub fn list_dead_letters(pool: &DbPool) -> DbResult<Vec<DeadLetterRow>> {
    pool.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, kind, external_id, cause, retries, failed_at
             FROM dead_letter ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DeadLetterRow {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    external_id: row.get(2)?,
                    cause: row.get(3)?,
                    retries: row.get(4)?,
                    failed_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    #[test]
    fn records_cause_and_retry_count() {
        let pool = DbPool::in_memory().unwrap();
        run_migrations(&pool).unwrap();

        insert_dead_letter(&pool, "channel", "chan_9", "malformed payload: no link", 0).unwrap();
        insert_dead_letter(&pool, "user", "user_3", "transient store error: timeout", 5).unwrap();

        let rows = list_dead_letters(&pool).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].external_id, "chan_9");
        assert_eq!(rows[1].retries, 5);
    }
}
