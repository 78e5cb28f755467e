use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::parser_rules::Flow;

const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_init.sql",
    include_str!("../db/migrations/0001_init.sql"),
)];

const WATERMARK_KEY: &str = "last_fetch_timestamp";

/// A transaction candidate not yet persisted, produced by the extractor or
/// by manual entry.
#[derive(Debug, Clone, Serialize)]
pub struct NewTransaction {
    pub bank: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub flow: Flow,
    pub amount: f64,
    pub description: String,
    pub transaction_date: DateTime<Utc>,
}

/// A persisted transaction row. Immutable after insert except for
/// `synced_to_notion`, which transitions false→true exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct StoredTransaction {
    pub id: i64,
    pub bank: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub flow: Flow,
    pub amount: f64,
    pub description: String,
    pub transaction_date: DateTime<Utc>,
    pub synced_to_notion: bool,
}

/// SQLite-backed store for transactions, the fetch watermark, and task-run
/// audit rows. Opening a store applies any pending embedded migrations.
pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    pub fn open(path: &Path) -> Result<Self, TrackerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, TrackerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, TrackerError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.apply_migrations()?;
        Ok(store)
    }

    fn apply_migrations(&self) -> Result<(), TrackerError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        let applied = self.applied_versions()?;
        for (version, sql) in MIGRATIONS {
            if applied.contains(*version) {
                continue;
            }
            let tx = self.conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO schema_migrations (version) VALUES (?1)",
                [*version],
            )?;
            tx.commit()?;
        }
        Ok(())
    }

    fn applied_versions(&self) -> Result<HashSet<String>, TrackerError> {
        let mut stmt = self.conn.prepare("SELECT version FROM schema_migrations")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut versions = HashSet::new();
        for row in rows {
            versions.insert(row?);
        }
        Ok(versions)
    }

    /// The newest email datetime fully processed by a completed ingestion
    /// pass, or the Unix epoch when no pass has ever completed.
    pub fn last_fetch_timestamp(&self) -> Result<DateTime<Utc>, TrackerError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT key_value FROM app_state WHERE key_name = ?1",
                [WATERMARK_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| TrackerError::InvalidWatermark { value: raw }),
            None => Ok(DateTime::<Utc>::UNIX_EPOCH),
        }
    }

    /// Upserts the watermark; must succeed whether or not a prior value
    /// exists.
    pub fn update_last_fetch_timestamp(&self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        self.conn.execute(
            r#"
            INSERT INTO app_state (key_name, key_value)
            VALUES (?1, ?2)
            ON CONFLICT(key_name) DO UPDATE SET key_value = excluded.key_value
            "#,
            params![WATERMARK_KEY, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Plain insert: duplicate emails or a re-run before the watermark
    /// advanced can produce duplicate rows; no natural-key deduplication is
    /// attempted.
    pub fn insert_transaction(&self, tx: &NewTransaction) -> Result<i64, TrackerError> {
        self.conn.execute(
            r#"
            INSERT INTO transactions (bank, type, flow, amount, description, transaction_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                tx.bank,
                tx.tx_type,
                tx.flow.as_str(),
                tx.amount,
                tx.description,
                tx.transaction_date.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Up to `limit` not-yet-synced transactions, oldest first.
    pub fn unsynced_batch(&self, limit: usize) -> Result<Vec<StoredTransaction>, TrackerError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, bank, type, flow, amount, description, transaction_date, synced_to_notion
            FROM transactions
            WHERE synced_to_notion = 0
            ORDER BY transaction_date ASC, id ASC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map([limit as i64], row_to_transaction)?;
        let mut batch = Vec::new();
        for row in rows {
            batch.push(row?);
        }
        Ok(batch)
    }

    /// Marks exactly the given rows as synced in one statement.
    pub fn mark_synced(&self, ids: &[i64]) -> Result<usize, TrackerError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql =
            format!("UPDATE transactions SET synced_to_notion = 1 WHERE id IN ({placeholders})");
        Ok(self
            .conn
            .execute(&sql, rusqlite::params_from_iter(ids.iter()))?)
    }

    /// Records the start of a triggered background pass and returns its id.
    pub fn begin_task_run(&self, task: &str) -> Result<String, TrackerError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            r#"
            INSERT INTO task_runs (id, task, status, started_at)
            VALUES (?1, ?2, 'running', ?3)
            "#,
            params![id, task, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    pub fn finish_task_run(
        &self,
        id: &str,
        status: &str,
        items_seen: i64,
        items_processed: i64,
        error_message: Option<&str>,
    ) -> Result<(), TrackerError> {
        self.conn.execute(
            r#"
            UPDATE task_runs
            SET status = ?1,
                finished_at = ?2,
                items_seen = ?3,
                items_processed = ?4,
                error_message = ?5
            WHERE id = ?6
            "#,
            params![
                status,
                Utc::now().to_rfc3339(),
                items_seen,
                items_processed,
                error_message,
                id,
            ],
        )?;
        Ok(())
    }
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredTransaction> {
    let flow_raw: String = row.get(3)?;
    let flow = Flow::from_db(&flow_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown flow {flow_raw:?}").into(),
        )
    })?;
    let date_raw: String = row.get(6)?;
    let transaction_date = DateTime::parse_from_rfc3339(&date_raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(err))
        })?;
    Ok(StoredTransaction {
        id: row.get(0)?,
        bank: row.get(1)?,
        tx_type: row.get(2)?,
        flow,
        amount: row.get(4)?,
        description: row.get(5)?,
        transaction_date,
        synced_to_notion: row.get::<_, i64>(7)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn sample_transaction(date: DateTime<Utc>) -> NewTransaction {
        NewTransaction {
            bank: "BCA".to_string(),
            tx_type: "QRIS/Payment".to_string(),
            flow: Flow::Out,
            amount: 50000.0,
            description: "Bayar ke Toko Kopi".to_string(),
            transaction_date: date,
        }
    }

    fn date(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, day, hour, 0, 0).unwrap()
    }

    fn create_temp_test_db() -> PathBuf {
        let unique = format!(
            "mutasi_ledger_test_{}_{}.db",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system time before epoch")
                .as_nanos()
        );
        std::env::temp_dir().join(unique)
    }

    #[test]
    fn watermark_defaults_to_epoch() {
        let store = LedgerStore::open_in_memory().expect("open store");
        assert_eq!(
            store.last_fetch_timestamp().expect("read watermark"),
            DateTime::<Utc>::UNIX_EPOCH
        );
    }

    #[test]
    fn watermark_upserts_over_prior_value() {
        let store = LedgerStore::open_in_memory().expect("open store");
        store
            .update_last_fetch_timestamp(date(26, 10))
            .expect("first write");
        store
            .update_last_fetch_timestamp(date(27, 11))
            .expect("second write");
        assert_eq!(
            store.last_fetch_timestamp().expect("read watermark"),
            date(27, 11)
        );
    }

    #[test]
    fn unsynced_batch_is_oldest_first() {
        let store = LedgerStore::open_in_memory().expect("open store");
        store
            .insert_transaction(&sample_transaction(date(27, 9)))
            .expect("insert");
        store
            .insert_transaction(&sample_transaction(date(25, 9)))
            .expect("insert");
        store
            .insert_transaction(&sample_transaction(date(26, 9)))
            .expect("insert");
        let batch = store.unsynced_batch(50).expect("batch");
        let days: Vec<u32> = batch.iter().map(|tx| tx.transaction_date.day()).collect();
        assert_eq!(days, vec![25, 26, 27]);
        assert!(batch.iter().all(|tx| !tx.synced_to_notion));
    }

    #[test]
    fn unsynced_batch_respects_limit() {
        let store = LedgerStore::open_in_memory().expect("open store");
        for hour in 0..5 {
            store
                .insert_transaction(&sample_transaction(date(27, hour)))
                .expect("insert");
        }
        assert_eq!(store.unsynced_batch(3).expect("batch").len(), 3);
    }

    #[test]
    fn mark_synced_touches_only_the_given_ids() {
        let store = LedgerStore::open_in_memory().expect("open store");
        let a = store
            .insert_transaction(&sample_transaction(date(25, 9)))
            .expect("insert");
        let b = store
            .insert_transaction(&sample_transaction(date(26, 9)))
            .expect("insert");
        let c = store
            .insert_transaction(&sample_transaction(date(27, 9)))
            .expect("insert");
        assert_eq!(store.mark_synced(&[a, c]).expect("mark"), 2);
        let remaining = store.unsynced_batch(50).expect("batch");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);
    }

    #[test]
    fn mark_synced_with_no_ids_is_a_no_op() {
        let store = LedgerStore::open_in_memory().expect("open store");
        assert_eq!(store.mark_synced(&[]).expect("mark"), 0);
    }

    #[test]
    fn stored_rows_round_trip_their_fields() {
        let store = LedgerStore::open_in_memory().expect("open store");
        let id = store
            .insert_transaction(&sample_transaction(date(27, 9)))
            .expect("insert");
        let batch = store.unsynced_batch(1).expect("batch");
        let tx = &batch[0];
        assert_eq!(tx.id, id);
        assert_eq!(tx.bank, "BCA");
        assert_eq!(tx.tx_type, "QRIS/Payment");
        assert_eq!(tx.flow, Flow::Out);
        assert_eq!(tx.amount, 50000.0);
        assert_eq!(tx.description, "Bayar ke Toko Kopi");
        assert_eq!(tx.transaction_date, date(27, 9));
    }

    #[test]
    fn reopening_a_database_skips_applied_migrations() {
        let db_path = create_temp_test_db();
        {
            let store = LedgerStore::open(&db_path).expect("first open");
            store
                .insert_transaction(&sample_transaction(date(27, 9)))
                .expect("insert");
        }
        {
            let store = LedgerStore::open(&db_path).expect("second open");
            assert_eq!(store.unsynced_batch(50).expect("batch").len(), 1);
            let versions: i64 = store
                .conn
                .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                    row.get(0)
                })
                .expect("count versions");
            assert_eq!(versions as usize, MIGRATIONS.len());
        }
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn task_runs_record_lifecycle() {
        let store = LedgerStore::open_in_memory().expect("open store");
        let run_id = store.begin_task_run("email_fetch").expect("begin");
        store
            .finish_task_run(&run_id, "success", 12, 3, None)
            .expect("finish");
        let (status, seen, processed): (String, i64, i64) = store
            .conn
            .query_row(
                "SELECT status, items_seen, items_processed FROM task_runs WHERE id = ?1",
                [&run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("read run");
        assert_eq!(status, "success");
        assert_eq!(seen, 12);
        assert_eq!(processed, 3);
    }
}
