use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::NotionConfig;
use crate::error::TrackerError;
use crate::ledger_db::{LedgerStore, StoredTransaction};

/// Records pushed per invocation; the external API is rate-sensitive, so
/// batches are bounded and pushes are serialized.
pub const SYNC_BATCH_LIMIT: usize = 50;

const NOTION_API_VERSION: &str = "2022-06-28";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Destination for formatted transaction records, one call per record.
pub trait SyncTarget {
    fn create_record(&self, tx: &StoredTransaction) -> Result<(), TrackerError>;
}

/// Counters for one completed sync pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub synced: usize,
    pub failed: usize,
}

/// One sync pass: push up to [`SYNC_BATCH_LIMIT`] unsynced records oldest
/// first, then mark exactly the succeeded subset as synced in one batch
/// update.
///
/// A record that pushes successfully but whose mark-synced write is lost
/// will be pushed again on the next pass; a record is never marked synced
/// unless the external service accepted it.
pub fn run_notion_sync(
    store: &LedgerStore,
    target: &dyn SyncTarget,
) -> Result<SyncReport, TrackerError> {
    let batch = store.unsynced_batch(SYNC_BATCH_LIMIT)?;
    if batch.is_empty() {
        info!("no new transactions to sync");
        return Ok(SyncReport::default());
    }
    info!(count = batch.len(), "syncing transactions");

    let mut synced_ids = Vec::with_capacity(batch.len());
    for tx in &batch {
        match target.create_record(tx) {
            Ok(()) => synced_ids.push(tx.id),
            Err(err) => {
                warn!(id = tx.id, error = %err, "failed to sync transaction");
            }
        }
    }

    if !synced_ids.is_empty() {
        store.mark_synced(&synced_ids)?;
    }
    let report = SyncReport {
        fetched: batch.len(),
        synced: synced_ids.len(),
        failed: batch.len() - synced_ids.len(),
    };
    info!(synced = report.synced, failed = report.failed, "sync pass finished");
    Ok(report)
}

/// Notion `pages.create` client.
pub struct NotionClient {
    http: reqwest::blocking::Client,
    api_key: String,
    database_id: String,
    api_url: String,
}

impl NotionClient {
    pub fn new(config: &NotionConfig) -> Result<Self, TrackerError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            database_id: config.database_id.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }
}

impl SyncTarget for NotionClient {
    fn create_record(&self, tx: &StoredTransaction) -> Result<(), TrackerError> {
        let payload = notion_page_payload(&self.database_id, tx);
        let response = self
            .http
            .post(format!("{}/v1/pages", self.api_url))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_API_VERSION)
            .json(&payload)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::NotionApi {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Maps a stored transaction onto the Notion database properties.
pub(crate) fn notion_page_payload(database_id: &str, tx: &StoredTransaction) -> Value {
    let description = if tx.description.is_empty() {
        "N/A"
    } else {
        tx.description.as_str()
    };
    json!({
        "parent": { "database_id": database_id },
        "properties": {
            "Description": {
                "title": [{ "text": { "content": description } }]
            },
            "Amount": { "number": tx.amount },
            "Flow": { "select": { "name": tx.flow.as_str() } },
            "Bank": { "select": { "name": tx.bank } },
            "Type": { "select": { "name": tx.tx_type } },
            "Transaction Date": { "date": { "start": tx.transaction_date.to_rfc3339() } },
            "Record ID": { "number": tx.id }
        }
    })
}
