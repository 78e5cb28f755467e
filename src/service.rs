use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::TrackerError;
use crate::ingest::run_email_fetch;
use crate::ledger_db::{LedgerStore, NewTransaction};
use crate::mailbox::ImapMailbox;
use crate::notion_sync::{run_notion_sync, NotionClient};
use crate::parser_rules::{default_rules, Flow, ParserRule};
use crate::task_state::TaskState;

pub const EMAIL_FETCH_TASK: &str = "email_fetch";
pub const NOTION_SYNC_TASK: &str = "notion_sync";

/// Immediate answer to a trigger request. The actual work, if accepted, runs
/// in the background; it is never queued behind a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Accepted,
    Conflict,
}

/// A manually entered record, as supplied by the external caller. Field
/// validation beyond the amount invariant happens upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualTransaction {
    pub bank: Option<String>,
    #[serde(rename = "transaction_type")]
    pub tx_type: Option<String>,
    pub amount: f64,
    pub description: String,
    pub flow: Flow,
    pub transaction_date: Option<DateTime<Utc>>,
}

/// Entry point exposed to the routing layer: non-blocking triggers for the
/// two background pipelines plus manual record entry.
pub struct TrackerService {
    config: AppConfig,
    rules: Arc<Vec<ParserRule>>,
    tasks: Arc<TaskState>,
}

impl TrackerService {
    /// Builds the service: compiles the rule set once and opens the database
    /// eagerly so migrations run at startup rather than on first trigger.
    pub fn new(config: AppConfig) -> Result<Self, TrackerError> {
        Self::with_rules(config, default_rules()?)
    }

    pub fn with_rules(config: AppConfig, rules: Vec<ParserRule>) -> Result<Self, TrackerError> {
        LedgerStore::open(&config.database_path)?;
        Ok(Self {
            config,
            rules: Arc::new(rules),
            tasks: Arc::new(TaskState::default()),
        })
    }

    /// Starts an email ingestion pass in the background, or rejects the
    /// request when one is already running.
    pub fn trigger_email_fetch(&self) -> TriggerOutcome {
        if !self.tasks.try_acquire(EMAIL_FETCH_TASK) {
            warn!(task = EMAIL_FETCH_TASK, "task already running, trigger rejected");
            return TriggerOutcome::Conflict;
        }
        info!(task = EMAIL_FETCH_TASK, "task lock acquired");
        let config = self.config.clone();
        let rules = Arc::clone(&self.rules);
        let tasks = Arc::clone(&self.tasks);
        thread::spawn(move || {
            run_email_fetch_job(&config, &rules);
            tasks.release(EMAIL_FETCH_TASK);
            info!(task = EMAIL_FETCH_TASK, "task lock released");
        });
        TriggerOutcome::Accepted
    }

    /// Starts a Notion sync pass in the background, or rejects the request
    /// when one is already running.
    pub fn trigger_notion_sync(&self) -> TriggerOutcome {
        if !self.tasks.try_acquire(NOTION_SYNC_TASK) {
            warn!(task = NOTION_SYNC_TASK, "task already running, trigger rejected");
            return TriggerOutcome::Conflict;
        }
        info!(task = NOTION_SYNC_TASK, "task lock acquired");
        let config = self.config.clone();
        let tasks = Arc::clone(&self.tasks);
        thread::spawn(move || {
            run_notion_sync_job(&config);
            tasks.release(NOTION_SYNC_TASK);
            info!(task = NOTION_SYNC_TASK, "task lock released");
        });
        TriggerOutcome::Accepted
    }

    /// Persists a manually entered record. Unlike email-extracted records,
    /// manual ones must carry a positive amount.
    pub fn record_manual_transaction(
        &self,
        input: ManualTransaction,
    ) -> Result<i64, TrackerError> {
        if !(input.amount > 0.0) {
            return Err(TrackerError::InvalidTransaction(
                "amount must be greater than zero".to_string(),
            ));
        }
        let store = LedgerStore::open(&self.config.database_path)?;
        let tx = NewTransaction {
            bank: input.bank.unwrap_or_else(|| "Manual".to_string()),
            tx_type: input.tx_type.unwrap_or_else(|| "Manual Input".to_string()),
            flow: input.flow,
            amount: input.amount,
            description: input.description,
            transaction_date: input.transaction_date.unwrap_or_else(Utc::now),
        };
        let id = store.insert_transaction(&tx)?;
        info!(id, bank = %tx.bank, "manual transaction saved");
        Ok(id)
    }
}

fn run_email_fetch_job(config: &AppConfig, rules: &[ParserRule]) {
    let store = match LedgerStore::open(&config.database_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "cannot open ledger store, aborting email fetch");
            return;
        }
    };
    let run_id = begin_task_run(&store, EMAIL_FETCH_TASK);

    // The mailbox drops (and logs out) as soon as the pass is over, whether
    // it completed or aborted.
    let outcome = ImapMailbox::connect(&config.imap)
        .and_then(|mut mailbox| run_email_fetch(&store, &mut mailbox, rules));

    match &outcome {
        Ok(report) => {
            finish_task_run(
                &store,
                run_id,
                "success",
                report.messages_found as i64,
                report.transactions_saved as i64,
                None,
            );
        }
        Err(err) => {
            error!(error = %err, "email fetch aborted, watermark unchanged");
            finish_task_run(&store, run_id, "failed", 0, 0, Some(&err.to_string()));
        }
    }
}

fn run_notion_sync_job(config: &AppConfig) {
    let store = match LedgerStore::open(&config.database_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "cannot open ledger store, aborting notion sync");
            return;
        }
    };
    let run_id = begin_task_run(&store, NOTION_SYNC_TASK);

    let outcome =
        NotionClient::new(&config.notion).and_then(|client| run_notion_sync(&store, &client));

    match &outcome {
        Ok(report) => {
            finish_task_run(
                &store,
                run_id,
                "success",
                report.fetched as i64,
                report.synced as i64,
                None,
            );
        }
        Err(err) => {
            error!(error = %err, "notion sync aborted");
            finish_task_run(&store, run_id, "failed", 0, 0, Some(&err.to_string()));
        }
    }
}

// Run bookkeeping is best-effort: an audit failure must never take down a
// pipeline that is otherwise healthy.
fn begin_task_run(store: &LedgerStore, task: &str) -> Option<String> {
    match store.begin_task_run(task) {
        Ok(id) => Some(id),
        Err(err) => {
            warn!(error = %err, task, "could not record task run start");
            None
        }
    }
}

fn finish_task_run(
    store: &LedgerStore,
    run_id: Option<String>,
    status: &str,
    items_seen: i64,
    items_processed: i64,
    error_message: Option<&str>,
) {
    let Some(id) = run_id else {
        return;
    };
    if let Err(err) = store.finish_task_run(&id, status, items_seen, items_processed, error_message)
    {
        warn!(error = %err, "could not record task run finish");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::config::{default_senders, ImapConfig, NotionConfig};

    fn create_temp_test_db(tag: &str) -> PathBuf {
        let unique = format!(
            "mutasi_service_test_{tag}_{}_{}.db",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system time before epoch")
                .as_nanos()
        );
        std::env::temp_dir().join(unique)
    }

    fn test_config(database_path: PathBuf) -> AppConfig {
        AppConfig {
            imap: ImapConfig {
                host: "imap.example.test".to_string(),
                port: 993,
                user: "user".to_string(),
                password: "password".to_string(),
                accept_invalid_certs: false,
                senders: default_senders(),
            },
            notion: NotionConfig {
                api_key: "secret".to_string(),
                database_id: "db".to_string(),
                api_url: "https://api.notion.com".to_string(),
            },
            database_path,
        }
    }

    fn manual_input(amount: f64) -> ManualTransaction {
        ManualTransaction {
            bank: None,
            tx_type: None,
            amount,
            description: "Kas kecil".to_string(),
            flow: Flow::Out,
            transaction_date: None,
        }
    }

    #[test]
    fn trigger_is_rejected_while_task_is_running() {
        let db_path = create_temp_test_db("conflict");
        let service = TrackerService::new(test_config(db_path.clone())).expect("service");

        assert!(service.tasks.try_acquire(EMAIL_FETCH_TASK));
        assert_eq!(service.trigger_email_fetch(), TriggerOutcome::Conflict);
        assert_eq!(service.trigger_notion_sync(), TriggerOutcome::Accepted);

        service.tasks.release(EMAIL_FETCH_TASK);
        assert!(service.tasks.try_acquire(EMAIL_FETCH_TASK));

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn manual_transaction_requires_positive_amount() {
        let db_path = create_temp_test_db("amount");
        let service = TrackerService::new(test_config(db_path.clone())).expect("service");

        for amount in [0.0, -50.0, f64::NAN] {
            let err = service
                .record_manual_transaction(manual_input(amount))
                .expect_err("non-positive amount must be rejected");
            assert!(matches!(err, TrackerError::InvalidTransaction(_)));
        }

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn manual_transaction_is_persisted_with_defaults() {
        let db_path = create_temp_test_db("manual");
        let service = TrackerService::new(test_config(db_path.clone())).expect("service");

        let id = service
            .record_manual_transaction(manual_input(125000.0))
            .expect("valid manual entry");

        let store = LedgerStore::open(&db_path).expect("reopen store");
        let batch = store.unsynced_batch(10).expect("batch");
        assert_eq!(batch.len(), 1);
        let tx = &batch[0];
        assert_eq!(tx.id, id);
        assert_eq!(tx.bank, "Manual");
        assert_eq!(tx.tx_type, "Manual Input");
        assert_eq!(tx.amount, 125000.0);
        assert!(!tx.synced_to_notion);

        let _ = fs::remove_file(&db_path);
    }

    #[test]
    fn explicit_manual_fields_are_kept() {
        let db_path = create_temp_test_db("manual_fields");
        let service = TrackerService::new(test_config(db_path.clone())).expect("service");

        let input = ManualTransaction {
            bank: Some("BCA".to_string()),
            tx_type: Some("Transfer".to_string()),
            amount: 75000.0,
            description: "Patungan makan".to_string(),
            flow: Flow::In,
            transaction_date: None,
        };
        service
            .record_manual_transaction(input)
            .expect("valid manual entry");

        let store = LedgerStore::open(&db_path).expect("reopen store");
        let tx = &store.unsynced_batch(10).expect("batch")[0];
        assert_eq!(tx.bank, "BCA");
        assert_eq!(tx.tx_type, "Transfer");
        assert_eq!(tx.flow, Flow::In);

        let _ = fs::remove_file(&db_path);
    }
}
