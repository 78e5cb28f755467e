mod amount;
mod config;
mod error;
mod extractor;
mod html_text;
mod ingest;
mod ledger_db;
mod mailbox;
mod notion_sync;
mod parser_rules;
mod service;
mod task_state;

pub use amount::normalize_amount;
pub use config::{AppConfig, ImapConfig, NotionConfig};
pub use error::TrackerError;
pub use extractor::extract_transaction;
pub use html_text::html_to_text;
pub use ingest::{run_email_fetch, FetchReport};
pub use ledger_db::{LedgerStore, NewTransaction, StoredTransaction};
pub use mailbox::{FetchedEmail, ImapMailbox, Mailbox};
pub use notion_sync::{
    run_notion_sync, NotionClient, SyncReport, SyncTarget, SYNC_BATCH_LIMIT,
};
pub use parser_rules::{default_rules, load_rules_file, parse_rules, Flow, ParserRule};
pub use service::{
    ManualTransaction, TrackerService, TriggerOutcome, EMAIL_FETCH_TASK, NOTION_SYNC_TASK,
};
pub use task_state::TaskState;
