use thiserror::Error;

/// Error taxonomy for the ingestion and sync pipelines.
///
/// Expected non-matches (no rule matched, message behind the watermark) are
/// not errors and never show up here; they are `Option`/skip outcomes at the
/// call sites.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("missing or invalid configuration value: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mailbox error: {0}")]
    Mailbox(#[from] imap::error::Error),

    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("email parse error: {0}")]
    Mail(#[from] mailparse::MailParseError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored watermark is not a valid timestamp: {value:?}")]
    InvalidWatermark { value: String },

    #[error("failed to parse rules document: {0}")]
    RulesDocument(#[from] serde_json::Error),

    #[error("rule {rule:?}: invalid pattern for field {field:?}: {source}")]
    RulePattern {
        rule: String,
        field: String,
        source: regex::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notion api returned {status}: {message}")]
    NotionApi { status: u16, message: String },

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
}
