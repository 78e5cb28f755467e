use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::TrackerError;
use crate::extractor::extract_transaction;
use crate::html_text::html_to_text;
use crate::ledger_db::LedgerStore;
use crate::mailbox::{FetchedEmail, Mailbox};
use crate::parser_rules::ParserRule;

/// Counters for one completed ingestion pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FetchReport {
    pub messages_found: usize,
    pub messages_processed: usize,
    pub messages_failed: usize,
    pub transactions_saved: usize,
}

enum MessageOutcome {
    Saved,
    NoMatch,
    Skipped(SkipReason),
}

#[derive(Debug)]
enum SkipReason {
    MissingHtmlOrDate,
    NotNewerThanWatermark,
}

/// One ingestion pass: read the watermark, fetch the candidate messages,
/// extract and persist matches, then advance the watermark to now.
///
/// Per-message failures are logged and skipped; only a connection-level
/// fetch failure aborts the pass, in which case the watermark is untouched
/// and the next run retries the same window. The watermark deliberately
/// advances to "now" rather than the newest message timestamp, narrowing the
/// re-fetch window without trusting message clocks.
pub fn run_email_fetch<M: Mailbox>(
    store: &LedgerStore,
    mailbox: &mut M,
    rules: &[ParserRule],
) -> Result<FetchReport, TrackerError> {
    let watermark = store.last_fetch_timestamp()?;
    info!(since = %watermark.to_rfc3339(), "fetching emails");

    let raw_messages = mailbox.fetch_candidates(watermark.date_naive())?;
    info!(count = raw_messages.len(), "candidate messages to check");

    let mut report = FetchReport {
        messages_found: raw_messages.len(),
        ..FetchReport::default()
    };
    for raw in &raw_messages {
        match process_message(store, rules, watermark, raw) {
            Ok(MessageOutcome::Saved) => {
                report.messages_processed += 1;
                report.transactions_saved += 1;
            }
            Ok(MessageOutcome::NoMatch) => {
                report.messages_processed += 1;
            }
            Ok(MessageOutcome::Skipped(reason)) => {
                debug!(?reason, "message skipped");
            }
            Err(err) => {
                report.messages_failed += 1;
                warn!(error = %err, "error processing one message, skipping");
            }
        }
    }

    store.update_last_fetch_timestamp(Utc::now())?;
    info!(
        processed = report.messages_processed,
        saved = report.transactions_saved,
        "email fetch pass completed"
    );
    Ok(report)
}

fn process_message(
    store: &LedgerStore,
    rules: &[ParserRule],
    watermark: DateTime<Utc>,
    raw: &[u8],
) -> Result<MessageOutcome, TrackerError> {
    let email = FetchedEmail::parse(raw)?;
    let (Some(html), Some(received_at)) = (email.html_body.as_deref(), email.received_at) else {
        return Ok(MessageOutcome::Skipped(SkipReason::MissingHtmlOrDate));
    };
    // The search predicate is day-granular; this exact comparison is what
    // actually prevents reprocessing within an already-covered day.
    if received_at <= watermark {
        return Ok(MessageOutcome::Skipped(SkipReason::NotNewerThanWatermark));
    }

    let body = html_to_text(html);
    match extract_transaction(rules, &email.subject, &body, received_at) {
        Some(tx) => {
            let id = store.insert_transaction(&tx)?;
            info!(
                id,
                bank = %tx.bank,
                amount = tx.amount,
                description = %tx.description,
                "transaction saved"
            );
            Ok(MessageOutcome::Saved)
        }
        None => Ok(MessageOutcome::NoMatch),
    }
}
