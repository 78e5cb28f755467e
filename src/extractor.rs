use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::amount::normalize_amount;
use crate::ledger_db::NewTransaction;
use crate::parser_rules::{ParserRule, AMOUNT_FIELD};

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid ws regex"))
}

pub(crate) fn trim_text(s: &str) -> String {
    ws_re().replace_all(s.trim(), " ").trim().to_string()
}

/// Matches a message against the ordered rule set and builds a transaction
/// candidate from the first rule whose required fields are all present.
///
/// The message's authoritative timestamp becomes the transaction date; dates
/// printed inside the body are never trusted. `None` is the expected, common
/// outcome for non-transaction mail and is not an error.
pub fn extract_transaction(
    rules: &[ParserRule],
    subject: &str,
    body: &str,
    received_at: DateTime<Utc>,
) -> Option<NewTransaction> {
    let subject_lower = subject.to_lowercase();
    for rule in rules {
        if !rule.matches_subject(&subject_lower) {
            continue;
        }
        let fields = capture_fields(rule, body);
        if !rule
            .required_fields
            .iter()
            .all(|field| fields.contains_key(field))
        {
            continue;
        }
        let amount = fields
            .get(AMOUNT_FIELD)
            .map(|raw| normalize_amount(raw))
            .unwrap_or(0.0);
        return Some(NewTransaction {
            bank: rule.bank.clone(),
            tx_type: rule.tx_type.clone(),
            flow: rule.flow,
            amount,
            description: rule.render_description(&fields),
            transaction_date: received_at,
        });
    }
    None
}

/// Applies every pattern of a rule to the body. A field is present only when
/// its first capture group matched something non-empty after whitespace
/// collapsing.
fn capture_fields(rule: &ParserRule, body: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for (name, pattern) in &rule.patterns {
        let Some(captures) = pattern.captures(body) else {
            continue;
        };
        if let Some(value) = captures.get(1) {
            let value = trim_text(value.as_str());
            if !value.is_empty() {
                fields.insert(name.clone(), value);
            }
        }
    }
    fields
}
