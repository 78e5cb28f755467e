use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Field name whose captured value feeds the description template.
pub const DESCRIPTION_TARGET_FIELD: &str = "description_target";
/// Field name whose captured value feeds the amount normalizer.
pub const AMOUNT_FIELD: &str = "amount";

const DESCRIPTION_PLACEHOLDER: &str = "{{description_target}}";
const DEFAULT_RULES_JSON: &str = include_str!("../rules/parser_rules.json");

/// Direction of money relative to the account owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flow {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl Flow {
    pub fn as_str(self) -> &'static str {
        match self {
            Flow::In => "IN",
            Flow::Out => "OUT",
        }
    }

    pub fn from_db(raw: &str) -> Option<Self> {
        match raw {
            "IN" => Some(Flow::In),
            "OUT" => Some(Flow::Out),
            _ => None,
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk shape of one extraction rule.
#[derive(Debug, Deserialize)]
struct RuleSpec {
    bank: String,
    flow: Flow,
    subjects: Vec<String>,
    #[serde(rename = "type")]
    tx_type: String,
    patterns: HashMap<String, String>,
    required_fields: Vec<String>,
    description: String,
}

/// A compiled extraction rule. Declaration order is the priority order:
/// more specific subject/pattern combinations must be listed before generic
/// ones that would otherwise over-match.
#[derive(Debug)]
pub struct ParserRule {
    pub bank: String,
    pub flow: Flow,
    subjects: Vec<String>,
    pub tx_type: String,
    pub patterns: Vec<(String, Regex)>,
    pub required_fields: Vec<String>,
    pub description: String,
}

impl ParserRule {
    fn compile(spec: RuleSpec) -> Result<Self, TrackerError> {
        let mut patterns = Vec::with_capacity(spec.patterns.len());
        for (field, pattern) in spec.patterns {
            let regex = Regex::new(&pattern).map_err(|source| TrackerError::RulePattern {
                rule: format!("{}/{}", spec.bank, spec.tx_type),
                field: field.clone(),
                source,
            })?;
            patterns.push((field, regex));
        }
        Ok(Self {
            bank: spec.bank,
            flow: spec.flow,
            subjects: spec.subjects.iter().map(|s| s.to_lowercase()).collect(),
            tx_type: spec.tx_type,
            patterns,
            required_fields: spec.required_fields,
            description: spec.description,
        })
    }

    /// True when any rule subject is a substring of the (already lowercased)
    /// message subject.
    pub(crate) fn matches_subject(&self, subject_lower: &str) -> bool {
        self.subjects.iter().any(|s| subject_lower.contains(s))
    }

    pub(crate) fn render_description(&self, fields: &HashMap<String, String>) -> String {
        let target = fields
            .get(DESCRIPTION_TARGET_FIELD)
            .map(String::as_str)
            .unwrap_or("");
        self.description.replace(DESCRIPTION_PLACEHOLDER, target)
    }
}

/// The embedded rule set shipped with the crate: BCA QRIS/Payment, BCA
/// Transfer, Mandiri Transfer, Mandiri Top-up/Payment, in that order.
pub fn default_rules() -> Result<Vec<ParserRule>, TrackerError> {
    parse_rules(DEFAULT_RULES_JSON)
}

/// Compiles a JSON rules document, preserving declaration order.
pub fn parse_rules(json: &str) -> Result<Vec<ParserRule>, TrackerError> {
    let specs: Vec<RuleSpec> = serde_json::from_str(json)?;
    specs.into_iter().map(ParserRule::compile).collect()
}

/// Loads and compiles a rules document from an external file.
pub fn load_rules_file(path: &Path) -> Result<Vec<ParserRule>, TrackerError> {
    parse_rules(&fs::read_to_string(path)?)
}
