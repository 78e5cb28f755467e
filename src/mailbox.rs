use std::net::TcpStream;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info};

use crate::config::ImapConfig;
use crate::error::TrackerError;

/// Source of candidate messages for one ingestion pass.
///
/// The protocol's search predicate is day-granular; implementations return
/// every message from the watermark's day onward and the pipeline applies the
/// exact sub-day timestamp filter itself.
pub trait Mailbox {
    fn fetch_candidates(&mut self, since: NaiveDate) -> Result<Vec<Vec<u8>>, TrackerError>;
}

/// IMAP INBOX filtered to the configured bank sender addresses.
pub struct ImapMailbox {
    session: imap::Session<TlsStream<TcpStream>>,
    senders: Vec<String>,
}

impl ImapMailbox {
    pub fn connect(config: &ImapConfig) -> Result<Self, TrackerError> {
        let tls = TlsConnector::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        let client = imap::connect(
            (config.host.as_str(), config.port),
            config.host.as_str(),
            &tls,
        )?;
        let mut session = client
            .login(config.user.as_str(), config.password.as_str())
            .map_err(|(err, _client)| err)?;
        session.select("INBOX")?;
        info!(host = %config.host, "mailbox connection established");
        Ok(Self {
            session,
            senders: config.senders.clone(),
        })
    }
}

impl Mailbox for ImapMailbox {
    fn fetch_candidates(&mut self, since: NaiveDate) -> Result<Vec<Vec<u8>>, TrackerError> {
        let query = search_query(since, &self.senders);
        debug!(%query, "searching mailbox");
        let mut ids: Vec<u32> = self.session.search(&query)?.into_iter().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort_unstable();
        let sequence = ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let messages = self.session.fetch(sequence, "RFC822")?;
        Ok(messages
            .iter()
            .filter_map(|message| message.body().map(<[u8]>::to_vec))
            .collect())
    }
}

impl Drop for ImapMailbox {
    fn drop(&mut self) {
        let _ = self.session.logout();
    }
}

/// `SINCE` takes only a date, so the query over-fetches the watermark's whole
/// day; sender filters are folded into nested `OR` terms.
fn search_query(since: NaiveDate, senders: &[String]) -> String {
    let mut query = format!("SINCE {}", since.format("%d-%b-%Y"));
    let mut sender_expr: Option<String> = None;
    for sender in senders.iter().rev() {
        let from = format!("FROM \"{sender}\"");
        sender_expr = Some(match sender_expr {
            Some(rest) => format!("OR {from} {rest}"),
            None => from,
        });
    }
    if let Some(expr) = sender_expr {
        query.push(' ');
        query.push_str(&expr);
    }
    query
}

/// The parts of a raw message the ingestion pipeline cares about.
#[derive(Debug)]
pub struct FetchedEmail {
    pub subject: String,
    pub html_body: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

impl FetchedEmail {
    pub fn parse(raw: &[u8]) -> Result<Self, TrackerError> {
        let mail = parse_mail(raw)?;
        let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
        let received_at = mail
            .headers
            .get_first_value("Date")
            .and_then(|value| mailparse::dateparse(&value).ok())
            .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single());
        let html_body = extract_html_body(&mail);
        Ok(Self {
            subject,
            html_body,
            received_at,
        })
    }
}

/// First `text/html` part, depth-first. Plain-text-only messages yield
/// nothing; the rule patterns are written against the HTML rendering.
fn extract_html_body(mail: &ParsedMail) -> Option<String> {
    if mail.ctype.mimetype.eq_ignore_ascii_case("text/html") {
        if let Ok(body) = mail.get_body() {
            return Some(body);
        }
    }
    mail.subparts.iter().find_map(extract_html_body)
}
