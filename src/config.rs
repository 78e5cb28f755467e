use std::env;
use std::path::PathBuf;

use crate::error::TrackerError;

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_DATABASE_PATH: &str = "mutasi.db";
const DEFAULT_NOTION_API_URL: &str = "https://api.notion.com";
const DEFAULT_BANK_SENDERS: &[&str] = &["bca@bca.co.id", "noreply.livin@bankmandiri.co.id"];

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub accept_invalid_certs: bool,
    pub senders: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub api_key: String,
    pub database_id: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub imap: ImapConfig,
    pub notion: NotionConfig,
    pub database_path: PathBuf,
}

impl AppConfig {
    /// Reads the full configuration from the process environment.
    pub fn from_env() -> Result<Self, TrackerError> {
        let port = match optional_var("IMAP_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| TrackerError::Config("IMAP_PORT".to_string()))?,
            None => DEFAULT_IMAP_PORT,
        };
        let senders = optional_var("BANK_SENDERS")
            .map(|raw| parse_senders(&raw))
            .filter(|senders| !senders.is_empty())
            .unwrap_or_else(default_senders);

        Ok(Self {
            imap: ImapConfig {
                host: required_var("IMAP_HOST")?,
                port,
                user: required_var("IMAP_USER")?,
                password: required_var("IMAP_PASSWORD")?,
                accept_invalid_certs: optional_var("IMAP_ACCEPT_INVALID_CERTS")
                    .map(|raw| parse_enabled_flag(&raw))
                    .unwrap_or(false),
                senders,
            },
            notion: NotionConfig {
                api_key: required_var("NOTION_API_KEY")?,
                database_id: required_var("NOTION_DATABASE_ID")?,
                api_url: optional_var("NOTION_API_URL")
                    .unwrap_or_else(|| DEFAULT_NOTION_API_URL.to_string()),
            },
            database_path: optional_var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
        })
    }
}

fn required_var(name: &str) -> Result<String, TrackerError> {
    optional_var(name).ok_or_else(|| TrackerError::Config(name.to_string()))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_senders(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|sender| !sender.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn default_senders() -> Vec<String> {
    DEFAULT_BANK_SENDERS.iter().map(|s| (*s).to_string()).collect()
}

fn parse_enabled_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}
