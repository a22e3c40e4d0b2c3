//! Core configuration types and loading.

use super::secret::SecretString;
use crate::error::ConfigError;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/logmailer/config.yaml";

/// Subject used when none is configured.
pub const DEFAULT_SUBJECT: &str = "logmailer notification";

/// Main configuration structure for logmailer.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Message composition and SMTP delivery settings.
    pub mail: MailConfig,
    /// Event input batching.
    #[serde(default)]
    pub input: InputConfig,
    /// Metrics exposition configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Composition and delivery settings.
///
/// Every key list accepts either a comma-joined string (`"a,b"`) or a YAML
/// sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// Keys rendered as `key: value` lines when no `message` is set.
    #[serde(default, deserialize_with = "comma_list")]
    pub out_keys: Vec<String>,
    /// Body template with positional `%s` placeholders.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "comma_list")]
    pub message_out_keys: Vec<String>,

    /// Key that resolves to the event timestamp.
    #[serde(default)]
    pub time_key: Option<String>,
    /// strftime pattern for the time key; raw epoch seconds when unset.
    #[serde(default)]
    pub time_format: Option<String>,
    /// Timezone for `time_format` (process local zone when unset).
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Key that resolves to the event tag.
    #[serde(default = "default_tag_key")]
    pub tag_key: String,

    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// EHLO domain.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// SMTP user (supports `${ENV_VAR}` substitution).
    #[serde(default)]
    pub user: Option<String>,
    /// SMTP password (supports `${ENV_VAR}` substitution).
    #[serde(default)]
    pub password: Option<SecretString>,

    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default, deserialize_with = "comma_list")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "comma_list")]
    pub cc: Vec<String>,
    #[serde(default, deserialize_with = "comma_list")]
    pub bcc: Vec<String>,

    /// Subject template with positional `%s` placeholders.
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default, deserialize_with = "comma_list")]
    pub subject_out_keys: Vec<String>,

    #[serde(default)]
    pub use_starttls: bool,
    #[serde(default)]
    pub use_tls: bool,
    /// Verify the server certificate when TLS is used.
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    /// Timezone for the `Date` header (process local zone when unset).
    #[serde(default)]
    pub time_locale: Option<String>,
}

/// Batching of events read from the input stream.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Maximum number of events per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// A non-empty batch is flushed after this long without new events.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
        }
    }
}

/// Metrics exposition configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics exposition is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Port to expose metrics on (default: 9090).
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_tag_key() -> String {
    "tag".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_domain() -> String {
    "localdomain".to_string()
}

fn default_from() -> String {
    "localhost@localdomain".to_string()
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

pub(crate) fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_metrics_port() -> u16 {
    9090
}

/// Split a comma-joined list, trimming entries and dropping empty ones.
pub fn split_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawList {
        Joined(String),
        Items(Vec<String>),
    }

    Ok(match Option::<RawList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(RawList::Joined(joined)) => split_comma_list(&joined),
        Some(RawList::Items(items)) => items
            .iter()
            .flat_map(|item| split_comma_list(item))
            .collect(),
    })
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// # Errors
    /// Returns [`ConfigError::LoadError`] if the file cannot be read.
    /// Returns [`ConfigError::ValidationError`] if the YAML is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    /// Returns [`ConfigError::ValidationError`] if the YAML is invalid.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}
