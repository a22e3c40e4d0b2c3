//! Centralized error types for logmailer using thiserror.
//!
//! Configuration errors are fatal and surface before any event is handled.
//! Template, delivery and input errors are scoped to a single message or line.

use thiserror::Error;

/// Errors related to configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config file: {0}")]
    LoadError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("either out_keys or message must be configured")]
    MissingBodyStrategy,
    #[error(
        "{template} template has {placeholders} '%s' placeholder(s) but {keys} output key(s) are configured"
    )]
    PlaceholderMismatch {
        template: String,
        placeholders: usize,
        keys: usize,
    },
    #[error("invalid {template} template: {message}")]
    InvalidTemplate { template: String, message: String },
    #[error("invalid time_format '{format}'")]
    InvalidTimeFormat { format: String },
    #[error("invalid {field} timezone '{zone}'")]
    InvalidTimeZone { field: String, zone: String },
    #[error("invalid {field} address '{address}': {message}")]
    InvalidAddress {
        field: String,
        address: String,
        message: String,
    },
}

/// Errors related to template substitution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("value for slot {slot} of {template} template is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidEncoding {
        template: String,
        slot: usize,
        valid_up_to: usize,
    },
    #[error("{template} template expects {expected} value(s), got {actual}")]
    ArityMismatch {
        template: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors related to a single SMTP delivery.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("connection to {host}:{port} failed: {message}")]
    Connect {
        host: String,
        port: u16,
        message: String,
    },
    #[error("TLS negotiation failed: {0}")]
    Tls(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid envelope: {0}")]
    Envelope(String),
    #[error("send failed: {0}")]
    Send(String),
}

impl DeliveryError {
    /// Short label for the failing stage, used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Connect { .. } => "connect",
            DeliveryError::Tls(_) => "tls",
            DeliveryError::Auth(_) => "auth",
            DeliveryError::Envelope(_) => "envelope",
            DeliveryError::Send(_) => "send",
        }
    }
}

/// Errors related to reading events from the host input.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("invalid JSON event: {0}")]
    InvalidJson(String),
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}
