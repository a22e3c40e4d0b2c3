//! logmailer - turn structured log events into plain-text email over SMTP.

pub mod cli;
pub mod compose;
pub mod config;
pub mod error;
pub mod event;
pub mod input;
pub mod metrics;
pub mod notify;
pub mod template;

// Re-export commonly used types
pub use cli::LogFormat;
pub use compose::{ComposedMessage, MessageComposer};
pub use event::{Event, FieldValue};
pub use metrics::{MetricsServer, register_metric_descriptions};
pub use notify::{EmitSummary, MailOutput, MailSender};
pub use template::PositionalTemplate;
