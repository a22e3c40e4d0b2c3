//! Mail output: compose events into messages and deliver them over SMTP.
//!
//! # Architecture
//!
//! ```text
//! input.rs -> compose.rs -> notify/ -> SMTP server
//! ```
//!
//! # Key Features
//!
//! - **Compose first, then send**: a whole batch is composed before the
//!   first connection is opened
//! - **Failure isolation**: a message that cannot be composed or delivered
//!   is logged and counted, the rest of the batch still goes out
//! - **Sequential**: one SMTP session per message, in event order

pub mod email;
pub mod envelope;
pub mod transport;

use crate::compose::{ComposedMessage, MessageComposer};
use crate::config::RuntimeConfig;
use crate::error::ConfigError;
use crate::event::Event;

pub use email::{DeliverySettings, MailSender, SmtpCredentials, TlsMode};
pub use envelope::Recipients;
pub use transport::{LettreConnector, SmtpConnector, SmtpSession};

/// Outcome of one [`MailOutput::emit`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitSummary {
    /// Messages accepted by the server.
    pub sent: usize,
    /// Messages composed but not delivered.
    pub failed: usize,
    /// Events that could not be composed.
    pub skipped: usize,
}

/// Turns batches of events into emails.
#[derive(Debug)]
pub struct MailOutput {
    composer: MessageComposer,
    sender: MailSender,
}

impl MailOutput {
    pub fn new(composer: MessageComposer, sender: MailSender) -> Self {
        Self { composer, sender }
    }

    /// Build the output from compiled configuration, using lettre.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the TLS parameters cannot be built.
    pub fn from_runtime(runtime: RuntimeConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(runtime.composer, MailSender::new(runtime.delivery)?))
    }

    pub fn composer(&self) -> &MessageComposer {
        &self.composer
    }

    pub fn sender(&self) -> &MailSender {
        &self.sender
    }

    /// Compose every event, then send each message in order.
    ///
    /// Never fails: per-message errors are logged at warn and counted.
    pub async fn emit(&self, events: &[Event]) -> EmitSummary {
        let mut summary = EmitSummary::default();

        let messages: Vec<ComposedMessage> = events
            .iter()
            .filter_map(|event| match self.composer.compose(event) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(
                        tag = %event.tag,
                        time = event.time,
                        error = %e,
                        "Failed to compose message, skipping event"
                    );
                    metrics::counter!("logmailer_compose_errors_total").increment(1);
                    summary.skipped += 1;
                    None
                }
            })
            .collect();

        let settings = self.sender.settings();
        for message in &messages {
            match self.sender.send(message).await {
                Ok(_) => {
                    summary.sent += 1;
                    metrics::counter!("logmailer_messages_sent_total").increment(1);
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        host = %settings.host,
                        port = settings.port,
                        subject = %message.subject,
                        body = %message.body,
                        error_kind = e.kind(),
                        error = %e,
                        "Failed to send email"
                    );
                    metrics::counter!(
                        "logmailer_delivery_errors_total",
                        "kind" => e.kind()
                    )
                    .increment(1);
                }
            }
        }

        tracing::info!(
            events = events.len(),
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Batch emitted"
        );
        summary
    }
}
