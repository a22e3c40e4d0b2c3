//! Runtime configuration with pre-parsed templates and addresses.

use super::types::{Config, InputConfig, MetricsConfig};
use super::validation;
use crate::compose::{BodyStrategy, MessageComposer};
use crate::error::ConfigError;
use crate::notify::{DeliverySettings, TlsMode};

/// Compiled configuration, ready to build a [`MailOutput`](crate::notify::MailOutput).
#[derive(Debug)]
pub struct RuntimeConfig {
    pub composer: MessageComposer,
    pub delivery: DeliverySettings,
    pub input: InputConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Compile the configuration for runtime.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] encountered. Use
    /// [`Config::validate`] to collect all of them.
    pub fn compile(&self) -> Result<RuntimeConfig, ConfigError> {
        let mail = &self.mail;

        let composer = MessageComposer::new(
            validation::subject_template(mail)?,
            mail.subject_out_keys.clone(),
            validation::body_strategy(mail)?,
            validation::key_roles(mail)?,
        );

        if matches!(composer.body_strategy(), BodyStrategy::Template { .. })
            && !mail.out_keys.is_empty()
        {
            tracing::warn!("both message and out_keys are set, using message");
        }
        if mail.time_format.is_some() && mail.time_key.is_none() {
            tracing::warn!("time_format is set without time_key and will not be used");
        }

        let credentials = validation::credentials(mail)?;
        let tls_mode = validation::tls_mode(mail)?;
        if credentials.is_none() && tls_mode != TlsMode::None {
            tracing::warn!(
                tls_mode = ?tls_mode,
                "TLS is only negotiated for authenticated sessions; set user and password to enable it"
            );
        }

        let delivery = DeliverySettings {
            host: mail.host.clone(),
            port: mail.port,
            domain: mail.domain.clone(),
            credentials,
            tls_mode,
            tls_verify: mail.tls_verify,
            from: validation::mailbox("from", &mail.from)?,
            recipients: validation::recipients(mail)?,
            date_zone: validation::date_zone(mail)?,
        };

        Ok(RuntimeConfig {
            composer,
            delivery,
            input: self.input.clone(),
            metrics: self.metrics.clone(),
        })
    }
}
