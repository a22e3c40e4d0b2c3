//! SMTP delivery of composed messages.
//!
//! Each message gets its own connection:
//! connect → (STARTTLS → AUTH PLAIN when credentials are set) → send → close.
//! The session is closed on every path, success or failure.
//!
//! # Testability
//!
//! The connection is opened through an [`SmtpConnector`]:
//! - Production: [`LettreConnector`]
//! - Testing: a scripted connector injected with [`MailSender::with_connector`]

use super::envelope::{EnvelopeHeaders, Recipients, build_message, escape_for_log, message_id, render_date};
use super::transport::{LettreConnector, SmtpConnector, SmtpSession};
use crate::compose::ComposedMessage;
use crate::config::SecretString;
use crate::error::{ConfigError, DeliveryError};
use chrono::Utc;
use chrono_tz::Tz;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::TlsParameters;
use lettre::transport::smtp::extension::ClientId;
use std::sync::Arc;

/// TLS negotiation mode for authenticated sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain text session.
    #[default]
    None,
    /// Upgrade with STARTTLS after EHLO.
    Starttls,
    /// Implicit TLS from the first byte.
    Tls,
}

/// SMTP login, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub user: String,
    pub password: SecretString,
}

/// Immutable connection, auth and recipient settings.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub host: String,
    pub port: u16,
    /// EHLO domain.
    pub domain: String,
    /// Authenticated session when set, anonymous otherwise.
    pub credentials: Option<SmtpCredentials>,
    /// Only applied to authenticated sessions.
    pub tls_mode: TlsMode,
    pub tls_verify: bool,
    pub from: Mailbox,
    pub recipients: Recipients,
    /// Zone for the `Date` header; process local zone when `None`.
    pub date_zone: Option<Tz>,
}

/// Sends one [`ComposedMessage`] per SMTP session.
pub struct MailSender {
    settings: DeliverySettings,
    /// Present only when the settings call for TLS.
    tls: Option<TlsParameters>,
    connector: Arc<dyn SmtpConnector>,
}

impl std::fmt::Debug for MailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSender")
            .field("settings", &self.settings)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl MailSender {
    /// Create a sender backed by lettre.
    ///
    /// # Errors
    /// Returns [`ConfigError::ValidationError`] if the TLS parameters cannot
    /// be built.
    pub fn new(settings: DeliverySettings) -> Result<Self, ConfigError> {
        Self::with_connector(settings, Arc::new(LettreConnector))
    }

    /// Create a sender with a custom connector.
    ///
    /// # Errors
    /// Same as [`MailSender::new`].
    pub fn with_connector(
        settings: DeliverySettings,
        connector: Arc<dyn SmtpConnector>,
    ) -> Result<Self, ConfigError> {
        let tls = if settings.credentials.is_some() && settings.tls_mode != TlsMode::None {
            Some(build_tls_parameters(&settings)?)
        } else {
            None
        };

        Ok(Self {
            settings,
            tls,
            connector,
        })
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Deliver one message and return the server's final reply.
    ///
    /// # Errors
    /// Returns a [`DeliveryError`] for the step that failed. The session is
    /// closed before returning in every case.
    pub async fn send(&self, message: &ComposedMessage) -> Result<String, DeliveryError> {
        let hello = ClientId::Domain(self.settings.domain.clone());
        let implicit_tls = match self.settings.tls_mode {
            TlsMode::Tls => self.tls.clone(),
            _ => None,
        };

        let mut session = self
            .connector
            .connect(&self.settings.host, self.settings.port, &hello, implicit_tls)
            .await?;

        let result = self.transact(session.as_mut(), &hello, message).await;
        session.close().await;
        result
    }

    async fn transact(
        &self,
        session: &mut dyn SmtpSession,
        hello: &ClientId,
        message: &ComposedMessage,
    ) -> Result<String, DeliveryError> {
        match &self.settings.credentials {
            Some(credentials) => {
                if self.settings.tls_mode == TlsMode::Starttls {
                    let tls = self.tls.clone().ok_or_else(|| {
                        DeliveryError::Tls("TLS parameters unavailable".to_string())
                    })?;
                    session.starttls(tls, hello).await?;
                }
                session
                    .authenticate(&Credentials::new(
                        credentials.user.clone(),
                        credentials.password.expose().to_string(),
                    ))
                    .await?;
                tracing::debug!(user = %credentials.user, "SMTP session authenticated");
            }
            None => tracing::debug!("Anonymous SMTP session"),
        }

        let date = render_date(Utc::now(), self.settings.date_zone.as_ref());
        let id = message_id();
        let headers = EnvelopeHeaders {
            date: &date,
            from: &self.settings.from,
            recipients: &self.settings.recipients,
            message_id: &id,
        };
        let bytes = build_message(&headers, message);
        let envelope = self.settings.recipients.envelope(&self.settings.from)?;

        let response = session.send(&envelope, &bytes).await?;
        tracing::debug!(
            message_id = %id,
            envelope = %escape_for_log(&bytes),
            response = %response,
            "Email sent"
        );
        Ok(response)
    }
}

fn build_tls_parameters(settings: &DeliverySettings) -> Result<TlsParameters, ConfigError> {
    TlsParameters::builder(settings.host.clone())
        .dangerous_accept_invalid_certs(!settings.tls_verify)
        .build()
        .map_err(|e| ConfigError::ValidationError(format!("TLS configuration error: {}", e)))
}
