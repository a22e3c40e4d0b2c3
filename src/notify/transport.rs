//! SMTP session abstraction.
//!
//! Production code uses lettre's low-level [`AsyncSmtpConnection`]: one
//! connection per message, opened, used and closed by the caller. Tests
//! inject their own [`SmtpConnector`] to script server behavior.

use crate::error::DeliveryError;
use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::response::Response;

/// Opens SMTP sessions.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    /// Connect, read the greeting and send EHLO with `hello`.
    ///
    /// When `tls` is set the connection is wrapped in TLS before the
    /// greeting (implicit TLS).
    async fn connect(
        &self,
        host: &str,
        port: u16,
        hello: &ClientId,
        tls: Option<TlsParameters>,
    ) -> Result<Box<dyn SmtpSession>, DeliveryError>;
}

/// One open SMTP session.
#[async_trait]
pub trait SmtpSession: Send {
    /// Upgrade the session with STARTTLS and repeat EHLO.
    async fn starttls(&mut self, tls: TlsParameters, hello: &ClientId)
    -> Result<(), DeliveryError>;

    /// Authenticate with the PLAIN mechanism.
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DeliveryError>;

    /// Run one mail transaction and return the server's final reply.
    async fn send(&mut self, envelope: &Envelope, message: &[u8]) -> Result<String, DeliveryError>;

    /// Send QUIT and close the socket. Never fails.
    async fn close(&mut self);
}

/// Connector backed by lettre and tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct LettreConnector;

#[async_trait]
impl SmtpConnector for LettreConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        hello: &ClientId,
        tls: Option<TlsParameters>,
    ) -> Result<Box<dyn SmtpSession>, DeliveryError> {
        let connection = AsyncSmtpConnection::connect_tokio1(
            (host, port),
            None,
            hello,
            tls,
            None,
        )
        .await
        .map_err(|e| DeliveryError::Connect {
            host: host.to_string(),
            port,
            message: e.to_string(),
        })?;

        Ok(Box::new(LettreSession { inner: connection }))
    }
}

struct LettreSession {
    inner: AsyncSmtpConnection,
}

#[async_trait]
impl SmtpSession for LettreSession {
    async fn starttls(
        &mut self,
        tls: TlsParameters,
        hello: &ClientId,
    ) -> Result<(), DeliveryError> {
        self.inner
            .starttls(tls, hello)
            .await
            .map_err(|e| DeliveryError::Tls(e.to_string()))
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DeliveryError> {
        self.inner
            .auth(&[Mechanism::Plain], credentials)
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::Auth(e.to_string()))
    }

    async fn send(&mut self, envelope: &Envelope, message: &[u8]) -> Result<String, DeliveryError> {
        self.inner
            .send(envelope, message)
            .await
            .map(|response| format_response(&response))
            .map_err(|e| DeliveryError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        self.inner.abort().await;
    }
}

/// Render a reply as `<code> <text>`.
pub(crate) fn format_response(response: &Response) -> String {
    let text: Vec<&str> = response.message().collect();
    format!("{} {}", response.code(), text.join(" "))
}
