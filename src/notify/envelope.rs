//! Envelope construction: headers, body framing, recipients.

use crate::compose::ComposedMessage;
use crate::error::DeliveryError;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use lettre::Address;
use lettre::address::Envelope;
use lettre::message::Mailbox;
use uuid::Uuid;

/// Configured To/Cc/Bcc lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
}

impl Recipients {
    /// Union of To, Cc and Bcc addresses, first occurrence wins.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = Vec::new();
        for mailbox in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !addresses.contains(&mailbox.email) {
                addresses.push(mailbox.email.clone());
            }
        }
        addresses
    }

    /// SMTP envelope for this recipient set.
    ///
    /// # Errors
    /// Returns [`DeliveryError::Envelope`] when there is no recipient.
    pub fn envelope(&self, from: &Mailbox) -> Result<Envelope, DeliveryError> {
        let to = self.addresses();
        if to.is_empty() {
            return Err(DeliveryError::Envelope("no recipients configured".to_string()));
        }
        Envelope::new(Some(from.email.clone()), to)
            .map_err(|e| DeliveryError::Envelope(e.to_string()))
    }
}

/// `<uuid@uuid>` from two independent v4 UUIDs.
pub fn message_id() -> String {
    format!("<{}@{}>", Uuid::new_v4(), Uuid::new_v4())
}

/// RFC 2822 date of `now` in `zone`, or in the process local zone.
///
/// Pure conversion: the process environment (`TZ`) is never read or written
/// beyond what `chrono::Local` itself does.
pub fn render_date(now: DateTime<Utc>, zone: Option<&Tz>) -> String {
    match zone {
        Some(tz) => now.with_timezone(tz).to_rfc2822(),
        None => now.with_timezone(&Local).to_rfc2822(),
    }
}

/// Header values for one message.
#[derive(Debug)]
pub struct EnvelopeHeaders<'a> {
    pub date: &'a str,
    pub from: &'a Mailbox,
    pub recipients: &'a Recipients,
    pub message_id: &'a str,
}

/// Build the message bytes: headers, blank line, body.
///
/// Every line ends with CRLF. Bare LF in the body is widened to CRLF; the
/// transport handles dot-stuffing and the terminating `CRLF.CRLF`.
pub fn build_message(headers: &EnvelopeHeaders<'_>, message: &ComposedMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + message.subject.len() + message.body.len());

    push_header(&mut out, "Date", headers.date);
    push_header(&mut out, "From", &headers.from.to_string());
    push_header(&mut out, "To", &join_mailboxes(&headers.recipients.to));
    push_header(&mut out, "Cc", &join_mailboxes(&headers.recipients.cc));
    push_header(&mut out, "Bcc", &join_mailboxes(&headers.recipients.bcc));
    push_header(&mut out, "Subject", &single_line(&message.subject));
    push_header(&mut out, "Message-Id", headers.message_id);
    push_header(&mut out, "Mime-Version", "1.0");
    push_header(&mut out, "Content-Type", "text/plain; charset=utf-8");
    out.extend_from_slice(b"\r\n");

    push_crlf_lines(&mut out, message.body.as_bytes());
    out
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn join_mailboxes(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A line break inside a header value would start a new header.
fn single_line(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn push_crlf_lines(out: &mut Vec<u8>, body: &[u8]) {
    let mut previous = 0u8;
    for &byte in body {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        previous = byte;
    }
}

/// Escape CR and LF so a whole envelope fits on one log line.
pub fn escape_for_log(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}
