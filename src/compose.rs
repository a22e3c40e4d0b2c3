//! Message composition: turns one [`Event`] into a subject and a body.
//!
//! The subject is always rendered from a positional template. The body is
//! built with one of two strategies:
//!
//! - **key/value**: one `key: value` line per configured key
//! - **template**: positional substitution into the `message` template,
//!   followed by expansion of literal `\n` sequences
//!
//! Every key is resolved the same way, see [`resolve_value`].

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use chrono_tz::Tz;

use crate::error::{ConfigError, TemplateError};
use crate::event::Event;
use crate::template::{PositionalTemplate, expand_newline_escapes};

/// Timezone used to render event timestamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Zone {
    /// Process local timezone.
    Local,
    /// Explicit IANA timezone.
    Named(Tz),
}

/// Renders event timestamps for the configured time key.
///
/// Resolved once at configuration time and shared by every event.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeFormatter {
    /// Decimal epoch seconds.
    Raw,
    /// strftime pattern rendered in a timezone.
    Strftime { format: String, zone: Zone },
}

impl TimeFormatter {
    /// Build a strftime formatter, rejecting malformed patterns.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidTimeFormat`] if `format` contains an
    /// unknown or incomplete specifier.
    pub fn strftime(format: &str, zone: Zone) -> Result<Self, ConfigError> {
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::InvalidTimeFormat {
                format: format.to_string(),
            });
        }
        Ok(TimeFormatter::Strftime {
            format: format.to_string(),
            zone,
        })
    }

    /// Render an epoch-seconds timestamp.
    ///
    /// Timestamps outside chrono's range fall back to the raw decimal form.
    pub fn format(&self, time: i64) -> String {
        match self {
            TimeFormatter::Raw => time.to_string(),
            TimeFormatter::Strftime { format, zone } => {
                let Some(utc) = DateTime::from_timestamp(time, 0) else {
                    tracing::debug!(time, "Timestamp out of range, rendering raw value");
                    return time.to_string();
                };
                match zone {
                    Zone::Local => utc.with_timezone(&Local).format(format).to_string(),
                    Zone::Named(tz) => utc.with_timezone(tz).format(format).to_string(),
                }
            }
        }
    }
}

/// Keys with a special meaning during value resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRoles {
    /// Key that resolves to the formatted event timestamp.
    pub time_key: Option<String>,
    /// Key that resolves to the event tag.
    pub tag_key: String,
    pub time_formatter: TimeFormatter,
}

impl Default for KeyRoles {
    fn default() -> Self {
        Self {
            time_key: None,
            tag_key: "tag".to_string(),
            time_formatter: TimeFormatter::Raw,
        }
    }
}

/// Resolve the value of one output key for an event.
///
/// The time key wins over the tag key, which wins over a record lookup.
/// A missing record field resolves to an empty value.
pub fn resolve_value(key: &str, event: &Event, roles: &KeyRoles) -> Vec<u8> {
    if roles.time_key.as_deref() == Some(key) {
        return roles.time_formatter.format(event.time).into_bytes();
    }
    if key == roles.tag_key {
        return event.tag.as_bytes().to_vec();
    }
    event
        .field(key)
        .map(|value| value.to_text().into_owned())
        .unwrap_or_default()
}

fn resolve_all(keys: &[String], event: &Event, roles: &KeyRoles) -> Vec<Vec<u8>> {
    keys.iter()
        .map(|key| resolve_value(key, event, roles))
        .collect()
}

/// Render the key/value body: one `key: value` line per key, in order.
///
/// Values that are not valid UTF-8 are repaired with U+FFFD.
pub fn render_key_value_body(event: &Event, keys: &[String], roles: &KeyRoles) -> String {
    keys.iter()
        .map(|key| {
            let value = match String::from_utf8(resolve_value(key, event, roles)) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        valid_up_to = e.utf8_error().valid_up_to(),
                        "Invalid byte sequence in field value, replacing"
                    );
                    metrics::counter!(
                        "logmailer_encoding_recoveries_total",
                        "template" => "key_value"
                    )
                    .increment(1);
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            format!("{}: {}", key, value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the templated body and expand literal `\n` sequences.
///
/// # Errors
/// Returns a [`TemplateError`] if substitution still fails after the one
/// malformed-text recovery.
pub fn render_template_body(
    event: &Event,
    template: &PositionalTemplate,
    keys: &[String],
    roles: &KeyRoles,
) -> Result<String, TemplateError> {
    let mut values = resolve_all(keys, event, roles);
    let rendered = template.render(&mut values)?;
    Ok(expand_newline_escapes(&rendered))
}

/// Render the subject line.
///
/// # Errors
/// Returns a [`TemplateError`] if substitution still fails after the one
/// malformed-text recovery.
pub fn render_subject(
    event: &Event,
    template: &PositionalTemplate,
    keys: &[String],
    roles: &KeyRoles,
) -> Result<String, TemplateError> {
    let mut values = resolve_all(keys, event, roles);
    template.render(&mut values)
}

/// How the message body is built.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyStrategy {
    KeyValue {
        keys: Vec<String>,
    },
    Template {
        template: PositionalTemplate,
        keys: Vec<String>,
    },
}

/// Subject and body ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub subject: String,
    pub body: String,
}

/// Builds a [`ComposedMessage`] per event from pre-validated templates.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageComposer {
    subject: PositionalTemplate,
    subject_keys: Vec<String>,
    body: BodyStrategy,
    roles: KeyRoles,
}

impl MessageComposer {
    /// Create a composer from already validated parts.
    ///
    /// Use [`Config::compile`](crate::config::Config::compile) to build one
    /// from configuration.
    pub fn new(
        subject: PositionalTemplate,
        subject_keys: Vec<String>,
        body: BodyStrategy,
        roles: KeyRoles,
    ) -> Self {
        Self {
            subject,
            subject_keys,
            body,
            roles,
        }
    }

    pub fn body_strategy(&self) -> &BodyStrategy {
        &self.body
    }

    pub fn roles(&self) -> &KeyRoles {
        &self.roles
    }

    /// Compose the subject and body for one event.
    ///
    /// # Errors
    /// Returns a [`TemplateError`] if either template cannot be rendered.
    pub fn compose(&self, event: &Event) -> Result<ComposedMessage, TemplateError> {
        let body = match &self.body {
            BodyStrategy::KeyValue { keys } => render_key_value_body(event, keys, &self.roles),
            BodyStrategy::Template { template, keys } => {
                render_template_body(event, template, keys, &self.roles)?
            }
        };
        let subject = render_subject(event, &self.subject, &self.subject_keys, &self.roles)?;

        tracing::trace!(
            tag = %event.tag,
            subject_len = subject.len(),
            body_len = body.len(),
            "Message composed"
        );
        Ok(ComposedMessage { subject, body })
    }
}
