//! Log events as delivered by the host pipeline.
//!
//! An event is a tag, an epoch-seconds timestamp and a record of fields.
//! Field values are usually JSON scalars, but hosts that forward raw payloads
//! may hand over byte strings that are not valid UTF-8.

use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::InputError;

/// A single field value of an event record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Value decoded from JSON.
    Json(Value),
    /// Raw bytes, possibly not valid UTF-8.
    Raw(Vec<u8>),
}

impl FieldValue {
    /// Text form of the value, as bytes.
    ///
    /// Strings are rendered without quotes, `null` as an empty string,
    /// everything else in compact JSON form. Raw bytes are passed through.
    pub fn to_text(&self) -> Cow<'_, [u8]> {
        match self {
            FieldValue::Json(Value::String(s)) => Cow::Borrowed(s.as_bytes()),
            FieldValue::Json(Value::Null) => Cow::Borrowed(b""),
            FieldValue::Json(other) => Cow::Owned(other.to_string().into_bytes()),
            FieldValue::Raw(bytes) => Cow::Borrowed(bytes.as_slice()),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Json(Value::String(value))
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Raw(value)
    }
}

/// One log record handed to the output by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub tag: String,
    /// Epoch seconds.
    pub time: i64,
    pub record: BTreeMap<String, FieldValue>,
}

impl Event {
    pub fn new(tag: impl Into<String>, time: i64) -> Self {
        Self {
            tag: tag.into(),
            time,
            record: BTreeMap::new(),
        }
    }

    /// Builder-style helper to add one field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.record.insert(key.into(), value.into());
        self
    }

    /// Look up a field value.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.record.get(key)
    }

    /// Parse one NDJSON line of the form
    /// `{"tag": "app.log", "time": 1000, "record": {"msg": "hello"}}`.
    ///
    /// Bytes that are not valid UTF-8 are replaced with U+FFFD before
    /// decoding, so the event survives with the repaired text.
    ///
    /// # Errors
    /// Returns [`InputError::InvalidJson`] if the line is not a valid event.
    pub fn from_json_line(line: &[u8]) -> Result<Self, InputError> {
        #[derive(Deserialize)]
        struct RawEvent {
            tag: String,
            time: i64,
            #[serde(default)]
            record: serde_json::Map<String, Value>,
        }

        let raw: RawEvent = match std::str::from_utf8(line) {
            Ok(text) => serde_json::from_str(text),
            Err(e) => {
                tracing::warn!(
                    valid_up_to = e.valid_up_to(),
                    "Invalid byte sequence in input line, replacing"
                );
                metrics::counter!(
                    "logmailer_encoding_recoveries_total",
                    "template" => "input"
                )
                .increment(1);
                serde_json::from_str(&String::from_utf8_lossy(line))
            }
        }
        .map_err(|e| InputError::InvalidJson(e.to_string()))?;

        Ok(Event {
            tag: raw.tag,
            time: raw.time,
            record: raw
                .record
                .into_iter()
                .map(|(k, v)| (k, FieldValue::Json(v)))
                .collect(),
        })
    }
}
