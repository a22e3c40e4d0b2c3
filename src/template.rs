//! Positional `%s` templates for subjects and message bodies.
//!
//! Templates are parsed once at configuration time into a list of literal
//! segments and numbered slots. Rendering fills the slots in order with the
//! resolved field values.
//!
//! # Syntax
//!
//! - `%s` is a placeholder, filled positionally
//! - `%%` renders a literal `%`
//! - any other `%` sequence is rejected at configuration time
//!
//! # Malformed text
//!
//! Field values arrive as bytes and may not be valid UTF-8. When a slot value
//! fails to decode, [`PositionalTemplate::render`] replaces the invalid
//! sequences with U+FFFD in place, logs a diagnostic and renders once more.

use crate::error::{ConfigError, TemplateError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(usize),
}

/// A parsed template with positional `%s` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalTemplate {
    /// Template name used in errors and diagnostics ("subject", "message").
    name: String,
    source: String,
    segments: Vec<Segment>,
    placeholders: usize,
}

impl PositionalTemplate {
    /// Parse a template source.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidTemplate`] on a `%` sequence other than
    /// `%s` or `%%`.
    pub fn parse(name: &str, source: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut placeholders = 0;
        let mut chars = source.char_indices();

        while let Some((pos, c)) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some((_, 's')) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(placeholders));
                    placeholders += 1;
                }
                Some((_, '%')) => literal.push('%'),
                Some((_, other)) => {
                    return Err(ConfigError::InvalidTemplate {
                        template: name.to_string(),
                        message: format!(
                            "unsupported format sequence '%{}' at byte {} (only %s and %% are allowed)",
                            other, pos
                        ),
                    });
                }
                None => {
                    return Err(ConfigError::InvalidTemplate {
                        template: name.to_string(),
                        message: "template ends with a lone '%'".to_string(),
                    });
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            segments,
            placeholders,
        })
    }

    /// Parse a template and check its placeholder count against its keys.
    ///
    /// # Errors
    /// Returns [`ConfigError::PlaceholderMismatch`] if the number of `%s`
    /// placeholders differs from `keys.len()`.
    pub fn parse_for_keys(name: &str, source: &str, keys: &[String]) -> Result<Self, ConfigError> {
        let template = Self::parse(name, source)?;
        if template.placeholders != keys.len() {
            return Err(ConfigError::PlaceholderMismatch {
                template: name.to_string(),
                placeholders: template.placeholders,
                keys: keys.len(),
            });
        }
        Ok(template)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of `%s` placeholders.
    pub fn placeholder_count(&self) -> usize {
        self.placeholders
    }

    /// Substitute values into the slots, without any recovery.
    ///
    /// # Errors
    /// - [`TemplateError::ArityMismatch`] if `values` does not have one entry per slot
    /// - [`TemplateError::InvalidEncoding`] if a value is not valid UTF-8
    pub fn substitute<V: AsRef<[u8]>>(&self, values: &[V]) -> Result<String, TemplateError> {
        if values.len() != self.placeholders {
            return Err(TemplateError::ArityMismatch {
                template: self.name.clone(),
                expected: self.placeholders,
                actual: values.len(),
            });
        }

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(index) => {
                    let bytes = values[*index].as_ref();
                    let text = std::str::from_utf8(bytes).map_err(|e| {
                        TemplateError::InvalidEncoding {
                            template: self.name.clone(),
                            slot: *index,
                            valid_up_to: e.valid_up_to(),
                        }
                    })?;
                    out.push_str(text);
                }
            }
        }
        Ok(out)
    }

    /// Substitute values, recovering once from malformed text.
    ///
    /// On [`TemplateError::InvalidEncoding`] every value is scrubbed in place
    /// and the substitution is attempted exactly once more. Callers holding
    /// `values` afterwards see the repaired text.
    pub fn render(&self, values: &mut [Vec<u8>]) -> Result<String, TemplateError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.substitute(&*values) {
                Err(TemplateError::InvalidEncoding { slot, valid_up_to, .. }) if attempt == 1 => {
                    tracing::warn!(
                        template = %self.name,
                        slot,
                        valid_up_to,
                        "Invalid byte sequence in substituted value, replacing and retrying"
                    );
                    metrics::counter!(
                        "logmailer_encoding_recoveries_total",
                        "template" => self.name.clone()
                    )
                    .increment(1);
                    for value in values.iter_mut() {
                        scrub(value);
                    }
                }
                other => return other,
            }
        }
    }
}

/// Replace invalid UTF-8 sequences with U+FFFD in place.
///
/// Returns `true` if anything was replaced.
pub fn scrub(value: &mut Vec<u8>) -> bool {
    if std::str::from_utf8(value).is_ok() {
        return false;
    }
    let repaired = String::from_utf8_lossy(value).into_owned();
    *value = repaired.into_bytes();
    true
}

/// Replace the literal two-character sequence `\n` with a newline.
pub fn expand_newline_escapes(text: &str) -> String {
    text.replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_counts_placeholders() {
        let t = PositionalTemplate::parse("message", "%s says %s").unwrap();
        assert_eq!(t.placeholder_count(), 2);
        assert_eq!(t.name(), "message");
        assert_eq!(t.source(), "%s says %s");
    }

    #[test]
    fn parse_template_without_placeholders() {
        let t = PositionalTemplate::parse("subject", "logmailer notification").unwrap();
        assert_eq!(t.placeholder_count(), 0);
        assert_eq!(
            t.substitute::<Vec<u8>>(&[]).unwrap(),
            "logmailer notification"
        );
    }

    #[test]
    fn parse_percent_escape_is_not_a_placeholder() {
        let t = PositionalTemplate::parse("subject", "disk at %s%% on %s").unwrap();
        assert_eq!(t.placeholder_count(), 2);
        assert_eq!(t.substitute(&["95", "db-01"]).unwrap(), "disk at 95% on db-01");
    }

    #[test]
    fn parse_rejects_unknown_sequence() {
        let err = PositionalTemplate::parse("message", "value: %d").unwrap_err();
        match err {
            ConfigError::InvalidTemplate { template, message } => {
                assert_eq!(template, "message");
                assert!(message.contains("%d"), "got: {}", message);
            }
            e => panic!("Expected InvalidTemplate, got {:?}", e),
        }
    }

    #[test]
    fn parse_rejects_trailing_percent() {
        let result = PositionalTemplate::parse("subject", "100%");
        assert!(matches!(result, Err(ConfigError::InvalidTemplate { .. })));
    }

    #[test]
    fn parse_for_keys_accepts_matching_count() {
        let t = PositionalTemplate::parse_for_keys("message", "%s/%s", &keys(&["a", "b"]));
        assert!(t.is_ok());
    }

    #[test]
    fn parse_for_keys_rejects_mismatch() {
        for (source, names) in [
            ("%s", vec![]),
            ("%s %s", vec!["a"]),
            ("no placeholders", vec!["a"]),
            ("%s", vec!["a", "b"]),
        ] {
            let err = PositionalTemplate::parse_for_keys("subject", source, &keys(&names))
                .unwrap_err();
            match err {
                ConfigError::PlaceholderMismatch {
                    template,
                    placeholders,
                    keys,
                } => {
                    assert_eq!(template, "subject");
                    assert_eq!(keys, names.len());
                    assert_ne!(placeholders, keys);
                }
                e => panic!("Expected PlaceholderMismatch for {:?}, got {:?}", source, e),
            }
        }
    }

    #[test]
    fn substitute_fills_slots_in_order() {
        let t = PositionalTemplate::parse("message", "%s says %s").unwrap();
        assert_eq!(t.substitute(&["app.log", "hello"]).unwrap(), "app.log says hello");
    }

    #[test]
    fn substitute_does_not_interpret_percent_in_values() {
        let t = PositionalTemplate::parse("message", "[%s]").unwrap();
        assert_eq!(t.substitute(&["50%s done"]).unwrap(), "[50%s done]");
    }

    #[test]
    fn substitute_reports_invalid_encoding() {
        let t = PositionalTemplate::parse("message", "%s-%s").unwrap();
        let err = t
            .substitute(&[b"ok".to_vec(), vec![b'a', 0xff, b'b']])
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::InvalidEncoding {
                template: "message".to_string(),
                slot: 1,
                valid_up_to: 1,
            }
        );
    }

    #[test]
    fn substitute_reports_arity_mismatch() {
        let t = PositionalTemplate::parse("message", "%s-%s").unwrap();
        let err = t.substitute(&["only one"]).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::ArityMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn render_recovers_from_invalid_encoding() {
        let t = PositionalTemplate::parse("message", "user=%s msg=%s").unwrap();
        let mut values = vec![b"alice".to_vec(), vec![b'h', 0xc3, b'i']];

        let rendered = t.render(&mut values).unwrap();

        assert_eq!(rendered, "user=alice msg=h\u{FFFD}i");
        // The caller's values now hold the repaired text.
        assert_eq!(values[1], "h\u{FFFD}i".as_bytes());
        assert_eq!(values[0], b"alice");
    }

    #[test]
    fn render_recovery_logs_template_and_slot() {
        let t = PositionalTemplate::parse("subject", "[%s] %s").unwrap();
        let mut values = vec![b"app".to_vec(), vec![b'x', 0xff]];

        let logs = crate::test_support::capture_logs(|| {
            t.render(&mut values).unwrap();
        });

        assert!(
            logs.contains("Invalid byte sequence in substituted value, replacing and retrying"),
            "logs: {}",
            logs
        );
        assert!(logs.contains("WARN"), "logs: {}", logs);
        assert!(logs.contains("template=subject"), "logs: {}", logs);
        assert!(logs.contains("slot=1"), "logs: {}", logs);
    }

    #[test]
    fn render_valid_text_logs_nothing() {
        let t = PositionalTemplate::parse("message", "%s").unwrap();
        let mut values = vec![b"fine".to_vec()];

        let logs = crate::test_support::capture_logs(|| {
            t.render(&mut values).unwrap();
        });

        assert!(logs.is_empty(), "logs: {}", logs);
    }

    #[test]
    fn render_propagates_other_errors() {
        let t = PositionalTemplate::parse("message", "%s").unwrap();
        let mut values: Vec<Vec<u8>> = vec![];
        let err = t.render(&mut values).unwrap_err();
        assert!(matches!(err, TemplateError::ArityMismatch { .. }));
    }

    #[test]
    fn scrub_leaves_valid_text_alone() {
        let mut value = "héllo".as_bytes().to_vec();
        assert!(!scrub(&mut value));
        assert_eq!(value, "héllo".as_bytes());
    }

    #[test]
    fn scrub_replaces_invalid_sequences() {
        let mut value = vec![0xff, b'x', 0xfe];
        assert!(scrub(&mut value));
        assert_eq!(value, "\u{FFFD}x\u{FFFD}".as_bytes());
    }

    #[test]
    fn expand_newline_escapes_converts_literal_sequences() {
        assert_eq!(expand_newline_escapes(r"line1\nline2"), "line1\nline2");
        assert_eq!(expand_newline_escapes("no escapes"), "no escapes");
        assert_eq!(expand_newline_escapes("real\nnewline"), "real\nnewline");
    }
}
