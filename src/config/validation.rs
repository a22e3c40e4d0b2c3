//! Fail-fast checks that turn raw configuration into validated parts.
//!
//! Each helper validates one concern. [`Config::validate`] runs all of them
//! and collects every error; [`Config::compile`](super::Config::compile)
//! uses the same helpers and stops at the first one.

use super::env::resolve_env_vars;
use super::secret::SecretString;
use super::types::{Config, MailConfig};
use crate::compose::{BodyStrategy, KeyRoles, TimeFormatter, Zone};
use crate::error::ConfigError;
use crate::notify::{Recipients, SmtpCredentials, TlsMode};
use crate::template::PositionalTemplate;
use chrono_tz::Tz;
use lettre::message::Mailbox;

/// Pick the body strategy. A `message` template wins over `out_keys`.
pub(crate) fn body_strategy(mail: &MailConfig) -> Result<BodyStrategy, ConfigError> {
    match mail.message.as_deref().filter(|m| !m.is_empty()) {
        Some(source) => {
            let template =
                PositionalTemplate::parse_for_keys("message", source, &mail.message_out_keys)?;
            Ok(BodyStrategy::Template {
                template,
                keys: mail.message_out_keys.clone(),
            })
        }
        None if !mail.out_keys.is_empty() => Ok(BodyStrategy::KeyValue {
            keys: mail.out_keys.clone(),
        }),
        None => Err(ConfigError::MissingBodyStrategy),
    }
}

pub(crate) fn subject_template(mail: &MailConfig) -> Result<PositionalTemplate, ConfigError> {
    PositionalTemplate::parse_for_keys("subject", &mail.subject, &mail.subject_out_keys)
}

/// Parse an IANA timezone name.
pub(crate) fn parse_zone(field: &str, name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>().map_err(|_| ConfigError::InvalidTimeZone {
        field: field.to_string(),
        zone: name.to_string(),
    })
}

pub(crate) fn key_roles(mail: &MailConfig) -> Result<KeyRoles, ConfigError> {
    let zone = match &mail.time_zone {
        Some(name) => Zone::Named(parse_zone("time_zone", name)?),
        None => Zone::Local,
    };
    let time_formatter = match (&mail.time_key, &mail.time_format) {
        (Some(_), Some(format)) => TimeFormatter::strftime(format, zone)?,
        _ => TimeFormatter::Raw,
    };
    Ok(KeyRoles {
        time_key: mail.time_key.clone(),
        tag_key: mail.tag_key.clone(),
        time_formatter,
    })
}

pub(crate) fn date_zone(mail: &MailConfig) -> Result<Option<Tz>, ConfigError> {
    mail.time_locale
        .as_deref()
        .map(|name| parse_zone("time_locale", name))
        .transpose()
}

/// Resolve credentials. User and password must be set together.
pub(crate) fn credentials(mail: &MailConfig) -> Result<Option<SmtpCredentials>, ConfigError> {
    let user = mail
        .user
        .as_deref()
        .map(resolve_env_vars)
        .transpose()
        .map_err(|e| ConfigError::ValidationError(format!("user: {}", e)))?;
    let password = mail
        .password
        .as_ref()
        .map(|p| resolve_env_vars(p.expose()))
        .transpose()
        .map_err(|e| ConfigError::ValidationError(format!("password: {}", e)))?;

    match (user, password) {
        (Some(user), Some(password)) => Ok(Some(SmtpCredentials {
            user,
            password: SecretString::new(password),
        })),
        (Some(_), None) => Err(ConfigError::ValidationError(
            "password required when user is set".to_string(),
        )),
        (None, Some(_)) => Err(ConfigError::ValidationError(
            "user required when password is set".to_string(),
        )),
        (None, None) => Ok(None),
    }
}

pub(crate) fn tls_mode(mail: &MailConfig) -> Result<TlsMode, ConfigError> {
    match (mail.use_starttls, mail.use_tls) {
        (true, true) => Err(ConfigError::ValidationError(
            "use_starttls and use_tls are mutually exclusive".to_string(),
        )),
        (true, false) => Ok(TlsMode::Starttls),
        (false, true) => Ok(TlsMode::Tls),
        (false, false) => Ok(TlsMode::None),
    }
}

pub(crate) fn mailbox(field: &str, address: &str) -> Result<Mailbox, ConfigError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| ConfigError::InvalidAddress {
            field: field.to_string(),
            address: address.to_string(),
            message: e.to_string(),
        })
}

fn mailboxes(field: &str, addresses: &[String]) -> Result<Vec<Mailbox>, ConfigError> {
    addresses.iter().map(|a| mailbox(field, a)).collect()
}

pub(crate) fn recipients(mail: &MailConfig) -> Result<Recipients, ConfigError> {
    Ok(Recipients {
        to: mailboxes("to", &mail.to)?,
        cc: mailboxes("cc", &mail.cc)?,
        bcc: mailboxes("bcc", &mail.bcc)?,
    })
}

impl Config {
    /// Validate the whole configuration, fail-fast.
    ///
    /// # Errors
    /// Returns every [`ConfigError`] found, not only the first one.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mail = &self.mail;
        let mut errors = Vec::new();

        if let Err(e) = body_strategy(mail) {
            errors.push(e);
        }
        if let Err(e) = subject_template(mail) {
            errors.push(e);
        }
        if let Err(e) = key_roles(mail) {
            errors.push(e);
        }
        if let Err(e) = date_zone(mail) {
            errors.push(e);
        }
        if let Err(e) = credentials(mail) {
            errors.push(e);
        }
        if let Err(e) = tls_mode(mail) {
            errors.push(e);
        }

        if let Err(e) = mailbox("from", &mail.from) {
            errors.push(e);
        }
        for (field, list) in [("to", &mail.to), ("cc", &mail.cc), ("bcc", &mail.bcc)] {
            for address in list {
                if let Err(e) = mailbox(field, address) {
                    errors.push(e);
                }
            }
        }

        if mail.host.trim().is_empty() {
            errors.push(ConfigError::ValidationError(
                "host must not be empty".to_string(),
            ));
        }
        if self.input.batch_size == 0 {
            errors.push(ConfigError::ValidationError(
                "input.batch_size must be greater than 0".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
