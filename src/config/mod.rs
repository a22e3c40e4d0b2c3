//! Configuration loading and validation for logmailer.
//!
//! This module handles loading the YAML configuration file,
//! validation, and compiling it into runtime types.

mod env;
mod runtime;
mod secret;
mod types;
mod validation;

pub use env::resolve_env_vars;
pub use runtime::RuntimeConfig;
pub use secret::SecretString;
pub use types::{
    Config, DEFAULT_CONFIG_PATH, DEFAULT_SUBJECT, InputConfig, MailConfig, MetricsConfig,
    split_comma_list,
};
