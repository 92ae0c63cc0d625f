//! Environment-variable parsing shared by the `from_env` constructors.

use std::str::FromStr;

use crate::error::CoreError;

/// Read `key`, falling back to `default` when unset or empty.
pub fn var_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Read and parse `key`, falling back to `default` when unset.
pub fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match parse_opt(key)? {
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

/// Read and parse `key`; `None` when unset or empty.
pub fn parse_opt<T: FromStr>(key: &str) -> Result<Option<T>, CoreError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value: '{v}'"))),
        _ => Ok(None),
    }
}

/// Read `key`, failing when unset or empty.
pub fn required(key: &str) -> Result<String, CoreError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(CoreError::Validation(format!("{key} must be set"))),
    }
}
