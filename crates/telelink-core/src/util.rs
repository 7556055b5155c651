//! Utility functions for telelink-core.

use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Last suffix handed out, so two identifiers never share one.
static LAST_IDENTIFIER_SUFFIX: AtomicU64 = AtomicU64::new(0);

/// Build a client identifier unique to this bring-up attempt.
///
/// The identifier is `prefix` followed by a time-derived decimal suffix: the
/// current Unix time in milliseconds, bumped forward when needed so that it is
/// strictly greater than every suffix handed out before in this process.
/// Brokers drop the older connection when two clients share an identifier,
/// so reuse across attempts is a real failure mode.
///
/// # Errors
///
/// Returns [`Error::Identifier`] if the prefix is empty or contains characters
/// outside `[0-9A-Za-z_-]`, or if the result would exceed `max_len` bytes.
///
/// # Example
///
/// ```
/// use telelink_core::util::create_client_identifier;
///
/// let first = create_client_identifier("thermo-", 64).unwrap();
/// let second = create_client_identifier("thermo-", 64).unwrap();
/// assert!(first.starts_with("thermo-"));
/// assert_ne!(first, second);
/// ```
pub fn create_client_identifier(prefix: &str, max_len: usize) -> Result<String> {
    validate_identifier_prefix(prefix)?;

    let now_ms = u64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
        .unwrap_or_default();
    let previous = LAST_IDENTIFIER_SUFFIX
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now_ms.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    let suffix = now_ms.max(previous + 1);

    let identifier = format!("{}{}", prefix, suffix);
    if identifier.len() > max_len {
        return Err(Error::Identifier(format!(
            "'{}' is {} bytes, limit is {}",
            identifier,
            identifier.len(),
            max_len
        )));
    }
    Ok(identifier)
}

/// Check an identifier prefix for characters brokers commonly reject.
pub fn validate_identifier_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::Identifier("prefix cannot be empty".to_string()));
    }
    if let Some(c) = prefix
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(Error::Identifier(format!(
            "prefix '{}' contains unsupported character {:?}",
            prefix, c
        )));
    }
    Ok(())
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
