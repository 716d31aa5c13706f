//! Stateless, time-boxed host tokens.
//!
//! A token is `reverse(base64(host_id + "|" + unix_timestamp))`. It says which
//! host is calling; it does not say that the host is allowed to, which is the
//! control plane's admission check.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

/// Tokens older than this many seconds are rejected.
pub const MAX_TOKEN_AGE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64")]
    Encoding,

    #[error("token payload is malformed")]
    Malformed,

    #[error("token expired {age_secs}s ago")]
    Expired { age_secs: i64 },

    #[error("token is issued in the future")]
    FromFuture,
}

/// A decoded host token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostToken {
    pub host_id: String,
    pub issued_at: DateTime<Utc>,
}

/// Build a token for `host_id` stamped with `now`.
#[must_use]
pub fn issue(host_id: &str, now: DateTime<Utc>) -> String {
    let raw = format!("{host_id}|{}", now.timestamp());
    STANDARD.encode(raw).chars().rev().collect()
}

/// Decode a token without checking its age.
pub fn parse(token: &str) -> Result<HostToken, TokenError> {
    let forward: String = token.trim().chars().rev().collect();
    let raw = STANDARD
        .decode(forward)
        .map_err(|_| TokenError::Encoding)?;
    let text = String::from_utf8(raw).map_err(|_| TokenError::Malformed)?;
    let (host_id, ts) = text.rsplit_once('|').ok_or(TokenError::Malformed)?;
    if host_id.is_empty() {
        return Err(TokenError::Malformed);
    }
    let secs: i64 = ts.parse().map_err(|_| TokenError::Malformed)?;
    let issued_at = DateTime::from_timestamp(secs, 0).ok_or(TokenError::Malformed)?;
    Ok(HostToken {
        host_id: host_id.to_owned(),
        issued_at,
    })
}

/// Decode a token and enforce the age window in both directions.
pub fn validate(token: &str, now: DateTime<Utc>) -> Result<HostToken, TokenError> {
    let decoded = parse(token)?;
    let window = TimeDelta::seconds(MAX_TOKEN_AGE_SECS);
    let age = now - decoded.issued_at;
    if age > window {
        return Err(TokenError::Expired {
            age_secs: age.num_seconds(),
        });
    }
    if -age > window {
        return Err(TokenError::FromFuture);
    }
    Ok(decoded)
}
