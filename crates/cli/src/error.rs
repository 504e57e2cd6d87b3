// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token lifecycle error taxonomy.
//!
//! Every backend-call failure is translated into one of these kinds at the
//! call site; raw transport errors never reach session state transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic kinds for token lifecycle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenErrorKind {
    /// Credential does not parse; expiry cannot be determined.
    DecodeMalformed,
    /// Backend rejected an access credential that was past its claim expiry.
    Expired,
    /// Backend rejected an access credential for some other reason
    /// (revoked, backend down). Cleanup is the same as for expiry.
    RejectedOther,
    /// The refresh credential itself was rejected.
    RefreshDenied,
    /// Refresh failed for a recoverable reason; the next tick retries.
    RefreshTransient,
}

impl TokenErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecodeMalformed => "DECODE_MALFORMED",
            Self::Expired => "EXPIRED",
            Self::RejectedOther => "REJECTED_OTHER",
            Self::RefreshDenied => "REFRESH_DENIED",
            Self::RefreshTransient => "REFRESH_TRANSIENT",
        }
    }

    /// Whether this kind ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Expired | Self::RejectedOther | Self::RefreshDenied)
    }
}

impl fmt::Display for TokenErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential failed to parse. Non-fatal by itself: expiry is evaluated by
/// the caller, and the user may still request a fresh refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Wrong segment count, bad base64, or unparseable claims.
    Malformed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed credential: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// The backend rejected the access credential.
///
/// The rejection reason is not observable from the response alone; callers
/// classify expired vs rejected-for-other-reason by decoding the credential
/// locally and comparing against corrected time.
#[derive(Debug, Clone)]
pub enum ValidationError {
    Unauthorized(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A refresh attempt failed.
#[derive(Debug, Clone)]
pub enum RefreshError {
    /// The refresh credential itself was rejected (401/403). Fatal to the
    /// session.
    Denied(String),
    /// Network or server trouble. State is left unchanged for retry.
    Transient(String),
}

impl RefreshError {
    pub fn kind(&self) -> TokenErrorKind {
        match self {
            Self::Denied(_) => TokenErrorKind::RefreshDenied,
            Self::Transient(_) => TokenErrorKind::RefreshTransient,
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied(msg) => write!(f, "denied: {msg}"),
            Self::Transient(msg) => write!(f, "transient: {msg}"),
        }
    }
}

impl std::error::Error for RefreshError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
