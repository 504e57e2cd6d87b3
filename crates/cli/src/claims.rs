// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access credential claims: unverified decode of the embedded payload.
//!
//! The credential is JWT-shaped (three dot-separated segments with a
//! base64url payload). Signature verification is the backend's job; this
//! module only reads the claims the client needs for countdown math.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::DecodeError;

/// Claims read from an access credential without contacting the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    /// Subject identifier (`sub`).
    pub subject: String,
    /// Absolute expiry, seconds since epoch (`exp`).
    pub expires_at_secs: i64,
}

/// Decode the claims embedded in an access credential.
///
/// Pure parse — no network. Expiry is a value, not an error: a credential
/// whose `exp` is in the past still decodes successfully.
pub fn decode(credential: &str) -> Result<AccessClaims, DecodeError> {
    let parts: Vec<&str> = credential.split('.').collect();
    if parts.len() != 3 {
        return Err(DecodeError::Malformed(format!(
            "expected 3 segments, got {}",
            parts.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| DecodeError::Malformed(format!("payload is not base64url: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&payload)
        .map_err(|e| DecodeError::Malformed(format!("claims are not JSON: {e}")))?;

    let expires_at_secs = claims
        .get("exp")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| DecodeError::Malformed("missing or non-numeric exp claim".to_owned()))?;
    let subject = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DecodeError::Malformed("missing sub claim".to_owned()))?
        .to_owned();

    Ok(AccessClaims { subject, expires_at_secs })
}

/// Whole seconds of validity left at corrected time `now_ms`, clamped at
/// zero: `max(0, floor(exp − now))`.
pub fn remaining_secs(claims: &AccessClaims, now_ms: i64) -> u64 {
    let diff_ms = claims.expires_at_secs.saturating_mul(1000).saturating_sub(now_ms);
    if diff_ms <= 0 {
        0
    } else {
        (diff_ms / 1000) as u64
    }
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
