// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot consumption of identity-provider redirect parameters.
//!
//! After a completed provider round trip the redirect URL carries a fresh
//! credential pair plus informational flags. They are read once and stripped
//! from the URL, so processing the stripped URL again has no effect.

use url::Url;

/// Values carried on a post-login redirect URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParams {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Informational flags, display only.
    pub success: bool,
    pub error: bool,
    pub logout: bool,
}

impl RedirectParams {
    /// Whether the redirect carries a complete fresh credential pair.
    pub fn has_credentials(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }
}

/// Extract credential and flag parameters from a redirect URL.
///
/// Returns the parsed values and the URL with the consumed parameters
/// stripped. Unrelated query parameters survive. Token values are trimmed
/// of incidental whitespace picked up in transit.
pub fn consume(redirect_url: &str) -> Result<(RedirectParams, String), url::ParseError> {
    let mut url = Url::parse(redirect_url)?;

    let mut params = RedirectParams::default();
    let mut kept: Vec<(String, String)> = Vec::new();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "accessToken" => {
                params.access_token =
                    Some(value.trim().to_owned()).filter(|s| !s.is_empty());
            }
            "refreshToken" => {
                params.refresh_token =
                    Some(value.trim().to_owned()).filter(|s| !s.is_empty());
            }
            "success" => params.success = value == "true",
            "error" => params.error = value == "true",
            "logout" => params.logout = value == "true",
            _ => kept.push((key.into_owned(), value.into_owned())),
        }
    }

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok((params, url.as_str().to_owned()))
}

#[cfg(test)]
#[path = "redirect_tests.rs"]
mod tests;
