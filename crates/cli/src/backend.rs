// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend API client: user-info, logout, refresh, server-time.
//!
//! Transport failures are translated into the lifecycle error taxonomy at
//! the call site so raw `reqwest` errors never reach session state.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{RefreshError, ValidationError};

/// Header carrying the refresh credential on the refresh request.
const REFRESH_HEADER: &str = "Refresh-Token";

/// Profile returned by the user-info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

/// Fresh credential pair from the refresh endpoint. Both values are always
/// replaced together.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTimeResponse {
    /// Milliseconds since epoch.
    server_time: i64,
}

/// HTTP client for the session backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Confirm identity and fetch the profile for an access credential.
    ///
    /// Any failure is `Unauthorized`; the caller classifies expired vs
    /// rejected-for-other-reason by decoding the credential locally.
    pub async fn user_info(&self, access: &str) -> Result<Profile, ValidationError> {
        let resp = self
            .http
            .get(format!("{}/api/user", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .send()
            .await
            .map_err(|e| ValidationError::Unauthorized(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(ValidationError::Unauthorized(format!("HTTP {}", resp.status())));
        }

        resp.json::<Profile>()
            .await
            .map_err(|e| ValidationError::Unauthorized(format!("invalid profile body: {e}")))
    }

    /// Notify the backend of a logout. Best-effort; the caller logs failures
    /// and proceeds with local cleanup regardless.
    pub async fn logout(&self, access: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(format!("{}/api/logout", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("logout returned HTTP {}", resp.status());
        }
        Ok(())
    }

    /// Exchange the refresh credential for a new pair.
    ///
    /// 401/403 means the refresh credential itself is rejected; anything
    /// else that goes wrong is transient.
    pub async fn refresh(&self, refresh: &str) -> Result<TokenPair, RefreshError> {
        let resp = self
            .http
            .post(format!("{}/api/refresh", self.base_url))
            .header(REFRESH_HEADER, refresh)
            .send()
            .await
            .map_err(|e| RefreshError::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(RefreshError::Denied(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RefreshError::Transient(format!("HTTP {status}: {body}")));
        }

        resp.json::<TokenPair>()
            .await
            .map_err(|e| RefreshError::Transient(format!("invalid token body: {e}")))
    }

    /// Current server time in milliseconds since epoch.
    pub async fn server_time_ms(&self) -> anyhow::Result<i64> {
        let resp = self.http.get(format!("{}/api/time", self.base_url)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("server time returned HTTP {}", resp.status());
        }
        let body: ServerTimeResponse = resp.json().await?;
        Ok(body.server_time)
    }

    /// Authorization URL that starts the provider login round trip.
    ///
    /// The core never follows it; the CLI prints it for the user to open.
    pub fn login_url(&self, provider: &str) -> String {
        format!("{}/oauth2/authorization/{provider}?prompt=login", self.base_url)
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
