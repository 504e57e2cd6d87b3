// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: bootstrap, countdown, proactive refresh, logout.
//!
//! One manager per process. The countdown re-derives remaining validity from
//! the stored credential every second — there is no decrementing counter to
//! drift away from the claim.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendClient, Profile};
use crate::claims;
use crate::clock::ClockSync;
use crate::error::{RefreshError, TokenErrorKind, ValidationError};
use crate::redirect;
use crate::store::CredentialStore;

/// Default low-water mark: seconds of remaining validity below which a
/// proactive refresh starts.
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 10;

/// Countdown cadence.
const TICK: Duration = Duration::from_secs(1);

/// Lifecycle states of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Bootstrapping,
    Unauthenticated,
    Authenticated,
    RefreshingInFlight,
}

/// Point-in-time session snapshot, re-derived on every countdown tick.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Session {
    pub state: SessionState,
    pub profile: Option<Profile>,
    pub remaining_secs: u64,
    pub last_error: Option<TokenErrorKind>,
}

impl Session {
    /// Identity has been confirmed by the backend and not yet torn down.
    pub fn authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated | SessionState::RefreshingInFlight)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Bootstrapping,
            profile: None,
            remaining_secs: 0,
            last_error: None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// Explicit user action.
    Requested,
    /// The access credential reached zero and the second check confirmed it.
    Expired,
    /// The refresh credential was rejected by the backend.
    RefreshDenied,
}

/// Events broadcast by the session manager.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Identity confirmed; the countdown is running.
    Authenticated { profile: Profile },
    /// Countdown tick while authenticated.
    Countdown { remaining_secs: u64 },
    /// A refresh completed and the stored pair was replaced.
    Refreshed { remaining_secs: u64 },
    /// A refresh attempt failed.
    RefreshFailed { kind: TokenErrorKind, error: String },
    /// The session ended.
    LoggedOut { reason: LogoutReason },
}

/// The lifecycle orchestrator.
///
/// Owns the credential store, the backend client, the measured clock offset,
/// the single active countdown task, and the single-flight refresh guard.
pub struct SessionManager {
    store: CredentialStore,
    backend: BackendClient,
    clock: Arc<ClockSync>,
    refresh_threshold_secs: u64,
    session: RwLock<Session>,
    event_tx: broadcast::Sender<SessionEvent>,
    /// Token for the single active countdown task; starting a new countdown
    /// always cancels the previous one first.
    countdown: Mutex<Option<CancellationToken>>,
    /// Single-flight guard shared by the low-water trigger and manual
    /// refresh requests.
    refresh_inflight: AtomicBool,
}

impl SessionManager {
    /// Create a manager. No network activity happens until [`bootstrap`].
    ///
    /// [`bootstrap`]: SessionManager::bootstrap
    pub fn new(
        store: CredentialStore,
        backend: BackendClient,
        refresh_threshold_secs: u64,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            backend,
            clock: Arc::new(ClockSync::default()),
            refresh_threshold_secs,
            session: RwLock::new(Session::default()),
            event_tx,
            countdown: Mutex::new(None),
            refresh_inflight: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Current session snapshot.
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Determine login state. Runs once per process.
    ///
    /// Syncs the clock concurrently (offset 0 until the measurement lands),
    /// acquires credentials from the redirect URL or the stored refresh
    /// credential, confirms identity with the backend, and starts the
    /// countdown on success.
    pub async fn bootstrap(self: &Arc<Self>, redirect_url: Option<&str>) -> Session {
        {
            let clock = Arc::clone(&self.clock);
            let backend = self.backend.clone();
            tokio::spawn(async move {
                clock.sync(&backend).await;
            });
        }

        let access = match self.acquire_credentials(redirect_url).await {
            Ok(Some(access)) => access,
            Ok(None) => {
                debug!("no stored credentials");
                return self.finish_unauthenticated(None).await;
            }
            Err(kind) => {
                self.store.clear();
                return self.finish_unauthenticated(Some(kind)).await;
            }
        };

        match self.backend.user_info(&access).await {
            Ok(profile) => {
                let remaining = match claims::decode(&access) {
                    Ok(c) => claims::remaining_secs(&c, self.clock.corrected_now_ms()),
                    Err(_) => 0,
                };
                info!(user = profile.id, remaining_secs = remaining, "session confirmed");
                {
                    let mut session = self.session.write().await;
                    session.state = SessionState::Authenticated;
                    session.profile = Some(profile.clone());
                    session.remaining_secs = remaining;
                    session.last_error = None;
                }
                self.start_countdown().await;
                let _ = self.event_tx.send(SessionEvent::Authenticated { profile });
                self.session().await
            }
            Err(ValidationError::Unauthorized(msg)) => {
                let kind = self.classify_rejection(&access);
                warn!(kind = %kind, err = %msg, "identity confirmation failed");
                self.store.clear();
                self.finish_unauthenticated(Some(kind)).await
            }
        }
    }

    /// Bootstrap credential acquisition: fresh values on the redirect URL
    /// take precedence; otherwise redeem the stored refresh credential once.
    ///
    /// `Ok(None)` means no credentials exist at all. An error means the
    /// refresh attempt failed and the caller must clear the store.
    async fn acquire_credentials(
        &self,
        redirect_url: Option<&str>,
    ) -> Result<Option<String>, TokenErrorKind> {
        if let Some(raw) = redirect_url {
            match redirect::consume(raw) {
                Ok((params, stripped)) => {
                    if params.success {
                        info!("provider login completed");
                    }
                    if params.error {
                        info!("provider reported a failed login");
                    }
                    if params.logout {
                        info!("provider reported a completed logout");
                    }
                    debug!(url = %stripped, "redirect parameters consumed");
                    if let (Some(access), Some(refresh)) =
                        (params.access_token, params.refresh_token)
                    {
                        if let Err(e) = self.store.save(&access, &refresh) {
                            warn!(err = %e, "failed to persist redirect credentials");
                        }
                        return Ok(Some(access));
                    }
                }
                Err(e) => warn!(err = %e, "ignoring unparseable redirect URL"),
            }
        }

        let Some(refresh_token) = self.store.load_refresh() else {
            return Ok(None);
        };
        match self.backend.refresh(&refresh_token).await {
            Ok(pair) => {
                if let Err(e) = self.store.save(&pair.access_token, &pair.refresh_token) {
                    warn!(err = %e, "failed to persist refreshed credentials");
                }
                Ok(Some(pair.access_token))
            }
            Err(e) => {
                warn!(err = %e, "stored refresh credential could not be redeemed");
                Err(e.kind())
            }
        }
    }

    /// Trigger a refresh unless one is already in flight.
    ///
    /// Shared by the low-water countdown trigger and manual refresh
    /// requests: the loser of a race is observed but ignored. The guard is
    /// released on every exit path, including decode failures.
    pub async fn refresh(self: &Arc<Self>) {
        if self
            .refresh_inflight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("refresh already in flight, ignoring trigger");
            return;
        }
        self.do_refresh().await;
        self.refresh_inflight.store(false, Ordering::SeqCst);
    }

    async fn do_refresh(self: &Arc<Self>) {
        let Some(refresh_token) = self.store.load_refresh() else {
            debug!("no refresh credential stored, skipping refresh");
            return;
        };
        {
            let mut session = self.session.write().await;
            if session.state != SessionState::Authenticated {
                debug!(state = ?session.state, "not refreshable in this state");
                return;
            }
            session.state = SessionState::RefreshingInFlight;
        }

        match self.backend.refresh(&refresh_token).await {
            Ok(pair) => {
                // A logout that raced the in-flight request wins; the new
                // pair must not repopulate a cleared store.
                let stored = {
                    let mut session = self.session.write().await;
                    if session.state == SessionState::Unauthenticated {
                        debug!("session ended while refresh was in flight, discarding pair");
                        None
                    } else {
                        if let Err(e) = self.store.save(&pair.access_token, &pair.refresh_token)
                        {
                            warn!(err = %e, "failed to persist refreshed credentials");
                        }
                        session.last_error = None;
                        // Recompute immediately rather than waiting a tick.
                        let remaining = match claims::decode(&pair.access_token) {
                            Ok(c) => claims::remaining_secs(&c, self.clock.corrected_now_ms()),
                            Err(e) => {
                                warn!(err = %e, "refreshed credential does not decode");
                                session.last_error = Some(TokenErrorKind::DecodeMalformed);
                                0
                            }
                        };
                        session.state = SessionState::Authenticated;
                        session.remaining_secs = remaining;
                        Some(remaining)
                    }
                };
                let Some(remaining) = stored else {
                    return;
                };
                info!(remaining_secs = remaining, "credentials refreshed");
                let _ = self.event_tx.send(SessionEvent::Refreshed { remaining_secs: remaining });

                // Refresh the profile under the new credential. A failure
                // here is not fatal: the pair was just confirmed by the
                // refresh endpoint.
                match self.backend.user_info(&pair.access_token).await {
                    Ok(profile) => {
                        self.session.write().await.profile = Some(profile);
                    }
                    Err(e) => {
                        warn!(err = %e, "profile refresh failed after token refresh");
                    }
                }
            }
            Err(RefreshError::Denied(msg)) => {
                warn!(err = %msg, "refresh credential rejected, logging out");
                let _ = self.event_tx.send(SessionEvent::RefreshFailed {
                    kind: TokenErrorKind::RefreshDenied,
                    error: msg,
                });
                self.logout_with(LogoutReason::RefreshDenied).await;
            }
            Err(RefreshError::Transient(msg)) => {
                debug!(err = %msg, "refresh failed transiently, next tick retries");
                {
                    let mut session = self.session.write().await;
                    if session.state == SessionState::RefreshingInFlight {
                        session.state = SessionState::Authenticated;
                    }
                    session.last_error = Some(TokenErrorKind::RefreshTransient);
                }
                let _ = self.event_tx.send(SessionEvent::RefreshFailed {
                    kind: TokenErrorKind::RefreshTransient,
                    error: msg,
                });
            }
        }
    }

    /// End the session: best-effort backend notification, clear stored
    /// credentials, cancel the countdown, go unauthenticated.
    pub async fn logout(self: &Arc<Self>) {
        self.logout_with(LogoutReason::Requested).await;
    }

    async fn logout_with(self: &Arc<Self>, reason: LogoutReason) {
        // Notify while the access credential still exists. Failure to
        // notify never blocks local cleanup.
        if let Some(access) = self.store.load_access() {
            if let Err(e) = self.backend.logout(&access).await {
                warn!(err = %e, "logout notification failed, continuing local cleanup");
            }
        }

        self.store.clear();
        {
            let mut slot = self.countdown.lock().await;
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
        {
            let mut session = self.session.write().await;
            session.state = SessionState::Unauthenticated;
            session.profile = None;
            session.remaining_secs = 0;
            session.last_error = None;
        }
        info!(reason = ?reason, "logged out");
        let _ = self.event_tx.send(SessionEvent::LoggedOut { reason });
    }

    /// Start the 1-second countdown task, cancelling any previous one.
    async fn start_countdown(self: &Arc<Self>) {
        let token = CancellationToken::new();
        {
            let mut slot = self.countdown.lock().await;
            if let Some(prev) = slot.take() {
                prev.cancel();
            }
            *slot = Some(token.clone());
        }

        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                mgr.tick().await;
            }
        });
    }

    /// One countdown step: re-derive remaining validity from the stored
    /// credential and react to threshold crossings.
    async fn tick(self: &Arc<Self>) {
        let Some(access) = self.store.load_access() else {
            // Store cleared under us (concurrent logout); the cancelled
            // token ends the loop right after this tick.
            return;
        };
        let claims = match claims::decode(&access) {
            Ok(c) => c,
            Err(e) => {
                // Cannot determine expiry. Not fatal on its own: surface the
                // diagnostic and keep ticking so a manual refresh can recover.
                warn!(err = %e, "stored access credential no longer decodes");
                self.session.write().await.last_error = Some(TokenErrorKind::DecodeMalformed);
                return;
            }
        };

        let remaining = claims::remaining_secs(&claims, self.clock.corrected_now_ms());
        self.session.write().await.remaining_secs = remaining;
        let _ = self.event_tx.send(SessionEvent::Countdown { remaining_secs: remaining });

        if remaining == 0 {
            // Second check: a refresh that completed after this tick's first
            // read may have replaced the stored credential with a live one.
            if self.confirm_expired() {
                info!("access credential expired");
                self.logout_with(LogoutReason::Expired).await;
            }
            return;
        }
        if remaining < self.refresh_threshold_secs {
            self.spawn_refresh();
        }
    }

    /// Re-read and re-decode the stored credential before the expiry logout.
    fn confirm_expired(&self) -> bool {
        let Some(access) = self.store.load_access() else {
            return true;
        };
        match claims::decode(&access) {
            Ok(c) => claims::remaining_secs(&c, self.clock.corrected_now_ms()) == 0,
            Err(_) => true,
        }
    }

    /// Run a refresh concurrently with the countdown.
    fn spawn_refresh(self: &Arc<Self>) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            mgr.refresh().await;
        });
    }

    /// Classify a validator rejection: expired credential vs anything else.
    fn classify_rejection(&self, access: &str) -> TokenErrorKind {
        match claims::decode(access) {
            Ok(c) if claims::remaining_secs(&c, self.clock.corrected_now_ms()) == 0 => {
                TokenErrorKind::Expired
            }
            Ok(_) => TokenErrorKind::RejectedOther,
            Err(_) => TokenErrorKind::DecodeMalformed,
        }
    }

    async fn finish_unauthenticated(&self, kind: Option<TokenErrorKind>) -> Session {
        let mut session = self.session.write().await;
        session.state = SessionState::Unauthenticated;
        session.profile = None;
        session.remaining_secs = 0;
        session.last_error = kind;
        session.clone()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
