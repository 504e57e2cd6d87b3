// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use signon::backend::BackendClient;
use signon::config::Config;
use signon::session::{LogoutReason, SessionEvent, SessionManager};
use signon::store::CredentialStore;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    // reqwest is built without a default TLS provider; install ring.
    let _ = rustls::crypto::ring::default_provider().install_default();

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<i32> {
    let backend = BackendClient::new(&config.backend_url);

    if config.print_login_url {
        println!("{}", backend.login_url(&config.provider));
        return Ok(0);
    }

    let store = match config.state_dir {
        Some(ref dir) => CredentialStore::new(dir),
        None => CredentialStore::open_default(),
    };
    let manager = SessionManager::new(store, backend, config.refresh_threshold_secs);

    if config.logout {
        manager.logout().await;
        return Ok(0);
    }

    let mut events = manager.subscribe();
    let session = manager.bootstrap(config.redirect_url.as_deref()).await;

    if !session.authenticated() {
        match session.last_error {
            Some(kind) => warn!(kind = %kind, "not signed in"),
            None => info!("not signed in — complete a provider login and pass --redirect-url"),
        }
        return Ok(1);
    }
    if let Some(ref profile) = session.profile {
        info!(
            user = profile.id,
            nickname = profile.nickname.as_deref().unwrap_or("-"),
            "signed in"
        );
    }

    // Follow lifecycle events until Ctrl-C, then log out.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, logging out");
                manager.logout().await;
                return Ok(0);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Countdown { remaining_secs }) => {
                    if remaining_secs % 60 == 0 || remaining_secs <= 15 {
                        debug!(remaining_secs, "session countdown");
                    }
                }
                Ok(SessionEvent::Refreshed { remaining_secs }) => {
                    info!(remaining_secs, "credentials refreshed");
                }
                Ok(SessionEvent::RefreshFailed { kind, error }) => {
                    warn!(kind = %kind, err = %error, "refresh failed");
                }
                Ok(SessionEvent::Authenticated { profile }) => {
                    info!(user = profile.id, "profile updated");
                }
                Ok(SessionEvent::LoggedOut { reason }) => {
                    info!(reason = ?reason, "session ended");
                    return Ok(if reason == LogoutReason::Requested { 0 } else { 1 });
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(0),
            }
        }
    }
}
