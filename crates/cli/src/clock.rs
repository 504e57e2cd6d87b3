// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock skew correction against the backend's notion of time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::backend::BackendClient;

/// Offset between server time and local time, measured once per bootstrap.
///
/// Starts at zero so expiry math can run before the measurement resolves;
/// an unreachable time endpoint leaves it at zero (trust the local clock).
#[derive(Debug, Default)]
pub struct ClockSync {
    offset_ms: AtomicI64,
}

impl ClockSync {
    /// Measure the offset with one server-time request.
    ///
    /// Fail-open: any failure resolves to an offset of zero rather than
    /// blocking login-state determination.
    pub async fn sync(&self, backend: &BackendClient) -> i64 {
        match backend.server_time_ms().await {
            Ok(server_ms) => {
                let offset = server_ms - local_now_ms();
                self.offset_ms.store(offset, Ordering::Relaxed);
                tracing::debug!(offset_ms = offset, "clock offset measured");
                offset
            }
            Err(e) => {
                tracing::warn!(err = %e, "server time unavailable, using local clock");
                self.offset_ms.load(Ordering::Relaxed)
            }
        }
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Local time corrected by the measured offset, milliseconds since epoch.
    pub fn corrected_now_ms(&self) -> i64 {
        local_now_ms() + self.offset_ms()
    }
}

/// Local wall-clock time, milliseconds since epoch.
pub fn local_now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
