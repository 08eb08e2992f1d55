//! Built-in health endpoint.
//!
//! One route answers both "is the process alive?" and "can it take traffic?":
//!
//! | Field | Meaning |
//! |---|---|
//! | `status` | `"starting"` until [`App::mark_ready`](crate::App::mark_ready), then `"healthy"` |
//! | `uptime_seconds` | Seconds since the app was assembled, two decimals |
//! | `version` | This crate's version |
//!
//! Mount it with [`App::health`](crate::App::health):
//!
//! ```rust
//! use gatehouse::App;
//!
//! let app = App::new().health("/health");
//! app.mark_ready();
//! ```
//!
//! The probe always answers `200 OK`. Orchestrators that gate on readiness
//! should inspect `status`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::BoxError;
use crate::handler::{Args, HandlerRef};
use crate::response::Response;

/// Readiness flag and start time, shared between the app and its probe.
#[derive(Clone, Debug)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
    started: Instant,
}

impl HealthState {
    pub fn new() -> Self {
        Self { ready: Arc::new(AtomicBool::new(false)), started: Instant::now() }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool { self.ready.load(Ordering::Acquire) }
    pub fn uptime(&self) -> Duration { self.started.elapsed() }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: if self.is_ready() { "healthy" } else { "starting" },
            uptime_seconds: (self.uptime().as_secs_f64() * 100.0).round() / 100.0,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// A non-suspending handler rendering [`report`](Self::report) as JSON.
    pub(crate) fn handler(&self) -> HandlerRef {
        let state = self.clone();
        HandlerRef::blocking("health", move |_: Args| {
            Ok::<_, BoxError>(Response::to_json(&state.report()))
        })
        .build()
    }
}

impl Default for HealthState {
    fn default() -> Self { Self::new() }
}

/// Body of the health response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: f64,
    pub version: &'static str,
}
