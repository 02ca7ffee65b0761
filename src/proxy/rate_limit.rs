//! Per-client fixed-window rate limiting.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use tokio::time::Instant;

use super::server::AppState;
use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

/// Tracked-client count above which expired windows are swept, at most once per window.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client address.
///
/// Backed by [`DashMap`], so concurrent clients only contend per shard.
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    last_sweep: Mutex<Option<Instant>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            last_sweep: Mutex::new(None),
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
        }
    }

    /// Whether any limit applies.
    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    /// Count one request for `client`, failing once the window's budget is spent.
    pub fn check(&self, client: &str) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let now = Instant::now();
        if self.windows.len() >= SWEEP_THRESHOLD && self.sweep_due(now) {
            self.sweep(now);
        }

        let mut entry = self
            .windows
            .entry(client.to_string())
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            return Err(Error::RateLimited {
                window: self.window_label(),
            });
        }

        entry.count += 1;
        Ok(())
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Claim the sweep for this window; false if one ran less than a window ago.
    fn sweep_due(&self, now: Instant) -> bool {
        let mut last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(at) if now.duration_since(at) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn sweep(&self, now: Instant) {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.window);
        tracing::debug!(
            removed = before.saturating_sub(self.windows.len()),
            "Swept expired rate limit windows"
        );
    }

    /// Human-readable window length, e.g. `1 hour` or `15 minutes`.
    pub fn window_label(&self) -> String {
        let secs = self.window.as_secs();
        let (amount, unit) = if secs >= 3600 && secs % 3600 == 0 {
            (secs / 3600, "hour")
        } else if secs >= 60 && secs % 60 == 0 {
            (secs / 60, "minute")
        } else {
            (secs, "second")
        };
        if amount == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", amount, unit)
        }
    }
}

/// Resolve the address a request is attributed to.
///
/// With `trusted_hops = N > 0` the N-th `X-Forwarded-For` entry from the right
/// wins; otherwise, or when the header is too short, the socket peer is used.
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_hops: usize,
) -> String {
    if trusted_hops > 0 {
        let forwarded: Vec<&str> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if forwarded.len() >= trusted_hops {
            return forwarded[forwarded.len() - trusted_hops].to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Middleware rejecting clients over their request budget.
pub async fn enforce(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if state.limiter.is_enabled() {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client = client_address(
            request.headers(),
            peer,
            state.config.server.trust_proxy_hops,
        );

        if let Err(e) = state.limiter.check(&client) {
            tracing::warn!(client = %client, "Rate limit exceeded");
            return Err(e);
        }
    }

    Ok(next.run(request).await)
}
