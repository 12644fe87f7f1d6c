//! Per-client sliding-window request limiter.
//!
//! The inbound listener admits at most `max_requests` requests per rolling
//! `window_secs` window per client IP. Requests beyond the limit are turned
//! away before the route handler runs.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use crate::BridgeContext;

// ── Sliding window ───────────────────────────────────────────────────────────

/// Rolling-window counter for one client.
struct SlidingWindow {
    window_secs: u64,
    max_count: u64,
    events: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    fn new(window_secs: u64, max_count: u64) -> Self {
        Self {
            window_secs,
            max_count,
            events: VecDeque::new(),
        }
    }

    /// Discard events older than the window boundary.
    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.window_secs as i64);
        while self.events.front().is_some_and(|t| *t <= cutoff) {
            self.events.pop_front();
        }
    }

    /// Admit and record one event, or report how long until a slot frees up.
    fn try_admit(&mut self, now: DateTime<Utc>) -> Result<(), Duration> {
        self.evict(now);
        if (self.events.len() as u64) < self.max_count {
            self.events.push_back(now);
            return Ok(());
        }
        // Full window — the oldest event leaving it frees the next slot.
        let retry_after = self
            .events
            .front()
            .map(|oldest| *oldest + Duration::seconds(self.window_secs as i64) - now)
            .unwrap_or_else(Duration::zero);
        Err(retry_after)
    }
}

// ── Limiter ──────────────────────────────────────────────────────────────────

/// Sliding-window limiter keyed by client IP.
pub struct RequestLimiter {
    window_secs: u64,
    max_requests: u64,
    clients: Mutex<HashMap<IpAddr, SlidingWindow>>,
}

impl RequestLimiter {
    pub fn new(window_secs: u64, max_requests: u64) -> Self {
        Self {
            window_secs,
            max_requests,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a request from `client` at `now`, or return the duration until
    /// the client's next free slot.
    pub async fn try_admit(&self, client: IpAddr, now: DateTime<Utc>) -> Result<(), Duration> {
        let mut clients = self.clients.lock().await;
        let window = clients
            .entry(client)
            .or_insert_with(|| SlidingWindow::new(self.window_secs, self.max_requests));
        window.try_admit(now)
    }
}

/// Middleware applied to every route: rejects over-limit clients with 429
/// and a `Retry-After` hint.
pub async fn limit_requests(
    State(ctx): State<Arc<BridgeContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    match ctx.limiter.try_admit(addr.ip(), Utc::now()).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            let secs = retry_after.num_seconds().max(1);
            warn!(client = %addr.ip(), retry_after_secs = secs, "rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                "Too many requests, please try again later.",
            )
                .into_response()
        }
    }
}
