use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::middleware::Next;
use axum::Json;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub const MSG_RATE_LIMITED: &str = "Too many requests. Please try again later.";

static RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
static RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
static RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Result of counting one request against a client's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32, reset: Duration },
    Limited { reset: Duration },
}

/// Per-client windows plus the time expired ones were last swept
struct Clients {
    windows: HashMap<IpAddr, Window>,
    last_pruned: Instant,
}

/// Fixed-window request limiter keyed by client IP
///
/// Expired windows are swept at most once per window length.
pub struct RateLimiter {
    window: Duration,
    max: u32,
    clients: Mutex<Clients>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            clients: Mutex::new(Clients {
                windows: HashMap::new(),
                last_pruned: Instant::now(),
            }),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Count a request from `client`
    pub fn check(&self, client: IpAddr) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> RateDecision {
        let mut clients = self.clients.lock();

        if now.duration_since(clients.last_pruned) >= self.window {
            let window = self.window;
            clients
                .windows
                .retain(|_, w| now.duration_since(w.started) < window);
            clients.last_pruned = now;
        }

        let entry = clients.windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        let reset = self.window.saturating_sub(now.duration_since(entry.started));

        if entry.count >= self.max {
            return RateDecision::Limited { reset };
        }

        entry.count += 1;
        RateDecision::Allowed {
            remaining: self.max - entry.count,
            reset,
        }
    }
}

fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn set_headers(response: &mut Response, limit: u32, remaining: u32, reset: Duration) {
    let headers = response.headers_mut();
    // Reset is reported in whole seconds, rounded up
    let reset_secs = reset.as_millis().div_ceil(1000) as u64;
    headers.insert(RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
    headers.insert(RATELIMIT_RESET.clone(), HeaderValue::from(reset_secs));
}

/// Middleware rejecting clients over their request budget with 429
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_ip(&req);

    match limiter.check(client) {
        RateDecision::Allowed { remaining, reset } => {
            let mut response = next.run(req).await;
            set_headers(&mut response, limiter.max(), remaining, reset);
            response
        }
        RateDecision::Limited { reset } => {
            warn!(client = %client, "Rate limit exceeded");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": true,
                    "message": MSG_RATE_LIMITED
                })),
            )
                .into_response();
            set_headers(&mut response, limiter.max(), 0, reset);
            response
        }
    }
}
