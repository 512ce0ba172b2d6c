use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DashMapStateStore};
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;

pub const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

#[derive(Clone)]
pub struct ClientLimiter {
    limiter: Arc<KeyedLimiter>,
}

impl ClientLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_second = NonZeroU32::new(config.per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::dashmap(quota)),
        }
    }

    pub fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }

    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Prunes every [`PRUNE_INTERVAL`] until `shutdown` fires.
    pub fn spawn_pruner(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        limiter.prune();
                        tracing::debug!(keys = limiter.tracked_keys(), "pruned rate limiter");
                    }
                }
            }
        })
    }
}

pub async fn rate_limit(State(limiter): State<ClientLimiter>, request: Request, next: Next) -> Response {
    let key = client_key(&request);
    if !limiter.check(&key) {
        tracing::warn!(client = %key, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "message": "Too many requests, please try again later." })),
        )
            .into_response();
    }
    next.run(request).await
}

fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
        && let Some(first) = val.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }

    if let Some(real_ip) = request.headers().get("x-real-ip")
        && let Ok(val) = real_ip.to_str()
        && !val.trim().is_empty()
    {
        return val.trim().to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
