//! Per-client rate limiting for summary triggers

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::api::dto::ErrorResponse;

/// Manual summaries cost backend calls, so each client IP gets a fixed
/// per-minute budget.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: Arc::new(GovernorLimiter::keyed(quota)),
            trust_forwarded_for: false,
        }
    }

    /// Key clients by the first `X-Forwarded-For` entry. Only safe behind a
    /// proxy that overwrites the header.
    pub fn with_trusted_proxy(mut self, trust_forwarded_for: bool) -> Self {
        self.trust_forwarded_for = trust_forwarded_for;
        self
    }

    /// Check if request is allowed for given IP
    pub fn check_rate_limit(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Drop state for clients whose budget has fully replenished.
    pub fn cleanup_expired(&self) {
        self.limiter.retain_recent();
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Runs `cleanup_expired` every `period` until the handle is aborted.
    pub fn spawn_cleanup(&self, period: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let before = limiter.tracked_clients();
                limiter.cleanup_expired();
                let after = limiter.tracked_clients();
                if before != after {
                    tracing::debug!("Rate limiter dropped {} idle clients", before - after);
                }
            }
        })
    }

    fn client_ip(&self, request: &Request) -> IpAddr {
        let forwarded = if self.trust_forwarded_for {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        } else {
            None
        };

        forwarded
            .or_else(|| {
                request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip())
            })
            .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let ip = limiter.client_ip(&request);
    if limiter.check_rate_limit(ip) {
        next.run(request).await
    } else {
        tracing::warn!("Rate limit exceeded for {}", ip);
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "Rate limit exceeded. Please try again later.".to_string(),
                code: 429,
            }),
        )
            .into_response()
    }
}
