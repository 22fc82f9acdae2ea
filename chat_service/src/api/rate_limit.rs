// chat_service/src/api/rate_limit.rs

//! 按来源 IP 的固定窗口限流。
//!
//! 每个 IP 在一个窗口内最多处理 `limit` 个请求，超出部分返回 429。
//! 没有 `ConnectInfo` 的请求（例如测试中直接调用路由）共用同一个计数。

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use log::{debug, warn};

use crate::error::AppError;
use crate::state::AppState;

/// 计数表超过这个大小时顺带清理已过期的窗口。
const PURGE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: DashMap<IpAddr, Window>,
}

impl RateLimiter {
    /// `limit` 为 0 时不限流。
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: DashMap::new(),
        }
    }

    /// 记录一次来自 `ip` 的请求，返回是否放行。
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        if self.buckets.len() > PURGE_THRESHOLD {
            self.purge_expired(now);
        }

        let mut window = self.buckets.entry(ip).or_insert(Window { started: now, count: 0 });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        window.count = window.count.saturating_add(1);
        window.count <= self.limit
    }

    fn purge_expired(&self, now: Instant) {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, window| now.duration_since(window.started) < self.window);
        debug!("[限流] 清理过期窗口: {} -> {}", before, self.buckets.len());
    }
}

/// axum 中间件：超过限流阈值时返回 429，不再进入后续处理。
pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if !state.rate_limiter.check(ip) {
        warn!("[限流] 来源 {} 的请求过于频繁: {} {}", ip, request.method(), request.uri().path());
        return Err(AppError::RateLimited(
            "Too many requests, please try again later".to_string(),
        ));
    }
    Ok(next.run(request).await)
}
