//! Admission checks on the key/value store: a per-user sliding window (no
//! burst-at-boundary behaviour) and a per-ip fixed window. The KV is the
//! sole shared state; nothing is kept between calls.
use std::time::{SystemTime, UNIX_EPOCH};

use failure::Error as FailureError;
use r2d2_redis::redis::{self, Commands};

use config;
use kv::KvPool;
use models::UserId;

/// Window decision as exposed to the http boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_ms: u64,
    pub retry_after_s: u64,
}

pub trait RateLimiter: Send + Sync {
    /// Sliding window over the last `user_window_s` seconds
    fn user_window(&self, user_id: UserId) -> Result<RateLimit, FailureError>;
    /// Fixed window keyed by client address
    fn ip_window(&self, ip: &str) -> Result<RateLimit, FailureError>;
}

pub struct RateLimiterImpl {
    kv: KvPool,
    user_max: u32,
    user_window_s: u64,
    ip_max: u32,
    ip_window_s: u64,
}

impl RateLimiterImpl {
    pub fn new(kv: KvPool, config: &config::RateLimits) -> Self {
        RateLimiterImpl {
            kv,
            user_max: config.user_max,
            user_window_s: config.user_window_s,
            ip_max: config.ip_max,
            ip_window_s: config.ip_window_s,
        }
    }
}

impl RateLimiter for RateLimiterImpl {
    fn user_window(&self, user_id: UserId) -> Result<RateLimit, FailureError> {
        let key = format!("rate:user:{}", user_id);
        let window_ms = self.user_window_s * 1000;
        let now_ms = now_millis();
        let cutoff = now_ms.saturating_sub(window_ms);
        let window_s = self.user_window_s as usize;

        // One atomic round-trip: evict, count, record the attempt, refresh
        // the ttl, read the oldest surviving entry for the reset time.
        let (count, oldest): (i64, Vec<(u64, f64)>) = self.kv.with_conn(|conn| {
            redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg(0)
                .arg(cutoff)
                .ignore()
                .zcard(&key)
                .cmd("ZADD")
                .arg(&key)
                .arg(now_ms)
                .arg(now_ms)
                .ignore()
                .expire(&key, window_s)
                .ignore()
                .zrangebyscore_limit_withscores(&key, "-inf", "+inf", 0, 1)
                .query(conn)
        })?;

        let oldest_ms = oldest.first().map(|&(member, _)| member).unwrap_or(now_ms);
        let decision = window_decision(count, oldest_ms, self.user_max, window_ms, now_ms);
        if !decision.allowed {
            warn!(
                "Rate limit hit for user {}: {} attempts in the last {} s",
                user_id, count, self.user_window_s
            );
        }
        Ok(decision)
    }

    fn ip_window(&self, ip: &str) -> Result<RateLimit, FailureError> {
        let key = format!("rate:ip:{}", ip);
        let window_s = self.ip_window_s as usize;

        let (count, ttl) = self.kv.with_conn(|conn| {
            let count: i64 = conn.incr(&key, 1)?;
            if count == 1 {
                conn.expire::<_, i32>(&key, window_s)?;
            }
            let ttl: i64 = conn.ttl(&key)?;
            Ok((count, ttl))
        })?;

        let now_ms = now_millis();
        let retry_after_s = ttl.max(1) as u64;
        let allowed = count <= i64::from(self.ip_max);
        if !allowed {
            warn!("Rate limit hit for ip {}: {} requests in the current window", ip, count);
        }
        Ok(RateLimit {
            allowed,
            limit: self.ip_max,
            remaining: (i64::from(self.ip_max) - count).max(0) as u32,
            reset_ms: now_ms + retry_after_s * 1000,
            retry_after_s,
        })
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() * 1000 + u64::from(d.subsec_millis()))
        .unwrap_or(0)
}

/// `count` is the number of attempts in the window before the current one
fn window_decision(count: i64, oldest_ms: u64, max: u32, window_ms: u64, now_ms: u64) -> RateLimit {
    let allowed = count < i64::from(max);
    let remaining = (i64::from(max) - count - 1).max(0) as u32;
    let reset_ms = oldest_ms + window_ms;
    let retry_after_s = if allowed {
        0
    } else {
        ((reset_ms.saturating_sub(now_ms) + 999) / 1000).max(1)
    };

    RateLimit {
        allowed,
        limit: max,
        remaining,
        reset_ms,
        retry_after_s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_below_the_ceiling() {
        let decision = window_decision(0, 1_000, 10, 60_000, 1_000);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
        assert_eq!(decision.reset_ms, 61_000);
    }

    #[test]
    fn last_admission_reports_zero_remaining() {
        let decision = window_decision(9, 1_000, 10, 60_000, 30_000);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn rejects_at_the_ceiling_with_positive_retry_after() {
        let decision = window_decision(10, 1_000, 10, 60_000, 30_000);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_ms, 61_000);
        assert_eq!(decision.retry_after_s, 31);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let decision = window_decision(10, 1_000, 10, 60_000, 61_000);
        assert!(!decision.allowed);
        assert!(decision.retry_after_s >= 1);
    }
}
