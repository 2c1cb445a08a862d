//! Cache for user records, per-user claim counters and idempotent claim
//! results, all on the key/value store. Writers are the commit paths only,
//! so stale reads are bounded by the ttl and the authoritative transaction
//! re-checks everything a reader may have seen.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use failure::Error as FailureError;
use r2d2_redis::redis::{self, Commands};
use serde_json;

use config;
use kv::KvPool;
use models::{ClaimResult, RequestId, User, UserId};

pub trait VoucherCache: Send + Sync {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>, FailureError>;
    fn put_user(&self, user: &User) -> Result<(), FailureError>;
    fn get_count(&self, user_id: UserId) -> Result<Option<i32>, FailureError>;
    fn put_count(&self, user_id: UserId, count: i32) -> Result<(), FailureError>;
    fn get_result(&self, request_id: &RequestId) -> Result<Option<ClaimResult>, FailureError>;
    fn put_result(&self, result: &ClaimResult) -> Result<(), FailureError>;
    /// Deletes every `user:{id}:*` key so readers re-load on next miss
    fn invalidate_user(&self, user_id: UserId) -> Result<(), FailureError>;
    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

#[derive(Clone)]
pub struct VoucherCacheImpl {
    kv: KvPool,
    user_ttl_s: usize,
    count_ttl_s: usize,
    result_ttl_s: usize,
    hits: Arc<AtomicUsize>,
    misses: Arc<AtomicUsize>,
}

impl VoucherCacheImpl {
    pub fn new(kv: KvPool, config: &config::Cache) -> Self {
        VoucherCacheImpl {
            kv,
            user_ttl_s: config.user_ttl_s,
            count_ttl_s: config.count_ttl_s,
            result_ttl_s: config.result_ttl_s,
            hits: Arc::new(AtomicUsize::new(0)),
            misses: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn user_key(user_id: UserId) -> String {
        format!("user:{}:data", user_id)
    }

    fn count_key(user_id: UserId) -> String {
        format!("user:{}:vouchers", user_id)
    }

    fn result_key(request_id: &RequestId) -> String {
        format!("claim:result:{}", request_id)
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl VoucherCache for VoucherCacheImpl {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>, FailureError> {
        let key = Self::user_key(user_id);
        let raw: Option<String> = self.kv.with_conn(|conn| conn.get(&key))?;
        self.record(raw.is_some());
        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(user) => Ok(Some(user)),
                Err(e) => {
                    warn!("Dropping unreadable cache entry {}: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn put_user(&self, user: &User) -> Result<(), FailureError> {
        let key = Self::user_key(user.id);
        let raw = serde_json::to_string(user)?;
        let ttl = self.user_ttl_s;
        self.kv.with_conn(|conn| conn.set_ex(&key, &raw, ttl))
    }

    fn get_count(&self, user_id: UserId) -> Result<Option<i32>, FailureError> {
        let key = Self::count_key(user_id);
        let count: Option<i32> = self.kv.with_conn(|conn| conn.get(&key))?;
        self.record(count.is_some());
        Ok(count)
    }

    fn put_count(&self, user_id: UserId, count: i32) -> Result<(), FailureError> {
        let key = Self::count_key(user_id);
        let ttl = self.count_ttl_s;
        self.kv.with_conn(|conn| conn.set_ex(&key, count, ttl))
    }

    fn get_result(&self, request_id: &RequestId) -> Result<Option<ClaimResult>, FailureError> {
        let key = Self::result_key(request_id);
        let raw: Option<String> = self.kv.with_conn(|conn| conn.get(&key))?;
        self.record(raw.is_some());
        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(result) => Ok(Some(result)),
                Err(e) => {
                    warn!("Dropping unreadable cache entry {}: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn put_result(&self, result: &ClaimResult) -> Result<(), FailureError> {
        let key = Self::result_key(&result.request_id);
        let raw = serde_json::to_string(result)?;
        let ttl = self.result_ttl_s;
        self.kv.with_conn(|conn| conn.set_ex(&key, &raw, ttl))
    }

    fn invalidate_user(&self, user_id: UserId) -> Result<(), FailureError> {
        let pattern = format!("user:{}:*", user_id);
        self.kv.with_conn(|conn| {
            let keys: Vec<String> = conn.scan_match(&pattern)?.collect();
            if !keys.is_empty() {
                let mut pipe = redis::pipe();
                for key in &keys {
                    pipe.del(key).ignore();
                }
                pipe.query::<()>(conn)?;
            }
            Ok(())
        })
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
