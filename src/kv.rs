//! Pooled access to the key/value store. Every cache, rate-limiter and
//! queue command goes through `KvPool`: a bounded r2d2 pool whose
//! connections carry a read timeout, with transient IO failures retried
//! with capped backoff. Permanent failures surface to the caller.
use std::thread;
use std::time::Duration;

use failure::{Error as FailureError, Fail};
use r2d2_redis::r2d2::Pool;
use r2d2_redis::redis::{Connection, ErrorKind, RedisError, RedisResult};
use r2d2_redis::RedisConnectionManager;

use config;
use errors::Error;

pub type RedisPool = Pool<RedisConnectionManager>;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_MS: u64 = 50;
const RETRY_CAP_MS: u64 = 400;

#[derive(Clone)]
pub struct KvPool {
    pool: RedisPool,
    read_timeout: Duration,
}

impl KvPool {
    pub fn new(config: &config::Redis) -> Result<Self, FailureError> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| e.context("Invalid redis url").context(Error::Connection))?;
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .build(manager)
            .map_err(|e| e.context("Failed to create redis pool").context(Error::Connection))?;

        Ok(KvPool {
            pool,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        })
    }

    /// Runs `op` on a pooled connection. Transient IO failures get a fresh
    /// connection and are retried up to 3 times with doubling, capped
    /// backoff; every other failure surfaces immediately.
    pub fn with_conn<T, F>(&self, mut op: F) -> Result<T, FailureError>
    where
        F: FnMut(&mut Connection) -> RedisResult<T>,
    {
        let mut attempt = 0;
        loop {
            let result = self
                .pool
                .get()
                .map_err(|e| FailureError::from(e.context("Redis pool is exhausted").context(Error::Connection)))
                .and_then(|mut conn| {
                    let _ = conn.set_read_timeout(Some(self.read_timeout));
                    op(&mut *conn).map_err(|e| {
                        FailureError::from(e.context("Redis command failed").context(Error::Connection))
                    })
                });

            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= RETRY_ATTEMPTS || !is_transient(&e) {
                        return Err(e);
                    }
                    let backoff = (RETRY_BASE_MS << (attempt - 1)).min(RETRY_CAP_MS);
                    warn!("Transient redis failure, retrying in {} ms: {}", backoff, e);
                    thread::sleep(Duration::from_millis(backoff));
                }
            }
        }
    }

    /// Trivial round-trip; returns false instead of raising.
    pub fn ping(&self) -> bool {
        self.with_conn(|conn| ::r2d2_redis::redis::cmd("PING").query::<String>(conn))
            .is_ok()
    }
}

fn is_transient(err: &FailureError) -> bool {
    for cause in err.iter_chain() {
        if let Some(redis_err) = cause.downcast_ref::<RedisError>() {
            return redis_err.kind() == ErrorKind::IoError || redis_err.kind() == ErrorKind::BusyLoadingError;
        }
    }
    // Pool checkout timeouts are worth one more try as well
    true
}
