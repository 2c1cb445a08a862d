//! Static context shared by every request: pools, caches and the other
//! values constructed once at startup and passed down explicitly.
use std::sync::Arc;

use futures_cpupool::CpuPool;

use breaker::CircuitBreaker;
use cache::VoucherCache;
use config::Config;
use kv::KvPool;
use queue::ClaimQueue;
use rate_limiter::RateLimiter;
use repos::repo_factory::ReposFactoryImpl;
use repos::types::DbPool;

#[derive(Clone)]
pub struct StaticContext {
    pub db_pool: DbPool,
    pub cpu_pool: CpuPool,
    pub kv: KvPool,
    pub config: Arc<Config>,
    pub repo_factory: ReposFactoryImpl,
    pub cache: Arc<VoucherCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub queue: Arc<ClaimQueue>,
    pub breaker: CircuitBreaker,
    pub verbose_errors: bool,
}

impl StaticContext {
    pub fn new(
        db_pool: DbPool,
        cpu_pool: CpuPool,
        kv: KvPool,
        config: Arc<Config>,
        repo_factory: ReposFactoryImpl,
        cache: Arc<VoucherCache>,
        rate_limiter: Arc<RateLimiter>,
        queue: Arc<ClaimQueue>,
        breaker: CircuitBreaker,
        verbose_errors: bool,
    ) -> Self {
        Self {
            db_pool,
            cpu_pool,
            kv,
            config,
            repo_factory,
            cache,
            rate_limiter,
            queue,
            breaker,
            verbose_errors,
        }
    }
}
