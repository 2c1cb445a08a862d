extern crate failure;
extern crate futures;
extern crate futures_cpupool;
extern crate tokio_core;
extern crate vouchers_lib;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use failure::Error as FailureError;
use futures_cpupool::CpuPool;

use vouchers_lib::breaker::CircuitBreaker;
use vouchers_lib::cache::{CacheStats, VoucherCache};
use vouchers_lib::config;
use vouchers_lib::models::*;
use vouchers_lib::queue::{ClaimJob, ClaimQueue, JobInfo, QueueCounts, RetryDisposition};
use vouchers_lib::rate_limiter::{RateLimit, RateLimiter};
use vouchers_lib::repos::repo_factory::tests::*;
use vouchers_lib::services::claims::ClaimsServiceImpl;
use vouchers_lib::services::refunds::RefundsServiceImpl;

#[derive(Default)]
pub struct CacheMock {
    pub results: Mutex<HashMap<String, ClaimResult>>,
    pub counts: Mutex<HashMap<i32, i32>>,
    pub users: Mutex<HashMap<i32, User>>,
}

impl VoucherCache for CacheMock {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>, FailureError> {
        Ok(self.users.lock().unwrap().get(&user_id.0).cloned())
    }

    fn put_user(&self, user: &User) -> Result<(), FailureError> {
        self.users.lock().unwrap().insert(user.id.0, user.clone());
        Ok(())
    }

    fn get_count(&self, user_id: UserId) -> Result<Option<i32>, FailureError> {
        Ok(self.counts.lock().unwrap().get(&user_id.0).cloned())
    }

    fn put_count(&self, user_id: UserId, count: i32) -> Result<(), FailureError> {
        self.counts.lock().unwrap().insert(user_id.0, count);
        Ok(())
    }

    fn get_result(&self, request_id: &RequestId) -> Result<Option<ClaimResult>, FailureError> {
        Ok(self.results.lock().unwrap().get(&request_id.0).cloned())
    }

    fn put_result(&self, result: &ClaimResult) -> Result<(), FailureError> {
        self.results
            .lock()
            .unwrap()
            .insert(result.request_id.0.clone(), result.clone());
        Ok(())
    }

    fn invalidate_user(&self, user_id: UserId) -> Result<(), FailureError> {
        self.users.lock().unwrap().remove(&user_id.0);
        self.counts.lock().unwrap().remove(&user_id.0);
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats { hits: 0, misses: 0 }
    }
}

/// Admits a bounded number of attempts per user, like the real sliding
/// window does within one window
pub struct CountingRateLimiter {
    pub max: u32,
    pub seen: Mutex<HashMap<i32, u32>>,
}

impl CountingRateLimiter {
    pub fn new(max: u32) -> Self {
        CountingRateLimiter {
            max,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for CountingRateLimiter {
    fn user_window(&self, user_id: UserId) -> Result<RateLimit, FailureError> {
        let mut seen = self.seen.lock().unwrap();
        let attempts = seen.entry(user_id.0).or_insert(0);
        let allowed = *attempts < self.max;
        *attempts += 1;
        Ok(RateLimit {
            allowed,
            limit: self.max,
            remaining: self.max.saturating_sub(*attempts),
            reset_ms: 60_000,
            retry_after_s: if allowed { 0 } else { 42 },
        })
    }

    fn ip_window(&self, _ip: &str) -> Result<RateLimit, FailureError> {
        Ok(RateLimit {
            allowed: true,
            limit: 100,
            remaining: 99,
            reset_ms: 60_000,
            retry_after_s: 0,
        })
    }
}

#[derive(Default)]
pub struct QueueMock {
    pub jobs: Mutex<Vec<ClaimRequest>>,
    pub ids: Mutex<HashSet<String>>,
}

impl ClaimQueue for QueueMock {
    fn enqueue(&self, job: &ClaimRequest) -> Result<RequestId, FailureError> {
        if self.ids.lock().unwrap().insert(job.request_id.0.clone()) {
            self.jobs.lock().unwrap().push(job.clone());
        }
        Ok(job.request_id.clone())
    }

    fn get(&self, _request_id: &RequestId) -> Result<Option<JobInfo>, FailureError> {
        Ok(None)
    }

    fn counts(&self) -> Result<QueueCounts, FailureError> {
        Ok(QueueCounts {
            waiting: self.jobs.lock().unwrap().len() as u64,
            active: 0,
            completed: 0,
            failed: 0,
            delayed: 0,
        })
    }

    fn dequeue(&self) -> Result<Option<ClaimJob>, FailureError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.is_empty() {
            return Ok(None);
        }
        let payload = jobs.remove(0);
        Ok(Some(ClaimJob {
            request_id: payload.request_id.clone(),
            payload,
            attempts: 0,
        }))
    }

    fn complete(&self, _request_id: &RequestId, _result: &ClaimResult) -> Result<(), FailureError> {
        Ok(())
    }

    fn fail(&self, _request_id: &RequestId, _reason: &str, _transient: bool) -> Result<RetryDisposition, FailureError> {
        Ok(RetryDisposition::Failed)
    }
}

pub type TestClaimsService = ClaimsServiceImpl<MockConnection, MockConnectionManager, ReposFactoryMock>;
pub type TestRefundsService = RefundsServiceImpl<MockConnection, MockConnectionManager, ReposFactoryMock>;

pub fn test_breaker() -> CircuitBreaker {
    CircuitBreaker::new(&config::Breaker {
        failure_threshold: 5,
        success_threshold: 2,
        call_timeout_s: 60,
        open_duration_s: 30,
    })
}

pub fn create_claims_service(
    cache: Arc<CacheMock>,
    queue: Arc<QueueMock>,
    rate_limiter: Arc<CountingRateLimiter>,
) -> TestClaimsService {
    ClaimsServiceImpl::new(
        mock_db_pool(),
        CpuPool::new(1),
        ReposFactoryMock::default(),
        cache,
        rate_limiter,
        queue,
        test_breaker(),
    )
}

pub fn create_refunds_service(cache: Arc<CacheMock>, admin_id: UserId) -> TestRefundsService {
    RefundsServiceImpl::new(
        mock_db_pool(),
        CpuPool::new(1),
        ReposFactoryMock::default(),
        cache,
        Some(admin_id),
    )
}

pub fn claim_request(user_id: UserId, code: &str, request_id: &str) -> ClaimRequest {
    ClaimRequest {
        user_id,
        code: code.to_string(),
        request_id: RequestId(request_id.to_string()),
        ip: Some("203.0.113.7".to_string()),
        user_agent: Some("integration-tests".to_string()),
        device_id: Some("device-1".to_string()),
    }
}
