//! Claims service: the synchronous front path of the claim pipeline and
//! the authoritative claim transaction shared with the queue worker.
//!
//! Front path order: idempotency lookup, per-user and per-ip admission,
//! soft limit pre-check, code validation, then either the transaction
//! through the circuit breaker (premium) or a queue job (everyone else).
use std::sync::Arc;
use std::time::SystemTime;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::{Error as FailureError, Fail};
use futures::Future;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};

use breaker::CircuitBreaker;
use cache::{CacheStats, VoucherCache};
use errors::{error_kind, Error, InvalidVoucherReason};
use models::validation_rules::validate_voucher_code;
use models::*;
use queue::{ClaimQueue, JobState, QueueCounts};
use rate_limiter::RateLimiter;
use repos::ReposFactory;
use super::types::ServiceFuture;

pub trait ClaimsService {
    /// Runs the claim pipeline for one request
    fn claim(&self, request: ClaimRequest) -> ServiceFuture<ClaimResult>;
    /// Returns the current state of a claim attempt by its request id
    fn claim_status(&self, request_id: RequestId) -> ServiceFuture<ClaimStatusResponse>;
    /// Queue and cache counters
    fn queue_metrics(&self) -> ServiceFuture<QueueMetrics>;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueMetrics {
    pub queue: QueueCounts,
    pub cache: CacheStats,
}

/// Claims service, responsible for the claim pipeline
pub struct ClaimsServiceImpl<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub repo_factory: F,
    pub cache: Arc<VoucherCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub queue: Arc<ClaimQueue>,
    pub breaker: CircuitBreaker,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > ClaimsServiceImpl<T, M, F>
{
    pub fn new(
        db_pool: Pool<M>,
        cpu_pool: CpuPool,
        repo_factory: F,
        cache: Arc<VoucherCache>,
        rate_limiter: Arc<RateLimiter>,
        queue: Arc<ClaimQueue>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            cache,
            rate_limiter,
            queue,
            breaker,
        }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > ClaimsService for ClaimsServiceImpl<T, M, F>
{
    fn claim(&self, request: ClaimRequest) -> ServiceFuture<ClaimResult> {
        let db_pool = self.db_pool.clone();
        let repo_factory = self.repo_factory.clone();
        let cache = self.cache.clone();
        let rate_limiter = self.rate_limiter.clone();
        let queue = self.queue.clone();
        let breaker = self.breaker.clone();

        Box::new(
            self.cpu_pool
                .spawn_fn(move || {
                    if let Some(cached) = cache.get_result(&request.request_id)? {
                        debug!("Replaying cached result for request {}", request.request_id);
                        return Ok(cached);
                    }

                    let user_window = rate_limiter.user_window(request.user_id)?;
                    if !user_window.allowed {
                        return Err(Error::RateLimited(user_window).into());
                    }
                    if let Some(ref ip) = request.ip {
                        let ip_window = rate_limiter.ip_window(ip)?;
                        if !ip_window.allowed {
                            return Err(Error::RateLimited(ip_window).into());
                        }
                    }

                    let conn = db_pool.get().map_err(|e| e.context(Error::Connection))?;

                    let user = match cache.get_user(request.user_id)? {
                        Some(user) => user,
                        None => {
                            let users_repo = repo_factory.create_users_repo(&*conn);
                            let user = users_repo.find(request.user_id)?.ok_or(Error::NotFound)?;
                            if let Err(e) = cache.put_user(&user) {
                                warn!("Failed to cache user {}: {}", user.id, e);
                            }
                            user
                        }
                    };

                    // Soft pre-check on the cached counter. Not
                    // authoritative: the transaction repeats it on the
                    // locked row.
                    if let Some(count) = cache.get_count(user.id)? {
                        if count >= user.voucher_limit {
                            record_limit_breach(&*conn, &repo_factory, user.id, &request);
                            return Err(Error::LimitExceeded.into());
                        }
                    }

                    validate_voucher_code(&request.code)
                        .map_err(|_| Error::InvalidVoucher(InvalidVoucherReason::BadFormat))?;

                    {
                        let codes_repo = repo_factory.create_voucher_codes_repo(&*conn);
                        let code = codes_repo
                            .find_by_code(&request.code)?
                            .ok_or(Error::InvalidVoucher(InvalidVoucherReason::Unknown))?;
                        code.eligibility(user.id, SystemTime::now())
                            .map_err(Error::InvalidVoucher)?;
                    }

                    if user.is_premium {
                        let outcome = breaker.call(|| execute_claim(&*conn, &repo_factory, &request));
                        match outcome {
                            Ok((result, user)) => {
                                refresh_cache_after_claim(&*cache, &user, &result);
                                Ok(result)
                            }
                            Err(e) => {
                                if let Some(&Error::LimitExceeded) = error_kind(&e) {
                                    record_limit_breach(&*conn, &repo_factory, request.user_id, &request);
                                }
                                Err(e)
                            }
                        }
                    } else {
                        queue.enqueue(&request)?;
                        Ok(ClaimResult::pending(request.request_id.clone()))
                    }
                })
                .map_err(|e| e.context("Service Claims, claim endpoint error occurred.").into()),
        )
    }

    fn claim_status(&self, request_id: RequestId) -> ServiceFuture<ClaimStatusResponse> {
        let db_pool = self.db_pool.clone();
        let repo_factory = self.repo_factory.clone();
        let cache = self.cache.clone();
        let queue = self.queue.clone();

        Box::new(
            self.cpu_pool
                .spawn_fn(move || {
                    if let Some(result) = cache.get_result(&request_id)? {
                        return Ok(ClaimStatusResponse {
                            request_id,
                            status: result.status,
                            result: Some(result),
                            fail_reason: None,
                        });
                    }

                    if let Some(job) = queue.get(&request_id)? {
                        let status = match job.state {
                            JobState::Completed => {
                                job.result.as_ref().map(|r| r.status).unwrap_or(ClaimStatus::Success)
                            }
                            JobState::Failed => ClaimStatus::Failed,
                            _ => ClaimStatus::Pending,
                        };
                        return Ok(ClaimStatusResponse {
                            request_id,
                            status,
                            result: job.result,
                            fail_reason: job.fail_reason,
                        });
                    }

                    // queue entries and cached results expire; the claim
                    // row is the long-term record
                    let conn = db_pool.get().map_err(|e| e.context(Error::Connection))?;
                    let claims_repo = repo_factory.create_claims_repo(&*conn);
                    let claim = claims_repo.find_by_request_id(&request_id)?.ok_or(Error::NotFound)?;
                    Ok(ClaimStatusResponse {
                        request_id,
                        status: claim.status,
                        result: None,
                        fail_reason: None,
                    })
                })
                .map_err(|e| e.context("Service Claims, claim_status endpoint error occurred.").into()),
        )
    }

    fn queue_metrics(&self) -> ServiceFuture<QueueMetrics> {
        let cache = self.cache.clone();
        let queue = self.queue.clone();

        Box::new(
            self.cpu_pool
                .spawn_fn(move || {
                    let counts = queue.counts()?;
                    Ok(QueueMetrics {
                        queue: counts,
                        cache: cache.stats(),
                    })
                })
                .map_err(|e| e.context("Service Claims, queue_metrics endpoint error occurred.").into()),
        )
    }
}

/// The claim transaction, the single source of truth for invariants on
/// users, voucher codes and claims. Runs on the fast path (through the
/// circuit breaker) and in the worker. Lock order is user then voucher
/// code, system-wide.
pub fn execute_claim<T, F>(conn: &T, repo_factory: &F, request: &ClaimRequest) -> Result<(ClaimResult, User), FailureError>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let users_repo = repo_factory.create_users_repo(conn);
    let codes_repo = repo_factory.create_voucher_codes_repo(conn);
    let claims_repo = repo_factory.create_claims_repo(conn);
    let audit_repo = repo_factory.create_audit_repo(conn);

    conn.transaction::<(ClaimResult, User), FailureError, _>(move || {
        let user = users_repo
            .find_active_for_update(request.user_id)?
            .ok_or(Error::NotFound)?;
        if user.claimed_vouchers >= user.voucher_limit {
            return Err(Error::LimitExceeded.into());
        }

        let code = codes_repo
            .find_by_code_for_update(&request.code)?
            .ok_or(Error::InvalidVoucher(InvalidVoucherReason::Unknown))?;
        code.eligibility(user.id, SystemTime::now())
            .map_err(Error::InvalidVoucher)?;

        if claims_repo.success_exists(user.id, &request.code)? {
            return Err(Error::InvalidVoucher(InvalidVoucherReason::AlreadyClaimed).into());
        }

        let user = users_repo.increment_claimed(user.id)?;
        codes_repo.increment_usage(&code, user.id)?;
        let claim = claims_repo.create(NewClaim {
            user_id: user.id,
            voucher_code: request.code.clone(),
            status: ClaimStatus::Success,
            request_id: request.request_id.clone(),
            ip: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            device_id: request.device_id.clone(),
        })?;
        audit_repo.create(NewAuditEntry {
            user_id: user.id,
            claim_id: Some(claim.id),
            action: AuditAction::Claimed,
            metadata: Some(json!({ "code": request.code, "request_id": request.request_id })),
            ip: request.ip.clone(),
        })?;

        info!(
            "User {} claimed voucher {} (claim {}, request {})",
            user.id, request.code, claim.id, request.request_id
        );
        let result = ClaimResult::succeeded(request.request_id.clone(), claim.id, user.vouchers_remaining());
        Ok((result, user))
    })
}

/// Cache writes of the commit path: invalidate, then re-prime the counter
/// and the idempotency entry. Failures degrade to cache misses.
pub fn refresh_cache_after_claim(cache: &VoucherCache, user: &User, result: &ClaimResult) {
    if let Err(e) = cache.invalidate_user(user.id) {
        warn!("Failed to invalidate cache of user {}: {}", user.id, e);
    }
    if let Err(e) = cache.put_count(user.id, user.claimed_vouchers) {
        warn!("Failed to cache claim counter of user {}: {}", user.id, e);
    }
    if let Err(e) = cache.put_result(result) {
        warn!("Failed to cache result of request {}: {}", result.request_id, e);
    }
}

/// Appends the LIMIT_REACHED audit entry outside the failed transaction so
/// the row survives its rollback
pub fn record_limit_breach<T, F>(conn: &T, repo_factory: &F, user_id: UserId, request: &ClaimRequest)
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<T>,
{
    let audit_repo = repo_factory.create_audit_repo(conn);
    let entry = NewAuditEntry {
        user_id,
        claim_id: None,
        action: AuditAction::LimitReached,
        metadata: Some(json!({ "code": request.code, "request_id": request.request_id })),
        ip: request.ip.clone(),
    };
    if let Err(e) = audit_repo.create(entry) {
        warn!("Failed to append limit audit entry for user {}: {}", user_id, e);
    }
}

#[cfg(test)]
pub mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use futures_cpupool::CpuPool;
    use tokio_core::reactor::Core;

    use super::*;
    use cache::CacheStats;
    use queue::{ClaimJob, JobInfo, RetryDisposition};
    use rate_limiter::RateLimit;
    use repos::repo_factory::tests::*;

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

    pub struct RateLimiterMock {
        pub allow_user: bool,
        pub allow_ip: bool,
    }

    impl RateLimiter for RateLimiterMock {
        fn user_window(&self, _user_id: UserId) -> Result<RateLimit, FailureError> {
            Ok(decision(self.allow_user))
        }

        fn ip_window(&self, _ip: &str) -> Result<RateLimit, FailureError> {
            Ok(decision(self.allow_ip))
        }
    }

    fn decision(allowed: bool) -> RateLimit {
        RateLimit {
            allowed,
            limit: 10,
            remaining: if allowed { 9 } else { 0 },
            reset_ms: 60_000,
            retry_after_s: if allowed { 0 } else { 42 },
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

    pub fn create_service(cache: Arc<CacheMock>, queue: Arc<QueueMock>, admit: bool) -> TestClaimsService {
        ClaimsServiceImpl::new(
            mock_db_pool(),
            CpuPool::new(1),
            ReposFactoryMock::default(),
            cache,
            Arc::new(RateLimiterMock {
                allow_user: admit,
                allow_ip: admit,
            }),
            queue,
            CircuitBreaker::new(&::config::Breaker {
                failure_threshold: 5,
                success_threshold: 2,
                call_timeout_s: 60,
                open_duration_s: 30,
            }),
        )
    }

    pub fn claim_request(user_id: UserId, code: &str, request_id: &str) -> ClaimRequest {
        ClaimRequest {
            user_id,
            code: code.to_string(),
            request_id: RequestId(request_id.to_string()),
            ip: Some("10.0.0.1".to_string()),
            user_agent: Some("tests".to_string()),
            device_id: None,
        }
    }

    fn run_claim(service: &TestClaimsService, request: ClaimRequest) -> Result<ClaimResult, FailureError> {
        let mut core = Core::new().unwrap();
        core.run(service.claim(request))
    }

    #[test]
    fn premium_claim_commits_and_caches_the_result() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let result = run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_VALID_CODE, "r1")).unwrap();
        assert!(result.success);
        assert_eq!(result.status, ClaimStatus::Success);
        assert_eq!(result.vouchers_remaining, Some(9));
        assert!(queue.jobs.lock().unwrap().is_empty());
        // idempotency entry and counter were primed on the commit path
        assert_eq!(cache.results.lock().unwrap().get("r1").map(|r| r.status), Some(ClaimStatus::Success));
        assert_eq!(cache.counts.lock().unwrap().get(&MOCK_PREMIUM_USER.0), Some(&1));
    }

    #[test]
    fn retry_with_same_request_id_replays_the_cached_result() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let first = run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_VALID_CODE, "r1")).unwrap();
        let second = run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_VALID_CODE, "r1")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn regular_user_is_enqueued_and_duplicates_are_absorbed() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let result = run_claim(&service, claim_request(MOCK_REGULAR_USER, MOCK_VALID_CODE, "r2")).unwrap();
        assert_eq!(result.status, ClaimStatus::Pending);
        let repeat = run_claim(&service, claim_request(MOCK_REGULAR_USER, MOCK_VALID_CODE, "r2")).unwrap();
        assert_eq!(repeat.status, ClaimStatus::Pending);
        assert_eq!(queue.jobs.lock().unwrap().len(), 1);
    }

    #[test]
    fn rate_limited_user_is_rejected() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), false);

        let err = run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_VALID_CODE, "r3")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::RateLimited(limit)) => {
                assert_eq!(limit.remaining, 0);
                assert!(limit.retry_after_s > 0);
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn authoritative_limit_check_rejects_maxed_user() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let err = run_claim(&service, claim_request(MOCK_MAXED_USER, MOCK_VALID_CODE, "r4")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::LimitExceeded) => {}
            other => panic!("Expected LimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn soft_pre_check_rejects_on_cached_counter() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        cache.put_count(MOCK_REGULAR_USER, 10).unwrap();
        let err = run_claim(&service, claim_request(MOCK_REGULAR_USER, MOCK_VALID_CODE, "r5")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::LimitExceeded) => {}
            other => panic!("Expected LimitExceeded, got {:?}", other),
        }
        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_code_is_rejected_before_the_store() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let err = run_claim(&service, claim_request(MOCK_PREMIUM_USER, "summer 2024!", "r6")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::InvalidVoucher(InvalidVoucherReason::BadFormat)) => {}
            other => panic!("Expected BadFormat, got {:?}", other),
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let err = run_claim(&service, claim_request(MOCK_PREMIUM_USER, "NOSUCHCODE", "r7")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::InvalidVoucher(InvalidVoucherReason::Unknown)) => {}
            other => panic!("Expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn expired_code_is_rejected_without_state_change() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let err = run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_EXPIRED_CODE, "r8")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::InvalidVoucher(InvalidVoucherReason::Expired)) => {}
            other => panic!("Expected Expired, got {:?}", other),
        }
        assert!(cache.results.lock().unwrap().is_empty());
    }

    #[test]
    fn exhausted_code_is_rejected() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let err = run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_EXHAUSTED_CODE, "r9")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::InvalidVoucher(InvalidVoucherReason::UsageLimitReached)) => {}
            other => panic!("Expected UsageLimitReached, got {:?}", other),
        }
    }

    #[test]
    fn second_claim_of_the_same_code_is_rejected() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let err = run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_CLAIMED_CODE, "r10")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::InvalidVoucher(InvalidVoucherReason::AlreadyClaimed)) => {}
            other => panic!("Expected AlreadyClaimed, got {:?}", other),
        }
    }

    #[test]
    fn restricted_code_honours_the_allow_list() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let err = run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_RESTRICTED_CODE, "r11")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::InvalidVoucher(InvalidVoucherReason::NotAllowed)) => {}
            other => panic!("Expected NotAllowed, got {:?}", other),
        }

        let allowed = run_claim(&service, claim_request(MOCK_ALLOWED_USER, MOCK_RESTRICTED_CODE, "r12")).unwrap();
        assert!(allowed.success);
    }

    #[test]
    fn inactive_user_cannot_claim() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let err = run_claim(&service, claim_request(MOCK_INACTIVE_USER, MOCK_VALID_CODE, "r13")).unwrap_err();
        match error_kind(&err) {
            Some(&Error::NotFound) => {}
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn claim_status_prefers_the_cached_result() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        run_claim(&service, claim_request(MOCK_PREMIUM_USER, MOCK_VALID_CODE, "r14")).unwrap();
        let mut core = Core::new().unwrap();
        let status = core.run(service.claim_status(RequestId("r14".to_string()))).unwrap();
        assert_eq!(status.status, ClaimStatus::Success);
        assert!(status.result.is_some());
    }

    #[test]
    fn claim_status_of_unknown_request_is_not_found() {
        let cache = Arc::new(CacheMock::default());
        let queue = Arc::new(QueueMock::default());
        let service = create_service(cache.clone(), queue.clone(), true);

        let mut core = Core::new().unwrap();
        let err = core.run(service.claim_status(RequestId("missing".to_string()))).unwrap_err();
        match error_kind(&err) {
            Some(&Error::NotFound) => {}
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }
}
