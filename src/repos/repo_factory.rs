use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;

use repos::audit::{AuditRepo, AuditRepoImpl};
use repos::claims::{ClaimsRepo, ClaimsRepoImpl};
use repos::sessions::{SessionsRepo, SessionsRepoImpl};
use repos::users::{UsersRepo, UsersRepoImpl};
use repos::voucher_codes::{VoucherCodesRepo, VoucherCodesRepoImpl};

pub trait ReposFactory<C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static>:
    Clone + Send + Sync + 'static
{
    fn create_users_repo<'a>(&self, db_conn: &'a C) -> Box<UsersRepo + 'a>;
    fn create_voucher_codes_repo<'a>(&self, db_conn: &'a C) -> Box<VoucherCodesRepo + 'a>;
    fn create_claims_repo<'a>(&self, db_conn: &'a C) -> Box<ClaimsRepo + 'a>;
    fn create_audit_repo<'a>(&self, db_conn: &'a C) -> Box<AuditRepo + 'a>;
    fn create_sessions_repo<'a>(&self, db_conn: &'a C) -> Box<SessionsRepo + 'a>;
}

#[derive(Default, Copy, Clone)]
pub struct ReposFactoryImpl;

impl<C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> ReposFactory<C>
    for ReposFactoryImpl
{
    fn create_users_repo<'a>(&self, db_conn: &'a C) -> Box<UsersRepo + 'a> {
        Box::new(UsersRepoImpl::new(db_conn)) as Box<UsersRepo>
    }

    fn create_voucher_codes_repo<'a>(&self, db_conn: &'a C) -> Box<VoucherCodesRepo + 'a> {
        Box::new(VoucherCodesRepoImpl::new(db_conn)) as Box<VoucherCodesRepo>
    }

    fn create_claims_repo<'a>(&self, db_conn: &'a C) -> Box<ClaimsRepo + 'a> {
        Box::new(ClaimsRepoImpl::new(db_conn)) as Box<ClaimsRepo>
    }

    fn create_audit_repo<'a>(&self, db_conn: &'a C) -> Box<AuditRepo + 'a> {
        Box::new(AuditRepoImpl::new(db_conn)) as Box<AuditRepo>
    }

    fn create_sessions_repo<'a>(&self, db_conn: &'a C) -> Box<SessionsRepo + 'a> {
        Box::new(SessionsRepoImpl::new(db_conn)) as Box<SessionsRepo>
    }
}

pub mod tests {
    //! Mock connection, pool manager and repos used by the service tests.
    //! The mock transaction manager only counts BEGIN/COMMIT pairs, so
    //! transaction bodies run against the in-memory fixtures directly.

    use std::time::{Duration, SystemTime};

    use diesel::connection::{AnsiTransactionManager, SimpleConnection};
    use diesel::deserialize::{Queryable, QueryableByName};
    use diesel::pg::Pg;
    use diesel::query_builder::{AsQuery, QueryFragment, QueryId};
    use diesel::result::{ConnectionResult, QueryResult};
    use diesel::sql_types::HasSqlType;
    use diesel::Connection;
    use r2d2;

    use errors::Error;
    use models::*;
    use repos::audit::AuditRepo;
    use repos::claims::ClaimsRepo;
    use repos::sessions::SessionsRepo;
    use repos::types::RepoResult;
    use repos::users::UsersRepo;
    use repos::voucher_codes::VoucherCodesRepo;
    use super::ReposFactory;

    pub const MOCK_PREMIUM_USER: UserId = UserId(3);
    pub const MOCK_REGULAR_USER: UserId = UserId(2);
    pub const MOCK_MAXED_USER: UserId = UserId(5);
    pub const MOCK_ALLOWED_USER: UserId = UserId(7);
    pub const MOCK_INACTIVE_USER: UserId = UserId(9);

    pub static MOCK_VALID_CODE: &'static str = "SUMMER2024";
    pub static MOCK_EXPIRED_CODE: &'static str = "EXPIRED2023";
    pub static MOCK_SINGLE_USE_CODE: &'static str = "FLASH-20-SALE";
    pub static MOCK_EXHAUSTED_CODE: &'static str = "USEDUP2024";
    pub static MOCK_CLAIMED_CODE: &'static str = "TAKEN2024";
    pub static MOCK_RESTRICTED_CODE: &'static str = "VIP-ONLY-2024";

    pub struct MockConnection {
        transaction_manager: AnsiTransactionManager,
    }

    impl SimpleConnection for MockConnection {
        fn batch_execute(&self, _query: &str) -> QueryResult<()> {
            Ok(())
        }
    }

    impl Connection for MockConnection {
        type Backend = Pg;
        type TransactionManager = AnsiTransactionManager;

        fn establish(_database_url: &str) -> ConnectionResult<Self> {
            Ok(MockConnection {
                transaction_manager: AnsiTransactionManager::new(),
            })
        }

        fn execute(&self, _query: &str) -> QueryResult<usize> {
            Ok(0)
        }

        fn query_by_index<T, U>(&self, _source: T) -> QueryResult<Vec<U>>
        where
            T: AsQuery,
            T::Query: QueryFragment<Pg> + QueryId,
            Pg: HasSqlType<T::SqlType>,
            U: Queryable<T::SqlType, Pg>,
        {
            Ok(vec![])
        }

        fn query_by_name<T, U>(&self, _source: &T) -> QueryResult<Vec<U>>
        where
            T: QueryFragment<Pg> + QueryId,
            U: QueryableByName<Pg>,
        {
            Ok(vec![])
        }

        fn execute_returning_count<T>(&self, _source: &T) -> QueryResult<usize>
        where
            T: QueryFragment<Pg> + QueryId,
        {
            Ok(0)
        }

        fn transaction_manager(&self) -> &Self::TransactionManager {
            &self.transaction_manager
        }
    }

    #[derive(Debug, Default, Copy, Clone)]
    pub struct MockConnectionManager;

    impl r2d2::ManageConnection for MockConnectionManager {
        type Connection = MockConnection;
        type Error = ::diesel::ConnectionError;

        fn connect(&self) -> Result<MockConnection, Self::Error> {
            MockConnection::establish("mock")
        }

        fn is_valid(&self, _conn: &mut MockConnection) -> Result<(), Self::Error> {
            Ok(())
        }

        fn has_broken(&self, _conn: &mut MockConnection) -> bool {
            false
        }
    }

    pub fn create_user(id: UserId, claimed: i32, limit: i32, premium: bool, active: bool) -> User {
        let now = SystemTime::now();
        User {
            id,
            email: format!("user{}@example.com", id),
            name: None,
            claimed_vouchers: claimed,
            voucher_limit: limit,
            is_premium: premium,
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    fn mock_user(id: UserId) -> Option<User> {
        match id {
            MOCK_REGULAR_USER => Some(create_user(id, 0, 10, false, true)),
            MOCK_PREMIUM_USER => Some(create_user(id, 0, 10, true, true)),
            MOCK_MAXED_USER => Some(create_user(id, 10, 10, true, true)),
            MOCK_ALLOWED_USER => Some(create_user(id, 1, 10, true, true)),
            MOCK_INACTIVE_USER => Some(create_user(id, 0, 10, true, false)),
            _ => None,
        }
    }

    pub fn create_code(code: &str, usage_limit: i32, usage_count: i32) -> VoucherCode {
        let now = SystemTime::now();
        VoucherCode {
            id: VoucherCodeId(1),
            code: code.to_string(),
            is_active: true,
            usage_limit,
            usage_count,
            valid_from: None,
            expires_at: Some(now + Duration::from_secs(30 * 24 * 3600)),
            allowed_users: None,
            discount_type: DiscountType::Percent,
            discount_value: 20.0,
            is_used: false,
            used_by: None,
            used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn mock_code(code: &str) -> Option<VoucherCode> {
        if code == MOCK_VALID_CODE || code == MOCK_CLAIMED_CODE {
            Some(create_code(code, 1000, 0))
        } else if code == MOCK_SINGLE_USE_CODE {
            Some(create_code(code, 1, 0))
        } else if code == MOCK_EXHAUSTED_CODE {
            Some(create_code(code, 100, 100))
        } else if code == MOCK_EXPIRED_CODE {
            let mut expired = create_code(code, 1000, 0);
            expired.expires_at = Some(SystemTime::now() - Duration::from_secs(24 * 3600));
            Some(expired)
        } else if code == MOCK_RESTRICTED_CODE {
            let mut restricted = create_code(code, 1000, 0);
            restricted.allowed_users = Some(vec![MOCK_ALLOWED_USER]);
            Some(restricted)
        } else {
            None
        }
    }

    pub fn create_claim(id: ClaimId, user_id: UserId, code: &str, status: ClaimStatus) -> Claim {
        Claim {
            id,
            user_id,
            voucher_code: code.to_string(),
            status,
            request_id: RequestId(format!("req-{}", id)),
            ip: Some("10.0.0.1".to_string()),
            user_agent: None,
            device_id: None,
            claimed_at: SystemTime::now(),
            refunded_at: None,
            refunded_by: None,
            refund_reason: None,
        }
    }

    pub const MOCK_REFUNDABLE_CLAIM: ClaimId = ClaimId(1);
    pub const MOCK_REFUNDED_CLAIM: ClaimId = ClaimId(77);
    pub const MOCK_PENDING_CLAIM: ClaimId = ClaimId(78);

    #[derive(Clone)]
    pub struct UsersRepoMock;

    impl UsersRepo for UsersRepoMock {
        fn find(&self, user_id: UserId) -> RepoResult<Option<User>> {
            Ok(mock_user(user_id))
        }

        fn find_active_for_update(&self, user_id: UserId) -> RepoResult<Option<User>> {
            Ok(mock_user(user_id).filter(|user| user.is_active))
        }

        fn increment_claimed(&self, user_id: UserId) -> RepoResult<User> {
            let mut user = mock_user(user_id).ok_or(Error::NotFound)?;
            user.claimed_vouchers += 1;
            Ok(user)
        }

        fn decrement_claimed(&self, user_id: UserId) -> RepoResult<User> {
            let mut user = mock_user(user_id).ok_or(Error::NotFound)?;
            user.claimed_vouchers = (user.claimed_vouchers - 1).max(0);
            Ok(user)
        }
    }

    #[derive(Clone)]
    pub struct VoucherCodesRepoMock;

    impl VoucherCodesRepo for VoucherCodesRepoMock {
        fn find_by_code(&self, code: &str) -> RepoResult<Option<VoucherCode>> {
            Ok(mock_code(code))
        }

        fn find_by_code_for_update(&self, code: &str) -> RepoResult<Option<VoucherCode>> {
            Ok(mock_code(code))
        }

        fn increment_usage(&self, locked: &VoucherCode, user_id: UserId) -> RepoResult<VoucherCode> {
            let mut updated = locked.clone();
            updated.usage_count += 1;
            updated.is_used = updated.usage_count >= updated.usage_limit;
            if updated.usage_limit == 1 {
                updated.used_by = Some(user_id);
                updated.used_at = Some(SystemTime::now());
            }
            Ok(updated)
        }

        fn decrement_usage(&self, code: &str) -> RepoResult<Option<VoucherCode>> {
            Ok(mock_code(code).map(|mut updated| {
                updated.usage_count = (updated.usage_count - 1).max(0);
                updated.is_used = false;
                updated
            }))
        }
    }

    #[derive(Clone)]
    pub struct ClaimsRepoMock;

    impl ClaimsRepo for ClaimsRepoMock {
        fn create(&self, payload: NewClaim) -> RepoResult<Claim> {
            Ok(Claim {
                id: ClaimId(1),
                user_id: payload.user_id,
                voucher_code: payload.voucher_code,
                status: payload.status,
                request_id: payload.request_id,
                ip: payload.ip,
                user_agent: payload.user_agent,
                device_id: payload.device_id,
                claimed_at: SystemTime::now(),
                refunded_at: None,
                refunded_by: None,
                refund_reason: None,
            })
        }

        fn find(&self, claim_id: ClaimId) -> RepoResult<Option<Claim>> {
            self.find_for_update(claim_id)
        }

        fn find_for_update(&self, claim_id: ClaimId) -> RepoResult<Option<Claim>> {
            Ok(match claim_id {
                MOCK_REFUNDABLE_CLAIM => Some(create_claim(claim_id, MOCK_PREMIUM_USER, MOCK_VALID_CODE, ClaimStatus::Success)),
                MOCK_REFUNDED_CLAIM => {
                    let mut claim = create_claim(claim_id, MOCK_PREMIUM_USER, MOCK_VALID_CODE, ClaimStatus::Refunded);
                    claim.refunded_at = Some(SystemTime::now());
                    Some(claim)
                }
                MOCK_PENDING_CLAIM => Some(create_claim(claim_id, MOCK_REGULAR_USER, MOCK_VALID_CODE, ClaimStatus::Pending)),
                _ => None,
            })
        }

        fn find_by_request_id(&self, _request_id: &RequestId) -> RepoResult<Option<Claim>> {
            Ok(None)
        }

        fn success_exists(&self, _user_id: UserId, code: &str) -> RepoResult<bool> {
            Ok(code == MOCK_CLAIMED_CODE)
        }

        fn list_for_user(&self, user_id: UserId, _count: i64) -> RepoResult<Vec<Claim>> {
            Ok(vec![create_claim(ClaimId(1), user_id, MOCK_VALID_CODE, ClaimStatus::Success)])
        }

        fn set_refunded(&self, claim_id: ClaimId, refunded_by: Option<UserId>, reason: &str) -> RepoResult<Claim> {
            let mut claim = create_claim(claim_id, MOCK_PREMIUM_USER, MOCK_VALID_CODE, ClaimStatus::Refunded);
            claim.refunded_at = Some(SystemTime::now());
            claim.refunded_by = refunded_by;
            claim.refund_reason = Some(reason.to_string());
            Ok(claim)
        }
    }

    #[derive(Clone)]
    pub struct AuditRepoMock;

    impl AuditRepo for AuditRepoMock {
        fn create(&self, payload: NewAuditEntry) -> RepoResult<AuditEntry> {
            Ok(AuditEntry {
                id: AuditEntryId(1),
                user_id: payload.user_id,
                claim_id: payload.claim_id,
                action: payload.action,
                metadata: payload.metadata,
                ip: payload.ip,
                created_at: SystemTime::now(),
            })
        }
    }

    #[derive(Clone)]
    pub struct SessionsRepoMock;

    impl SessionsRepo for SessionsRepoMock {
        fn blacklist_token(&self, _payload: NewBlacklistedToken) -> RepoResult<()> {
            Ok(())
        }

        fn deactivate_sessions(&self, _user_id: UserId) -> RepoResult<usize> {
            Ok(1)
        }
    }

    #[derive(Default, Copy, Clone)]
    pub struct ReposFactoryMock;

    impl<C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> ReposFactory<C>
        for ReposFactoryMock
    {
        fn create_users_repo<'a>(&self, _db_conn: &'a C) -> Box<UsersRepo + 'a> {
            Box::new(UsersRepoMock)
        }

        fn create_voucher_codes_repo<'a>(&self, _db_conn: &'a C) -> Box<VoucherCodesRepo + 'a> {
            Box::new(VoucherCodesRepoMock)
        }

        fn create_claims_repo<'a>(&self, _db_conn: &'a C) -> Box<ClaimsRepo + 'a> {
            Box::new(ClaimsRepoMock)
        }

        fn create_audit_repo<'a>(&self, _db_conn: &'a C) -> Box<AuditRepo + 'a> {
            Box::new(AuditRepoMock)
        }

        fn create_sessions_repo<'a>(&self, _db_conn: &'a C) -> Box<SessionsRepo + 'a> {
            Box::new(SessionsRepoMock)
        }
    }

    pub fn mock_db_pool() -> r2d2::Pool<MockConnectionManager> {
        r2d2::Pool::builder()
            .max_size(1)
            .build(MockConnectionManager)
            .expect("Failed to create mock pool")
    }
}
