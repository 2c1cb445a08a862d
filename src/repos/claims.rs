use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::Connection;
use failure::Fail;

use models::{Claim, ClaimId, ClaimStatus, NewClaim, RequestId, UserId};
use repos::types::{map_db_error, RepoResult};
use schema::voucher_claims::dsl as Claims;

/// Claims repository, responsible for handling voucher_claims table
pub struct ClaimsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait ClaimsRepo {
    /// Creates new claim row
    fn create(&self, payload: NewClaim) -> RepoResult<Claim>;

    /// Returns claim by id
    fn find(&self, claim_id: ClaimId) -> RepoResult<Option<Claim>>;

    /// Locks the claim row for the rest of the transaction
    fn find_for_update(&self, claim_id: ClaimId) -> RepoResult<Option<Claim>>;

    /// Returns claim by its idempotency key
    fn find_by_request_id(&self, request_id: &RequestId) -> RepoResult<Option<Claim>>;

    /// Checks whether the user already holds a successful claim of the code
    fn success_exists(&self, user_id: UserId, code: &str) -> RepoResult<bool>;

    /// Lists the most recent claims of the user
    fn list_for_user(&self, user_id: UserId, count: i64) -> RepoResult<Vec<Claim>>;

    /// Flips a successful claim to refunded
    fn set_refunded(&self, claim_id: ClaimId, refunded_by: Option<UserId>, reason: &str) -> RepoResult<Claim>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> ClaimsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> ClaimsRepo
    for ClaimsRepoImpl<'a, T>
{
    fn create(&self, payload: NewClaim) -> RepoResult<Claim> {
        debug!("Create new claim record {:?}.", payload);

        let query = diesel::insert_into(Claims::voucher_claims).values(&payload);
        query
            .get_result::<Claim>(self.db_conn)
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Create new claim record {:?} error occurred", payload)).into())
    }

    fn find(&self, claim_id: ClaimId) -> RepoResult<Option<Claim>> {
        debug!("Find claim {}.", claim_id);

        Claims::voucher_claims
            .filter(Claims::id.eq(claim_id))
            .get_result(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Find claim {} error occurred", claim_id)).into())
    }

    fn find_for_update(&self, claim_id: ClaimId) -> RepoResult<Option<Claim>> {
        debug!("Lock claim {} for update.", claim_id);

        Claims::voucher_claims
            .filter(Claims::id.eq(claim_id))
            .for_update()
            .get_result(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Lock claim {} for update error occurred", claim_id)).into())
    }

    fn find_by_request_id(&self, request_id: &RequestId) -> RepoResult<Option<Claim>> {
        debug!("Find claim by request id {}.", request_id);

        Claims::voucher_claims
            .filter(Claims::request_id.eq(request_id))
            .get_result(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Find claim by request id {} error occurred", request_id)).into())
    }

    fn success_exists(&self, user_id: UserId, code: &str) -> RepoResult<bool> {
        debug!("Check successful claim of code {} by user {}.", code, user_id);

        Claims::voucher_claims
            .filter(Claims::user_id.eq(user_id))
            .filter(Claims::voucher_code.eq(code))
            .filter(Claims::status.eq(ClaimStatus::Success))
            .select(Claims::id)
            .first::<ClaimId>(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map(|found| found.is_some())
            .map_err(|e: ::failure::Error| {
                e.context(format!("Check successful claim of code {} by user {} error occurred", code, user_id))
                    .into()
            })
    }

    fn list_for_user(&self, user_id: UserId, count: i64) -> RepoResult<Vec<Claim>> {
        debug!("List claims of user {}.", user_id);

        Claims::voucher_claims
            .filter(Claims::user_id.eq(user_id))
            .order(Claims::claimed_at.desc())
            .limit(count)
            .get_results(self.db_conn)
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("List claims of user {} error occurred", user_id)).into())
    }

    fn set_refunded(&self, claim_id: ClaimId, refunded_by: Option<UserId>, reason: &str) -> RepoResult<Claim> {
        debug!("Mark claim {} refunded.", claim_id);

        let query = diesel::update(Claims::voucher_claims.filter(Claims::id.eq(claim_id))).set((
            Claims::status.eq(ClaimStatus::Refunded),
            Claims::refunded_at.eq(diesel::dsl::now.nullable()),
            Claims::refunded_by.eq(refunded_by),
            Claims::refund_reason.eq(reason),
        ));

        query
            .get_result(self.db_conn)
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Mark claim {} refunded error occurred", claim_id)).into())
    }
}
