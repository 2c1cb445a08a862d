//! Refunds service: reverses a successful claim transactionally
use std::sync::Arc;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::{Error as FailureError, Fail};
use futures::Future;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};

use cache::VoucherCache;
use errors::Error;
use models::*;
use repos::ReposFactory;
use super::types::ServiceFuture;

pub trait RefundsService {
    /// Flips a successful claim to refunded and releases its counters
    fn refund(&self, payload: RefundPayload) -> ServiceFuture<Claim>;
}

/// Refunds service, responsible for the administrative reversal path
pub struct RefundsServiceImpl<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub repo_factory: F,
    pub cache: Arc<VoucherCache>,
    pub admin_id: Option<UserId>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > RefundsServiceImpl<T, M, F>
{
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, repo_factory: F, cache: Arc<VoucherCache>, admin_id: Option<UserId>) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            cache,
            admin_id,
        }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > RefundsService for RefundsServiceImpl<T, M, F>
{
    fn refund(&self, payload: RefundPayload) -> ServiceFuture<Claim> {
        let db_pool = self.db_pool.clone();
        let repo_factory = self.repo_factory.clone();
        let cache = self.cache.clone();
        let admin_id = self.admin_id;

        Box::new(
            self.cpu_pool
                .spawn_fn(move || {
                    let conn = db_pool.get().map_err(|e| e.context(Error::Connection))?;

                    let claims_repo = repo_factory.create_claims_repo(&*conn);
                    let users_repo = repo_factory.create_users_repo(&*conn);
                    let codes_repo = repo_factory.create_voucher_codes_repo(&*conn);
                    let audit_repo = repo_factory.create_audit_repo(&*conn);

                    let reason = payload.reason.clone();
                    let refunded = conn.transaction::<Claim, FailureError, _>(move || {
                        let claim = claims_repo.find_for_update(payload.claim_id)?.ok_or(Error::NotFound)?;
                        if claim.status != ClaimStatus::Success {
                            return Err(Error::Validate(validation_errors!({
                                "claim_id": ["claim_id" => "Only successful claims can be refunded"]
                            }))
                            .into());
                        }

                        let claim = claims_repo.set_refunded(claim.id, admin_id, &reason)?;
                        // same lock order as the claim path: user, then code
                        users_repo.decrement_claimed(claim.user_id)?;
                        if codes_repo.decrement_usage(&claim.voucher_code)?.is_none() {
                            warn!("Refunded claim {} references missing voucher code {}", claim.id, claim.voucher_code);
                        }
                        audit_repo.create(NewAuditEntry {
                            user_id: claim.user_id,
                            claim_id: Some(claim.id),
                            action: AuditAction::Refund,
                            metadata: Some(json!({ "reason": reason, "admin_id": admin_id })),
                            ip: None,
                        })?;

                        info!("Claim {} of user {} refunded", claim.id, claim.user_id);
                        Ok(claim)
                    })?;

                    if let Err(e) = cache.invalidate_user(refunded.user_id) {
                        warn!("Failed to invalidate cache of user {}: {}", refunded.user_id, e);
                    }
                    Ok(refunded)
                })
                .map_err(|e| e.context("Service Refunds, refund endpoint error occurred.").into()),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_cpupool::CpuPool;
    use tokio_core::reactor::Core;

    use super::*;
    use errors::error_kind;
    use repos::repo_factory::tests::*;
    use services::claims::tests::CacheMock;

    fn create_service() -> RefundsServiceImpl<MockConnection, MockConnectionManager, ReposFactoryMock> {
        RefundsServiceImpl::new(
            mock_db_pool(),
            CpuPool::new(1),
            ReposFactoryMock::default(),
            Arc::new(CacheMock::default()),
            Some(UserId(1)),
        )
    }

    fn refund_payload(claim_id: ClaimId) -> RefundPayload {
        RefundPayload {
            claim_id,
            reason: "fraud".to_string(),
        }
    }

    #[test]
    fn refund_flips_a_successful_claim() {
        let service = create_service();
        let mut core = Core::new().unwrap();
        let claim = core.run(service.refund(refund_payload(MOCK_REFUNDABLE_CLAIM))).unwrap();
        assert_eq!(claim.status, ClaimStatus::Refunded);
        assert!(claim.refunded_at.is_some());
        assert_eq!(claim.refund_reason, Some("fraud".to_string()));
    }

    #[test]
    fn refund_of_a_refunded_claim_fails() {
        let service = create_service();
        let mut core = Core::new().unwrap();
        let err = core.run(service.refund(refund_payload(MOCK_REFUNDED_CLAIM))).unwrap_err();
        match error_kind(&err) {
            Some(&Error::Validate(_)) => {}
            other => panic!("Expected Validate, got {:?}", other),
        }
    }

    #[test]
    fn refund_of_a_pending_claim_fails() {
        let service = create_service();
        let mut core = Core::new().unwrap();
        assert!(core.run(service.refund(refund_payload(MOCK_PENDING_CLAIM))).is_err());
    }

    #[test]
    fn refund_of_a_missing_claim_is_not_found() {
        let service = create_service();
        let mut core = Core::new().unwrap();
        let err = core.run(service.refund(refund_payload(ClaimId(404)))).unwrap_err();
        match error_kind(&err) {
            Some(&Error::NotFound) => {}
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }
}
