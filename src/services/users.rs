//! Users service: summary, claim history and logout
use std::sync::Arc;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Fail;
use futures::Future;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};

use cache::VoucherCache;
use errors::Error;
use models::*;
use repos::ReposFactory;
use super::types::ServiceFuture;

const HISTORY_PAGE: i64 = 50;
const SUMMARY_RECENT: i64 = 10;

pub trait UsersService {
    /// Returns the user record with claim counters and recent claims
    fn user_summary(&self) -> ServiceFuture<UserSummary>;
    /// Lists the most recent claims of the user
    fn history(&self) -> ServiceFuture<Vec<Claim>>;
    /// Blacklists the presented token and deactivates the user's sessions
    fn logout(&self, token: String) -> ServiceFuture<()>;
}

/// Users service, responsible for user-facing reads and logout
pub struct UsersServiceImpl<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub repo_factory: F,
    pub cache: Arc<VoucherCache>,
    pub user_id: Option<UserId>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > UsersServiceImpl<T, M, F>
{
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, repo_factory: F, cache: Arc<VoucherCache>, user_id: Option<UserId>) -> Self {
        Self {
            db_pool,
            cpu_pool,
            repo_factory,
            cache,
            user_id,
        }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
    > UsersService for UsersServiceImpl<T, M, F>
{
    fn user_summary(&self) -> ServiceFuture<UserSummary> {
        let db_pool = self.db_pool.clone();
        let repo_factory = self.repo_factory.clone();
        let cache = self.cache.clone();
        let user_id = self.user_id;

        Box::new(
            self.cpu_pool
                .spawn_fn(move || {
                    let user_id = user_id.ok_or(Error::Forbidden)?;
                    let conn = db_pool.get().map_err(|e| e.context(Error::Connection))?;

                    let user = match cache.get_user(user_id)? {
                        Some(user) => user,
                        None => {
                            let users_repo = repo_factory.create_users_repo(&*conn);
                            let user = users_repo.find(user_id)?.ok_or(Error::NotFound)?;
                            if let Err(e) = cache.put_user(&user) {
                                warn!("Failed to cache user {}: {}", user.id, e);
                            }
                            user
                        }
                    };

                    let claims_repo = repo_factory.create_claims_repo(&*conn);
                    let recent_claims = claims_repo.list_for_user(user_id, SUMMARY_RECENT)?;
                    Ok(UserSummary::new(user, recent_claims))
                })
                .map_err(|e| e.context("Service Users, user_summary endpoint error occurred.").into()),
        )
    }

    fn history(&self) -> ServiceFuture<Vec<Claim>> {
        let db_pool = self.db_pool.clone();
        let repo_factory = self.repo_factory.clone();
        let user_id = self.user_id;

        Box::new(
            self.cpu_pool
                .spawn_fn(move || {
                    let user_id = user_id.ok_or(Error::Forbidden)?;
                    let conn = db_pool.get().map_err(|e| e.context(Error::Connection))?;
                    let claims_repo = repo_factory.create_claims_repo(&*conn);
                    claims_repo.list_for_user(user_id, HISTORY_PAGE)
                })
                .map_err(|e| e.context("Service Users, history endpoint error occurred.").into()),
        )
    }

    fn logout(&self, token: String) -> ServiceFuture<()> {
        let db_pool = self.db_pool.clone();
        let repo_factory = self.repo_factory.clone();
        let cache = self.cache.clone();
        let user_id = self.user_id;

        Box::new(
            self.cpu_pool
                .spawn_fn(move || {
                    let conn = db_pool.get().map_err(|e| e.context(Error::Connection))?;
                    let sessions_repo = repo_factory.create_sessions_repo(&*conn);

                    sessions_repo.blacklist_token(NewBlacklistedToken {
                        token_hash: token,
                        user_id,
                        expires_at: None,
                    })?;
                    if let Some(user_id) = user_id {
                        let closed = sessions_repo.deactivate_sessions(user_id)?;
                        if let Err(e) = cache.invalidate_user(user_id) {
                            warn!("Failed to invalidate cache of user {}: {}", user_id, e);
                        }
                        info!("User {} logged out, {} sessions closed", user_id, closed);
                    }
                    Ok(())
                })
                .map_err(|e| e.context("Service Users, logout endpoint error occurred.").into()),
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

    fn create_service(user_id: Option<UserId>) -> UsersServiceImpl<MockConnection, MockConnectionManager, ReposFactoryMock> {
        UsersServiceImpl::new(
            mock_db_pool(),
            CpuPool::new(1),
            ReposFactoryMock::default(),
            Arc::new(CacheMock::default()),
            user_id,
        )
    }

    #[test]
    fn summary_returns_counters_and_recent_claims() {
        let service = create_service(Some(MOCK_PREMIUM_USER));
        let mut core = Core::new().unwrap();
        let summary = core.run(service.user_summary()).unwrap();
        assert_eq!(summary.vouchers_claimed, 0);
        assert_eq!(summary.vouchers_remaining, 10);
        assert_eq!(summary.recent_claims.len(), 1);
    }

    #[test]
    fn summary_requires_a_user() {
        let service = create_service(None);
        let mut core = Core::new().unwrap();
        let err = core.run(service.user_summary()).unwrap_err();
        match error_kind(&err) {
            Some(&Error::Forbidden) => {}
            other => panic!("Expected Forbidden, got {:?}", other),
        }
    }

    #[test]
    fn history_lists_claims() {
        let service = create_service(Some(MOCK_PREMIUM_USER));
        let mut core = Core::new().unwrap();
        let claims = core.run(service.history()).unwrap();
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn logout_succeeds_for_authenticated_user() {
        let service = create_service(Some(MOCK_PREMIUM_USER));
        let mut core = Core::new().unwrap();
        assert!(core.run(service.logout("token".to_string())).is_ok());
    }
}
