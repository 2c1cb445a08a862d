use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::Connection;
use failure::Fail;

use models::{NewBlacklistedToken, UserId};
use repos::types::{map_db_error, RepoResult};
use schema::blacklisted_tokens::dsl as BlacklistedTokens;
use schema::user_sessions::dsl as UserSessions;

/// Sessions repository, responsible for the logout side of user_sessions
/// and blacklisted_tokens
pub struct SessionsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait SessionsRepo {
    /// Puts the presented token on the blacklist; repeats are absorbed
    fn blacklist_token(&self, payload: NewBlacklistedToken) -> RepoResult<()>;

    /// Deactivates every active session of the user, returns how many
    fn deactivate_sessions(&self, user_id: UserId) -> RepoResult<usize>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> SessionsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> SessionsRepo
    for SessionsRepoImpl<'a, T>
{
    fn blacklist_token(&self, payload: NewBlacklistedToken) -> RepoResult<()> {
        debug!("Blacklist token for user {:?}.", payload.user_id);

        diesel::insert_into(BlacklistedTokens::blacklisted_tokens)
            .values(&payload)
            .on_conflict_do_nothing()
            .execute(self.db_conn)
            .map(|_| ())
            .map_err(map_db_error)
            .map_err(|e| e.context("Blacklist token error occurred").into())
    }

    fn deactivate_sessions(&self, user_id: UserId) -> RepoResult<usize> {
        debug!("Deactivate sessions of user {}.", user_id);

        diesel::update(
            UserSessions::user_sessions
                .filter(UserSessions::user_id.eq(user_id))
                .filter(UserSessions::is_active.eq(true)),
        )
        .set(UserSessions::is_active.eq(false))
        .execute(self.db_conn)
        .map_err(map_db_error)
        .map_err(|e| e.context(format!("Deactivate sessions of user {} error occurred", user_id)).into())
    }
}
