use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::dsl::sql;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::Connection;
use failure::Fail;

use models::{User, UserId};
use repos::types::{map_db_error, RepoResult};
use schema::users::dsl as Users;

/// Users repository, responsible for handling users table
pub struct UsersRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait UsersRepo {
    /// Returns user by id
    fn find(&self, user_id: UserId) -> RepoResult<Option<User>>;

    /// Locks the active user row for the rest of the transaction
    fn find_active_for_update(&self, user_id: UserId) -> RepoResult<Option<User>>;

    /// Increments the claimed counter by one
    fn increment_claimed(&self, user_id: UserId) -> RepoResult<User>;

    /// Decrements the claimed counter by one, floored at zero
    fn decrement_claimed(&self, user_id: UserId) -> RepoResult<User>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> UsersRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> UsersRepo
    for UsersRepoImpl<'a, T>
{
    fn find(&self, user_id: UserId) -> RepoResult<Option<User>> {
        debug!("Find user {}.", user_id);

        Users::users
            .filter(Users::id.eq(user_id))
            .get_result(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Find user {} error occurred", user_id)).into())
    }

    fn find_active_for_update(&self, user_id: UserId) -> RepoResult<Option<User>> {
        debug!("Lock user {} for update.", user_id);

        Users::users
            .filter(Users::id.eq(user_id))
            .filter(Users::is_active.eq(true))
            .for_update()
            .get_result(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Lock user {} for update error occurred", user_id)).into())
    }

    fn increment_claimed(&self, user_id: UserId) -> RepoResult<User> {
        debug!("Increment claimed vouchers of user {}.", user_id);

        let query = diesel::update(Users::users.filter(Users::id.eq(user_id))).set((
            Users::claimed_vouchers.eq(Users::claimed_vouchers + 1),
            Users::updated_at.eq(diesel::dsl::now),
        ));

        query
            .get_result(self.db_conn)
            .map_err(map_db_error)
            .map_err(|e| {
                e.context(format!("Increment claimed vouchers of user {} error occurred", user_id))
                    .into()
            })
    }

    fn decrement_claimed(&self, user_id: UserId) -> RepoResult<User> {
        debug!("Decrement claimed vouchers of user {}.", user_id);

        let query = diesel::update(Users::users.filter(Users::id.eq(user_id))).set((
            Users::claimed_vouchers.eq(sql::<Integer>("GREATEST(claimed_vouchers - 1, 0)")),
            Users::updated_at.eq(diesel::dsl::now),
        ));

        query
            .get_result(self.db_conn)
            .map_err(map_db_error)
            .map_err(|e| {
                e.context(format!("Decrement claimed vouchers of user {} error occurred", user_id))
                    .into()
            })
    }
}
