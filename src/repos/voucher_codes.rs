use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::dsl::sql;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::Connection;
use failure::Fail;

use models::{UserId, VoucherCode};
use repos::types::{map_db_error, RepoResult};
use schema::voucher_codes::dsl as VoucherCodes;

/// VoucherCodes repository, responsible for handling voucher_codes table
pub struct VoucherCodesRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait VoucherCodesRepo {
    /// Returns voucher code by its code string
    fn find_by_code(&self, code: &str) -> RepoResult<Option<VoucherCode>>;

    /// Locks the voucher code row for the rest of the transaction
    fn find_by_code_for_update(&self, code: &str) -> RepoResult<Option<VoucherCode>>;

    /// Consumes one usage of the locked row. Marks the code used when this
    /// usage reaches the cap; single-use codes also record the consumer.
    fn increment_usage(&self, locked: &VoucherCode, user_id: UserId) -> RepoResult<VoucherCode>;

    /// Releases one usage on refund, floored at zero
    fn decrement_usage(&self, code: &str) -> RepoResult<Option<VoucherCode>>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> VoucherCodesRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> VoucherCodesRepo
    for VoucherCodesRepoImpl<'a, T>
{
    fn find_by_code(&self, code: &str) -> RepoResult<Option<VoucherCode>> {
        debug!("Find voucher code {}.", code);

        VoucherCodes::voucher_codes
            .filter(VoucherCodes::code.eq(code))
            .get_result(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Find voucher code {} error occurred", code)).into())
    }

    fn find_by_code_for_update(&self, code: &str) -> RepoResult<Option<VoucherCode>> {
        debug!("Lock voucher code {} for update.", code);

        VoucherCodes::voucher_codes
            .filter(VoucherCodes::code.eq(code))
            .for_update()
            .get_result(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Lock voucher code {} for update error occurred", code)).into())
    }

    fn increment_usage(&self, locked: &VoucherCode, user_id: UserId) -> RepoResult<VoucherCode> {
        debug!("Increment usage of voucher code {} by user {}.", locked.code, user_id);

        let new_count = locked.usage_count + 1;
        let now_used = new_count >= locked.usage_limit;
        let target = diesel::update(VoucherCodes::voucher_codes.filter(VoucherCodes::id.eq(locked.id)));

        let updated = if locked.usage_limit == 1 {
            target
                .set((
                    VoucherCodes::usage_count.eq(new_count),
                    VoucherCodes::is_used.eq(now_used),
                    VoucherCodes::used_by.eq(user_id),
                    VoucherCodes::used_at.eq(diesel::dsl::now.nullable()),
                    VoucherCodes::updated_at.eq(diesel::dsl::now),
                ))
                .get_result(self.db_conn)
        } else {
            target
                .set((
                    VoucherCodes::usage_count.eq(new_count),
                    VoucherCodes::is_used.eq(now_used),
                    VoucherCodes::updated_at.eq(diesel::dsl::now),
                ))
                .get_result(self.db_conn)
        };

        updated.map_err(map_db_error).map_err(|e| {
            e.context(format!("Increment usage of voucher code {} error occurred", locked.code))
                .into()
        })
    }

    fn decrement_usage(&self, code: &str) -> RepoResult<Option<VoucherCode>> {
        debug!("Decrement usage of voucher code {}.", code);

        diesel::update(VoucherCodes::voucher_codes.filter(VoucherCodes::code.eq(code)))
            .set((
                VoucherCodes::usage_count.eq(sql::<Integer>("GREATEST(usage_count - 1, 0)")),
                VoucherCodes::is_used.eq(false),
                VoucherCodes::updated_at.eq(diesel::dsl::now),
            ))
            .get_result(self.db_conn)
            .optional()
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Decrement usage of voucher code {} error occurred", code)).into())
    }
}
