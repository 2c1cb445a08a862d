use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::Connection;
use failure::Fail;

use models::{AuditEntry, NewAuditEntry};
use repos::types::{map_db_error, RepoResult};
use schema::voucher_audit_log::dsl as AuditLog;

/// Audit repository, responsible for appending to voucher_audit_log.
/// Nothing in this service reads the log back.
pub struct AuditRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait AuditRepo {
    /// Appends an audit entry
    fn create(&self, payload: NewAuditEntry) -> RepoResult<AuditEntry>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> AuditRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> AuditRepo
    for AuditRepoImpl<'a, T>
{
    fn create(&self, payload: NewAuditEntry) -> RepoResult<AuditEntry> {
        debug!("Append audit entry {:?}.", payload);

        let query = diesel::insert_into(AuditLog::voucher_audit_log).values(&payload);
        query
            .get_result::<AuditEntry>(self.db_conn)
            .map_err(map_db_error)
            .map_err(|e| e.context(format!("Append audit entry {:?} error occurred", payload)).into())
    }
}
