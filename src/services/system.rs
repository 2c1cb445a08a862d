//! System service, responsible for the healthcheck
use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::Connection;
use failure::Fail;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};

use super::types::ServiceFuture;
use errors::Error;
use kv::KvPool;

pub trait SystemService {
    /// Store round-trip; answers "Ok" when the database is reachable
    fn healthcheck(&self) -> ServiceFuture<String>;
}

pub struct SystemServiceImpl<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub kv: KvPool,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
    > SystemServiceImpl<T, M>
{
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, kv: KvPool) -> Self {
        Self { db_pool, cpu_pool, kv }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
    > SystemService for SystemServiceImpl<T, M>
{
    fn healthcheck(&self) -> ServiceFuture<String> {
        let db_pool = self.db_pool.clone();
        let kv = self.kv.clone();

        Box::new(self.cpu_pool.spawn_fn(move || {
            let conn = db_pool.get().map_err(|e| e.context(Error::Connection))?;
            diesel::sql_query("SELECT 1")
                .execute(&*conn)
                .map_err(|e| e.context(Error::Connection))?;
            if !kv.ping() {
                warn!("Healthcheck: key/value store did not answer ping");
            }
            Ok("Ok".to_string())
        }))
    }
}
