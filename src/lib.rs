//! Vouchers is a microservice responsible for claiming and refunding
//! voucher codes under arbitrary concurrency and client retries.
//! The layered structure of the app is
//!
//! `Application -> Controller -> Service -> Repo + KV`
//!
//! Each layer can throw Error with context or cover occurred error with
//! Error in the context. When error is not covered with Error it will
//! be translated to code 500 in the http answer "Internal server error"
//! of microservice.

#![allow(proc_macro_derive_resolution_fallback)]
#![recursion_limit = "128"]
extern crate config as config_crate;
#[macro_use]
extern crate diesel;
extern crate env_logger;
#[macro_use]
extern crate failure;
extern crate futures;
extern crate futures_cpupool;
extern crate hyper;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate r2d2;
extern crate r2d2_redis;
extern crate regex;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
extern crate tokio;
extern crate tokio_core;
extern crate uuid;
extern crate validator;
#[macro_use]
extern crate validator_derive;

#[macro_use]
pub mod macros;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod controller;
pub mod errors;
pub mod kv;
pub mod models;
pub mod queue;
pub mod rate_limiter;
pub mod repos;
pub mod schema;
pub mod services;
pub mod worker;

use std::env;
use std::process;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use futures::{future, Future, Stream};
use futures_cpupool::CpuPool;
use hyper::server::Http;
use r2d2::CustomizeConnection;
use tokio_core::reactor::Core;

use breaker::CircuitBreaker;
use cache::VoucherCacheImpl;
use config::Config;
use controller::context::StaticContext;
use controller::{Application, ControllerImpl};
use kv::KvPool;
use queue::ClaimQueueImpl;
use rate_limiter::RateLimiterImpl;
use repos::repo_factory::ReposFactoryImpl;
use repos::types::DbPool;

/// Applied to every connection the pool hands out, so a hung statement is
/// bounded even when a caller forgets its own deadline
#[derive(Debug)]
struct ConnectionOptions {
    statement_timeout_ms: u64,
}

impl CustomizeConnection<PgConnection, ::diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), ::diesel::r2d2::Error> {
        conn.batch_execute(&format!("SET statement_timeout = {}", self.statement_timeout_ms))
            .map_err(::diesel::r2d2::Error::QueryError)
    }
}

fn create_db_pool(config: &Config) -> DbPool {
    let database_url: String = config
        .server
        .database
        .parse()
        .expect("Database URL must be set in configuration");
    let manager = ConnectionManager::<PgConnection>::new(database_url);

    r2d2::Pool::builder()
        .min_idle(Some(config.database_pool.min_idle))
        .max_size(config.database_pool.max_size)
        .connection_timeout(Duration::from_millis(config.database_pool.connect_timeout_ms))
        .idle_timeout(Some(Duration::from_millis(config.database_pool.idle_timeout_ms)))
        .connection_customizer(Box::new(ConnectionOptions {
            statement_timeout_ms: config.database_pool.statement_timeout_ms,
        }))
        .build(manager)
        .expect("Failed to create connection pool")
}

/// Starts new web service from provided `Config`
pub fn start_server(config: Config, port: &Option<String>) {
    // Prepare reactor
    let mut core = Core::new().expect("Unexpected error creating event loop core");
    let handle = Arc::new(core.handle());

    // Prepare database pool
    let db_pool = create_db_pool(&config);

    // Prepare CPU pool
    let thread_count = config.server.thread_count;
    let cpu_pool = CpuPool::new(thread_count);

    // Prepare key/value store
    let kv = KvPool::new(&config.redis).expect("Failed to create redis pool");
    let cache = Arc::new(VoucherCacheImpl::new(kv.clone(), &config.cache));
    let rate_limiter = Arc::new(RateLimiterImpl::new(kv.clone(), &config.rate_limit));
    let queue = Arc::new(ClaimQueueImpl::new(kv.clone(), &config.queue));

    // Circuit breaker guarding the claim transaction
    let breaker = CircuitBreaker::new(&config.breaker);

    // Prepare server
    let address = {
        let port = port.as_ref().unwrap_or(&config.server.port);
        format!("{}:{}", config.server.host, port).parse().expect("Could not parse address")
    };

    let verbose_errors = env::var("RUN_MODE").map(|mode| mode != "production").unwrap_or(true);

    let context = StaticContext::new(
        db_pool,
        cpu_pool,
        kv,
        Arc::new(config),
        ReposFactoryImpl::default(),
        cache,
        rate_limiter,
        queue,
        breaker,
        verbose_errors,
    );

    let serve = Http::new()
        .serve_addr_handle(&address, &handle, move || {
            // Prepare application
            let controller = ControllerImpl::new(context.clone());
            Ok(Application::new(controller))
        })
        .unwrap_or_else(|why| {
            error!("Http Server Initialization Error: {}", why);
            process::exit(1);
        });

    let handle_arc2 = handle.clone();
    handle.spawn(
        serve
            .for_each(move |conn| {
                handle_arc2.spawn(conn.map(|_| ()).map_err(|why| error!("Server Error: {}", why)));
                Ok(())
            })
            .map_err(|_| ()),
    );

    info!("Listening on http://{}, threads: {}", address, thread_count);
    core.run(future::empty::<(), ()>()).unwrap();
}

/// Starts the claim worker from provided `Config`
pub fn start_worker(config: Config) {
    let db_pool = create_db_pool(&config);
    let cpu_pool = CpuPool::new(config.server.thread_count);

    let kv = KvPool::new(&config.redis).expect("Failed to create redis pool");
    let cache = Arc::new(VoucherCacheImpl::new(kv.clone(), &config.cache));
    let queue = Arc::new(ClaimQueueImpl::new(kv, &config.queue));

    let ctx = worker::WorkerContext {
        db_pool,
        cpu_pool,
        repo_factory: ReposFactoryImpl::default(),
        cache,
        queue,
        concurrency: config.worker.concurrency,
        rate_per_sec: config.worker.rate_per_sec,
        tick: Duration::from_millis(config.worker.tick_ms),
        in_flight: Arc::new(AtomicUsize::new(0)),
    };

    tokio::run(worker::run(ctx).map_err(|e| error!("Claim worker stopped: {:?}", e)));
}
