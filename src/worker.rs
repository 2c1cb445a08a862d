//! Claim worker: drains the claim queue and runs the authoritative claim
//! transaction. Every tick promotes due retries and starts at most
//! `min(concurrency - in_flight, per-tick budget)` jobs, which bounds both
//! the parallelism and the per-second load on the store.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use diesel::connection::AnsiTransactionManager;
use diesel::pg::{Pg, PgConnection};
use diesel::r2d2::ConnectionManager;
use diesel::Connection;
use failure::Error as FailureError;
use futures::future;
use futures::{Future, Stream};
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};
use tokio;
use tokio::timer::Interval;

use cache::VoucherCache;
use errors::{error_kind, Error};
use queue::{ClaimJob, ClaimQueue, RetryDisposition};
use repos::repo_factory::ReposFactoryImpl;
use repos::ReposFactory;
use services::claims::{execute_claim, record_limit_breach, refresh_cache_after_claim};

#[derive(Clone)]
pub struct WorkerContext {
    pub db_pool: Pool<ConnectionManager<PgConnection>>,
    pub cpu_pool: CpuPool,
    pub repo_factory: ReposFactoryImpl,
    pub cache: Arc<VoucherCache>,
    pub queue: Arc<ClaimQueue>,
    pub concurrency: usize,
    pub rate_per_sec: usize,
    pub tick: Duration,
    pub in_flight: Arc<AtomicUsize>,
}

pub fn run(ctx: WorkerContext) -> impl Future<Item = (), Error = FailureError> {
    info!(
        "Claim worker started: concurrency {}, {} jobs/s",
        ctx.concurrency, ctx.rate_per_sec
    );

    Interval::new(Instant::now(), ctx.tick)
        .map_err(FailureError::from)
        .fold(ctx, |ctx, _| {
            let budget = batch_budget(
                ctx.rate_per_sec,
                ctx.tick,
                ctx.concurrency,
                ctx.in_flight.load(Ordering::Relaxed),
            );

            for _ in 0..budget {
                ctx.in_flight.fetch_add(1, Ordering::Relaxed);

                let db_pool = ctx.db_pool.clone();
                let repo_factory = ctx.repo_factory;
                let cache = ctx.cache.clone();
                let queue = ctx.queue.clone();
                let in_flight = ctx.in_flight.clone();

                tokio::spawn(
                    ctx.cpu_pool
                        .spawn_fn(move || {
                            let outcome = match queue.dequeue() {
                                Ok(Some(job)) => process_job(&db_pool, &repo_factory, &*cache, &*queue, job),
                                Ok(None) => Ok(()),
                                Err(e) => Err(e),
                            };
                            in_flight.fetch_sub(1, Ordering::Relaxed);
                            outcome
                        })
                        .map_err(|e: FailureError| error!("Claim worker job failed: {:?}", e)),
                );
            }

            future::ok::<_, FailureError>(ctx)
        })
        .map(|_| ())
}

/// Runs one dequeued job to completion. Domain rejections terminate the
/// job with the stored reason; transient failures re-schedule it with
/// backoff through the queue.
pub fn process_job<T, M, F>(
    db_pool: &Pool<M>,
    repo_factory: &F,
    cache: &VoucherCache,
    queue: &ClaimQueue,
    job: ClaimJob,
) -> Result<(), FailureError>
where
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
{
    debug!("Processing claim job {} (attempt {})", job.request_id, job.attempts + 1);

    // a retried job may have committed before the original worker died
    if let Some(cached) = cache.get_result(&job.request_id)? {
        queue.complete(&job.request_id, &cached)?;
        return Ok(());
    }

    let conn = match db_pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            let reason = format!("Database pool is exhausted: {}", e);
            queue.fail(&job.request_id, &reason, true)?;
            return Ok(());
        }
    };

    match execute_claim(&*conn, repo_factory, &job.payload) {
        Ok((result, user)) => {
            refresh_cache_after_claim(cache, &user, &result);
            queue.complete(&job.request_id, &result)?;
            Ok(())
        }
        Err(e) => {
            let disposition = match error_kind(&e) {
                Some(&Error::Connection) | None => queue.fail(&job.request_id, &format!("{}", e), true)?,
                Some(domain) => {
                    if let Some(&Error::LimitExceeded) = error_kind(&e) {
                        record_limit_breach(&*conn, repo_factory, job.payload.user_id, &job.payload);
                    }
                    queue.fail(&job.request_id, &format!("{}", domain), false)?
                }
            };
            if disposition == RetryDisposition::Failed {
                warn!("Claim job {} terminally failed: {}", job.request_id, e);
            }
            Ok(())
        }
    }
}

/// Jobs to start this tick: the per-second ceiling spread over ticks,
/// bounded by the free concurrency slots
pub fn batch_budget(rate_per_sec: usize, tick: Duration, concurrency: usize, in_flight: usize) -> usize {
    let tick_ms = tick.as_secs() as usize * 1000 + tick.subsec_millis() as usize;
    let per_tick = (rate_per_sec * tick_ms / 1000).max(1);
    per_tick.min(concurrency.saturating_sub(in_flight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_spreads_the_rate_over_ticks() {
        assert_eq!(batch_budget(100, Duration::from_millis(250), 50, 0), 25);
        assert_eq!(batch_budget(100, Duration::from_millis(1000), 200, 0), 100);
    }

    #[test]
    fn budget_respects_free_concurrency_slots() {
        assert_eq!(batch_budget(100, Duration::from_millis(250), 50, 40), 10);
        assert_eq!(batch_budget(100, Duration::from_millis(250), 50, 50), 0);
        assert_eq!(batch_budget(100, Duration::from_millis(250), 50, 60), 0);
    }

    #[test]
    fn budget_starts_at_least_one_job_when_slots_are_free() {
        assert_eq!(batch_budget(1, Duration::from_millis(100), 50, 0), 1);
    }
}
