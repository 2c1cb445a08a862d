//! Durable FIFO of claim jobs on the key/value store. Job ids are the
//! request ids, so a duplicate enqueue is silently absorbed and client
//! retries converge on one job. Failed jobs retry with exponential backoff
//! through a delayed set before landing in the failed list.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use failure::Error as FailureError;
use r2d2_redis::redis::{self, Commands};
use serde_json;

use config;
use kv::KvPool;
use models::{ClaimRequest, ClaimResult, RequestId};
use rate_limiter::now_millis;

const WAITING_KEY: &str = "queue:claims:waiting";
const DELAYED_KEY: &str = "queue:claims:delayed";
const ACTIVE_KEY: &str = "queue:claims:active";
const COMPLETED_KEY: &str = "queue:claims:completed";
const FAILED_KEY: &str = "queue:claims:failed";

const COMPLETED_KEEP: isize = 1000;
const FAILED_KEEP: isize = 5000;
const COMPLETED_RETENTION_S: usize = 24 * 3600;
const FAILED_RETENTION_S: usize = 7 * 24 * 3600;
const PROMOTE_BATCH: isize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Active => write!(f, "active"),
            JobState::Delayed => write!(f, "delayed"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "delayed" => Ok(JobState::Delayed),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(()),
        }
    }
}

/// A dequeued job as the worker sees it
#[derive(Debug, Clone)]
pub struct ClaimJob {
    pub request_id: RequestId,
    pub payload: ClaimRequest,
    pub attempts: u32,
}

/// Job state as the status endpoint sees it
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub state: JobState,
    pub attempts: u32,
    pub result: Option<ClaimResult>,
    pub fail_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retried { delay_ms: u64 },
    Failed,
}

pub trait ClaimQueue: Send + Sync {
    /// Adds a job; a duplicate request id returns quietly without a second job
    fn enqueue(&self, job: &ClaimRequest) -> Result<RequestId, FailureError>;
    fn get(&self, request_id: &RequestId) -> Result<Option<JobInfo>, FailureError>;
    fn counts(&self) -> Result<QueueCounts, FailureError>;
    /// Promotes due delayed jobs, then pops the oldest waiting job
    fn dequeue(&self) -> Result<Option<ClaimJob>, FailureError>;
    fn complete(&self, request_id: &RequestId, result: &ClaimResult) -> Result<(), FailureError>;
    fn fail(&self, request_id: &RequestId, reason: &str, transient: bool) -> Result<RetryDisposition, FailureError>;
}

#[derive(Clone)]
pub struct ClaimQueueImpl {
    kv: KvPool,
    max_attempts: u32,
    backoff_ms: u64,
}

impl ClaimQueueImpl {
    pub fn new(kv: KvPool, config: &config::Queue) -> Self {
        ClaimQueueImpl {
            kv,
            max_attempts: config.attempts,
            backoff_ms: config.backoff_ms,
        }
    }

    fn job_key(request_id: &RequestId) -> String {
        format!("queue:claims:job:{}", request_id)
    }
}

impl ClaimQueue for ClaimQueueImpl {
    fn enqueue(&self, job: &ClaimRequest) -> Result<RequestId, FailureError> {
        let key = Self::job_key(&job.request_id);
        let payload = serde_json::to_string(job)?;
        let id = job.request_id.to_string();

        let created: bool = self
            .kv
            .with_conn(|conn| conn.hset_nx(&key, "state", JobState::Waiting.to_string()))?;
        if !created {
            debug!("Claim job {} already enqueued, skipping duplicate", id);
            return Ok(job.request_id.clone());
        }

        self.kv.with_conn::<(), _>(|conn| {
            redis::pipe()
                .atomic()
                .hset_multiple(&key, &[("payload", payload.as_str()), ("attempts", "0")])
                .ignore()
                .cmd("LPUSH")
                .arg(WAITING_KEY)
                .arg(&id)
                .ignore()
                .query(conn)
        })?;
        debug!("Enqueued claim job {}", id);
        Ok(job.request_id.clone())
    }

    fn get(&self, request_id: &RequestId) -> Result<Option<JobInfo>, FailureError> {
        let key = Self::job_key(request_id);
        let fields: HashMap<String, String> = self.kv.with_conn(|conn| conn.hgetall(&key))?;
        if fields.is_empty() {
            return Ok(None);
        }

        let state = fields
            .get("state")
            .and_then(|s| s.parse::<JobState>().ok())
            .unwrap_or(JobState::Waiting);
        let attempts = fields.get("attempts").and_then(|s| s.parse().ok()).unwrap_or(0);
        let result = fields.get("result").and_then(|raw| serde_json::from_str(raw).ok());
        let fail_reason = fields.get("fail_reason").cloned();

        Ok(Some(JobInfo {
            state,
            attempts,
            result,
            fail_reason,
        }))
    }

    fn counts(&self) -> Result<QueueCounts, FailureError> {
        let (waiting, active, completed, failed, delayed): (u64, Option<i64>, u64, u64, u64) =
            self.kv.with_conn(|conn| {
                redis::pipe()
                    .llen(WAITING_KEY)
                    .get(ACTIVE_KEY)
                    .llen(COMPLETED_KEY)
                    .llen(FAILED_KEY)
                    .zcard(DELAYED_KEY)
                    .query(conn)
            })?;

        Ok(QueueCounts {
            waiting,
            active: active.unwrap_or(0).max(0) as u64,
            completed,
            failed,
            delayed,
        })
    }

    fn dequeue(&self) -> Result<Option<ClaimJob>, FailureError> {
        let now = now_millis();
        self.kv.with_conn(|conn| {
            // make due retries visible before popping
            let due: Vec<String> =
                conn.zrangebyscore_limit(DELAYED_KEY, 0, now as f64, 0, PROMOTE_BATCH)?;
            for id in &due {
                let key = format!("queue:claims:job:{}", id);
                redis::pipe()
                    .atomic()
                    .zrem(DELAYED_KEY, id)
                    .ignore()
                    .hset(&key, "state", JobState::Waiting.to_string())
                    .ignore()
                    .cmd("LPUSH")
                    .arg(WAITING_KEY)
                    .arg(id)
                    .ignore()
                    .query::<()>(conn)?;
            }

            let popped: Option<String> = conn.rpop(WAITING_KEY)?;
            let id = match popped {
                Some(id) => id,
                None => return Ok(None),
            };

            let key = format!("queue:claims:job:{}", id);
            let fields: HashMap<String, String> = conn.hgetall(&key)?;
            let payload = fields
                .get("payload")
                .and_then(|raw| serde_json::from_str::<ClaimRequest>(raw).ok());
            let payload = match payload {
                Some(payload) => payload,
                None => {
                    warn!("Dropping claim job {} with unreadable payload", id);
                    return Ok(None);
                }
            };
            let attempts = fields.get("attempts").and_then(|s| s.parse().ok()).unwrap_or(0);

            redis::pipe()
                .atomic()
                .hset(&key, "state", JobState::Active.to_string())
                .ignore()
                .cmd("INCR")
                .arg(ACTIVE_KEY)
                .ignore()
                .query::<()>(conn)?;

            Ok(Some(ClaimJob {
                request_id: RequestId(id),
                payload,
                attempts,
            }))
        })
    }

    fn complete(&self, request_id: &RequestId, result: &ClaimResult) -> Result<(), FailureError> {
        let key = Self::job_key(request_id);
        let raw = serde_json::to_string(result)?;
        self.kv.with_conn(|conn| {
            redis::pipe()
                .atomic()
                .hset_multiple(
                    &key,
                    &[("state", JobState::Completed.to_string().as_str()), ("result", raw.as_str())],
                )
                .ignore()
                .cmd("DECR")
                .arg(ACTIVE_KEY)
                .ignore()
                .cmd("LPUSH")
                .arg(COMPLETED_KEY)
                .arg(request_id.to_string())
                .ignore()
                .ltrim(COMPLETED_KEY, 0, COMPLETED_KEEP - 1)
                .ignore()
                .expire(&key, COMPLETED_RETENTION_S)
                .ignore()
                .query(conn)
        })
    }

    fn fail(&self, request_id: &RequestId, reason: &str, transient: bool) -> Result<RetryDisposition, FailureError> {
        let key = Self::job_key(request_id);
        let attempts: u32 = self.kv.with_conn(|conn| conn.hincr(&key, "attempts", 1))?;

        if transient && attempts < self.max_attempts {
            let delay_ms = retry_backoff_ms(self.backoff_ms, attempts);
            let available_at = now_millis() + delay_ms;
            self.kv.with_conn(|conn| {
                redis::pipe()
                    .atomic()
                    .hset(&key, "state", JobState::Delayed.to_string())
                    .ignore()
                    .cmd("DECR")
                    .arg(ACTIVE_KEY)
                    .ignore()
                    .zadd(DELAYED_KEY, request_id.to_string(), available_at as f64)
                    .ignore()
                    .query::<()>(conn)
            })?;
            warn!(
                "Claim job {} failed transiently (attempt {}), retrying in {} ms: {}",
                request_id, attempts, delay_ms, reason
            );
            Ok(RetryDisposition::Retried { delay_ms })
        } else {
            self.kv.with_conn(|conn| {
                redis::pipe()
                    .atomic()
                    .hset_multiple(
                        &key,
                        &[("state", JobState::Failed.to_string().as_str()), ("fail_reason", reason)],
                    )
                    .ignore()
                    .cmd("DECR")
                    .arg(ACTIVE_KEY)
                    .ignore()
                    .cmd("LPUSH")
                    .arg(FAILED_KEY)
                    .arg(request_id.to_string())
                    .ignore()
                    .ltrim(FAILED_KEY, 0, FAILED_KEEP - 1)
                    .ignore()
                    .expire(&key, FAILED_RETENTION_S)
                    .ignore()
                    .query::<()>(conn)
            })?;
            Ok(RetryDisposition::Failed)
        }
    }
}

/// Exponential backoff: base, 2·base, 4·base, ...
fn retry_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms << attempt.saturating_sub(1).min(16)
}
