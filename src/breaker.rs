//! Circuit breaker guarding the persistent store. Counters live behind one
//! mutex so concurrent callers observe a consistent state; calls in the
//! closed state run outside the lock and do not serialize.
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use failure::{err_msg, Error as FailureError, Fail};

use config;
use errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
    successes: u32,
    next_attempt: Instant,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
    failure_threshold: u32,
    success_threshold: u32,
    call_timeout: Duration,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &config::Breaker) -> Self {
        CircuitBreaker {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failures: 0,
                successes: 0,
                next_attempt: Instant::now(),
            })),
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            call_timeout: Duration::from_secs(config.call_timeout_s),
            open_duration: Duration::from_secs(config.open_duration_s),
        }
    }

    /// Runs `action` under the breaker. While open, calls are rejected
    /// until the open duration elapses; the next caller then probes in the
    /// half-open state. An action that completes after the call timeout
    /// still returns its result but counts as a failure.
    pub fn call<T, F>(&self, action: F) -> Result<T, FailureError>
    where
        F: FnOnce() -> Result<T, FailureError>,
    {
        {
            let mut inner = self.inner.lock().expect("Circuit breaker lock is poisoned");
            if inner.state == State::Open {
                if Instant::now() < inner.next_attempt {
                    return Err(err_msg("Circuit breaker is open")
                        .context(Error::Connection)
                        .into());
                }
                inner.state = State::HalfOpen;
                inner.successes = 0;
                info!("Circuit breaker goes half-open");
            }
        }

        let started_at = Instant::now();
        let result = action();
        let on_time = started_at.elapsed() <= self.call_timeout;

        let mut inner = self.inner.lock().expect("Circuit breaker lock is poisoned");
        if result.is_ok() && on_time {
            self.record_success(&mut inner);
        } else {
            if result.is_ok() {
                warn!("Guarded call exceeded the breaker call timeout");
            }
            self.record_failure(&mut inner);
        }
        result
    }

    fn record_success(&self, inner: &mut Inner) {
        match inner.state {
            State::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.success_threshold {
                    inner.state = State::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    info!("Circuit breaker is closed again");
                }
            }
            _ => {
                inner.failures = 0;
            }
        }
    }

    fn record_failure(&self, inner: &mut Inner) {
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.next_attempt = Instant::now() + self.open_duration;
                error!("Circuit breaker re-opened by a half-open probe failure");
            }
            State::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.next_attempt = Instant::now() + self.open_duration;
                    error!("Circuit breaker opened after {} consecutive failures", inner.failures);
                }
            }
            State::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(open_duration_s: u64) -> CircuitBreaker {
        CircuitBreaker::new(&config::Breaker {
            failure_threshold: 3,
            success_threshold: 2,
            call_timeout_s: 60,
            open_duration_s,
        })
    }

    fn failing_call(breaker: &CircuitBreaker) -> Result<(), FailureError> {
        breaker.call(|| Err(err_msg("store is down")))
    }

    #[test]
    fn stays_closed_on_success() {
        let breaker = breaker(30);
        for _ in 0..10 {
            assert!(breaker.call(|| Ok(1)).is_ok());
        }
        assert_eq!(breaker.inner.lock().unwrap().state, State::Closed);
    }

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = breaker(30);
        for _ in 0..3 {
            assert!(failing_call(&breaker).is_err());
        }
        assert_eq!(breaker.inner.lock().unwrap().state, State::Open);
        // while open the action must not run at all
        let mut ran = false;
        let _ = breaker.call(|| {
            ran = true;
            Ok(())
        });
        assert!(!ran);
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let breaker = breaker(30);
        assert!(failing_call(&breaker).is_err());
        assert!(failing_call(&breaker).is_err());
        assert!(breaker.call(|| Ok(())).is_ok());
        assert!(failing_call(&breaker).is_err());
        assert!(failing_call(&breaker).is_err());
        assert_eq!(breaker.inner.lock().unwrap().state, State::Closed);
    }

    #[test]
    fn half_open_probe_closes_after_success_threshold() {
        let breaker = breaker(0);
        for _ in 0..3 {
            assert!(failing_call(&breaker).is_err());
        }
        // open duration of zero lets the next call probe immediately
        assert!(breaker.call(|| Ok(())).is_ok());
        assert_eq!(breaker.inner.lock().unwrap().state, State::HalfOpen);
        assert!(breaker.call(|| Ok(())).is_ok());
        assert_eq!(breaker.inner.lock().unwrap().state, State::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = breaker(0);
        for _ in 0..3 {
            assert!(failing_call(&breaker).is_err());
        }
        assert!(failing_call(&breaker).is_err());
        assert_eq!(breaker.inner.lock().unwrap().state, State::Open);
    }
}
