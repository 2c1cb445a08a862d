include!("tests_setup.rs");

use vouchers_lib::worker::process_job;

#[derive(Default)]
pub struct RecordingQueue {
    pub inner: QueueMock,
    pub completed: Mutex<Vec<RequestId>>,
    pub failed: Mutex<Vec<(RequestId, String, bool)>>,
}

impl ClaimQueue for RecordingQueue {
    fn enqueue(&self, job: &ClaimRequest) -> Result<RequestId, FailureError> {
        self.inner.enqueue(job)
    }

    fn get(&self, request_id: &RequestId) -> Result<Option<JobInfo>, FailureError> {
        self.inner.get(request_id)
    }

    fn counts(&self) -> Result<QueueCounts, FailureError> {
        self.inner.counts()
    }

    fn dequeue(&self) -> Result<Option<ClaimJob>, FailureError> {
        self.inner.dequeue()
    }

    fn complete(&self, request_id: &RequestId, _result: &ClaimResult) -> Result<(), FailureError> {
        self.completed.lock().unwrap().push(request_id.clone());
        Ok(())
    }

    fn fail(&self, request_id: &RequestId, reason: &str, transient: bool) -> Result<RetryDisposition, FailureError> {
        self.failed
            .lock()
            .unwrap()
            .push((request_id.clone(), reason.to_string(), transient));
        Ok(RetryDisposition::Failed)
    }
}

fn job(user_id: UserId, code: &str, request_id: &str) -> ClaimJob {
    ClaimJob {
        request_id: RequestId(request_id.to_string()),
        payload: claim_request(user_id, code, request_id),
        attempts: 0,
    }
}

#[test]
fn worker_commits_a_queued_claim_and_completes_the_job() {
    let cache = CacheMock::default();
    let queue = RecordingQueue::default();

    process_job(
        &mock_db_pool(),
        &ReposFactoryMock::default(),
        &cache,
        &queue,
        job(MOCK_REGULAR_USER, MOCK_VALID_CODE, "w1"),
    )
    .unwrap();

    assert_eq!(queue.completed.lock().unwrap().len(), 1);
    assert!(queue.failed.lock().unwrap().is_empty());
    // the idempotency entry is primed for client polling and retries
    let cached = cache.results.lock().unwrap().get("w1").cloned().unwrap();
    assert_eq!(cached.status, ClaimStatus::Success);
    assert_eq!(cached.vouchers_remaining, Some(9));
}

#[test]
fn worker_replays_an_already_committed_request() {
    let cache = CacheMock::default();
    let queue = RecordingQueue::default();

    let prior = ClaimResult::succeeded(RequestId("w2".to_string()), ClaimId(1), 9);
    cache.put_result(&prior).unwrap();

    process_job(
        &mock_db_pool(),
        &ReposFactoryMock::default(),
        &cache,
        &queue,
        job(MOCK_REGULAR_USER, MOCK_VALID_CODE, "w2"),
    )
    .unwrap();

    assert_eq!(queue.completed.lock().unwrap().as_slice(), &[RequestId("w2".to_string())]);
}

#[test]
fn worker_terminates_domain_rejections_without_retry() {
    let cache = CacheMock::default();
    let queue = RecordingQueue::default();

    process_job(
        &mock_db_pool(),
        &ReposFactoryMock::default(),
        &cache,
        &queue,
        job(MOCK_MAXED_USER, MOCK_VALID_CODE, "w3"),
    )
    .unwrap();

    let failed = queue.failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    let &(ref request_id, ref reason, transient) = &failed[0];
    assert_eq!(*request_id, RequestId("w3".to_string()));
    assert!(reason.contains("limit"));
    assert!(!transient);
    assert!(cache.results.lock().unwrap().is_empty());
}

#[test]
fn worker_rejects_ineligible_codes_without_retry() {
    let cache = CacheMock::default();
    let queue = RecordingQueue::default();

    process_job(
        &mock_db_pool(),
        &ReposFactoryMock::default(),
        &cache,
        &queue,
        job(MOCK_REGULAR_USER, MOCK_EXPIRED_CODE, "w4"),
    )
    .unwrap();

    let failed = queue.failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].2);
}
