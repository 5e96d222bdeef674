use super::*;
use crate::database::sqlite::models::JobStatus;
use crate::indexer::{PipelineOutcome, RepositoryRef};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Pipeline whose outcome and timing are controlled by the test
struct FakePipeline {
    runs: AtomicUsize,
    /// When set, each run waits for a release before finishing
    gate: Option<Arc<Notify>>,
    /// Runs with these (zero-based) ordinals fail with an embedding error
    failing_runs: Vec<usize>,
    panics: bool,
}

impl FakePipeline {
    fn succeeding() -> Self {
        Self {
            runs: AtomicUsize::new(0),
            gate: None,
            failing_runs: Vec::new(),
            panics: false,
        }
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexingPipeline for FakePipeline {
    async fn run(
        &self,
        _request: &IndexingRequest,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutcome> {
        let ordinal = self.runs.fetch_add(1, Ordering::SeqCst);
        progress.report(40, "Embedding code chunks").await;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.panics {
            panic!("pipeline exploded");
        }
        if self.failing_runs.contains(&ordinal) {
            return Err(RepoSearchError::Embedding(
                "provider unavailable. Hint: start the server".to_string(),
            ));
        }
        Ok(PipelineOutcome {
            documents: 3,
            indexed: 3,
        })
    }
}

async fn manager_with(pipeline: Arc<FakePipeline>) -> (JobManager, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::new(temp_dir.path().join("jobs.db"))
        .await
        .expect("should open database");
    let manager = JobManager::new(database, pipeline, CallbackNotifier::default());
    (manager, temp_dir)
}

fn request(name: &str) -> IndexingRequest {
    let repo = RepositoryRef::new("octo", name).expect("valid repository");
    IndexingRequest {
        repo_url: repo.github_url(),
        repo,
    }
}

async fn wait_for_terminal(manager: &JobManager, repo_name: &str) -> IndexingJob {
    for _ in 0..500 {
        let job = manager
            .status(repo_name)
            .await
            .expect("status should load")
            .expect("job should exist");
        if job.status.is_terminal() {
            return job;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("job for {repo_name} never finished");
}

#[tokio::test]
async fn concurrent_requests_run_the_pipeline_once() {
    let pipeline = Arc::new(FakePipeline::succeeding());
    let (manager, _temp_dir) = manager_with(Arc::clone(&pipeline)).await;

    let (first, second) = tokio::join!(
        manager.request_indexing(request("widgets"), None, None, false),
        manager.request_indexing(request("widgets"), None, None, false),
    );
    let first = first.expect("first request should succeed");
    let second = second.expect("second request should succeed");
    assert_eq!(
        u8::from(first.is_new_request) + u8::from(second.is_new_request),
        1
    );

    let job = wait_for_terminal(&manager, "octo/widgets").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);
    assert!(job.end_time.is_some());
    assert_eq!(pipeline.runs(), 1);
}

#[tokio::test]
async fn request_during_run_joins_existing_job() {
    let gate = Arc::new(Notify::new());
    let pipeline = Arc::new(FakePipeline {
        gate: Some(Arc::clone(&gate)),
        ..FakePipeline::succeeding()
    });
    let (manager, _temp_dir) = manager_with(Arc::clone(&pipeline)).await;

    let first = manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("first request should succeed");
    assert!(first.is_new_request);
    assert_eq!(first.job.status, JobStatus::Pending);

    let second = manager
        .request_indexing(request("widgets"), None, None, true)
        .await
        .expect("second request should succeed");
    assert!(!second.is_new_request);
    assert!(second.job.status.is_active());

    gate.notify_one();
    let job = wait_for_terminal(&manager, "octo/widgets").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(pipeline.runs(), 1);
}

#[tokio::test]
async fn completed_job_reruns_only_when_forced() {
    let pipeline = Arc::new(FakePipeline::succeeding());
    let (manager, _temp_dir) = manager_with(Arc::clone(&pipeline)).await;

    manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("request should succeed");
    wait_for_terminal(&manager, "octo/widgets").await;

    let again = manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("repeat request should succeed");
    assert!(!again.is_new_request);
    assert_eq!(again.job.status, JobStatus::Completed);

    let forced = manager
        .request_indexing(request("widgets"), None, None, true)
        .await
        .expect("forced request should succeed");
    assert!(forced.is_new_request);
    wait_for_terminal(&manager, "octo/widgets").await;
    assert_eq!(pipeline.runs(), 2);
}

#[tokio::test]
async fn failed_job_records_error_and_restarts() {
    let pipeline = Arc::new(FakePipeline {
        failing_runs: vec![0],
        ..FakePipeline::succeeding()
    });
    let (manager, _temp_dir) = manager_with(Arc::clone(&pipeline)).await;

    manager
        .request_indexing(request("widgets"), None, Some(7), false)
        .await
        .expect("request should succeed");
    let failed = wait_for_terminal(&manager, "octo/widgets").await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_code.as_deref(), Some("EMBEDDING_FAILED"));
    assert!(
        failed
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("Hint:"))
    );
    assert!(failed.end_time.is_some());
    assert_eq!(failed.requesting_user_id, Some(7));

    let retry = manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("retry should succeed");
    assert!(retry.is_new_request);
    let job = wait_for_terminal(&manager, "octo/widgets").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error_code, None);
}

#[tokio::test]
async fn panicking_pipeline_is_recorded_as_internal_error() {
    let pipeline = Arc::new(FakePipeline {
        panics: true,
        ..FakePipeline::succeeding()
    });
    let (manager, _temp_dir) = manager_with(pipeline).await;

    manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("request should succeed");
    let job = wait_for_terminal(&manager, "octo/widgets").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_code.as_deref(), Some(INTERNAL_ERROR_CODE));
    assert!(
        !job.error_message
            .as_deref()
            .is_some_and(|m| m.contains("exploded"))
    );
}

#[tokio::test]
async fn progress_is_reported_while_running() {
    let gate = Arc::new(Notify::new());
    let pipeline = Arc::new(FakePipeline {
        gate: Some(Arc::clone(&gate)),
        ..FakePipeline::succeeding()
    });
    let (manager, _temp_dir) = manager_with(pipeline).await;

    manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("request should succeed");

    let mut observed = 0;
    for _ in 0..500 {
        let job = manager
            .status("octo/widgets")
            .await
            .expect("status should load")
            .expect("job should exist");
        if job.progress_percent >= 40 {
            assert_eq!(job.status, JobStatus::Indexing);
            observed = job.progress_percent;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(observed, 40);

    // A lower report never moves progress backwards
    manager
        .database()
        .update_job_progress("octo/widgets", 10, "late report")
        .await
        .expect("update should succeed");
    let job = manager
        .status("octo/widgets")
        .await
        .expect("status should load")
        .expect("job should exist");
    assert_eq!(job.progress_percent, 40);

    gate.notify_one();
    wait_for_terminal(&manager, "octo/widgets").await;
}

#[tokio::test]
async fn heartbeat_keeps_running_job_fresh() {
    let gate = Arc::new(Notify::new());
    let pipeline = Arc::new(FakePipeline {
        gate: Some(Arc::clone(&gate)),
        ..FakePipeline::succeeding()
    });
    let (manager, _temp_dir) = manager_with(pipeline).await;
    let manager = manager.with_heartbeat_interval(Duration::from_millis(20));

    let outcome = manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("request should succeed");
    sleep(Duration::from_millis(200)).await;

    let job = manager
        .status("octo/widgets")
        .await
        .expect("status should load")
        .expect("job should exist");
    assert!(job.updated_at > outcome.job.updated_at);

    gate.notify_one();
    wait_for_terminal(&manager, "octo/widgets").await;
}

#[tokio::test]
async fn stale_jobs_are_recovered_as_interrupted() {
    let pipeline = Arc::new(FakePipeline::succeeding());
    let (manager, _temp_dir) = manager_with(pipeline).await;

    let (job, _) = manager
        .database()
        .claim_job(
            NewIndexingJob {
                repo_name: "octo/orphan".to_string(),
                repo_url: "https://github.com/octo/orphan".to_string(),
                callback_url: None,
                requesting_user_id: None,
            },
            false,
            None,
        )
        .await
        .expect("claim should succeed");
    assert_eq!(job.status, JobStatus::Pending);

    let untouched = manager
        .recover_interrupted_jobs(Duration::from_secs(3600))
        .await
        .expect("recovery should succeed");
    assert_eq!(untouched, 0);

    sleep(Duration::from_millis(20)).await;
    let recovered = manager
        .recover_interrupted_jobs(Duration::from_millis(1))
        .await
        .expect("recovery should succeed");
    assert_eq!(recovered, 1);

    let job = manager
        .status("octo/orphan")
        .await
        .expect("status should load")
        .expect("job should exist");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_code.as_deref(), Some(INTERRUPTED_ERROR_CODE));
}

#[tokio::test]
async fn delete_removes_job_record() {
    let pipeline = Arc::new(FakePipeline::succeeding());
    let (manager, _temp_dir) = manager_with(pipeline).await;

    manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("request should succeed");
    wait_for_terminal(&manager, "octo/widgets").await;

    assert!(manager.delete("octo/widgets").await.expect("delete"));
    assert!(!manager.delete("octo/widgets").await.expect("delete"));
    assert!(manager.status("octo/widgets").await.expect("status").is_none());
    assert!(manager.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn abandoned_active_job_is_reclaimed() {
    let pipeline = Arc::new(FakePipeline::succeeding());
    let (manager, _temp_dir) = manager_with(Arc::clone(&pipeline)).await;
    let manager = manager.with_stale_after(Duration::from_millis(50));

    // A run whose terminal write never landed: indexing, no heartbeat
    manager
        .database()
        .claim_job(
            NewIndexingJob {
                repo_name: "octo/widgets".to_string(),
                repo_url: "https://github.com/octo/widgets".to_string(),
                callback_url: None,
                requesting_user_id: None,
            },
            false,
            None,
        )
        .await
        .expect("claim should succeed");
    assert!(
        manager
            .database()
            .mark_job_indexing("octo/widgets", "Cloning")
            .await
            .expect("mark should succeed")
    );

    let joined = manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("request should succeed");
    assert!(!joined.is_new_request);

    sleep(Duration::from_millis(100)).await;
    let reclaimed = manager
        .request_indexing(request("widgets"), None, None, false)
        .await
        .expect("request should succeed");
    assert!(reclaimed.is_new_request);

    let job = wait_for_terminal(&manager, "octo/widgets").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(pipeline.runs(), 1);
}

#[tokio::test]
async fn failed_callback_delivery_keeps_completed_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/indexed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = Arc::new(FakePipeline::succeeding());
    let (manager, _temp_dir) = manager_with(pipeline).await;
    manager
        .request_indexing(
            request("widgets"),
            Some(format!("{}/hooks/indexed", server.uri())),
            Some(42),
            false,
        )
        .await
        .expect("request should succeed");

    let job = wait_for_terminal(&manager, "octo/widgets").await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);

    let mut delivered = Vec::new();
    for _ in 0..200 {
        delivered = server.received_requests().await.unwrap_or_default();
        if !delivered.is_empty() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(delivered.len(), 1, "callback should be posted once");
    let body: serde_json::Value =
        serde_json::from_slice(&delivered[0].body).expect("callback body should be json");
    assert_eq!(body["repo_name"], "octo/widgets");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["user_id"], 42);
    server.verify().await;

    let job = manager
        .status("octo/widgets")
        .await
        .expect("status should load")
        .expect("job should exist");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_code.is_none());
}
