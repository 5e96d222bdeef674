// Completion callbacks: one JSON POST per terminal job transition

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::database::sqlite::models::{IndexingJob, JobStatus};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackPayload {
    pub repo_name: String,
    pub status: JobStatus,
    pub progress: i64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub user_id: Option<i64>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

impl From<&IndexingJob> for CallbackPayload {
    #[inline]
    fn from(job: &IndexingJob) -> Self {
        Self {
            repo_name: job.repo_name.clone(),
            status: job.status,
            progress: job.progress_percent,
            message: job.progress_message.clone(),
            error: job.error_message.clone(),
            error_code: job.error_code.clone(),
            user_id: job.requesting_user_id,
            started_at: job.start_time,
            completed_at: job.end_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallbackNotifier {
    agent: ureq::Agent,
}

impl Default for CallbackNotifier {
    #[inline]
    fn default() -> Self {
        Self::new(CALLBACK_TIMEOUT)
    }
}

impl CallbackNotifier {
    #[inline]
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }

    /// Fire-and-forget delivery; failures are only logged.
    ///
    /// Returns the delivery task, or `None` when the job has no callback URL.
    #[inline]
    pub fn notify(&self, job: &IndexingJob) -> Option<JoinHandle<()>> {
        let url = job.callback_url.clone()?;
        let notifier = self.clone();
        let payload = CallbackPayload::from(job);
        Some(tokio::spawn(async move {
            if let Err(e) = notifier.deliver(&url, &payload).await {
                warn!(
                    "Completion callback for {} to {} failed: {:#}",
                    payload.repo_name, url, e
                );
            }
        }))
    }

    /// POST `payload` to `url`
    #[inline]
    pub async fn deliver(&self, url: &str, payload: &CallbackPayload) -> Result<()> {
        let body = serde_json::to_string(payload).context("Failed to serialize callback")?;
        let agent = self.agent.clone();
        let target = url.to_string();

        tokio::task::spawn_blocking(move || {
            agent
                .post(target.as_str())
                .header("Content-Type", "application/json")
                .send(&body)
                .map(|_| ())
        })
        .await
        .context("Callback task panicked")?
        .with_context(|| format!("Callback POST to {url} failed"))?;

        debug!("Delivered completion callback for {}", payload.repo_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn finished_job(callback_url: Option<String>) -> IndexingJob {
        let now = Utc::now().naive_utc();
        IndexingJob {
            repo_name: "octo/widgets".to_string(),
            repo_url: "https://github.com/octo/widgets".to_string(),
            status: JobStatus::Failed,
            progress_percent: 40,
            progress_message: Some("Indexing failed".to_string()),
            start_time: Some(now),
            end_time: Some(now),
            error_message: Some("provider down".to_string()),
            error_code: Some("EMBEDDING_FAILED".to_string()),
            callback_url,
            requesting_user_id: Some(42),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn delivers_job_summary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "repo_name": "octo/widgets",
                "status": "failed",
                "error_code": "EMBEDDING_FAILED",
                "user_id": 42
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = CallbackNotifier::default();
        let job = finished_job(None);
        notifier
            .deliver(&format!("{}/hook", server.uri()), &CallbackPayload::from(&job))
            .await
            .expect("callback should be delivered");
    }

    #[tokio::test]
    async fn delivery_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = CallbackNotifier::default();
        let job = finished_job(None);
        let result = notifier
            .deliver(&format!("{}/hook", server.uri()), &CallbackPayload::from(&job))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn notify_without_url_is_a_no_op() {
        let notifier = CallbackNotifier::default();
        assert!(notifier.notify(&finished_job(None)).is_none());
    }

    #[tokio::test]
    async fn notify_survives_unreachable_endpoint() {
        let notifier = CallbackNotifier::new(Duration::from_secs(2));
        let delivery = notifier
            .notify(&finished_job(Some("http://127.0.0.1:1/hook".to_string())))
            .expect("a callback URL schedules delivery");
        delivery.await.expect("delivery task should not panic");
    }
}
