use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Anything the provider reports besides the three known words counts
    /// as still running.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn job_status(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobSnapshot>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncJob {
    pub id: String,
    pub status: JobStatus,
    pub attempts: u32,
}

impl AsyncJob {
    pub fn from_submission(id: impl Into<String>, raw_status: &str) -> Result<Self> {
        let status = JobStatus::parse(raw_status);
        if status != JobStatus::Queued {
            return Err(ProviderError::UnexpectedInitialStatus(raw_status.to_string()));
        }
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ProviderError::Decode("submission returned an empty job id".into()));
        }
        Ok(Self {
            id,
            status,
            attempts: 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPoller {
    interval: Duration,
    max_attempts: u32,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

impl JobPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// A status query that errors is logged and counted as an attempt.
    pub async fn wait_for_result(
        &self,
        source: &dyn JobStatusSource,
        mut job: AsyncJob,
        cancel: &CancellationToken,
    ) -> Result<String> {
        while job.attempts < self.max_attempts {
            tokio::select! {
                () = cancel.cancelled() => return Err(ProviderError::Cancelled),
                () = tokio::time::sleep(self.interval) => {}
            }
            job.attempts += 1;

            match source.job_status(&job.id, cancel).await {
                Ok(snapshot) => {
                    job.status = snapshot.status;
                    match snapshot.status {
                        JobStatus::Succeeded => {
                            return snapshot
                                .image_url
                                .filter(|url| !url.trim().is_empty())
                                .ok_or_else(|| {
                                    ProviderError::Decode(format!(
                                        "job {} succeeded without an image url",
                                        job.id
                                    ))
                                });
                        }
                        JobStatus::Failed => return Err(ProviderError::JobFailed(job.id)),
                        JobStatus::Queued | JobStatus::Running => {
                            tracing::debug!(job_id = %job.id, attempt = job.attempts, status = ?job.status, "job still pending");
                        }
                    }
                }
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(err) => {
                    tracing::warn!(job_id = %job.id, attempt = job.attempts, error = %err, "job status query failed");
                }
            }
        }

        Err(ProviderError::PollTimeout {
            job_id: job.id,
            attempts: job.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    struct ScriptedSource {
        script: Mutex<Vec<Result<JobSnapshot>>>,
        queries: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<JobSnapshot>>) -> Self {
            Self {
                script: Mutex::new(script),
                queries: AtomicU32::new(0),
            }
        }

        fn queries(&self) -> u32 {
            self.queries.load(Ordering::SeqCst)
        }
    }

    fn snapshot(status: JobStatus, url: Option<&str>) -> Result<JobSnapshot> {
        Ok(JobSnapshot {
            status,
            image_url: url.map(str::to_string),
        })
    }

    #[async_trait]
    impl JobStatusSource for ScriptedSource {
        async fn job_status(&self, _job_id: &str, cancel: &CancellationToken) -> Result<JobSnapshot> {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            self.queries.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                match &script[0] {
                    Ok(snapshot) => Ok(snapshot.clone()),
                    Err(_) => Err(ProviderError::Decode("scripted failure".into())),
                }
            }
        }
    }

    fn queued_job() -> AsyncJob {
        AsyncJob::from_submission("job-1", "queued").unwrap()
    }

    #[test]
    fn parses_statuses() {
        assert_eq!(JobStatus::parse("queued"), JobStatus::Queued);
        assert_eq!(JobStatus::parse("generating"), JobStatus::Running);
        assert_eq!(JobStatus::parse("SUCCEEDED"), JobStatus::Succeeded);
        assert_eq!(JobStatus::parse("failed"), JobStatus::Failed);
    }

    #[test]
    fn submission_must_be_queued() {
        let err = AsyncJob::from_submission("job-1", "failed").unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedInitialStatus(status) if status == "failed"));
        assert!(AsyncJob::from_submission("", "queued").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn returns_url_once_job_succeeds() {
        let source = ScriptedSource::new(vec![
            snapshot(JobStatus::Queued, None),
            snapshot(JobStatus::Running, None),
            snapshot(JobStatus::Succeeded, Some("https://images.test/job-1.png")),
        ]);
        let poller = JobPoller::default();
        let started = Instant::now();

        let url = poller
            .wait_for_result(&source, queued_job(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(url, "https://images.test/job-1.png");
        assert_eq!(source.queries(), 3);
        assert_eq!(started.elapsed(), DEFAULT_POLL_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let source = ScriptedSource::new(vec![snapshot(JobStatus::Running, None)]);
        let poller = JobPoller::default();
        let started = Instant::now();

        let err = poller
            .wait_for_result(&source, queued_job(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::PollTimeout { attempts: 10, .. }));
        assert_eq!(source.queries(), DEFAULT_MAX_ATTEMPTS);
        assert!(started.elapsed() <= DEFAULT_POLL_INTERVAL * DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_queries_count_as_attempts() {
        let source = ScriptedSource::new(vec![Err(ProviderError::Decode("bad body".into()))]);
        let poller = JobPoller::new(Duration::from_millis(10), 3);

        let err = poller
            .wait_for_result(&source, queued_job(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::PollTimeout { attempts: 3, .. }));
        assert_eq!(source.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_stops_early() {
        let source = ScriptedSource::new(vec![
            snapshot(JobStatus::Running, None),
            snapshot(JobStatus::Failed, None),
        ]);
        let err = JobPoller::default()
            .wait_for_result(&source, queued_job(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::JobFailed(id) if id == "job-1"));
        assert_eq!(source.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeded_without_url_is_a_decode_error() {
        let source = ScriptedSource::new(vec![snapshot(JobStatus::Succeeded, Some(""))]);
        let err = JobPoller::default()
            .wait_for_result(&source, queued_job(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let source = ScriptedSource::new(vec![snapshot(JobStatus::Running, None)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = JobPoller::default()
            .wait_for_result(&source, queued_job(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(source.queries(), 0);
    }

    struct HangingSource {
        queries: AtomicU32,
    }

    #[async_trait]
    impl JobStatusSource for HangingSource {
        async fn job_status(&self, _job_id: &str, cancel: &CancellationToken) -> Result<JobSnapshot> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
            Err(ProviderError::Cancelled)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_a_status_query_stops_polling() {
        let source = HangingSource {
            queries: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEFAULT_POLL_INTERVAL + Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = JobPoller::default()
            .wait_for_result(&source, queued_job(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);
    }
}
