
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// Persistent record of the latest indexing run for one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IndexingJob {
    pub repo_name: String,
    pub repo_url: String,
    pub status: JobStatus,
    pub progress_percent: i64,
    pub progress_message: Option<String>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub callback_url: Option<String>,
    pub requesting_user_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Indexing,
    Completed,
    Failed,
}

impl JobStatus {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Indexing => "indexing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// A build is queued or running
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Indexing)
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for JobStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIndexingJob {
    pub repo_name: String,
    pub repo_url: String,
    pub callback_url: Option<String>,
    pub requesting_user_id: Option<i64>,
}

impl IndexingJob {
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    #[inline]
    pub fn is_indexing(&self) -> bool {
        self.status == JobStatus::Indexing
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Wall-clock duration of a finished run
    #[inline]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
