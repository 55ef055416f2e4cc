//! Job models as served by `GET /api/jobs`.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

/// Lifecycle status of a job. Only the server moves a job between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Any status string this client does not know about.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown => "unknown",
        }
    }

    /// Whether the job has left the queue for good.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// A unit of submitted work (an uploaded workflow file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: DbId,
    pub filename: String,
    /// Submitting user, when the backend records one.
    #[serde(default, alias = "user")]
    pub owner: Option<String>,
    pub status: JobStatus,
    /// Name of the node the job was dispatched to.
    #[serde(default, alias = "node")]
    pub assigned_node: Option<String>,
    #[serde(default, deserialize_with = "deserialize_created_at")]
    pub created_at: Option<Timestamp>,
}

/// Accept RFC 3339 as well as SQLite's `CURRENT_TIMESTAMP` format
/// (`YYYY-MM-DD HH:MM:SS`, UTC). Unparseable values become `None`.
fn deserialize_created_at<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| parse_timestamp(&s)))
}

fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
