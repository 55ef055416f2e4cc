//! Render projection of the dashboard.
//!
//! Turns a [`ViewState`] into display rows with the fallbacks the
//! dashboard shows for missing data. An empty collection renders as an
//! explicit [`Listing::Empty`] marker rather than an error.

use comfyqueue_core::models::job::{Job, JobStatus};
use comfyqueue_core::models::node::Node;
use comfyqueue_core::types::DbId;

use crate::reconciler::ViewState;

pub const EMPTY_JOBS: &str = "No jobs yet.";
pub const EMPTY_NODES: &str = "Waiting for node data…";

const UNKNOWN_OWNER: &str = "Unknown";
const NO_NODE: &str = "-";

#[derive(Debug, Clone, PartialEq)]
pub enum Listing<T> {
    Empty(&'static str),
    Items(Vec<T>),
}

impl<T> Listing<T> {
    fn from_rows(rows: Vec<T>, marker: &'static str) -> Self {
        if rows.is_empty() {
            Listing::Empty(marker)
        } else {
            Listing::Items(rows)
        }
    }

    pub fn items(&self) -> &[T] {
        match self {
            Listing::Empty(_) => &[],
            Listing::Items(rows) => rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Listing::Empty(_))
    }
}

/// Colour class for a job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    /// Pending.
    Warning,
    /// Running.
    Info,
    /// Anything else.
    Success,
}

impl From<JobStatus> for StatusTone {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => StatusTone::Warning,
            JobStatus::Running => StatusTone::Info,
            _ => StatusTone::Success,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: DbId,
    pub filename: String,
    pub owner: String,
    pub status: String,
    pub tone: StatusTone,
    pub node: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            filename: job.filename.clone(),
            owner: non_blank(job.owner.as_deref()).unwrap_or(UNKNOWN_OWNER).to_string(),
            status: job.status.as_str().to_string(),
            tone: job.status.into(),
            node: non_blank(job.assigned_node.as_deref()).unwrap_or(NO_NODE).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRow {
    pub id: DbId,
    pub name: String,
    pub enabled: bool,
    /// e.g. `gpu-1 (Enabled)`.
    pub label: String,
}

impl From<&Node> for NodeRow {
    fn from(node: &Node) -> Self {
        let state = if node.enabled { "Enabled" } else { "Disabled" };
        Self {
            id: node.id,
            name: node.name.clone(),
            enabled: node.enabled,
            label: format!("{} ({state})", node.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub jobs: Listing<JobRow>,
    pub nodes: Listing<NodeRow>,
}

pub fn render(state: &ViewState) -> DashboardView {
    DashboardView {
        jobs: Listing::from_rows(state.jobs.iter().map(JobRow::from).collect(), EMPTY_JOBS),
        nodes: Listing::from_rows(state.nodes.iter().map(NodeRow::from).collect(), EMPTY_NODES),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
