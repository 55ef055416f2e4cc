//! View state reconciliation.
//!
//! The [`Reconciler`] owns the locally held job and node collections and
//! decides which incoming data may change them. Snapshot fetches are
//! issued against a [`FetchTicket`]; a result whose ticket is older than
//! the last one applied for that collection, or that was issued before
//! the last [`detach`](Reconciler::detach), is discarded.

use std::collections::HashMap;

use comfyqueue_core::models::job::Job;
use comfyqueue_core::models::node::Node;
use comfyqueue_core::types::DbId;

/// Which collection a fetch refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Jobs,
    Nodes,
}

/// Issued by [`Reconciler::begin`], presented back with the fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    collection: Collection,
    seq: u64,
    epoch: u64,
}

impl FetchTicket {
    pub fn collection(&self) -> Collection {
        self.collection
    }
}

/// The locally rendered collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub jobs: Vec<Job>,
    pub nodes: Vec<Node>,
    /// Set once the first job snapshot has been applied.
    pub jobs_loaded: bool,
    /// Set once the first node snapshot has been applied.
    pub nodes_loaded: bool,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    state: ViewState,
    next_seq: u64,
    applied: HashMap<Collection, u64>,
    epoch: u64,
    attached: bool,
}

impl Reconciler {
    /// A detached reconciler; call [`attach`](Self::attach) when the view mounts.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Start accepting data. Previously held collections are cleared.
    pub fn attach(&mut self) {
        self.epoch += 1;
        self.attached = true;
        self.state = ViewState::default();
        self.applied.clear();
    }

    /// Stop accepting data. Every outstanding ticket becomes stale.
    pub fn detach(&mut self) {
        self.epoch += 1;
        self.attached = false;
    }

    /// Take a ticket for a fetch of `collection` that is about to start.
    pub fn begin(&mut self, collection: Collection) -> FetchTicket {
        self.next_seq += 1;
        FetchTicket {
            collection,
            seq: self.next_seq,
            epoch: self.epoch,
        }
    }

    /// Replace the job collection with a snapshot. Returns `false` when
    /// the result was stale and discarded.
    pub fn apply_jobs(&mut self, ticket: FetchTicket, jobs: Vec<Job>) -> bool {
        if !self.accept(ticket, Collection::Jobs) {
            return false;
        }
        self.state.jobs = dedup_by_id(jobs, |job| job.id);
        self.state.jobs_loaded = true;
        tracing::debug!(count = self.state.jobs.len(), "Applied job snapshot");
        true
    }

    /// Replace the node collection with a snapshot. Returns `false` when
    /// the result was stale and discarded.
    pub fn apply_nodes(&mut self, ticket: FetchTicket, nodes: Vec<Node>) -> bool {
        if !self.accept(ticket, Collection::Nodes) {
            return false;
        }
        self.state.nodes = dedup_by_id(nodes, |node| node.id);
        self.state.nodes_loaded = true;
        tracing::debug!(count = self.state.nodes.len(), "Applied node snapshot");
        true
    }

    /// Replace the job with the same id, or append it when unseen.
    /// Ignored while detached.
    pub fn merge_job(&mut self, job: Job) -> bool {
        if !self.attached {
            return false;
        }
        match self.state.jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job,
            None => self.state.jobs.push(job),
        }
        true
    }

    fn accept(&mut self, ticket: FetchTicket, collection: Collection) -> bool {
        debug_assert_eq!(ticket.collection, collection);
        let last = self.applied.get(&collection).copied().unwrap_or(0);
        if !self.attached || ticket.epoch != self.epoch {
            tracing::debug!(
                ?collection,
                seq = ticket.seq,
                "Discarding fetch result from a previous mount",
            );
            return false;
        }
        if ticket.seq <= last {
            tracing::warn!(
                ?collection,
                seq = ticket.seq,
                last_applied = last,
                "Discarding stale fetch result",
            );
            return false;
        }
        self.applied.insert(collection, ticket.seq);
        true
    }
}

/// Keep the first position of each id, holding the last value seen for it.
fn dedup_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> DbId) -> Vec<T> {
    let mut index: HashMap<DbId, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match index.get(&id(&item)) {
            Some(&pos) => out[pos] = item,
            None => {
                index.insert(id(&item), out.len());
                out.push(item);
            }
        }
    }
    out
}
