//! Console orchestrator.
//!
//! [`Console`] ties the session, gateway, realtime channel and
//! reconciler together the way the dashboard views use them: it gates
//! every action on the current role, refreshes the affected collection
//! after a successful mutation, and tears the session down whenever the
//! backend answers with an authentication error.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use comfyqueue_core::access::{
    authorize, authorize_route, landing_route, AccessDecision, DenyReason, Route,
};
use comfyqueue_core::models::job::Job;
use comfyqueue_core::models::node::{CreateNode, Node, UpdateNode};
use comfyqueue_core::models::user::{CreateUser, CurrentUser, UpdateUser, User};
use comfyqueue_core::roles::Capability;
use comfyqueue_core::theme::Theme;
use comfyqueue_core::types::DbId;
use tokio::sync::mpsc;

use crate::api::{ApiClient, ApiError};
use crate::channel::RealtimeChannel;
use crate::client::RealtimeClient;
use crate::config::ClientConfig;
use crate::events::{ChannelEvent, ChannelState};
use crate::reconciler::{Collection, Reconciler, ViewState};
use crate::session::{SessionError, SessionStore};
use crate::storage::{FileStorage, SessionStorage, StorageError};
use crate::view::{render, DashboardView};

/// Errors surfaced by [`Console`] actions.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The current role may not perform the action. Nothing was sent.
    #[error("Access denied ({reason:?})")]
    Denied { reason: DenyReason, redirect: Route },

    /// The same action is still in flight.
    #[error("Already in progress: {0}")]
    Busy(String),
}

impl ConsoleError {
    /// Where the user should be sent after this error, if anywhere.
    pub fn redirect(&self) -> Option<Route> {
        match self {
            ConsoleError::Api(e) if e.is_auth() => Some(Route::Login),
            ConsoleError::Denied { redirect, .. } => Some(*redirect),
            _ => None,
        }
    }

    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ConsoleError::Api(e) => e.user_message(),
            ConsoleError::Storage(_) => "Could not save the session locally.".into(),
            ConsoleError::Denied {
                reason: DenyReason::NotAuthenticated,
                ..
            } => "Please log in.".into(),
            ConsoleError::Denied { .. } => "You do not have permission to do that.".into(),
            ConsoleError::Busy(_) => "That action is already in progress.".into(),
        }
    }
}

impl From<SessionError> for ConsoleError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Api(e) => ConsoleError::Api(e),
            SessionError::Storage(e) => ConsoleError::Storage(e),
        }
    }
}

pub struct Console {
    config: ClientConfig,
    api: ApiClient,
    session: Arc<SessionStore>,
    reconciler: Mutex<Reconciler>,
    channel: Mutex<Option<RealtimeChannel>>,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases an in-flight key on drop.
#[derive(Debug)]
struct InFlight<'a> {
    keys: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.keys).remove(&self.key);
    }
}

impl Console {
    /// Build a console over `storage`, restoring any persisted session.
    pub fn new(
        config: ClientConfig,
        storage: Box<dyn SessionStorage>,
    ) -> Result<Self, ConsoleError> {
        let session = Arc::new(SessionStore::restore(storage));
        let api = ApiClient::new(&config, Arc::clone(&session))?;
        Ok(Self {
            config,
            api,
            session,
            reconciler: Mutex::new(Reconciler::new()),
            channel: Mutex::new(None),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Build a console persisting to `config.session_file`.
    pub fn from_config(config: ClientConfig) -> Result<Self, ConsoleError> {
        let storage = FileStorage::open(&config.session_file);
        Self::new(config, Box::new(storage))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    // ---- session and navigation ----

    /// Log in and return the route the role lands on.
    pub async fn login(&self, username: &str, password: &str) -> Result<Route, ConsoleError> {
        let session = self.session.login(&self.api, username, password).await?;
        Ok(landing_route(session.role))
    }

    /// Close the channel, then clear the session.
    pub async fn logout(&self) -> Result<(), ConsoleError> {
        self.unmount().await;
        self.session.logout()?;
        Ok(())
    }

    pub fn navigate(&self, route: Route) -> AccessDecision {
        authorize_route(route, self.session.current_role())
    }

    /// `GET /api/auth/me`.
    pub async fn whoami(&self) -> Result<CurrentUser, ConsoleError> {
        self.require(Capability::ViewDashboard)?;
        self.check(self.api.me().await).await
    }

    pub fn theme(&self) -> Theme {
        self.session.theme()
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), ConsoleError> {
        Ok(self.session.set_theme(theme)?)
    }

    pub fn toggle_theme(&self) -> Result<Theme, ConsoleError> {
        Ok(self.session.toggle_theme()?)
    }

    // ---- dashboard lifecycle ----

    /// Open the realtime channel and load both snapshots.
    ///
    /// The returned receiver yields every channel event; feed each one
    /// to [`handle_event`](Self::handle_event).
    pub async fn mount_dashboard(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, ConsoleError> {
        self.require(Capability::ViewDashboard)?;

        // Replace any previous mount.
        self.unmount().await;
        self.reconciler().attach();

        let client = RealtimeClient::new(self.config.realtime_url(), Arc::clone(&self.session));
        let mut channel = RealtimeChannel::new(client, self.config.reconnect.clone());
        let events = channel.events();
        channel.start();
        *lock(&self.channel) = Some(channel);

        if let Err(e) = self.refresh().await {
            self.unmount().await;
            return Err(e);
        }
        tracing::info!("Dashboard mounted");
        Ok(events)
    }

    /// Load both snapshots without opening the realtime channel.
    pub async fn load_dashboard(&self) -> Result<DashboardView, ConsoleError> {
        self.require(Capability::ViewDashboard)?;
        self.unmount().await;
        self.reconciler().attach();
        self.refresh().await?;
        Ok(self.view())
    }

    /// Stop applying data and close the channel.
    pub async fn unmount(&self) {
        self.reconciler().detach();
        let channel = lock(&self.channel).take();
        if let Some(channel) = channel {
            channel.close().await;
            tracing::info!("Dashboard unmounted");
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.reconciler().is_attached()
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        lock(&self.channel).as_ref().map(RealtimeChannel::state)
    }

    /// Re-fetch both collections concurrently.
    pub async fn refresh(&self) -> Result<(), ConsoleError> {
        let (jobs, nodes) = tokio::join!(self.refresh_jobs(), self.refresh_nodes());
        jobs?;
        nodes?;
        Ok(())
    }

    pub async fn refresh_jobs(&self) -> Result<(), ConsoleError> {
        let ticket = self.reconciler().begin(Collection::Jobs);
        let jobs: Vec<Job> = self.check(self.api.list_jobs().await).await?;
        self.reconciler().apply_jobs(ticket, jobs);
        Ok(())
    }

    pub async fn refresh_nodes(&self) -> Result<(), ConsoleError> {
        let ticket = self.reconciler().begin(Collection::Nodes);
        let nodes: Vec<Node> = self.check(self.api.list_nodes().await).await?;
        self.reconciler().apply_nodes(ticket, nodes);
        Ok(())
    }

    /// Apply one channel event to the view.
    /// Events arriving after unmount or logout are dropped without
    /// touching the network.
    pub async fn handle_event(&self, event: &ChannelEvent) -> Result<(), ConsoleError> {
        if !self.reconciler().is_attached() {
            tracing::debug!(?event, "Ignoring channel event while unmounted");
            return Ok(());
        }
        match event {
            ChannelEvent::JobCreated(notice) | ChannelEvent::JobStatusChanged(notice) => {
                match &notice.job {
                    Some(job) => {
                        self.reconciler().merge_job(job.clone());
                        Ok(())
                    }
                    None => self.refresh_jobs().await,
                }
            }
            // Events may have been missed while disconnected.
            ChannelEvent::StateChanged(ChannelState::Connected) => self.refresh_jobs().await,
            ChannelEvent::StateChanged(state) => {
                tracing::debug!(?state, "Realtime channel state changed");
                Ok(())
            }
        }
    }

    pub fn view(&self) -> DashboardView {
        render(self.reconciler().state())
    }

    pub fn view_state(&self) -> ViewState {
        self.reconciler().state().clone()
    }

    // ---- node actions ----

    pub async fn toggle_node(&self, name: &str, enabled: bool) -> Result<(), ConsoleError> {
        self.require(Capability::ManageNodes)?;
        let _guard = self.acquire(format!("toggle:{name}"))?;
        self.check(self.api.toggle_node(name, enabled).await).await?;
        tracing::info!(node = %name, enabled, "Node toggled");
        self.refresh_nodes().await
    }

    pub async fn add_node(&self, name: &str, url: &str) -> Result<DbId, ConsoleError> {
        self.require(Capability::ManageNodes)?;
        let _guard = self.acquire(format!("node:add:{name}"))?;
        let input = CreateNode {
            name: name.trim().to_string(),
            url: url.trim().to_string(),
        };
        let created = self.check(self.api.add_node(&input).await).await?;
        tracing::info!(node = %input.name, id = created.id, "Node added");
        self.refresh_nodes().await?;
        Ok(created.id)
    }

    pub async fn update_node(&self, id: DbId, input: &UpdateNode) -> Result<(), ConsoleError> {
        self.require(Capability::ManageNodes)?;
        let _guard = self.acquire(format!("node:{id}"))?;
        self.check(self.api.update_node(id, input).await).await?;
        tracing::info!(id, "Node updated");
        self.refresh_nodes().await
    }

    pub async fn delete_node(&self, id: DbId) -> Result<(), ConsoleError> {
        self.require(Capability::ManageNodes)?;
        let _guard = self.acquire(format!("node:{id}"))?;
        self.check(self.api.delete_node(id).await).await?;
        tracing::info!(id, "Node deleted");
        self.refresh_nodes().await
    }

    // ---- uploads ----

    pub async fn upload(&self, path: &Path) -> Result<(), ConsoleError> {
        self.require(Capability::UploadWorkflow)?;
        let _guard = self.acquire("upload".to_string())?;
        self.check(self.api.upload_workflow(path).await).await?;
        tracing::info!(path = %path.display(), "Workflow uploaded");
        self.refresh_jobs().await
    }

    // ---- user administration ----

    pub async fn list_users(&self) -> Result<Vec<User>, ConsoleError> {
        self.require(Capability::ManageUsers)?;
        self.check(self.api.list_users().await).await
    }

    pub async fn create_user(&self, input: &CreateUser) -> Result<(), ConsoleError> {
        self.require(Capability::ManageUsers)?;
        let _guard = self.acquire(format!("user:add:{}", input.username))?;
        self.check(self.api.create_user(input).await).await?;
        tracing::info!(username = %input.username, role = %input.role, "User created");
        Ok(())
    }

    /// Update profile fields and, when `password` is given, the password.
    pub async fn update_user(
        &self,
        id: DbId,
        input: &UpdateUser,
        password: Option<&str>,
    ) -> Result<(), ConsoleError> {
        self.require(Capability::ManageUsers)?;
        let _guard = self.acquire(format!("user:{id}"))?;
        if input.username.is_some() || input.role.is_some() {
            self.check(self.api.update_user(id, input).await).await?;
        }
        if let Some(password) = password {
            self.check(self.api.change_password(id, password).await).await?;
        }
        tracing::info!(id, "User updated");
        Ok(())
    }

    pub async fn delete_user(&self, id: DbId) -> Result<(), ConsoleError> {
        self.require(Capability::ManageUsers)?;
        let _guard = self.acquire(format!("user:{id}"))?;
        self.check(self.api.delete_user(id).await).await?;
        tracing::info!(id, "User deleted");
        Ok(())
    }

    // ---- private helpers ----

    fn reconciler(&self) -> MutexGuard<'_, Reconciler> {
        lock(&self.reconciler)
    }

    fn require(&self, capability: Capability) -> Result<(), ConsoleError> {
        match authorize(capability, self.session.current_role()) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny { reason, redirect } => {
                tracing::debug!(?capability, ?reason, "Action denied");
                Err(ConsoleError::Denied { reason, redirect })
            }
        }
    }

    fn acquire(&self, key: String) -> Result<InFlight<'_>, ConsoleError> {
        if !lock(&self.in_flight).insert(key.clone()) {
            return Err(ConsoleError::Busy(key));
        }
        Ok(InFlight {
            keys: &self.in_flight,
            key,
        })
    }

    /// Pass `result` through, ending the session on an auth failure.
    async fn check<T>(&self, result: Result<T, ApiError>) -> Result<T, ConsoleError> {
        match result {
            Err(e) if e.is_auth() => {
                tracing::warn!(error = %e, "Session rejected by backend, logging out");
                self.unmount().await;
                if let Err(storage) = self.session.logout() {
                    tracing::error!(error = %storage, "Failed to clear expired session");
                }
                Err(e.into())
            }
            other => other.map_err(Into::into),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
