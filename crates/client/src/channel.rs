//! Long-lived realtime channel: connect, process, reconnect.
//!
//! A [`RealtimeChannel`] owns one background task that drives the
//! connection through [`ChannelState`]s and feeds every decoded event to
//! the registered handlers. Handlers should be registered before
//! [`RealtimeChannel::start`] so no early event is missed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::RealtimeClient;
use crate::config::ClientConfig;
use crate::events::{ChannelEvent, ChannelState, EventDispatcher};
use crate::processor::{process_messages, SessionEnd};
use crate::reconnect::{reconnect_loop, ReconnectConfig, ReconnectOutcome};
use crate::session::SessionStore;

/// How long [`RealtimeChannel::close`] waits for the task to exit.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RealtimeChannel {
    client: Arc<RealtimeClient>,
    reconnect: ReconnectConfig,
    dispatcher: EventDispatcher,
    state_tx: Arc<watch::Sender<ChannelState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    /// Create an idle channel. Nothing connects until [`start`](Self::start).
    pub fn new(client: RealtimeClient, reconnect: ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        Self {
            client: Arc::new(client),
            reconnect,
            dispatcher: EventDispatcher::new(),
            state_tx: Arc::new(state_tx),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Build a channel for the configured backend and start it.
    pub fn open(config: &ClientConfig, session: Arc<SessionStore>) -> Self {
        let client = RealtimeClient::new(config.realtime_url(), session);
        let mut channel = Self::new(client, config.reconnect.clone());
        channel.start();
        channel
    }

    /// Register a handler invoked once per event, in receipt order.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register(Arc::new(handler));
    }

    /// Forward every subsequent event into an unbounded receiver.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_event(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Spawn the connection task. Calling it again is a no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let client = Arc::clone(&self.client);
        let reconnect = self.reconnect.clone();
        let dispatcher = self.dispatcher.clone();
        let state_tx = Arc::clone(&self.state_tx);
        let cancel = self.cancel.clone();

        state_tx.send_replace(ChannelState::Connecting);
        dispatcher.dispatch(&ChannelEvent::StateChanged(ChannelState::Connecting));

        self.task = Some(tokio::spawn(async move {
            tracing::info!(url = %client.url(), "Starting realtime channel");
            run_channel(&client, &reconnect, &dispatcher, &state_tx, &cancel).await;
            tracing::info!(url = %client.url(), "Realtime channel task exited");
        }));
    }

    pub fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    /// Cancel the task and wait (bounded) for it to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                tracing::warn!(url = %self.client.url(), "Realtime channel did not stop in time");
            }
        }
        self.state_tx.send_replace(ChannelState::Disconnected);
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect -> process messages -> reconnect, until cancelled or rejected.
async fn run_channel(
    client: &RealtimeClient,
    reconnect: &ReconnectConfig,
    dispatcher: &EventDispatcher,
    state_tx: &watch::Sender<ChannelState>,
    cancel: &CancellationToken,
) {
    let set_state = |state: ChannelState| {
        if *state_tx.borrow() == state {
            return;
        }
        state_tx.send_replace(state);
        dispatcher.dispatch(&ChannelEvent::StateChanged(state));
    };

    let first = tokio::select! {
        _ = cancel.cancelled() => {
            set_state(ChannelState::Disconnected);
            return;
        }
        result = client.connect() => result,
    };

    let mut pending = match first {
        Ok(conn) => Some(conn),
        Err(e) if e.is_rejected() => {
            tracing::warn!(error = %e, "Realtime channel rejected by server");
            set_state(ChannelState::Disconnected);
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Realtime connection failed, entering reconnect loop");
            None
        }
    };

    loop {
        let conn = match pending.take() {
            Some(conn) => conn,
            None => {
                set_state(ChannelState::Reconnecting { attempt: 1 });
                let outcome = reconnect_loop(client, reconnect, cancel, |attempt| {
                    set_state(ChannelState::Reconnecting { attempt })
                })
                .await;
                match outcome {
                    ReconnectOutcome::Connected(conn) => conn,
                    ReconnectOutcome::Cancelled | ReconnectOutcome::Rejected(_) => break,
                }
            }
        };

        set_state(ChannelState::Connected);

        match process_messages(conn, dispatcher, cancel).await {
            SessionEnd::Cancelled => break,
            SessionEnd::Dropped if cancel.is_cancelled() => break,
            SessionEnd::Dropped => {
                tracing::warn!(url = %client.url(), "Realtime connection lost");
            }
        }
    }

    set_state(ChannelState::Disconnected);
}
