//! # Realtime Queue Client
//!
//! Follows the audience request list of the active setlist. The channel is
//! only opened for a [`RealtimeTarget`]; a setlist followed through
//! [`RealtimeQueueClient::follow_setlist`] is kept current by polling alone.
//!
//! A single background task owns the channel, the reconnect timer and the
//! poll interval. Callers talk to it through [`RealtimeQueueClient`], which
//! sends commands over an mpsc channel and reads the published connection
//! state and request list from `watch` channels.
//!
//! Message bodies are never applied directly. Any relevant server message,
//! every successful open and every poll tick re-read the list through
//! [`RepertoireApi::list_audience_requests`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::realtime::{RealtimeChannel, RealtimeConnector};
use core_library::{AudienceRequest, RepertoireApi, SetlistId};
use core_runtime::config::RealtimeSettings;
use core_runtime::events::{CoreEvent, EventBus, RealtimeEvent};
use core_runtime::logging::redact_url_query;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{RealtimeError, Result};
use crate::machine::{
    ConnectionState, RealtimeAction, RealtimeInput, RealtimeMachine, RealtimeTarget,
};

const COMMAND_BUFFER: usize = 32;

type ConnectFuture = Pin<Box<dyn Future<Output = BridgeResult<Box<dyn RealtimeChannel>>> + Send>>;

/// Builds `{root}/ws/setlists/{id}/requests/?token={token}`.
pub fn channel_url(realtime_root: &str, setlist_id: SetlistId, token: &str) -> Result<String> {
    let base = format!(
        "{}/ws/setlists/{}/requests/",
        realtime_root.trim_end_matches('/'),
        setlist_id
    );
    let mut url = Url::parse(&base).map_err(|e| RealtimeError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

#[derive(Debug)]
enum Command {
    SetTarget(Option<RealtimeTarget>),
    FollowSetlist(Option<SetlistId>),
    SetOnline(bool),
    Refresh,
    Shutdown,
}

/// Handle to the background realtime task.
pub struct RealtimeQueueClient {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    requests: watch::Receiver<Vec<AudienceRequest>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeQueueClient {
    /// Spawns the driver task on the current tokio runtime.
    pub fn spawn(
        api: Arc<dyn RepertoireApi>,
        connector: Arc<dyn RealtimeConnector>,
        event_bus: EventBus,
        realtime_root: impl Into<String>,
        settings: RealtimeSettings,
        online: bool,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (requests_tx, requests) = watch::channel(Vec::new());

        let mut machine = RealtimeMachine::new(settings.reconnect_delay);
        machine.handle(RealtimeInput::ConnectivityChanged(online));

        let driver = Driver {
            machine,
            api,
            connector,
            event_bus,
            realtime_root: realtime_root.into(),
            state_tx,
            requests_tx,
            channel: None,
            connecting: None,
            reconnect: None,
        };
        let task = tokio::spawn(driver.run(command_rx, settings.poll_interval));

        Self {
            commands,
            state,
            requests,
            task: Mutex::new(Some(task)),
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RealtimeError::Stopped)
    }

    /// Follows `target`, or stops following anything when `None`.
    pub async fn set_target(&self, target: Option<RealtimeTarget>) -> Result<()> {
        self.send(Command::SetTarget(target)).await
    }

    /// Polls `setlist` without opening a channel, closing any that is open.
    pub async fn follow_setlist(&self, setlist: Option<SetlistId>) -> Result<()> {
        self.send(Command::FollowSetlist(setlist)).await
    }

    pub async fn set_online(&self, online: bool) -> Result<()> {
        self.send(Command::SetOnline(online)).await
    }

    /// Re-reads the request list now.
    pub async fn refresh(&self) -> Result<()> {
        self.send(Command::Refresh).await
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn requests(&self) -> Vec<AudienceRequest> {
        self.requests.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn watch_requests(&self) -> watch::Receiver<Vec<AudienceRequest>> {
        self.requests.clone()
    }

    /// Closes the channel and waits for the task to finish.
    pub async fn shutdown(&self) {
        self.commands.send(Command::Shutdown).await.ok();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Realtime task ended abnormally");
            }
        }
    }
}

struct Driver {
    machine: RealtimeMachine,
    api: Arc<dyn RepertoireApi>,
    connector: Arc<dyn RealtimeConnector>,
    event_bus: EventBus,
    realtime_root: String,
    state_tx: watch::Sender<ConnectionState>,
    requests_tx: watch::Sender<Vec<AudienceRequest>>,
    channel: Option<Box<dyn RealtimeChannel>>,
    connecting: Option<ConnectFuture>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

async fn connect_result(pending: &mut Option<ConnectFuture>) -> BridgeResult<Box<dyn RealtimeChannel>> {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(channel: &mut Option<Box<dyn RealtimeChannel>>) -> Option<BridgeResult<String>> {
    match channel {
        Some(channel) => channel.next_text().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_elapsed(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, poll_interval: Duration) {
        let mut poll = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let input = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SetTarget(target)) => RealtimeInput::TargetChanged(target),
                    Some(Command::FollowSetlist(setlist)) => RealtimeInput::SetlistChanged(setlist),
                    Some(Command::SetOnline(online)) => RealtimeInput::ConnectivityChanged(online),
                    Some(Command::Refresh) => {
                        if let Some(id) = self.machine.setlist() {
                            self.refresh(id).await;
                        }
                        continue;
                    }
                    Some(Command::Shutdown) | None => break,
                },
                result = connect_result(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(channel) => {
                            self.channel = Some(channel);
                            RealtimeInput::ChannelOpened
                        }
                        Err(e) => {
                            debug!(error = %e, "Realtime connect failed");
                            RealtimeInput::ChannelFailed
                        }
                    }
                },
                frame = next_frame(&mut self.channel) => match frame {
                    Some(Ok(text)) => RealtimeInput::Message(text),
                    Some(Err(e)) => {
                        debug!(error = %e, "Realtime channel error");
                        RealtimeInput::ChannelError
                    }
                    None => {
                        debug!("Realtime channel closed by server");
                        self.channel = None;
                        RealtimeInput::ChannelClosed
                    }
                },
                _ = reconnect_elapsed(&mut self.reconnect) => {
                    self.reconnect = None;
                    RealtimeInput::ReconnectElapsed
                },
                _ = poll.tick() => RealtimeInput::PollTick,
            };

            self.apply(input).await;
        }

        self.close_channel().await;
        self.reconnect = None;
        self.publish_state(ConnectionState::Disconnected);
        debug!("Realtime task stopped");
    }

    async fn apply(&mut self, input: RealtimeInput) {
        let before = self.machine.state();
        let previous_setlist = self.machine.setlist();
        let actions = self.machine.handle(input);

        if self.machine.setlist() != previous_setlist {
            self.requests_tx.send_replace(Vec::new());
        }

        for action in actions {
            match action {
                RealtimeAction::Open(target) => self.open(target),
                RealtimeAction::Close => self.close_channel().await,
                RealtimeAction::ScheduleReconnect(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                    self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                }
                RealtimeAction::CancelReconnect => self.reconnect = None,
                RealtimeAction::Refresh(id) => self.refresh(id).await,
            }
        }

        let after = self.machine.state();
        if after != before {
            self.publish_state(after);
        }
    }

    fn open(&mut self, target: RealtimeTarget) {
        let url = match channel_url(&self.realtime_root, target.setlist_id, &target.token) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build realtime URL");
                self.connecting = Some(Box::pin(async move {
                    Err(bridge_traits::BridgeError::OperationFailed(e.to_string()))
                }));
                return;
            }
        };

        info!(setlist_id = %target.setlist_id, url = %redact_url_query(&url), "Opening realtime channel");
        let connector = self.connector.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    async fn close_channel(&mut self) {
        self.connecting = None;
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "Error while closing realtime channel");
            }
        }
    }

    async fn refresh(&mut self, setlist_id: SetlistId) {
        match self.api.list_audience_requests(setlist_id).await {
            Ok(queue) => {
                if self.machine.setlist() != Some(setlist_id) {
                    return;
                }
                let count = queue.items.len();
                self.requests_tx.send_replace(queue.items);
                self.event_bus
                    .emit(CoreEvent::Realtime(RealtimeEvent::RequestsUpdated {
                        setlist_id: setlist_id.0,
                        count,
                    }))
                    .ok();
            }
            Err(e) => debug!(setlist_id = %setlist_id, error = %e, "Request refresh failed"),
        }
    }

    fn publish_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous == state {
            return;
        }
        debug!(from = %previous, to = %state, "Realtime state changed");
        self.event_bus
            .emit(CoreEvent::Realtime(RealtimeEvent::StateChanged {
                setlist_id: self.machine.setlist().map(|id| id.0),
                state: state.as_str().to_string(),
            }))
            .ok();
    }
}
