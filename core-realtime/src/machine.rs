//! Connection state machine for the audience request channel
//!
//! Pure and synchronous: every input yields the side effects the driver must
//! perform, in order. Timers and sockets live in the driver.

use std::time::Duration;

use core_library::SetlistId;
use core_runtime::config::RECONNECT_DELAY;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Server message types that mean the request list changed.
pub const REFRESH_MESSAGE_TYPES: [&str; 2] = ["queue.request.created", "connection.ready"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Offline,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Offline => "offline",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Setlist whose requests should be followed, with the credential to use.
#[derive(Clone, PartialEq, Eq)]
pub struct RealtimeTarget {
    pub setlist_id: SetlistId,
    pub token: String,
}

impl RealtimeTarget {
    pub fn new(setlist_id: SetlistId, token: impl Into<String>) -> Self {
        Self {
            setlist_id,
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for RealtimeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeTarget")
            .field("setlist_id", &self.setlist_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeInput {
    TargetChanged(Option<RealtimeTarget>),
    /// Follow a setlist by polling alone, dropping any channel
    SetlistChanged(Option<SetlistId>),
    ConnectivityChanged(bool),
    ChannelOpened,
    /// The connect attempt failed
    ChannelFailed,
    /// The server closed the channel
    ChannelClosed,
    /// Transport error on an open channel
    ChannelError,
    Message(String),
    ReconnectElapsed,
    PollTick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeAction {
    Open(RealtimeTarget),
    /// Drop any pending connect and close the channel without reconnecting
    Close,
    ScheduleReconnect(Duration),
    CancelReconnect,
    Refresh(SetlistId),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Decides what the driver does next.
#[derive(Debug)]
pub struct RealtimeMachine {
    state: ConnectionState,
    target: Option<RealtimeTarget>,
    /// Setlist whose requests are refreshed; may be set without a target
    setlist: Option<SetlistId>,
    online: bool,
    reconnect_pending: bool,
    reconnect_delay: Duration,
}

impl Default for RealtimeMachine {
    fn default() -> Self {
        Self::new(RECONNECT_DELAY)
    }
}

impl RealtimeMachine {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            target: None,
            setlist: None,
            online: false,
            reconnect_pending: false,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn target(&self) -> Option<&RealtimeTarget> {
        self.target.as_ref()
    }

    pub fn setlist(&self) -> Option<SetlistId> {
        self.setlist
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn handle(&mut self, input: RealtimeInput) -> Vec<RealtimeAction> {
        trace!(state = %self.state, ?input, "Realtime input");
        match input {
            RealtimeInput::TargetChanged(target) => self.on_target(target),
            RealtimeInput::SetlistChanged(setlist) => {
                self.setlist = setlist;
                if self.target.is_none() {
                    return Vec::new();
                }
                let mut actions = self.teardown();
                self.target = None;
                actions.extend(self.connect());
                actions
            }
            RealtimeInput::ConnectivityChanged(online) => self.on_connectivity(online),
            RealtimeInput::ChannelOpened => {
                if self.state != ConnectionState::Connecting {
                    return Vec::new();
                }
                self.state = ConnectionState::Connected;
                self.refresh().into_iter().collect()
            }
            RealtimeInput::ChannelFailed | RealtimeInput::ChannelClosed => self.on_lost(false),
            RealtimeInput::ChannelError => self.on_lost(true),
            RealtimeInput::Message(text) => {
                if self.state != ConnectionState::Connected {
                    return Vec::new();
                }
                match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) if REFRESH_MESSAGE_TYPES.contains(&envelope.kind.as_str()) => {
                        self.refresh().into_iter().collect()
                    }
                    _ => Vec::new(),
                }
            }
            RealtimeInput::ReconnectElapsed => {
                self.reconnect_pending = false;
                if self.state != ConnectionState::Reconnecting {
                    return Vec::new();
                }
                self.connect()
            }
            RealtimeInput::PollTick => {
                if self.online {
                    self.refresh().into_iter().collect()
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn refresh(&self) -> Option<RealtimeAction> {
        self.setlist.map(RealtimeAction::Refresh)
    }

    /// Closes whatever is open or pending, without scheduling anything.
    fn teardown(&mut self) -> Vec<RealtimeAction> {
        let mut actions = Vec::new();
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            actions.push(RealtimeAction::Close);
        }
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(RealtimeAction::CancelReconnect);
        }
        actions
    }

    /// Enters the state implied by the current target and connectivity.
    fn connect(&mut self) -> Vec<RealtimeAction> {
        match (&self.target, self.online) {
            (None, _) => {
                self.state = ConnectionState::Disconnected;
                Vec::new()
            }
            (Some(_), false) => {
                self.state = ConnectionState::Offline;
                Vec::new()
            }
            (Some(target), true) => {
                self.state = ConnectionState::Connecting;
                vec![RealtimeAction::Open(target.clone())]
            }
        }
    }

    fn on_target(&mut self, target: Option<RealtimeTarget>) -> Vec<RealtimeAction> {
        self.setlist = target.as_ref().map(|t| t.setlist_id);
        let target = target.filter(|t| !t.token.trim().is_empty());
        if target == self.target && self.state != ConnectionState::Disconnected {
            return Vec::new();
        }

        let mut actions = self.teardown();
        self.target = target;
        actions.extend(self.connect());
        actions
    }

    fn on_connectivity(&mut self, online: bool) -> Vec<RealtimeAction> {
        if online == self.online {
            return Vec::new();
        }
        self.online = online;

        if online {
            if self.state == ConnectionState::Offline || self.state == ConnectionState::Disconnected {
                return self.connect();
            }
            return Vec::new();
        }

        let actions = self.teardown();
        self.state = ConnectionState::Offline;
        actions
    }

    fn on_lost(&mut self, force_close: bool) -> Vec<RealtimeAction> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if force_close {
            actions.push(RealtimeAction::Close);
        }
        self.state = ConnectionState::Reconnecting;
        if !self.reconnect_pending {
            self.reconnect_pending = true;
            actions.push(RealtimeAction::ScheduleReconnect(self.reconnect_delay));
        }
        actions
    }
}
