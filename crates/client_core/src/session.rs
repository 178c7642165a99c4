use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use shared::{
    domain::{BackupStatus, MerkleDisplayMode, OutputFragment, SessionId},
    error::ValidationError,
    protocol::InboundEvent,
};
use tracing::{debug, info, warn};

use crate::{
    backup::BackupTracker,
    channel::{ChannelEvent, ChannelEvents, ConnectionState},
    classifier,
    merkle::{MerkleStore, MerkleUpdate},
    output::OutputLog,
};

/// Every write into session state. Channel frames and collaborator results (code
/// submission, tree queries) both arrive as one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AppendCodeHistory(Option<String>),
    SetImmudb(Option<Value>),
    SetMerkleTree(MerkleUpdate),
    SetMerkleTreeMode(MerkleDisplayMode),
    SetCodeOutput(Option<Vec<OutputFragment>>),
    AppendCodeOutput(Option<Vec<OutputFragment>>),
    Backup(BackupStatus),
}

impl Mutation {
    pub fn merkle_tree_mode(raw: &str) -> Result<Self, ValidationError> {
        Ok(Self::SetMerkleTreeMode(raw.parse()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionView {
    state: ConnectionState,
    last_message: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
}

impl Default for ConnectionView {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
            last_message: None,
            last_message_at: None,
        }
    }
}

impl ConnectionView {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_open()
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.last_message_at
    }
}

pub struct PlaygroundSession {
    id: SessionId,
    output: OutputLog,
    merkle: MerkleStore,
    backup: BackupTracker,
    immudb: Option<Value>,
    connection: ConnectionView,
}

impl Default for PlaygroundSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaygroundSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            output: OutputLog::new(),
            merkle: MerkleStore::new(),
            backup: BackupTracker::new(),
            immudb: None,
            connection: ConnectionView::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Applies one mutation; returns whether any projection changed.
    pub fn commit(&mut self, mutation: Mutation) -> bool {
        let changed = match mutation {
            Mutation::AppendCodeHistory(code) => self.output.append_history(code.as_deref()),
            Mutation::SetImmudb(immudb) => match immudb {
                Some(immudb) => {
                    self.immudb = Some(immudb);
                    true
                }
                None => false,
            },
            Mutation::SetMerkleTree(update) => self.merkle.set_snapshot(update),
            Mutation::SetMerkleTreeMode(mode) => self.merkle.set_display_mode(mode),
            Mutation::SetCodeOutput(output) => self.output.set_output(output),
            Mutation::AppendCodeOutput(output) => self.output.append_output(output),
            Mutation::Backup(status) => {
                let changed = self.backup.apply(status);
                if changed {
                    info!(session_id = %self.id, %status, "session: backup status changed");
                }
                changed
            }
        };
        debug!(session_id = %self.id, changed, "session: mutation committed");
        changed
    }

    /// Classifies a raw frame and routes it. Rejected frames touch nothing.
    pub fn dispatch(&mut self, raw: &str) -> Option<InboundEvent> {
        let event = classifier::classify(raw)?;
        match event {
            InboundEvent::Keepalive => {
                debug!(session_id = %self.id, "session: keepalive reached dispatch");
            }
            InboundEvent::Backup { status } => {
                self.commit(Mutation::Backup(status));
            }
        }
        Some(event)
    }

    pub fn apply(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(raw) => {
                self.dispatch(&raw);
                self.connection.last_message = Some(raw);
                self.connection.last_message_at = Some(Utc::now());
            }
            ChannelEvent::StateChanged(state) => {
                self.connection.state = state;
            }
            ChannelEvent::SendFailed { reason, .. } => {
                warn!(session_id = %self.id, %reason, "session: outbound message was not delivered");
            }
        }
    }

    /// Folds channel events into the session until the channel reaches a terminal
    /// state or its event stream ends.
    pub async fn drive(&mut self, events: &mut ChannelEvents) {
        while let Some(event) = events.next().await {
            let terminal = matches!(event, ChannelEvent::StateChanged(state) if state.is_terminal());
            self.apply(event);
            if terminal {
                break;
            }
        }
        info!(session_id = %self.id, state = %self.connection.state, "session: channel stream ended");
    }

    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    pub fn merkle(&self) -> &MerkleStore {
        &self.merkle
    }

    pub fn backup(&self) -> &BackupTracker {
        &self.backup
    }

    pub fn immudb(&self) -> Option<&Value> {
        self.immudb.as_ref()
    }

    pub fn connection(&self) -> &ConnectionView {
        &self.connection
    }
}
