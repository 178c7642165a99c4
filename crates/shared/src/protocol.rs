use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{domain::BackupStatus, error::ProtocolError};

/// Discriminators carried in the `type` field of server frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Keepalive,
    Backup,
}

impl MessageType {
    pub const KEEPALIVE: &'static str = "keepalive";
    pub const BACKUP: &'static str = "backup";
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            Self::KEEPALIVE => Ok(Self::Keepalive),
            Self::BACKUP => Ok(Self::Backup),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Keepalive,
    Backup { status: BackupStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Keepalive,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Cheap check used by the transport layer to swallow liveness frames.
pub fn is_keepalive_frame(raw: &str) -> bool {
    serde_json::from_str::<Envelope>(raw)
        .map(|envelope| envelope.kind == MessageType::KEEPALIVE)
        .unwrap_or(false)
}
