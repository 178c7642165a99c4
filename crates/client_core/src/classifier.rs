use serde_json::Value;
use shared::{
    domain::BackupStatus,
    error::{ProtocolError, ValidationError},
    protocol::{InboundEvent, MessageType},
};
use tracing::warn;

use crate::error::ClassifyError;

/// Parses one raw frame into a typed event, reporting why it was rejected.
pub fn parse(raw: &str) -> Result<InboundEvent, ClassifyError> {
    let value: Value = serde_json::from_str(raw).map_err(ProtocolError::from)?;
    let Value::Object(fields) = value else {
        return Err(ProtocolError::NotAnObject.into());
    };
    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingDiscriminator)?;

    match kind.parse::<MessageType>()? {
        MessageType::Keepalive => Ok(InboundEvent::Keepalive),
        MessageType::Backup => {
            let status = fields
                .get("status")
                .and_then(Value::as_str)
                .ok_or(ValidationError::MissingField {
                    message_type: MessageType::BACKUP,
                    field: "status",
                })?
                .parse::<BackupStatus>()?;
            Ok(InboundEvent::Backup { status })
        }
    }
}

/// Same as [`parse`], but logs the rejection and yields `None`.
pub fn classify(raw: &str) -> Option<InboundEvent> {
    match parse(raw) {
        Ok(event) => Some(event),
        Err(ClassifyError::Protocol(err)) => {
            warn!(error = %err, frame_len = raw.len(), "classifier: dropping unrecognized message");
            None
        }
        Err(ClassifyError::Validation(err)) => {
            warn!(error = %err, "classifier: dropping invalid message");
            None
        }
    }
}
