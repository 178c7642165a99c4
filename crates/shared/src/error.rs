use thiserror::Error;

/// The frame is not something the protocol understands at all.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has no string `type` discriminator")]
    MissingDiscriminator,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
}

/// The frame is recognized but one of its fields carries an invalid value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("`{message_type}` message is missing string field `{field}`")]
    MissingField {
        message_type: &'static str,
        field: &'static str,
    },
    #[error("unknown backup status `{0}`")]
    UnknownBackupStatus(String),
    #[error("unknown merkle display mode `{0}`")]
    UnknownDisplayMode(String),
}
