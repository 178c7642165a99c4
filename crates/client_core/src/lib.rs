//! Live synchronization core for the playground client: one persistent event
//! channel, a classifier for server frames, and the per-session projections that
//! rendering layers read from.

pub mod backup;
pub mod channel;
pub mod classifier;
pub mod error;
pub mod merkle;
pub mod output;
pub mod retry;
pub mod session;
pub mod transport;

pub use backup::BackupTracker;
pub use channel::{
    ChannelConfig, ChannelEvent, ChannelEvents, ConnectionState, EventChannel, SendFailure,
    SendOutcome,
};
pub use error::{ClassifyError, TransportError};
pub use merkle::{MerkleStore, MerkleUpdate};
pub use output::OutputLog;
pub use retry::ReconnectPolicy;
pub use session::{ConnectionView, Mutation, PlaygroundSession};
pub use transport::{Connector, TransportLink, WebSocketConnector};

#[cfg(test)]
mod tests;
