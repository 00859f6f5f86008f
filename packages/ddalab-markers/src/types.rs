// Common types for marker streams

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for marker stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while talking to the marker transport
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid predicate: {0:?}")]
    InvalidPredicate(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

/// Identity of an advertised stream
///
/// The `uid` is assigned by the transport when the stream is advertised and is
/// stable for the lifetime of the outlet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    pub stream_type: String,
    pub source_id: String,
    pub uid: String,
    pub channel_count: u32,
}

impl StreamDescriptor {
    /// Marker streams always carry a single string channel
    pub fn marker_stream(
        name: impl Into<String>,
        stream_type: impl Into<String>,
        source_id: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stream_type: stream_type.into(),
            source_id: source_id.into(),
            uid: uid.into(),
            channel_count: 1,
        }
    }
}

/// Connection state of a [`crate::reader::MarkerReader`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderState {
    /// No inlet and no outstanding resolve
    #[default]
    Closed,

    /// Background resolve is running
    Resolving,

    /// Inlet is open
    Connected,
}

/// Polling state of a [`crate::provider::ResponseProvider`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    /// No subscribers, no poll loop
    #[default]
    Idle,

    /// At least one subscriber, poll loop active
    Polling,
}

impl std::fmt::Display for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderState::Idle => write!(f, "idle"),
            ProviderState::Polling => write!(f, "polling"),
        }
    }
}
