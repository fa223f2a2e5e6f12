use thiserror::Error;

use crate::codec::{PacketError, PayloadError};

/// Errors delivered to a request's outcome.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum NewtError {
    #[error("Received response is not a packet")]
    ReceivedResponseIsNotAPacket(#[source] PacketError),
    #[error("Received invalid response: {0}")]
    ReceivedResponseIsNotACbor(#[source] PayloadError),
    #[error("Received response with missing fields")]
    ReceivedResponseMissingFields,
    #[error("Received response with invalid values")]
    ReceivedResponseInvalidValues,
    /// The device answered with a result code other than `ok`.
    #[error("Received incorrect result: {0}")]
    ReceivedResultNotOk(String),
    #[error("Internal error")]
    Internal,
    /// Upload images must be at least the configured minimum length.
    #[error("Upload image is invalid")]
    UpdateImageInvalid,
    #[error("Image invalid")]
    ImageInvalid,
    #[error("Cancelled")]
    UserCancelled,
    /// A new command was dispatched while a response was still being reassembled.
    #[error("Waiting for previous command")]
    WaitingForResponse,
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The host reported that the device stopped answering.
    #[error("Timed out waiting for the device to respond")]
    ResponseTimeout,
    /// The session was stopped before this request completed.
    #[error("Request was discarded before it completed")]
    RequestDiscarded,
}

/// Failures reported by the byte transport.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum TransportError {
    #[error("transport is disconnected")]
    Disconnected,
    #[error("transport rejected the write: {reason}")]
    WriteRejected { reason: String },
    #[error("transport failed while receiving: {reason}")]
    ReceiveFailed { reason: String },
}

/// Errors returned when validating engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk payload budget cannot be zero")]
    ZeroChunkBudget,
    #[error("first-chunk reserve {reserve} must be smaller than the chunk budget {budget}")]
    ReserveExceedsBudget { reserve: usize, budget: usize },
    #[error("failed to parse engine configuration")]
    Parse(#[from] serde_json::Error),
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
