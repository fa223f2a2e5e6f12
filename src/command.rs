use std::fmt;

use serde::Serialize;
use strum_macros::IntoStaticStr;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::codec::{Packet, PayloadMap};
use crate::error::NewtError;
use crate::model::{Image, StatDetails, TaskStats};
use crate::protocol::{DefaultCommand, Group, ImageCommand, OpCode, StatsCommand};

/// Result handed to the caller once per logical operation.
pub type Outcome = Result<Reply, NewtError>;

/// Progress hook invoked with the completed fraction before each upload chunk.
pub type ProgressCallback = Box<dyn FnMut(f32) -> ProgressDecision + Send>;

/// Operations a caller can run against the device.
#[derive(Debug, Clone, Eq, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    /// Lists the image slots.
    ImageList,
    /// Marks the image with this hash for a test boot.
    ImageTest { hash: Vec<u8> },
    /// Confirms the image with this hash, or the running image when `None`.
    ImageConfirm { hash: Option<Vec<u8>> },
    /// Uploads a firmware image in chunks.
    Upload { image: Vec<u8> },
    TaskStats,
    Reset,
    Echo { message: String },
    /// Lists stat group names.
    Stats,
    /// Reads the counters of one stat group.
    StatDetails { group: String },
}

impl Command {
    /// Short snake-case name used in logs.
    ///
    /// ```
    /// use newtmgr::Command;
    ///
    /// assert_eq!("image_confirm", Command::ImageConfirm { hash: None }.kind());
    /// ```
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    #[must_use]
    pub fn is_upload(&self) -> bool {
        matches!(self, Self::Upload { .. })
    }

    fn address(&self) -> (OpCode, Group, u8) {
        match self {
            Self::ImageList => (OpCode::Read, Group::Image, ImageCommand::List.as_raw()),
            Self::ImageTest { .. } | Self::ImageConfirm { .. } => {
                (OpCode::Write, Group::Image, ImageCommand::List.as_raw())
            }
            Self::Upload { .. } => (OpCode::Write, Group::Image, ImageCommand::Upload.as_raw()),
            Self::TaskStats => (
                OpCode::Read,
                Group::Default,
                DefaultCommand::TaskStats.as_raw(),
            ),
            Self::Reset => (OpCode::Write, Group::Default, DefaultCommand::Reset.as_raw()),
            Self::Echo { .. } => (OpCode::Write, Group::Default, DefaultCommand::Echo.as_raw()),
            Self::Stats => (OpCode::Read, Group::Stats, StatsCommand::List.as_raw()),
            Self::StatDetails { .. } => (OpCode::Read, Group::Stats, StatsCommand::Read.as_raw()),
        }
    }

    /// Builds the request packet carrying `payload`.
    pub(crate) fn packet(&self, seq: u8, payload: Vec<u8>) -> Packet {
        let (op, group, id) = self.address();
        Packet::builder()
            .op(op)
            .group(group)
            .seq(seq)
            .id(id)
            .payload(payload)
            .build()
    }

    /// Returns the request payload for single-packet commands.
    ///
    /// Upload payloads are produced chunk by chunk by the engine instead.
    pub(crate) fn request_payload(&self) -> Option<PayloadMap> {
        match self {
            Self::ImageTest { hash } => Some(
                PayloadMap::new()
                    .boolean("confirm", false)
                    .bytes("hash", hash.clone()),
            ),
            Self::ImageConfirm { hash } => {
                let map = PayloadMap::new().boolean("confirm", true);
                Some(match hash {
                    Some(hash) => map.bytes("hash", hash.clone()),
                    None => map.null("hash"),
                })
            }
            Self::Echo { message } => Some(PayloadMap::new().text("d", message.clone())),
            Self::StatDetails { group } => Some(PayloadMap::new().text("name", group.clone())),
            Self::ImageList | Self::Upload { .. } | Self::TaskStats | Self::Reset | Self::Stats => {
                None
            }
        }
    }
}

/// Typed result of a completed command.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub enum Reply {
    /// Image list, test and confirm all answer with the slot table.
    Images(Vec<Image>),
    Echo(String),
    TaskStats(Vec<TaskStats>),
    StatGroups(Vec<String>),
    StatDetails(Vec<StatDetails>),
    /// Success with no payload (reset, finished upload).
    Done,
}

/// What a progress hook wants the upload to do next.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProgressDecision {
    Continue,
    Cancel,
}

impl From<bool> for ProgressDecision {
    /// `true` requests cancellation.
    fn from(cancel: bool) -> Self {
        if cancel { Self::Cancel } else { Self::Continue }
    }
}

/// A queued command with its progress hook and completion channel.
pub struct Request {
    command: Command,
    progress: Option<ProgressCallback>,
    outcome: oneshot::Sender<Outcome>,
    progress_tx: watch::Sender<f32>,
    cancellation: CancellationToken,
}

impl Request {
    /// Creates a request and the handle its caller keeps.
    ///
    /// ```
    /// use newtmgr::{Command, Request};
    ///
    /// let (request, handle) = Request::new(Command::Reset);
    /// assert_eq!("reset", request.command().kind());
    /// assert_eq!(0.0, handle.progress());
    /// ```
    #[must_use]
    pub fn new(command: Command) -> (Self, RequestHandle) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = watch::channel(0.0);
        let cancellation = CancellationToken::new();

        let request = Self {
            command,
            progress: None,
            outcome: outcome_tx,
            progress_tx,
            cancellation: cancellation.clone(),
        };
        let handle = RequestHandle {
            outcome: outcome_rx,
            progress: progress_rx,
            cancellation,
        };
        (request, handle)
    }

    /// Installs a progress hook; returning [`ProgressDecision::Cancel`] stops an upload.
    #[must_use]
    pub fn with_progress<F, D>(mut self, mut progress: F) -> Self
    where
        F: FnMut(f32) -> D + Send + 'static,
        D: Into<ProgressDecision>,
    {
        self.progress = Some(Box::new(move |fraction| progress(fraction).into()));
        self
    }

    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Publishes progress and returns whether the caller wants to stop.
    pub(crate) fn report_progress(&mut self, fraction: f32) -> ProgressDecision {
        self.progress_tx.send_replace(fraction);
        let decision = self
            .progress
            .as_mut()
            .map_or(ProgressDecision::Continue, |progress| progress(fraction));

        if decision == ProgressDecision::Cancel || self.cancellation.is_cancelled() {
            ProgressDecision::Cancel
        } else {
            ProgressDecision::Continue
        }
    }

    /// Delivers the outcome, consuming the request.
    pub(crate) fn complete(self, outcome: Outcome) {
        let command = self.command.kind();
        if self.outcome.send(outcome).is_err() {
            trace!(command, "request handle dropped before completion");
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command.kind())
            .field("has_progress", &self.progress.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

/// Caller-side view of a submitted request.
#[derive(Debug)]
pub struct RequestHandle {
    outcome: oneshot::Receiver<Outcome>,
    progress: watch::Receiver<f32>,
    cancellation: CancellationToken,
}

impl RequestHandle {
    /// Asks an in-progress upload to stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Latest reported completion fraction.
    #[must_use]
    pub fn progress(&self) -> f32 {
        *self.progress.borrow()
    }

    /// Stream of progress updates, starting with the current value.
    #[must_use]
    pub fn progress_stream(&self) -> WatchStream<f32> {
        WatchStream::new(self.progress.clone())
    }

    /// Returns the outcome if it has been delivered.
    ///
    /// Yields the outcome once; the engine dropping the request (session stop)
    /// reads as [`NewtError::RequestDiscarded`].
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(NewtError::RequestDiscarded)),
        }
    }

    /// Waits for the outcome.
    pub async fn outcome(self) -> Outcome {
        self.outcome
            .await
            .unwrap_or_else(|_closed| Err(NewtError::RequestDiscarded))
    }
}
