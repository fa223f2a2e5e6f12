use ciborium::Value;
use tracing::{debug, error, info, instrument, trace, warn};

use super::parsers::{parse_reply, parse_upload_ack};
use super::queue::CommandQueue;
use super::reassembly::{Reassembly, ResponseBuffer};
use super::upload::{UploadChunker, UploadStep};
use crate::codec::{Packet, PacketCodec, PayloadMap, decode_payload};
use crate::command::{Command, Outcome, ProgressDecision, Reply, Request, RequestHandle};
use crate::config::EngineConfig;
use crate::error::{ConfigError, NewtError, TransportError};
use crate::transport::Transport;
use crate::utils::format_hex;

/// Next action for the request at the head of the queue.
enum Prepared {
    Send(Packet),
    Complete(Outcome),
}

/// Single-session protocol engine.
///
/// All entry points must be called from one logical thread. The engine never
/// blocks: a submitted request is written synchronously when it reaches the
/// head of the queue, and its outcome arrives once the host feeds the reply
/// back through [`NewtManager::on_data_received`].
///
/// ```
/// use newtmgr::{Command, NewtManager, RecordingTransport};
///
/// let transport = RecordingTransport::default();
/// let mut manager = NewtManager::new(transport.clone());
/// manager.start();
///
/// let mut handle = manager.send_request(Command::Reset);
/// assert_eq!(1, transport.written().len());
/// assert!(handle.try_outcome().is_none());
/// ```
#[derive(Debug)]
pub struct NewtManager<T> {
    transport: T,
    config: EngineConfig,
    chunker: UploadChunker,
    queue: CommandQueue<Request>,
    response: ResponseBuffer,
    next_seq: u8,
    last_sent_seq: Option<u8>,
}

impl<T: Transport> NewtManager<T> {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new(transport: T) -> Self {
        let config = EngineConfig::default();
        Self {
            transport,
            config,
            chunker: UploadChunker::new(&config),
            queue: CommandQueue::default(),
            response: ResponseBuffer::default(),
            next_seq: 0,
            last_sent_seq: None,
        }
    }

    /// Creates an engine with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when `config` fails [`EngineConfig::validate`].
    pub fn with_config(transport: T, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            chunker: UploadChunker::new(&config),
            ..Self::new(transport)
        })
    }

    /// Resets per-session state before talking to a freshly connected device.
    pub fn start(&mut self) {
        self.response.clear();
        self.next_seq = 0;
        self.last_sent_seq = None;
        info!("session started");
    }

    /// Drops every queued request without completing it.
    ///
    /// Their handles resolve to [`NewtError::RequestDiscarded`].
    pub fn stop(&mut self) {
        let discarded = self.queue.len();
        self.queue.clear();
        self.response.clear();
        info!(discarded, "session stopped");
    }

    /// Submits a command and returns the handle its outcome arrives on.
    pub fn send_request(&mut self, command: Command) -> RequestHandle {
        let (request, handle) = Request::new(command);
        self.enqueue(request);
        handle
    }

    /// Submits a command with a progress hook.
    ///
    /// The hook runs before every upload chunk with the fraction the device
    /// has accepted; returning [`ProgressDecision::Cancel`] (or `true`) ends
    /// the transfer at that boundary.
    pub fn send_request_with_progress<F, D>(&mut self, command: Command, progress: F) -> RequestHandle
    where
        F: FnMut(f32) -> D + Send + 'static,
        D: Into<ProgressDecision>,
    {
        let (request, handle) = Request::new(command);
        self.enqueue(request.with_progress(progress));
        handle
    }

    /// Appends a request; dispatches it immediately when the queue was idle.
    #[instrument(skip_all, level = "debug", fields(command = request.command().kind()))]
    pub fn enqueue(&mut self, request: Request) {
        if self.queue.enqueue(request) {
            self.dispatch_pending();
        } else {
            trace!(pending = self.queue.len(), "request queued behind in-flight command");
        }
    }

    /// Feeds one inbound delivery from the transport.
    ///
    /// A transport error fails the in-flight request. Bytes are decoded as one
    /// packet and appended to the current response; the reply is parsed once
    /// the complete flag arrives.
    #[instrument(skip_all, level = "trace")]
    pub fn on_data_received(&mut self, delivery: Result<&[u8], TransportError>) {
        let data = match delivery {
            Ok(data) => data,
            Err(error) => {
                warn!(%error, "error reading device data");
                self.response_error(NewtError::Transport(error));
                return;
            }
        };

        let packet = match PacketCodec::decode(data) {
            Ok(response) => response.into_packet(),
            Err(error) => {
                warn!(%error, data = %format_hex(data), "error parsing device data");
                self.response_error(NewtError::ReceivedResponseIsNotAPacket(error));
                return;
            }
        };

        if self.queue.is_empty() {
            warn!(%packet, "received data with no command in flight");
            if packet.is_response_complete() && !self.response.is_empty() {
                debug!(
                    discarded = self.response.len(),
                    "dropping stale response fragments"
                );
                self.response.clear();
            }
            return;
        }

        debug!(%packet, data = %format_hex(packet.payload()), "received packet");
        if let Some(expected) = self.last_sent_seq
            && expected != packet.seq()
        {
            debug!(
                expected,
                received = packet.seq(),
                "response sequence differs from last request"
            );
        }

        let payload = match self.response.push(packet) {
            Reassembly::Pending { .. } => return,
            Reassembly::Complete(payload) => payload,
        };

        let value = match decode_payload(&payload) {
            Ok(value) => value,
            Err(error) => {
                // The head stays in flight until the host reports a timeout.
                error!(%error, data = %format_hex(&payload), "cannot decode response payload");
                return;
            }
        };

        self.handle_reply(&value);
    }

    /// Reports that a previously accepted write failed to reach the device.
    ///
    /// Fails the in-flight request and advances. Fragments of a reply that is
    /// still arriving are kept, so the next request fails fast with
    /// [`NewtError::WaitingForResponse`] instead of interleaving with it.
    #[instrument(skip_all, level = "debug")]
    pub fn on_write_failed(&mut self, error: TransportError) {
        if self.queue.is_empty() {
            warn!(%error, "write failure reported with no command in flight");
            return;
        }
        warn!(%error, "write to device failed");
        self.complete_and_advance(Err(NewtError::Transport(error)));
    }

    /// Reports that the device stopped answering the in-flight request.
    ///
    /// The engine owns no timers; hosts call this from their own.
    #[instrument(skip_all, level = "debug")]
    pub fn on_response_timeout(&mut self) {
        warn!(
            buffered = self.response.len(),
            "device did not answer in time"
        );
        self.response_error(NewtError::ResponseTimeout);
    }

    /// Number of requests queued, including the one in flight.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// Returns whether a request has been sent and is waiting for its reply.
    #[must_use]
    pub fn is_awaiting_response(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Command of the request currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> Option<&Command> {
        self.queue.peek().map(Request::command)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn handle_reply(&mut self, value: &Value) {
        let Some(request) = self.queue.peek() else {
            return;
        };

        if request.command().is_upload() {
            self.continue_upload(value);
        } else {
            let outcome = parse_reply(request.command(), value);
            self.complete_and_advance(outcome);
        }
    }

    fn continue_upload(&mut self, ack: &Value) {
        let offset = match parse_upload_ack(ack) {
            Ok(offset) => offset,
            Err(error) => {
                self.complete_and_advance(Err(error));
                return;
            }
        };

        let chunker = self.chunker;
        let Some(request) = self.queue.peek_mut() else {
            return;
        };
        let packet = match chunker.next_step(request, offset) {
            UploadStep::Send { payload, chunk_len } => {
                trace!(offset, chunk_len, "device accepted chunk; sending next");
                request.command().packet(0, payload)
            }
            UploadStep::Finished => {
                info!(bytes = offset, "upload finished");
                self.complete_and_advance(Ok(Reply::Done));
                return;
            }
            UploadStep::Cancelled => {
                info!(offset, "upload cancelled");
                self.complete_and_advance(Err(NewtError::UserCancelled));
                return;
            }
            UploadStep::Failed(error) => {
                self.complete_and_advance(Err(error));
                return;
            }
        };

        if let Err(error) = self.transmit(packet) {
            self.complete_and_advance(Err(error));
        }
    }

    fn dispatch_pending(&mut self) {
        loop {
            let outcome = match self.prepare_head() {
                None => return,
                Some(Prepared::Complete(outcome)) => outcome,
                Some(Prepared::Send(packet)) => match self.transmit(packet) {
                    Ok(()) => return,
                    Err(error) => Err(error),
                },
            };
            self.finish_head(outcome);
        }
    }

    fn prepare_head(&mut self) -> Option<Prepared> {
        let chunker = self.chunker;
        let response_pending = !self.response.is_empty();
        let buffered = self.response.len();
        let request = self.queue.peek_mut()?;

        if response_pending {
            warn!(
                command = request.command().kind(),
                buffered, "trying to send command while waiting for response"
            );
            return Some(Prepared::Complete(Err(NewtError::WaitingForResponse)));
        }

        let validation = match request.command() {
            Command::Upload { image } => Some(chunker.validate(image)),
            Command::ImageTest { hash } if hash.is_empty() => {
                return Some(Prepared::Complete(Err(NewtError::ImageInvalid)));
            }
            _ => None,
        };
        let payload = match validation {
            Some(Err(error)) => return Some(Prepared::Complete(Err(error))),
            Some(Ok(())) => match chunker.next_step(request, 0) {
                UploadStep::Send { payload, chunk_len } => {
                    trace!(chunk_len, "starting upload");
                    payload
                }
                UploadStep::Finished => return Some(Prepared::Complete(Ok(Reply::Done))),
                UploadStep::Cancelled => {
                    return Some(Prepared::Complete(Err(NewtError::UserCancelled)));
                }
                UploadStep::Failed(error) => return Some(Prepared::Complete(Err(error))),
            },
            None => match request
                .command()
                .request_payload()
                .map(PayloadMap::encode)
                .transpose()
            {
                Ok(payload) => payload.unwrap_or_default(),
                Err(error) => {
                    error!(%error, "failed to encode request payload");
                    return Some(Prepared::Complete(Err(NewtError::Internal)));
                }
            },
        };

        Some(Prepared::Send(request.command().packet(0, payload)))
    }

    /// Stamps the next sequence number on `packet` and writes it.
    fn transmit(&mut self, packet: Packet) -> Result<(), NewtError> {
        let packet = packet.with_seq(self.next_seq);
        self.next_seq = self.next_seq.wrapping_add(1);

        let bytes = PacketCodec::encode(&packet).map_err(|error| {
            error!(%error, "failed to encode packet");
            NewtError::Internal
        })?;
        debug!(%packet, data = %format_hex(packet.payload()), "send command");

        self.last_sent_seq = Some(packet.seq());
        self.transport.write(&bytes).map_err(|error| {
            warn!(%error, "transport rejected packet");
            NewtError::Transport(error)
        })
    }

    fn response_error(&mut self, error: NewtError) {
        self.response.clear();
        self.complete_and_advance(Err(error));
    }

    fn complete_and_advance(&mut self, outcome: Outcome) {
        self.finish_head(outcome);
        self.dispatch_pending();
    }

    fn finish_head(&mut self, outcome: Outcome) {
        let Some(request) = self.queue.advance() else {
            return;
        };
        match &outcome {
            Ok(_reply) => debug!(command = request.command().kind(), "request completed"),
            Err(error) => debug!(command = request.command().kind(), %error, "request failed"),
        }
        request.complete(outcome);
    }
}
