//! In-memory transport and device for exercising the engine without hardware.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bon::Builder;
use ciborium::Value;
use tracing::{debug, trace};

use crate::codec::{Packet, PacketCodec, PacketError, PayloadMap, PayloadView, decode_payload};
use crate::error::TransportError;
use crate::model::{Image, StatDetails, TaskStats};
use crate::protocol::{DefaultCommand, Flags, Group, ImageCommand, ReturnCode, StatsCommand};
use crate::transport::Transport;

#[derive(Debug, Default)]
struct RecordingState {
    written: Vec<Vec<u8>>,
    reject_next: Option<TransportError>,
}

/// Transport that keeps every accepted write.
///
/// Clones share the same record, so a test can hand one clone to the engine
/// and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingTransport {
    /// Makes the next write fail with `error` instead of being recorded.
    pub fn reject_next_write(&self, error: TransportError) {
        self.lock().reject_next = Some(error);
    }

    /// Every write accepted so far, oldest first.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Drains the accepted writes.
    #[must_use]
    pub fn take_written(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.lock().written)
    }

    /// Decodes the most recent write; `None` until something was written.
    pub fn last_packet(&self) -> Option<Result<Packet, PacketError>> {
        let written = self.lock();
        written
            .written
            .last()
            .map(|bytes| PacketCodec::decode(bytes).map(|response| response.into_packet()))
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for RecordingTransport {
    fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(error) = state.reject_next.take() {
            trace!(%error, "rejecting write");
            return Err(error);
        }
        state.written.push(packet.to_vec());
        Ok(())
    }
}

/// How a simulated device acknowledges upload chunks.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum UploadAck {
    /// Store the chunk and report the new end offset.
    #[default]
    Accept,
    /// Report this offset regardless of what was sent.
    FixedOffset(u64),
    /// Store the chunk but leave `rc` out of the ack.
    OmitResultCode,
}

/// Device model that answers request packets the way firmware does.
///
/// ```
/// use newtmgr::{Command, NewtManager, RecordingTransport, Reply, SimulatedDevice};
///
/// let transport = RecordingTransport::default();
/// let mut device = SimulatedDevice::builder().build();
/// let mut manager = NewtManager::new(transport.clone());
///
/// let mut handle = manager.send_request(Command::Echo { message: "hi".into() });
/// for request in transport.take_written() {
///     for fragment in device.respond(&request).expect("request is a packet") {
///         manager.on_data_received(Ok(&fragment));
///     }
/// }
/// assert_eq!(Some(Ok(Reply::Echo("hi".into()))), handle.try_outcome());
/// ```
#[derive(Debug, Builder)]
pub struct SimulatedDevice {
    /// Result code for every reply; anything but `Ok` suppresses the body.
    #[builder(default = ReturnCode::Ok)]
    return_code: ReturnCode,
    /// Split reply payloads into fragments of at most this many bytes.
    fragment_size: Option<usize>,
    #[builder(default)]
    upload_ack: UploadAck,
    #[builder(default)]
    images: Vec<Image>,
    #[builder(default)]
    tasks: Vec<TaskStats>,
    #[builder(default)]
    stat_groups: Vec<String>,
    #[builder(default)]
    stat_fields: Vec<StatDetails>,
    #[builder(skip)]
    uploaded: Vec<u8>,
    #[builder(skip)]
    resets: usize,
}

impl SimulatedDevice {
    /// Decodes one request and returns the encoded reply fragments.
    ///
    /// # Errors
    ///
    /// Returns an error when `request` is not a valid packet.
    pub fn respond(&mut self, request: &[u8]) -> Result<Vec<Vec<u8>>, PacketError> {
        let request = PacketCodec::decode(request)?.into_packet();
        debug!(%request, "simulated device received request");

        let body = decode_payload(request.payload()).unwrap_or(Value::Null);
        let reply = self.reply_payload(&request, &PayloadView::new(&body));
        let payload = reply.encode().unwrap_or_default();

        self.fragment(&request, payload)
    }

    /// Image bytes stored by upload chunks so far.
    #[must_use]
    pub fn uploaded(&self) -> &[u8] {
        &self.uploaded
    }

    /// Number of reset commands received.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets
    }

    fn reply_payload(&mut self, request: &Packet, body: &PayloadView<'_>) -> PayloadMap {
        let upload = request.group() == Group::Image && request.id() == ImageCommand::Upload.as_raw();
        if upload {
            return self.upload_ack(body);
        }

        let map = PayloadMap::new().uint("rc", u64::from(self.return_code.as_raw()));
        if self.return_code != ReturnCode::Ok {
            return map;
        }

        match (request.group(), request.id()) {
            (Group::Image, id) if id == ImageCommand::List.as_raw() => {
                map.value("images", Value::Array(self.images.iter().map(image_value).collect()))
            }
            (Group::Default, id) if id == DefaultCommand::Echo.as_raw() => {
                map.text("r", body.text("d"))
            }
            (Group::Default, id) if id == DefaultCommand::TaskStats.as_raw() => map.value(
                "tasks",
                self.tasks
                    .iter()
                    .fold(PayloadMap::new(), |tasks, task| {
                        tasks.value(task.name(), task_value(task))
                    })
                    .into_value(),
            ),
            (Group::Default, id) if id == DefaultCommand::Reset.as_raw() => {
                self.resets += 1;
                map
            }
            (Group::Stats, id) if id == StatsCommand::List.as_raw() => map.value(
                "stat_list",
                Value::Array(
                    self.stat_groups
                        .iter()
                        .cloned()
                        .map(Value::Text)
                        .collect(),
                ),
            ),
            (Group::Stats, id) if id == StatsCommand::Read.as_raw() => map
                .text("name", body.text("name"))
                .value(
                    "fields",
                    self.stat_fields
                        .iter()
                        .fold(PayloadMap::new(), |fields, field| {
                            fields.uint(field.name(), field.value())
                        })
                        .into_value(),
                ),
            (group, id) => {
                debug!(%group, id, "simulated device does not implement command");
                PayloadMap::new().uint("rc", u64::from(ReturnCode::Unknown.as_raw()))
            }
        }
    }

    fn upload_ack(&mut self, body: &PayloadView<'_>) -> PayloadMap {
        if self.return_code != ReturnCode::Ok {
            return PayloadMap::new().uint("rc", u64::from(self.return_code.as_raw()));
        }

        if body.uint("off") == 0 {
            self.uploaded.clear();
        }
        self.uploaded.extend(body.bytes("data"));
        let stored = u64::try_from(self.uploaded.len()).unwrap_or(u64::MAX);

        match self.upload_ack {
            UploadAck::Accept => PayloadMap::new().uint("rc", 0).uint("off", stored),
            UploadAck::FixedOffset(offset) => PayloadMap::new().uint("rc", 0).uint("off", offset),
            UploadAck::OmitResultCode => PayloadMap::new().uint("off", stored),
        }
    }

    fn fragment(&self, request: &Packet, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, PacketError> {
        let size = self.fragment_size.filter(|size| *size > 0);
        let Some(size) = size.filter(|size| payload.len() > *size) else {
            let reply = Packet::response_to(request, Flags::ResponseComplete, payload);
            return Ok(vec![PacketCodec::encode(&reply)?]);
        };

        let chunks: Vec<&[u8]> = payload.chunks(size).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let flags = if index == last {
                    Flags::ResponseComplete
                } else {
                    Flags::None
                };
                PacketCodec::encode(&Packet::response_to(request, flags, chunk.to_vec()))
            })
            .collect()
    }
}

fn image_value(image: &Image) -> Value {
    PayloadMap::new()
        .uint("slot", image.slot())
        .text("version", image.version())
        .boolean("confirmed", image.is_confirmed())
        .boolean("pending", image.is_pending())
        .boolean("active", image.is_active())
        .boolean("bootable", image.is_bootable())
        .bytes("hash", image.hash())
        .into_value()
}

fn task_value(task: &TaskStats) -> Value {
    PayloadMap::new()
        .uint("tid", task.task_id())
        .uint("prio", task.priority())
        .uint("state", task.state())
        .uint("runtime", task.run_time())
        .uint("cswcnt", task.context_switch_count())
        .uint("stksiz", task.stack_size())
        .uint("stkuse", task.stack_used())
        .uint("last_checkin", task.last_sanity_checkin())
        .uint("next_checkin", task.next_sanity_checkin())
        .into_value()
}
