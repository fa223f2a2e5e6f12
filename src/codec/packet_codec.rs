use std::fmt;

use bon::Builder;
use thiserror::Error;
use tracing::warn;

use crate::protocol::{Flags, Group, OpCode, ProtocolCodeError};

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 8;
const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Errors returned by packet encoding and decoding.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum PacketError {
    /// Fewer bytes than the 8-byte header were delivered.
    #[error("packet is too short: expected at least 8 bytes, got {actual}")]
    TooShort { actual: usize },
    /// The payload does not fit in the 16-bit length field.
    #[error("packet payload is too large: {payload_len} bytes exceeds max 65535")]
    PayloadTooLarge { payload_len: usize },
    /// A header byte has no protocol table entry.
    #[error(transparent)]
    UnknownCode(#[from] ProtocolCodeError),
}

/// One wire message: header fields plus payload bytes.
///
/// The length field is never stored; it is derived from the payload on encode.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct Packet {
    op: OpCode,
    #[builder(default = Flags::None)]
    flags: Flags,
    group: Group,
    #[builder(default)]
    seq: u8,
    id: u8,
    #[builder(default)]
    payload: Vec<u8>,
}

impl Packet {
    /// Builds the reply a device sends for `request`.
    ///
    /// ```
    /// use newtmgr::{Flags, Group, OpCode, Packet};
    ///
    /// let request = Packet::builder().op(OpCode::Read).group(Group::Image).id(0).build();
    /// let reply = Packet::response_to(&request, Flags::ResponseComplete, vec![0xA0]);
    /// assert_eq!(OpCode::ReadResponse, reply.op());
    /// assert_eq!(1, reply.len());
    /// ```
    #[must_use]
    pub fn response_to(request: &Packet, flags: Flags, payload: Vec<u8>) -> Self {
        Self {
            op: request.op.response(),
            flags,
            group: request.group,
            seq: request.seq,
            id: request.id,
            payload,
        }
    }

    #[must_use]
    pub fn op(&self) -> OpCode {
        self.op
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    #[must_use]
    pub fn group(&self) -> Group {
        self.group
    }

    #[must_use]
    pub fn seq(&self) -> u8 {
        self.seq
    }

    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length as it will appear in the header.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns whether this packet closes a (possibly fragmented) response.
    #[must_use]
    pub fn is_response_complete(&self) -> bool {
        self.flags == Flags::ResponseComplete
    }

    pub(crate) fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub(crate) fn with_seq(mut self, seq: u8) -> Self {
        self.seq = seq;
        self
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "op={} flags={} len={} group={} seq={} id={}",
            self.op,
            self.flags,
            self.payload.len(),
            self.group,
            self.seq,
            self.id
        )
    }
}

/// A decoded inbound packet together with the length its header declared.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Response {
    packet: Packet,
    declared_len: u16,
}

impl Response {
    #[must_use]
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Length announced in the header, before clamping.
    #[must_use]
    pub fn declared_len(&self) -> u16 {
        self.declared_len
    }

    /// Returns whether fewer payload bytes arrived than the header announced.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        usize::from(self.declared_len) > self.packet.len()
    }

    #[must_use]
    pub fn into_packet(self) -> Packet {
        self.packet
    }
}

/// Encodes and decodes the 8-byte big-endian packet header.
pub struct PacketCodec;

impl PacketCodec {
    /// Encodes a packet as `header || payload`.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is longer than `u16::MAX` bytes.
    ///
    /// ```
    /// use newtmgr::{Group, OpCode, Packet, PacketCodec};
    ///
    /// let packet = Packet::builder()
    ///     .op(OpCode::Write)
    ///     .group(Group::Default)
    ///     .id(5)
    ///     .build();
    /// let bytes = PacketCodec::encode(&packet)?;
    /// assert_eq!(vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05], bytes);
    /// # Ok::<(), newtmgr::PacketError>(())
    /// ```
    pub fn encode(packet: &Packet) -> Result<Vec<u8>, PacketError> {
        let payload_len = packet.payload.len();
        let len = u16::try_from(payload_len)
            .map_err(|_overflow| PacketError::PayloadTooLarge { payload_len })?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload_len);
        bytes.push(packet.op.as_raw());
        bytes.push(packet.flags.as_raw());
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(&packet.group.as_raw().to_be_bytes());
        bytes.push(packet.seq);
        bytes.push(packet.id);
        bytes.extend_from_slice(&packet.payload);
        Ok(bytes)
    }

    /// Decodes one packet from a raw delivery.
    ///
    /// A declared length longer than the delivered payload is clamped to what
    /// arrived. Extra bytes past the declared length are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error when the buffer is shorter than the header, or when
    /// the op, flags or group bytes are unknown.
    pub fn decode(bytes: &[u8]) -> Result<Response, PacketError> {
        if bytes.len() < HEADER_LEN {
            return Err(PacketError::TooShort {
                actual: bytes.len(),
            });
        }

        let op = OpCode::try_from(bytes[0])?;
        let flags = Flags::try_from(bytes[1])?;
        let declared_len = u16::from_be_bytes([bytes[2], bytes[3]]);
        let group = Group::try_from(u16::from_be_bytes([bytes[4], bytes[5]]))?;
        let seq = bytes[6];
        let id = bytes[7];

        let available = bytes.len() - HEADER_LEN;
        let payload_len = usize::from(declared_len).min(available);
        if payload_len != usize::from(declared_len) {
            warn!(
                declared_len,
                available, "received length is bigger than packet size"
            );
        } else if available > payload_len {
            warn!(
                declared_len,
                available, "packet carries bytes past its declared length"
            );
        }

        let payload = bytes[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
        Ok(Response {
            packet: Packet {
                op,
                flags,
                group,
                seq,
                id,
                payload,
            },
            declared_len,
        })
    }
}
