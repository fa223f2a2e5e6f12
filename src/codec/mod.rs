mod packet_codec;
mod payload;

pub use self::packet_codec::{HEADER_LEN, Packet, PacketCodec, PacketError, Response};
pub use self::payload::{PayloadError, PayloadMap, PayloadView, decode_payload, encode_payload};
