mod codec;
mod command;
mod config;
mod engine;
mod error;
mod fake;
mod model;
mod protocol;
mod telemetry;
mod transport;
mod utils;

pub use codec::{
    HEADER_LEN, Packet, PacketCodec, PacketError, PayloadError, PayloadMap, PayloadView, Response,
    decode_payload, encode_payload,
};
pub use command::{
    Command, Outcome, ProgressCallback, ProgressDecision, Reply, Request, RequestHandle,
};
pub use config::EngineConfig;
pub use engine::NewtManager;
pub use error::{ConfigError, NewtError, TelemetryError, TransportError};
pub use fake::{RecordingTransport, SimulatedDevice, UploadAck};
pub use model::{Image, StatDetails, TaskStats};
pub use protocol::{
    DefaultCommand, Flags, Group, ImageCommand, OpCode, ProtocolCodeError, ReturnCode,
    StatsCommand,
};
pub use telemetry::{LogFormat, initialise_tracing};
pub use transport::Transport;
