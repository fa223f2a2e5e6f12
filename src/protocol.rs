use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use thiserror::Error;

/// Errors returned when a raw wire value has no protocol table entry.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum ProtocolCodeError {
    #[error("unknown op code {value}")]
    UnknownOpCode { value: u8 },
    #[error("unknown header flags {value}")]
    UnknownFlags { value: u8 },
    #[error("unknown command group {value}")]
    UnknownGroup { value: u16 },
    #[error("unknown result code {value}")]
    UnknownReturnCode { value: u16 },
}

/// Operation carried in the first header byte.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum OpCode {
    #[strum(to_string = "read")]
    Read,
    #[strum(to_string = "read_response")]
    ReadResponse,
    #[strum(to_string = "write")]
    Write,
    #[strum(to_string = "write_response")]
    WriteResponse,
}

impl OpCode {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::ReadResponse => 1,
            Self::Write => 2,
            Self::WriteResponse => 3,
        }
    }

    /// Returns the op a device uses when answering this one.
    ///
    /// ```
    /// use newtmgr::OpCode;
    ///
    /// assert_eq!(OpCode::WriteResponse, OpCode::Write.response());
    /// assert_eq!(OpCode::ReadResponse, OpCode::ReadResponse.response());
    /// ```
    #[must_use]
    pub const fn response(self) -> Self {
        match self {
            Self::Read | Self::ReadResponse => Self::ReadResponse,
            Self::Write | Self::WriteResponse => Self::WriteResponse,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolCodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::iter()
            .find(|op| op.as_raw() == value)
            .ok_or(ProtocolCodeError::UnknownOpCode { value })
    }
}

/// Header flags byte.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum Flags {
    #[strum(to_string = "none")]
    None,
    /// Marks the final fragment of a response.
    #[strum(to_string = "response_complete")]
    ResponseComplete,
}

impl Flags {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            Self::None => 0,
            Self::ResponseComplete => 1,
        }
    }
}

impl TryFrom<u8> for Flags {
    type Error = ProtocolCodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::iter()
            .find(|flags| flags.as_raw() == value)
            .ok_or(ProtocolCodeError::UnknownFlags { value })
    }
}

/// Feature group addressed by a packet.
///
/// Config, log and crash groups exist on the device side but are not
/// supported here.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum Group {
    #[strum(to_string = "default")]
    Default,
    #[strum(to_string = "image")]
    Image,
    #[strum(to_string = "stats")]
    Stats,
}

impl Group {
    /// Returns the 16-bit wire value.
    #[must_use]
    pub const fn as_raw(self) -> u16 {
        match self {
            Self::Default => 0,
            Self::Image => 1,
            Self::Stats => 2,
        }
    }
}

impl TryFrom<u16> for Group {
    type Error = ProtocolCodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::iter()
            .find(|group| group.as_raw() == value)
            .ok_or(ProtocolCodeError::UnknownGroup { value })
    }
}

/// Command ids in the default group.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumIter, Display)]
pub enum DefaultCommand {
    #[strum(to_string = "echo")]
    Echo,
    #[strum(to_string = "task_stats")]
    TaskStats,
    #[strum(to_string = "reset")]
    Reset,
}

impl DefaultCommand {
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            Self::Echo => 0,
            Self::TaskStats => 2,
            Self::Reset => 5,
        }
    }
}

/// Command ids in the image group.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumIter, Display)]
pub enum ImageCommand {
    #[strum(to_string = "list")]
    List,
    #[strum(to_string = "upload")]
    Upload,
}

impl ImageCommand {
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            Self::List => 0,
            Self::Upload => 1,
        }
    }
}

/// Command ids in the stats group.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumIter, Display)]
pub enum StatsCommand {
    /// Reads the fields of one named stat group.
    #[strum(to_string = "read")]
    Read,
    /// Lists the stat group names.
    #[strum(to_string = "list")]
    List,
}

impl StatsCommand {
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::List => 1,
        }
    }
}

/// Result code reported by the device in the `rc` field.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum ReturnCode {
    #[strum(to_string = "ok")]
    Ok,
    #[strum(to_string = "unknown")]
    Unknown,
    #[strum(to_string = "nomem")]
    NoMem,
    #[strum(to_string = "inval")]
    Inval,
    #[strum(to_string = "timeout")]
    Timeout,
    #[strum(to_string = "noent")]
    NoEnt,
    #[strum(to_string = "peruser")]
    PerUser,
}

/// Return codes keyed by their wire value.
static RETURN_CODES_BY_RAW: LazyLock<HashMap<u16, ReturnCode>> =
    LazyLock::new(|| ReturnCode::iter().map(|code| (code.as_raw(), code)).collect());

impl ReturnCode {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_raw(self) -> u16 {
        match self {
            Self::Ok => 0,
            Self::Unknown => 1,
            Self::NoMem => 2,
            Self::Inval => 3,
            Self::Timeout => 4,
            Self::NoEnt => 5,
            Self::PerUser => 256,
        }
    }

    /// Returns the human-readable description shown to users.
    ///
    /// ```
    /// use newtmgr::ReturnCode;
    ///
    /// assert_eq!("Out of memory", ReturnCode::NoMem.description());
    /// ```
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "Success",
            Self::Unknown => "Unknown Error: Command might not be supported",
            Self::NoMem => "Out of memory",
            Self::Inval => "Device is in invalid state",
            Self::Timeout => "Operation Timeout",
            Self::NoEnt => "Enoent",
            Self::PerUser => "Peruser",
        }
    }
}

impl TryFrom<u16> for ReturnCode {
    type Error = ProtocolCodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        RETURN_CODES_BY_RAW
            .get(&value)
            .copied()
            .ok_or(ProtocolCodeError::UnknownReturnCode { value })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn op_codes_round_trip_through_raw_values() {
        for op in OpCode::iter() {
            assert_eq!(Ok(op), OpCode::try_from(op.as_raw()));
        }
    }

    #[rstest]
    #[case(0, Group::Default)]
    #[case(1, Group::Image)]
    #[case(2, Group::Stats)]
    fn group_maps_known_values(#[case] raw: u16, #[case] expected: Group) {
        assert_eq!(Ok(expected), Group::try_from(raw));
    }

    #[rstest]
    #[case(3)]
    #[case(64)]
    fn group_rejects_unsupported_values(#[case] raw: u16) {
        assert_matches!(
            Group::try_from(raw),
            Err(ProtocolCodeError::UnknownGroup { value }) if value == raw
        );
    }

    #[test]
    fn flags_reject_unknown_bits() {
        assert_matches!(
            Flags::try_from(0x02),
            Err(ProtocolCodeError::UnknownFlags { value: 0x02 })
        );
    }

    #[rstest]
    #[case(0, ReturnCode::Ok)]
    #[case(2, ReturnCode::NoMem)]
    #[case(256, ReturnCode::PerUser)]
    fn return_code_lookup_uses_wire_values(#[case] raw: u16, #[case] expected: ReturnCode) {
        assert_eq!(Ok(expected), ReturnCode::try_from(raw));
    }

    #[test]
    fn return_code_rejects_gap_values() {
        assert_matches!(
            ReturnCode::try_from(6),
            Err(ProtocolCodeError::UnknownReturnCode { value: 6 })
        );
    }

    #[test]
    fn command_ids_match_device_table() {
        assert_eq!(5, DefaultCommand::Reset.as_raw());
        assert_eq!(2, DefaultCommand::TaskStats.as_raw());
        assert_eq!(1, ImageCommand::Upload.as_raw());
        assert_eq!(1, StatsCommand::List.as_raw());
    }
}
