use core::fmt;

use crate::{
    config_sync::{ImageError, RecordError},
    objects::{ObjectKind, TableError},
};

pub type Result<T, E> = core::result::Result<T, Error<E>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error<E> {
    Transport(E),
    ProtocolMismatch(Mismatch),
    InfoCrcMismatch { device: u32, computed: u32 },
    MalformedDescriptor(TableError),
    MalformedConfigRecord { index: usize, reason: RecordError },
    MalformedImage(ImageError),
    MissingObject(ObjectKind),
    ChecksumUnavailable,
    PendingStuck,
    NotAttached,
}

impl<E> From<E> for Error<E> {
    fn from(value: E) -> Self {
        Self::Transport(value)
    }
}

impl<E> Error<E> {
    pub(crate) fn from_table(err: TableError) -> Self {
        match err {
            TableError::CrcMismatch { device, computed } => {
                Self::InfoCrcMismatch { device, computed }
            }
            other => Self::MalformedDescriptor(other),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "bus transfer failed: {err:?}"),
            Self::ProtocolMismatch(mismatch) => write!(f, "protocol mismatch: {mismatch}"),
            Self::InfoCrcMismatch { device, computed } => write!(
                f,
                "info block crc mismatch: device={device:#08x} computed={computed:#08x}"
            ),
            Self::MalformedDescriptor(err) => write!(f, "malformed object table: {err}"),
            Self::MalformedConfigRecord { index, reason } => {
                write!(f, "malformed config record {index}: {reason}")
            }
            Self::MalformedImage(err) => write!(f, "malformed image: {err}"),
            Self::MissingObject(kind) => write!(f, "object {kind} not present"),
            Self::ChecksumUnavailable => f.write_str("config checksum report not received"),
            Self::PendingStuck => f.write_str("message queue did not drain"),
            Self::NotAttached => f.write_str("controller not attached"),
        }
    }
}

/// Blob built for different device firmware than the one attached.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mismatch {
    FirmwareVersion { device: u8, blob: u8 },
    BuildVersion { device: u8, blob: u8 },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirmwareVersion { device, blob } => {
                write!(f, "firmware version device={device:#04x} blob={blob:#04x}")
            }
            Self::BuildVersion { device, blob } => {
                write!(f, "build version device={device:#04x} blob={blob:#04x}")
            }
        }
    }
}
