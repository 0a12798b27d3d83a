//! Public error types at the API boundaries of the core.
//!
//! Internal plumbing (the accelerator, the phase sequencer) mostly threads
//! `anyhow::Result` the way the rest of the codebase does; these types exist
//! for the boundaries a caller outside this crate needs to match on.

use thiserror::Error;

/// Failure modes of a [`crate::backing_store::BackingStore`].
#[derive(Error, Debug)]
pub enum BackingStoreError {
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("malformed raw image spec: {0}")]
    InvalidSpec(String),
    #[error("sector size {block_size} is not a multiple of {sector_size}")]
    UnsupportedBlockSize { block_size: usize, sector_size: usize },
    #[error("image is not open")]
    NotOpen,
    #[error("image is write protected")]
    WriteProtected,
    #[error("access out of range")]
    OutOfRange,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mirrors the SCSI SENSE taxonomy: every variant maps to exactly
/// one (KEY, ASC) pair via `crate::sense::SenseCode::from`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid field in CDB")]
    InvalidCdbField,
    #[error("logical block address out of range")]
    LbaOutOfRange,
    #[error("medium is write protected")]
    WriteProtected,
    #[error("unrecovered read error")]
    UnrecoveredRead,
    #[error("write error")]
    WriteFault,
    #[error("medium not present")]
    MediumNotPresent,
    #[error("logical unit not ready, initializing command required")]
    NotReady,
    #[error("SCSI parity error")]
    ScsiParityError,
    #[error("end of data / blank check")]
    EndOfData,
    #[error("unit attention condition")]
    UnitAttention(UnitAttentionCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAttentionCause {
    PowerOnOrReset,
    MediaChanged,
}

/// Errors raised while turning an already-parsed `section -> key -> value`
/// view into a [`crate::config::TargetConfig`]/[`crate::config::GlobalConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown device type {0:?}")]
    UnknownDeviceKind(String),
    #[error("invalid value for key {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("sector size {0} is not supported")]
    UnsupportedSectorSize(usize),
    #[error("target id {0} is out of range (0..=7)")]
    TargetIdOutOfRange(u8),
}
