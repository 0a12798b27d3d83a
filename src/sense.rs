//! SCSI status/sense constants and the `CommandError` to `SenseCode` mapping.

use crate::error::{CommandError, UnitAttentionCause};

pub const STATUS_GOOD: u8 = 0x00;
pub const STATUS_CHECK_CONDITION: u8 = 0x02;
pub const STATUS_RESERVATION_CONFLICT: u8 = 0x18;

pub const KEY_NO_SENSE: u8 = 0x00;
pub const KEY_NOT_READY: u8 = 0x02;
pub const KEY_MEDIUM_ERROR: u8 = 0x03;
pub const KEY_ILLEGAL_REQUEST: u8 = 0x05;
pub const KEY_UNIT_ATTENTION: u8 = 0x06;
pub const KEY_ABORTED_COMMAND: u8 = 0x0B;
pub const KEY_BLANK_CHECK: u8 = 0x08;

pub const ASC_NO_ADDITIONAL_SENSE: u16 = 0x0000;
pub const ASC_LBA_OUT_OF_RANGE: u16 = 0x2100;
pub const ASC_INVALID_FIELD_IN_CDB: u16 = 0x2400;
pub const ASC_WRITE_PROTECTED: u16 = 0x2700;
pub const ASC_MEDIUM_NOT_PRESENT: u16 = 0x3A00;
pub const ASC_POWER_ON_RESET: u16 = 0x2900;
pub const ASC_MEDIA_CHANGED: u16 = 0x2800;
pub const ASC_SCSI_PARITY_ERROR: u16 = 0x4700;
pub const ASC_END_OF_DATA: u16 = 0x0000;
pub const ASC_UNRECOVERED_READ_ERROR: u16 = 0x1100;
pub const ASC_WRITE_FAULT: u16 = 0x0300;
pub const ASC_INITIALIZING_COMMAND_REQUIRED: u16 = 0x0404;

/// The (KEY, ASC) pair posted to a target's sense state and consumed by the
/// next REQUEST SENSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseCode {
    pub key: u8,
    pub asc: u16,
}

impl SenseCode {
    pub const fn new(key: u8, asc: u16) -> Self {
        Self { key, asc }
    }
}

impl From<CommandError> for SenseCode {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::InvalidCdbField => {
                SenseCode::new(KEY_ILLEGAL_REQUEST, ASC_INVALID_FIELD_IN_CDB)
            }
            CommandError::LbaOutOfRange => {
                SenseCode::new(KEY_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE)
            }
            CommandError::WriteProtected => {
                SenseCode::new(KEY_ILLEGAL_REQUEST, ASC_WRITE_PROTECTED)
            }
            CommandError::UnrecoveredRead => {
                SenseCode::new(KEY_MEDIUM_ERROR, ASC_UNRECOVERED_READ_ERROR)
            }
            CommandError::WriteFault => SenseCode::new(KEY_MEDIUM_ERROR, ASC_WRITE_FAULT),
            CommandError::MediumNotPresent => {
                SenseCode::new(KEY_NOT_READY, ASC_MEDIUM_NOT_PRESENT)
            }
            CommandError::NotReady => {
                SenseCode::new(KEY_NOT_READY, ASC_INITIALIZING_COMMAND_REQUIRED)
            }
            CommandError::ScsiParityError => {
                SenseCode::new(KEY_ABORTED_COMMAND, ASC_SCSI_PARITY_ERROR)
            }
            CommandError::EndOfData => SenseCode::new(KEY_BLANK_CHECK, ASC_END_OF_DATA),
            CommandError::UnitAttention(UnitAttentionCause::PowerOnOrReset) => {
                SenseCode::new(KEY_UNIT_ATTENTION, ASC_POWER_ON_RESET)
            }
            CommandError::UnitAttention(UnitAttentionCause::MediaChanged) => {
                SenseCode::new(KEY_UNIT_ATTENTION, ASC_MEDIA_CHANGED)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_protected_maps_to_illegal_request() {
        let sc: SenseCode = CommandError::WriteProtected.into();
        assert_eq!(sc.key, KEY_ILLEGAL_REQUEST);
        assert_eq!(sc.asc, ASC_WRITE_PROTECTED);
    }
}
