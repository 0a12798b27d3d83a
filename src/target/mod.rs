//! Target Core (C5): phase sequencer glue, command dispatch, and the
//! shared `Target` trait implemented by the disk/CD/tape engines (C6).

pub mod cdrom;
pub mod disk;
pub mod network;
pub mod tape;

use crate::config::{DeviceKind, TargetConfig};
use crate::error::{CommandError, UnitAttentionCause};
use crate::sense::{self, SenseCode};

/// Outcome of dispatching one CDB, in the vocabulary the phase sequencer
/// understands (it just needs to know which phase to enter next).
pub enum ScsiCmdResult {
    /// Go straight to STATUS with this status byte.
    Status(u8),
    /// Send this many bytes to the initiator (DATA IN), then STATUS GOOD.
    DataIn(Vec<u8>),
    /// Expect this many bytes from the initiator (DATA OUT), then call
    /// back into the target to consume them.
    DataOut(usize),
}

/// Sense state for one target: the (key, ASC) pair from the last failed
/// command, auto-cleared by the next REQUEST SENSE, plus a queued
/// UNIT ATTENTION that takes priority over it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SenseState {
    pending: Option<SenseCode>,
    info: u32,
    filemark: bool,
    unit_attention: Option<UnitAttentionCause>,
}

impl SenseState {
    pub fn post(&mut self, err: CommandError) {
        if let CommandError::UnitAttention(cause) = err {
            self.unit_attention = Some(cause);
        } else {
            self.pending = Some(err.into());
        }
    }

    pub fn post_with_info(&mut self, err: CommandError, info: u32, filemark: bool) {
        self.post(err);
        self.info = info;
        self.filemark = filemark;
    }

    pub fn queue_unit_attention(&mut self, cause: UnitAttentionCause) {
        self.unit_attention = Some(cause);
    }

    /// Posts an exact (key, ASC) pair rather than one derived from a
    /// `CommandError`, for cases like a tape filemark hit mid-read where
    /// the taxonomy calls for `NO SENSE` with the filemark bit set, not
    /// one of `CommandError`'s variants.
    pub fn post_code(&mut self, code: SenseCode, info: u32, filemark: bool) {
        self.pending = Some(code);
        self.info = info;
        self.filemark = filemark;
    }

    /// Consumes and clears whichever sense is outstanding, unit attention
    /// taking priority, matching `mem::take`-style auto-clearing consume
    /// semantics used throughout this codebase.
    pub fn consume(&mut self) -> (SenseCode, u32, bool) {
        if let Some(cause) = self.unit_attention.take() {
            return (CommandError::UnitAttention(cause).into(), 0, false);
        }
        match self.pending.take() {
            Some(code) => (code, std::mem::take(&mut self.info), std::mem::take(&mut self.filemark)),
            None => (SenseCode::new(sense::KEY_NO_SENSE, sense::ASC_NO_ADDITIONAL_SENSE), 0, false),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.unit_attention.is_some() || self.pending.is_some()
    }
}

/// Implemented by each device-kind engine (disk/CD-ROM/tape). The target
/// core handles the commands common to all device kinds (TEST UNIT READY,
/// REQUEST SENSE, INQUIRY, inherited MODE SENSE plumbing) and forwards
/// everything else to `specific_cmd`.
pub trait Target: Send {
    fn kind(&self) -> DeviceKind;
    fn config(&self) -> &TargetConfig;
    fn sense_mut(&mut self) -> &mut SenseState;

    /// True once backing media is present and the target has been started.
    fn unit_ready(&self) -> bool;

    /// Peripheral-device-type byte for INQUIRY's first response byte, and
    /// whether bit 7 (removable) should be set.
    fn inquiry_peripheral(&self) -> (u8, bool);

    /// Page data for MODE SENSE, or `None` if the target doesn't implement
    /// that page (the caller responds with CHECK CONDITION / invalid
    /// field).
    fn mode_sense_page(&self, page: u8) -> Option<Vec<u8>>;

    fn block_size(&self) -> usize;
    fn block_count(&self) -> u64;

    /// Dispatches an opcode this trait doesn't already understand.
    /// `out_data` is `Some` only on the second call of a DATA OUT command,
    /// once the initiator's bytes have arrived.
    fn specific_cmd(&mut self, cdb: &[u8], out_data: Option<&[u8]>) -> Result<ScsiCmdResult, CommandError>;

    fn inquiry(&self) -> Vec<u8> {
        let (peripheral_type, removable) = self.inquiry_peripheral();
        let cfg = self.config();
        let mut result = vec![0u8; 36];
        result[0] = peripheral_type;
        result[1] = if removable { 0x80 } else { 0x00 };
        result[2] = 0x02; // ANSI version: SCSI-2
        result[3] = 0x02; // response data format
        result[4] = 31; // additional length
        result[8..16].copy_from_slice(&cfg.vendor);
        result[16..32].copy_from_slice(&cfg.product);
        result[32..36].copy_from_slice(&cfg.revision);
        result
    }

    fn dispatch(&mut self, cdb: &[u8], out_data: Option<&[u8]>) -> ScsiCmdResult {
        // A queued unit attention or any sense left over from a prior
        // failed command holds contingent allegiance until REQUEST SENSE
        // harvests it: every other command sees CHECK CONDITION first.
        if cdb[0] != 0x03 && self.sense_mut().has_pending() {
            return ScsiCmdResult::Status(sense::STATUS_CHECK_CONDITION);
        }
        match cdb[0] {
            0x00 => {
                // TEST UNIT READY
                if self.unit_ready() {
                    ScsiCmdResult::Status(sense::STATUS_GOOD)
                } else {
                    self.sense_mut().post(CommandError::MediumNotPresent);
                    ScsiCmdResult::Status(sense::STATUS_CHECK_CONDITION)
                }
            }
            0x03 => {
                // REQUEST SENSE
                let alloc_len = cdb.get(4).copied().unwrap_or(18).max(18) as usize;
                let (code, info, filemark) = self.sense_mut().consume();
                let mut data = vec![0u8; alloc_len];
                data[0] = 0x70;
                data[2] = code.key | if filemark { 0x80 } else { 0 };
                data[3..7].copy_from_slice(&info.to_be_bytes());
                data[7] = 10;
                data[12] = (code.asc >> 8) as u8;
                data[13] = (code.asc & 0xFF) as u8;
                ScsiCmdResult::DataIn(data)
            }
            0x12 => ScsiCmdResult::DataIn(self.inquiry()),
            0x1A | 0x5A => {
                let page = cdb.get(2).copied().unwrap_or(0) & 0x3F;
                match self.mode_sense_page(page) {
                    Some(data) => ScsiCmdResult::DataIn(data),
                    None => {
                        self.sense_mut().post(CommandError::InvalidCdbField);
                        ScsiCmdResult::Status(sense::STATUS_CHECK_CONDITION)
                    }
                }
            }
            0x15 | 0x55 => {
                // MODE SELECT: a passive parameter sink. The page data is
                // accepted and acknowledged but never persisted.
                let len = if cdb[0] == 0x15 {
                    cdb[4] as usize
                } else {
                    u16::from_be_bytes([cdb[7], cdb[8]]) as usize
                };
                match out_data {
                    None => ScsiCmdResult::DataOut(len),
                    Some(_) => ScsiCmdResult::Status(sense::STATUS_GOOD),
                }
            }
            _ => match self.specific_cmd(cdb, out_data) {
                Ok(result) => result,
                Err(e) => {
                    self.sense_mut().post(e);
                    ScsiCmdResult::Status(sense::STATUS_CHECK_CONDITION)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sense_state_consumes_exactly_once() {
        let mut s = SenseState::default();
        s.post(CommandError::WriteProtected);
        assert!(s.has_pending());
        let (code, ..) = s.consume();
        assert_eq!(code.key, sense::KEY_ILLEGAL_REQUEST);
        assert!(!s.has_pending());
        let (code, ..) = s.consume();
        assert_eq!(code.key, sense::KEY_NO_SENSE);
    }

    struct StubTarget {
        config: TargetConfig,
        sense: SenseState,
    }

    impl Target for StubTarget {
        fn kind(&self) -> DeviceKind {
            self.config.kind
        }
        fn config(&self) -> &TargetConfig {
            &self.config
        }
        fn sense_mut(&mut self) -> &mut SenseState {
            &mut self.sense
        }
        fn unit_ready(&self) -> bool {
            true
        }
        fn inquiry_peripheral(&self) -> (u8, bool) {
            (0x00, false)
        }
        fn mode_sense_page(&self, _page: u8) -> Option<Vec<u8>> {
            None
        }
        fn block_size(&self) -> usize {
            512
        }
        fn block_count(&self) -> u64 {
            0
        }
        fn specific_cmd(&mut self, _cdb: &[u8], _out_data: Option<&[u8]>) -> Result<ScsiCmdResult, CommandError> {
            Ok(ScsiCmdResult::Status(sense::STATUS_GOOD))
        }
    }

    #[test]
    fn queued_unit_attention_surfaces_on_any_command_not_just_request_sense() {
        let mut t = StubTarget {
            config: TargetConfig::new(0, DeviceKind::Fixed).unwrap(),
            sense: SenseState::default(),
        };
        t.sense_mut().queue_unit_attention(UnitAttentionCause::PowerOnOrReset);

        // TEST UNIT READY would otherwise report GOOD; the pending unit
        // attention must pre-empt it.
        let cdb = [0x00, 0, 0, 0, 0, 0];
        match t.dispatch(&cdb, None) {
            ScsiCmdResult::Status(s) => assert_eq!(s, sense::STATUS_CHECK_CONDITION),
            _ => panic!("expected Status"),
        }
        assert!(t.sense_mut().has_pending());

        // REQUEST SENSE is exempt and harvests it.
        let cdb = [0x03, 0, 0, 0, 18, 0];
        t.dispatch(&cdb, None);
        assert!(!t.sense_mut().has_pending());
    }

    #[test]
    fn mode_select_is_acknowledged_without_persisting_anything() {
        let mut t = StubTarget {
            config: TargetConfig::new(0, DeviceKind::Fixed).unwrap(),
            sense: SenseState::default(),
        };
        let cdb = [0x15, 0, 0, 0, 12, 0];
        match t.dispatch(&cdb, None) {
            ScsiCmdResult::DataOut(len) => assert_eq!(len, 12),
            _ => panic!("expected DataOut"),
        }
        let params = vec![0u8; 12];
        match t.dispatch(&cdb, Some(&params)) {
            ScsiCmdResult::Status(s) => assert_eq!(s, sense::STATUS_GOOD),
            _ => panic!("expected Status"),
        }
    }

    #[test]
    fn unit_attention_takes_priority_over_posted_sense() {
        let mut s = SenseState::default();
        s.post(CommandError::WriteProtected);
        s.queue_unit_attention(UnitAttentionCause::MediaChanged);
        let (code, ..) = s.consume();
        assert_eq!(code.key, sense::KEY_UNIT_ATTENTION);
    }
}
