//! SCSI target-mode firmware core: PHY/accelerator/target dispatch, the
//! backing-store abstraction, and the configuration model that drives them.
//!
//! This crate is the board-independent core; a board integration supplies
//! the [`phy::Phy`], [`backing_store::BlockDevice`], and
//! [`backing_store::RomDevice`] implementations and wires up logging via
//! [`logging::LogRing`].

pub mod accel;
pub mod backing_store;
pub mod config;
pub mod cue;
pub mod debuggable;
pub mod error;
pub mod initiator;
pub mod logging;
pub mod parity;
pub mod phy;
pub mod sense;
pub mod target;
pub mod types;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Version string reported in INQUIRY's vendor-specific log banner: the
/// crate version, plus a short git hash and dirty marker when available.
pub fn build_version() -> String {
    if built_info::GIT_COMMIT_HASH_SHORT.is_some() {
        format!(
            "{}-{}{}",
            built_info::PKG_VERSION,
            built_info::GIT_COMMIT_HASH_SHORT.unwrap(),
            if built_info::GIT_DIRTY.unwrap_or(false) {
                "-dirty"
            } else {
                ""
            }
        )
    } else {
        built_info::PKG_VERSION.to_string()
    }
}

use accel::{Accelerator, TransferSink};
use config::GlobalConfig;
use error::UnitAttentionCause;
use phy::{Phy, PhySequencer, Phase};
use sense::STATUS_GOOD;
use target::{ScsiCmdResult, Target};

const MAX_TARGETS: usize = 8;

/// CDB length by SCSI-2 group code (bits 7:5 of the opcode byte), used to
/// know how many bytes to read in COMMAND phase before dispatching.
pub fn cdb_len_for_group(opcode: u8) -> usize {
    match opcode >> 5 {
        0 => 6,
        1 | 2 => 10,
        5 => 12,
        4 => 16,
        _ => 6,
    }
}

/// Owns the eight target slots and the phase sequencer, and runs the main
/// command loop described by the target core's dispatch contract: select,
/// read CDB, dispatch, respond with STATUS and COMMAND COMPLETE, return to
/// BUS FREE.
pub struct Controller<P: Phy, S: TransferSink> {
    sequencer: PhySequencer<P>,
    accel: Accelerator<S>,
    targets: [Option<Box<dyn Target>>; MAX_TARGETS],
    enabled_mask: u8,
    global: GlobalConfig,
    reset_pending: bool,
}

impl<P: Phy, S: TransferSink> Controller<P, S> {
    pub fn new(phy: P, sink: S, global: GlobalConfig) -> Self {
        Self {
            sequencer: PhySequencer::new(phy, !global.enable_scsi2),
            accel: Accelerator::new(sink),
            targets: Default::default(),
            enabled_mask: 0,
            global,
            reset_pending: false,
        }
    }

    pub fn attach_target(&mut self, id: u8, target: Box<dyn Target>) {
        self.targets[id as usize] = Some(target);
        self.enabled_mask |= 1 << id;
    }

    pub fn phase(&self) -> Phase {
        self.sequencer.phase()
    }

    /// Queues a reset on every attached target, matching the reference
    /// firmware's RST handling: all targets come back reporting UNIT
    /// ATTENTION / POWER ON OR RESET on their next non-INQUIRY command.
    pub fn handle_reset(&mut self) {
        self.reset_pending = true;
        for t in self.targets.iter_mut().flatten() {
            t.sense_mut().queue_unit_attention(UnitAttentionCause::PowerOnOrReset);
        }
        self.sequencer.enter_bus_free();
        self.reset_pending = false;
    }

    /// Reads a complete CDB off the bus in COMMAND phase: the opcode fixes
    /// the CDB length via [`cdb_len_for_group`], and the remaining bytes
    /// follow in the same phase.
    pub fn read_cdb(&mut self) -> Vec<u8> {
        self.sequencer.enter_phase(Phase::Command);
        let (opcode, _) = self.sequencer.read_byte();
        let len = cdb_len_for_group(opcode);
        let mut cdb = Vec::with_capacity(len);
        cdb.push(opcode);
        for _ in 1..len {
            let (byte, _) = self.sequencer.read_byte();
            cdb.push(byte);
        }
        cdb
    }

    /// Reads the CDB off the bus for an already-selected target and runs
    /// the full command/status/message cycle against it.
    pub fn run_selected_command(&mut self, target_id: u8) -> u8 {
        let cdb = self.read_cdb();
        self.run_one_command(target_id, &cdb)
    }

    /// Runs a single selected-target command/status/message cycle against
    /// an already-selected target id, given a CDB already read off the bus.
    /// The bus-level selection edge detection lives in the board
    /// integration; [`Controller::read_cdb`] and this method are the part
    /// of the main loop this crate owns end to end.
    pub fn run_one_command(&mut self, target_id: u8, cdb: &[u8]) -> u8 {
        self.sequencer.enter_phase(Phase::Command);

        let Some(target) = self.targets[target_id as usize].as_mut() else {
            self.sequencer.enter_phase(Phase::Status);
            self.sequencer.write_byte(sense::STATUS_CHECK_CONDITION);
            self.sequencer.enter_phase(Phase::MessageIn);
            self.sequencer.write_byte(0); // COMMAND COMPLETE
            self.sequencer.enter_bus_free();
            return sense::STATUS_CHECK_CONDITION;
        };

        let result = target.dispatch(cdb, None);
        let status = match result {
            ScsiCmdResult::Status(s) => s,
            ScsiCmdResult::DataIn(data) => {
                self.sequencer.enter_phase(Phase::DataIn);
                for &b in &data {
                    self.sequencer.write_byte(b);
                }
                STATUS_GOOD
            }
            ScsiCmdResult::DataOut(len) => {
                self.sequencer.enter_phase(Phase::DataOut);
                let mut data = Vec::with_capacity(len);
                for _ in 0..len {
                    let (byte, parity_ok) = self.sequencer.read_byte();
                    if !parity_ok && self.global.enable_parity {
                        target.sense_mut().post(error::CommandError::ScsiParityError);
                        self.sequencer.enter_phase(Phase::Status);
                        self.sequencer.write_byte(sense::STATUS_CHECK_CONDITION);
                        self.sequencer.enter_phase(Phase::MessageIn);
                        self.sequencer.write_byte(0);
                        self.sequencer.enter_bus_free();
                        return sense::STATUS_CHECK_CONDITION;
                    }
                    data.push(byte);
                }
                match target.dispatch(cdb, Some(&data)) {
                    ScsiCmdResult::Status(s) => s,
                    _ => STATUS_GOOD,
                }
            }
        };

        self.sequencer.enter_phase(Phase::Status);
        self.sequencer.write_byte(status);
        self.sequencer.enter_phase(Phase::MessageIn);
        self.sequencer.write_byte(0); // COMMAND COMPLETE
        self.sequencer.enter_bus_free();
        status
    }
}
