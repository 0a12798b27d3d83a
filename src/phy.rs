//! SCSI physical layer: individual-signal drive/sense, phase transitions,
//! and the single-byte asynchronous REQ/ACK handshake.
//!
//! Grounded on `scsiPhy.cpp`'s `scsiEnterPhaseImmediate`/`scsiWriteByte`:
//! the real hardware toggles MSG/CD/IO together in one register write, then
//! waits out a settle delay (plus a release delay if direction changed,
//! plus a SCSI-1 compatibility slack before any DATA phase). This module
//! keeps that shape behind a `Phy` trait so it can run against a GPIO
//! driver on real hardware or a software loopback bus in tests.

use std::time::Duration;

/// Bus settle delay after a phase's MSG/CD/IO lines change.
pub const BUS_SETTLE_DELAY: Duration = Duration::from_nanos(400);
/// Extra delay before releasing the data bus when direction reverses.
pub const DATA_RELEASE_DELAY: Duration = Duration::from_nanos(400);
/// SCSI-1 compatibility slack added before any DATA phase.
pub const SCSI1_COMPAT_SLACK: Duration = Duration::from_micros(100);
/// Minimum data-setup time before REQ is asserted in async handshake.
pub const DATA_SETUP_DELAY: Duration = Duration::from_nanos(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum Phase {
    BusFree,
    Arbitration,
    Selection,
    Reselection,
    Command,
    DataIn,
    DataOut,
    Status,
    MessageIn,
    MessageOut,
}

impl Phase {
    /// MSG/CD/IO line values for each phase, per SCSI-2 table 5.
    fn msg_cd_io(self) -> (bool, bool, bool) {
        match self {
            Phase::DataOut => (false, false, false),
            Phase::DataIn => (false, false, true),
            Phase::Command => (false, true, false),
            Phase::Status => (false, true, true),
            Phase::MessageOut => (true, true, false),
            Phase::MessageIn => (true, true, true),
            // BUS FREE/ARBITRATION/SELECTION/RESELECTION don't drive these.
            _ => (false, false, false),
        }
    }

    fn transfers_data_in(self) -> bool {
        matches!(self, Phase::DataIn | Phase::Status | Phase::MessageIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Bsy,
    Sel,
    Cd,
    Io,
    Msg,
    Req,
    Ack,
    Atn,
    Rst,
}

/// Result of a completed selection-edge ISR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionEvent {
    pub target_id: u8,
    pub atn: bool,
}

/// Abstraction over the physical SCSI bus. Implementors drive/read actual
/// GPIO; a software loopback implementation is provided for tests (see
/// `LoopbackPhy`).
pub trait Phy: Send {
    /// Drives `signal` to logical `active` (the implementor maps this onto
    /// the active-low electrical convention).
    fn out(&mut self, signal: Signal, active: bool);
    /// Reads the current logical state of `signal`.
    fn in_(&mut self, signal: Signal) -> bool;
    /// Busy-waits until `in_(signal) == active`, returning `false` if
    /// `should_abort` becomes true first (bus reset, timeout, ...).
    fn wait_for(&mut self, signal: Signal, active: bool, should_abort: &dyn Fn() -> bool) -> bool;
    fn sleep(&mut self, d: Duration);
    /// Drives the 9-bit data+parity bus with an already-encoded word (see
    /// `crate::parity::encode`).
    fn write_data(&mut self, word: u16);
    /// Samples the 9-bit data+parity bus.
    fn read_data(&mut self) -> u16;
}

/// Phase sequencer: owns timing and signal-group transitions; data
/// movement is the SCSI accelerator's job (`crate::accel`).
pub struct PhySequencer<P: Phy> {
    phy: P,
    phase: Phase,
    scsi1_compat: bool,
}

impl<P: Phy> PhySequencer<P> {
    pub fn new(phy: P, scsi1_compat: bool) -> Self {
        Self {
            phy,
            phase: Phase::BusFree,
            scsi1_compat,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn phy_mut(&mut self) -> &mut P {
        &mut self.phy
    }

    /// Transitions to `next`, observing the invariant that REQ and phase
    /// control lines change only while ACK is deasserted (I4).
    pub fn enter_phase(&mut self, next: Phase) {
        if next == self.phase {
            return;
        }

        self.phy
            .wait_for(Signal::Ack, false, &|| false);

        let was_input = self.phase.transfers_data_in();
        let becomes_input = next.transfers_data_in();

        let (msg, cd, io) = next.msg_cd_io();
        self.phy.out(Signal::Msg, msg);
        self.phy.out(Signal::Cd, cd);
        self.phy.out(Signal::Io, io);

        self.phy.sleep(BUS_SETTLE_DELAY);
        if was_input != becomes_input {
            self.phy.sleep(DATA_RELEASE_DELAY);
        }
        if self.scsi1_compat && matches!(next, Phase::DataIn | Phase::DataOut) {
            self.phy.sleep(SCSI1_COMPAT_SLACK);
        }

        self.phase = next;
    }

    pub fn enter_bus_free(&mut self) {
        self.phy.out(Signal::Bsy, false);
        self.phy.out(Signal::Sel, false);
        self.phy.out(Signal::Msg, false);
        self.phy.out(Signal::Cd, false);
        self.phy.out(Signal::Io, false);
        self.phy.out(Signal::Req, false);
        self.phase = Phase::BusFree;
    }

    /// Single-byte asynchronous write handshake (REQ/ACK), used outside of
    /// accelerator-driven bulk transfers (status/message bytes).
    pub fn write_byte(&mut self, value: u8) {
        let word = crate::parity::encode(value);
        self.phy.write_data(word);
        self.phy.sleep(DATA_SETUP_DELAY);
        self.phy.out(Signal::Req, true);
        self.phy.wait_for(Signal::Ack, true, &|| false);
        self.phy.out(Signal::Req, false);
        self.phy.wait_for(Signal::Ack, false, &|| false);
    }

    /// Single-byte asynchronous read handshake. Returns `(data,
    /// parity_valid)`.
    pub fn read_byte(&mut self) -> (u8, bool) {
        self.phy.out(Signal::Req, true);
        self.phy.wait_for(Signal::Ack, true, &|| false);
        let word = self.phy.read_data();
        self.phy.out(Signal::Req, false);
        self.phy.wait_for(Signal::Ack, false, &|| false);
        crate::parity::decode(word)
    }
}

/// Samples the BSY/SEL/RST edges and decides whether a selection happened.
/// Grounded on `scsiPhyIRQ`'s shared-callback dispatch and the "BSY falls
/// while SEL is held" / "SEL falls in SCSI-1 single-initiator mode" rule.
pub fn detect_selection(
    bsy_falling: bool,
    sel_falling: bool,
    sel_asserted: bool,
    data_bus: u8,
    enabled_ids: u8,
    atn_asserted: bool,
) -> Option<SelectionEvent> {
    if !(bsy_falling || sel_falling) || !sel_asserted {
        return None;
    }
    let candidates = data_bus & enabled_ids;
    if candidates == 0 {
        return None;
    }
    let target_id = candidates.trailing_zeros() as u8;
    Some(SelectionEvent {
        target_id,
        atn: atn_asserted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_picks_lowest_enabled_id() {
        let ev = detect_selection(true, false, true, 0b0000_1100, 0b1111_1111, false).unwrap();
        assert_eq!(ev.target_id, 2);
    }

    #[test]
    fn selection_ignored_when_no_enabled_id_present() {
        assert!(detect_selection(true, false, true, 0b0001_0000, 0b0000_0001, false).is_none());
    }

    #[test]
    fn selection_requires_sel_asserted() {
        assert!(detect_selection(true, false, false, 0b0000_0001, 0b0000_0001, false).is_none());
    }

    #[test]
    fn selection_records_live_atn_state() {
        let ev = detect_selection(true, false, true, 0b0000_0001, 0b0000_0001, true).unwrap();
        assert!(ev.atn);
        let ev = detect_selection(true, false, true, 0b0000_0001, 0b0000_0001, false).unwrap();
        assert!(!ev.atn);
    }
}
