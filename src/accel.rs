//! SCSI accelerator: double-buffered bulk data transfer, parity-checked,
//! with asynchronous and synchronous (offset/period) pacing.
//!
//! The reference firmware does this with two small DMA buffers ping-ponged
//! by a PIO program and an end-of-buffer interrupt; here the hardware FIFO
//! is modeled as a `TransferSink` the caller supplies (a real GPIO/DMA
//! driver on a board, an in-memory harness in tests), and this module owns
//! the combine/queue/parity bookkeeping that sits above it.

use std::collections::VecDeque;

use crate::error::CommandError;
use crate::parity;

/// Pushes/pulls bytes to/from the physical bus. Implemented by the board
/// driver; a test double just records what it was asked to do.
pub trait TransferSink: Send {
    fn write_bytes(&mut self, addr: usize, data: &[u8]);
    fn read_bytes(&mut self, addr: usize, buf: &mut [u8]) -> bool;
}

/// One contiguous in-flight (or queued) write, addressed by its position in
/// the caller's logical application buffer so `is_write_finished` can check
/// a specific byte without the caller tracking handles.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    len: usize,
}

impl Span {
    fn end(&self) -> usize {
        self.start + self.len
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncMode {
    /// Outstanding unacknowledged bytes allowed (0 = asynchronous).
    pub offset: u8,
    pub period_ns: u32,
}

/// Double-buffered bulk write engine with combine-on-contiguous and a
/// single follow-on queue slot, matching the accelerator's "enqueue and
/// combine with in-flight" transfer model.
pub struct Accelerator<S: TransferSink> {
    sink: S,
    active: Option<Span>,
    queued: Option<Span>,
    sync: SyncMode,
    parity_ok: bool,
}

impl<S: TransferSink> Accelerator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            active: None,
            queued: None,
            sync: SyncMode::default(),
            parity_ok: true,
        }
    }

    pub fn set_sync(&mut self, offset: u8, period_ns: u32) {
        self.sync = SyncMode { offset, period_ns };
    }

    pub fn sync(&self) -> SyncMode {
        self.sync
    }

    /// Starts (or extends, or queues) a write of `data` at logical address
    /// `addr`. Returns `Err(Busy)` if both the active transfer and the
    /// queue slot are occupied by something that doesn't abut `addr`.
    pub fn start_write(&mut self, addr: usize, data: &[u8]) -> Result<(), CommandError> {
        let incoming = Span {
            start: addr,
            len: data.len(),
        };

        if let Some(active) = &mut self.active {
            if active.end() == incoming.start {
                active.len += incoming.len;
                self.sink.write_bytes(incoming.start, data);
                return Ok(());
            }
        } else {
            self.active = Some(incoming);
            self.sink.write_bytes(incoming.start, data);
            return Ok(());
        }

        if let Some(queued) = &mut self.queued {
            if queued.end() == incoming.start {
                queued.len += incoming.len;
                self.sink.write_bytes(incoming.start, data);
                return Ok(());
            }
            // A third, non-contiguous overlap: the caller is expected to
            // have waited on `is_write_finished` first.
            return Err(CommandError::NotReady);
        }

        self.queued = Some(incoming);
        self.sink.write_bytes(incoming.start, data);
        Ok(())
    }

    /// Marks the currently active transfer complete, promoting the queued
    /// one (if any) to active. Called once the PIO FIFO and, in
    /// synchronous mode, the ACK-echo FIFO have both drained.
    pub fn complete_active(&mut self) {
        self.active = self.queued.take();
    }

    /// `addr == None` means "has everything drained".
    pub fn is_write_finished(&self, addr: Option<usize>) -> bool {
        match addr {
            None => self.active.is_none() && self.queued.is_none(),
            Some(a) => {
                !self.active.map(|s| s.contains(a)).unwrap_or(false)
                    && !self.queued.map(|s| s.contains(a)).unwrap_or(false)
            }
        }
    }

    /// Performs a parity-checked asynchronous read of `count` bytes into
    /// `buf`, accumulating parity across the whole read the way the PIO
    /// program's RX FIFO does: a mismatch anywhere in the read is reported
    /// once, at the end.
    pub fn read(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), CommandError> {
        let mut accumulated_ok = true;
        for (i, byte) in buf.iter_mut().enumerate() {
            let mut one = [0u8; 1];
            if !self.sink.read_bytes(addr + i, &mut one) {
                return Err(CommandError::UnrecoveredRead);
            }
            let (data, ok) = parity::decode((one[0] as u16) ^ parity::DATA_MASK);
            *byte = data;
            accumulated_ok &= ok;
        }
        self.parity_ok = accumulated_ok;
        if !accumulated_ok {
            return Err(CommandError::ScsiParityError);
        }
        Ok(())
    }

    pub fn last_read_parity_ok(&self) -> bool {
        self.parity_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        writes: Vec<(usize, Vec<u8>)>,
    }

    impl TransferSink for RecordingSink {
        fn write_bytes(&mut self, addr: usize, data: &[u8]) {
            self.writes.push((addr, data.to_vec()));
        }
        fn read_bytes(&mut self, _addr: usize, buf: &mut [u8]) -> bool {
            buf.fill(0);
            true
        }
    }

    #[test]
    fn contiguous_writes_combine_into_one_active_span() {
        let mut accel = Accelerator::new(RecordingSink { writes: vec![] });
        accel.start_write(0, &[1, 2, 3]).unwrap();
        accel.start_write(3, &[4, 5]).unwrap();

        assert!(accel.active.is_some());
        assert!(accel.queued.is_none());
        let span = accel.active.unwrap();
        assert_eq!((span.start, span.len), (0, 5));
    }

    #[test]
    fn noncontiguous_write_queues_a_follow_on() {
        let mut accel = Accelerator::new(RecordingSink { writes: vec![] });
        accel.start_write(0, &[1, 2, 3]).unwrap();
        accel.start_write(100, &[9, 9]).unwrap();

        assert!(accel.queued.is_some());
        assert!(!accel.is_write_finished(Some(100)));
        assert!(accel.is_write_finished(Some(50)));
    }

    #[test]
    fn third_noncontiguous_overlap_is_rejected() {
        let mut accel = Accelerator::new(RecordingSink { writes: vec![] });
        accel.start_write(0, &[1]).unwrap();
        accel.start_write(100, &[2]).unwrap();
        assert!(accel.start_write(200, &[3]).is_err());
    }

    #[test]
    fn complete_active_promotes_queued() {
        let mut accel = Accelerator::new(RecordingSink { writes: vec![] });
        accel.start_write(0, &[1]).unwrap();
        accel.start_write(100, &[2]).unwrap();
        accel.complete_active();
        assert!(accel.is_write_finished(Some(0)));
        assert!(!accel.is_write_finished(Some(100)));
    }
}
