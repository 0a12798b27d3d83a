//! Initiator Core (C7): the client side of the bus, used when this device
//! itself issues commands to a remote target instead of responding to one.
//!
//! This models the sequence a bridge/initiator mode runs against each
//! remote device: ready check with unit-attention recovery, INQUIRY,
//! READ CAPACITY with a SCSI-1 fallback, and a streaming sector reader
//! with bounded per-window retry.

use crate::error::CommandError;
use crate::sense::SenseCode;

/// SCSI-1 fallback assumed when READ CAPACITY(10) fails: 512-byte blocks,
/// 2^21 sectors, and transfers capped at 128 sectors per command.
pub const SCSI1_FALLBACK_BLOCK_SIZE: u32 = 512;
pub const SCSI1_FALLBACK_SECTOR_COUNT: u64 = 1 << 21;
pub const SCSI1_FALLBACK_MAX_TRANSFER: u32 = 128;

const MAX_WINDOW_RETRIES: u32 = 5;

/// Issues CDBs to a remote target and reports the outcome. Implemented by
/// whatever drives the physical bus (or, in tests, a fake remote device);
/// the initiator core itself only sequences retries and interprets sense.
pub trait RemoteTarget {
    fn send_command(&mut self, cdb: &[u8], data_out: Option<&[u8]>) -> Result<Vec<u8>, CommandError>;
    fn request_sense(&mut self) -> SenseCode;
}

#[derive(Debug, Clone, Copy)]
pub struct Capacity {
    pub block_size: u32,
    pub sector_count: u64,
    pub max_transfer_sectors: u32,
}

pub fn test_unit_ready<T: RemoteTarget>(target: &mut T) -> Result<(), CommandError> {
    let cdb = [0x00, 0, 0, 0, 0, 0];
    match target.send_command(&cdb, None) {
        Ok(_) => Ok(()),
        Err(CommandError::UnitAttention(_)) => {
            // Recovery per SENSE key: re-issue after consuming the
            // outstanding unit attention, the target then returns a
            // normal result.
            let _ = target.request_sense();
            target.send_command(&cdb, None).map(|_| ())
        }
        Err(e) => Err(e),
    }
}

pub fn inquiry<T: RemoteTarget>(target: &mut T) -> Result<Vec<u8>, CommandError> {
    let cdb = [0x12, 0, 0, 0, 36, 0];
    target.send_command(&cdb, None)
}

pub fn is_cdrom(inquiry_data: &[u8]) -> bool {
    inquiry_data.first().copied() == Some(0x05)
}

pub fn read_capacity<T: RemoteTarget>(target: &mut T) -> Capacity {
    let cdb = [0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    match target.send_command(&cdb, None) {
        Ok(data) if data.len() >= 8 => {
            let last_lba = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            let block_size = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            Capacity {
                block_size,
                sector_count: last_lba as u64 + 1,
                max_transfer_sectors: 0xFFFF,
            }
        }
        _ => Capacity {
            block_size: SCSI1_FALLBACK_BLOCK_SIZE,
            sector_count: SCSI1_FALLBACK_SECTOR_COUNT,
            max_transfer_sectors: SCSI1_FALLBACK_MAX_TRANSFER,
        },
    }
}

/// Reads `count` sectors starting at `start`, streaming the result one
/// window at a time through `sink`. A window failing outright is retried
/// up to [`MAX_WINDOW_RETRIES`] times; once exhausted, the window is
/// replayed one sector at a time so only the genuinely bad sector fails.
pub fn read_to_sink<T: RemoteTarget>(
    target: &mut T,
    start: u64,
    count: u64,
    sector_size: u32,
    window_sectors: u64,
    sink: &mut dyn FnMut(u64, &[u8]) -> std::io::Result<()>,
) -> Result<(), CommandError> {
    let mut remaining = count;
    let mut lba = start;
    while remaining > 0 {
        let window = remaining.min(window_sectors.max(1));
        match read_window(target, lba, window, sector_size) {
            Ok(data) => {
                sink(lba, &data).map_err(|_| CommandError::WriteFault)?;
            }
            Err(_) => {
                for i in 0..window {
                    let data = read_window(target, lba + i, 1, sector_size)?;
                    sink(lba + i, &data).map_err(|_| CommandError::WriteFault)?;
                }
            }
        }
        lba += window;
        remaining -= window;
    }
    Ok(())
}

fn read_window<T: RemoteTarget>(target: &mut T, lba: u64, count: u64, sector_size: u32) -> Result<Vec<u8>, CommandError> {
    let mut last_err = CommandError::UnrecoveredRead;
    for _ in 0..MAX_WINDOW_RETRIES {
        let cdb = read10_cdb(lba as u32, count as u16);
        match target.send_command(&cdb, None) {
            Ok(data) if data.len() == (count * sector_size as u64) as usize => return Ok(data),
            Ok(_) => last_err = CommandError::UnrecoveredRead,
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn read10_cdb(lba: u32, count: u16) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = 0x28;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&count.to_be_bytes());
    cdb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitAttentionCause;
    use std::collections::VecDeque;

    struct FakeRemote {
        capacity_data: Option<Vec<u8>>,
        pending_unit_attention: bool,
        sectors: Vec<u8>,
        sector_size: u32,
        fail_once_at_lba: Option<u32>,
        responses: VecDeque<Result<Vec<u8>, CommandError>>,
    }

    impl RemoteTarget for FakeRemote {
        fn send_command(&mut self, cdb: &[u8], _data_out: Option<&[u8]>) -> Result<Vec<u8>, CommandError> {
            if let Some(resp) = self.responses.pop_front() {
                return resp;
            }
            match cdb[0] {
                0x00 => {
                    if self.pending_unit_attention {
                        self.pending_unit_attention = false;
                        Err(CommandError::UnitAttention(UnitAttentionCause::PowerOnOrReset))
                    } else {
                        Ok(vec![])
                    }
                }
                0x25 => match &self.capacity_data {
                    Some(d) => Ok(d.clone()),
                    None => Err(CommandError::InvalidCdbField),
                },
                0x28 => {
                    let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
                    let count = u16::from_be_bytes([cdb[7], cdb[8]]) as u32;
                    if self.fail_once_at_lba == Some(lba) && count > 1 {
                        self.fail_once_at_lba = None;
                        return Err(CommandError::UnrecoveredRead);
                    }
                    let start = (lba * self.sector_size) as usize;
                    let len = (count * self.sector_size) as usize;
                    Ok(self.sectors[start..start + len].to_vec())
                }
                _ => Err(CommandError::InvalidCdbField),
            }
        }

        fn request_sense(&mut self) -> SenseCode {
            SenseCode::new(crate::sense::KEY_UNIT_ATTENTION, crate::sense::ASC_POWER_ON_RESET)
        }
    }

    #[test]
    fn test_unit_ready_retries_past_unit_attention() {
        let mut remote = FakeRemote {
            capacity_data: None,
            pending_unit_attention: true,
            sectors: vec![],
            sector_size: 512,
            fail_once_at_lba: None,
            responses: VecDeque::new(),
        };
        assert!(test_unit_ready(&mut remote).is_ok());
    }

    #[test]
    fn read_capacity_falls_back_to_scsi1_defaults_on_failure() {
        let mut remote = FakeRemote {
            capacity_data: None,
            pending_unit_attention: false,
            sectors: vec![],
            sector_size: 512,
            fail_once_at_lba: None,
            responses: VecDeque::new(),
        };
        let cap = read_capacity(&mut remote);
        assert_eq!(cap.block_size, SCSI1_FALLBACK_BLOCK_SIZE);
        assert_eq!(cap.sector_count, SCSI1_FALLBACK_SECTOR_COUNT);
    }

    #[test]
    fn streaming_read_falls_back_to_single_sector_on_window_failure() {
        let sector_size = 512u32;
        let mut sectors = vec![0u8; sector_size as usize * 4];
        for (i, chunk) in sectors.chunks_mut(sector_size as usize).enumerate() {
            chunk[0] = i as u8;
        }
        let mut remote = FakeRemote {
            capacity_data: None,
            pending_unit_attention: false,
            sectors,
            sector_size,
            fail_once_at_lba: Some(0),
            responses: VecDeque::new(),
        };

        let mut collected = Vec::new();
        read_to_sink(&mut remote, 0, 4, sector_size, 4, &mut |lba, data| {
            collected.push((lba, data.to_vec()));
            Ok(())
        })
        .unwrap();

        assert_eq!(collected.len(), 4);
        assert_eq!(collected[0].1[0], 0);
        assert_eq!(collected[3].1[0], 3);
    }
}
