//! Disk engine: READ/WRITE/READ CAPACITY and the rest of the fixed/
//! removable command set, layered directly on a `BackingStore`.

use crate::backing_store::BackingStore;
use crate::config::{DeviceKind, TargetConfig};
use crate::error::CommandError;
use crate::sense::STATUS_GOOD;

use super::{ScsiCmdResult, SenseState, Target};

pub struct DiskTarget {
    config: TargetConfig,
    store: Option<BackingStore>,
    sense: SenseState,
    started: bool,
    prevent_removal: bool,
}

impl DiskTarget {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            store: None,
            sense: SenseState::default(),
            started: true,
            prevent_removal: false,
        }
    }

    pub fn attach(&mut self, store: BackingStore) {
        self.store = Some(store);
    }

    pub fn eject(&mut self) {
        self.store = None;
    }

    fn blocks(&self) -> u64 {
        match &self.store {
            Some(s) => s.size() / self.config.sector_size as u64,
            None => 0,
        }
    }

    fn require_store(&mut self) -> Result<&mut BackingStore, CommandError> {
        self.store.as_mut().ok_or(CommandError::MediumNotPresent)
    }

    fn read_blocks(&mut self, lba: u64, count: u64) -> Result<Vec<u8>, CommandError> {
        let sector_size = self.config.sector_size as u64;
        let total_blocks = self.blocks();
        if lba + count > total_blocks {
            return Err(CommandError::LbaOutOfRange);
        }
        let store = self.require_store()?;
        store
            .seek(lba * sector_size)
            .map_err(|_| CommandError::LbaOutOfRange)?;
        let mut buf = vec![0u8; (count * sector_size) as usize];
        let n = store.read(&mut buf).map_err(|_| CommandError::UnrecoveredRead)?;
        if n != buf.len() {
            return Err(CommandError::UnrecoveredRead);
        }
        Ok(buf)
    }

    fn write_blocks(&mut self, lba: u64, data: &[u8]) -> Result<(), CommandError> {
        let sector_size = self.config.sector_size as u64;
        let count = data.len() as u64 / sector_size;
        let total_blocks = self.blocks();
        if lba + count > total_blocks {
            return Err(CommandError::LbaOutOfRange);
        }
        let store = self.require_store()?;
        store
            .seek(lba * sector_size)
            .map_err(|_| CommandError::LbaOutOfRange)?;
        let n = store.write(data).map_err(|e| match e {
            crate::error::BackingStoreError::WriteProtected => CommandError::WriteProtected,
            _ => CommandError::WriteFault,
        })?;
        if n != data.len() {
            return Err(CommandError::WriteFault);
        }
        Ok(())
    }
}

fn be32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

impl Target for DiskTarget {
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
        self.started && self.store.is_some()
    }

    fn inquiry_peripheral(&self) -> (u8, bool) {
        let removable = matches!(self.config.kind, DeviceKind::Removable | DeviceKind::MagnetoOptical);
        (0x00, removable)
    }

    fn mode_sense_page(&self, page: u8) -> Option<Vec<u8>> {
        match page {
            0x01 => Some(vec![0x01, 0x06, 0, 0, 0, 0, 0, 0]), // error recovery
            0x03 => Some(vec![0x03, 0x16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            _ => None,
        }
    }

    fn block_size(&self) -> usize {
        self.config.sector_size
    }

    fn block_count(&self) -> u64 {
        self.blocks()
    }

    fn specific_cmd(&mut self, cdb: &[u8], out_data: Option<&[u8]>) -> Result<ScsiCmdResult, CommandError> {
        match cdb[0] {
            0x08 => {
                // READ(6)
                let lba = (((cdb[1] & 0x1F) as u64) << 16) | ((cdb[2] as u64) << 8) | cdb[3] as u64;
                let mut count = cdb[4] as u64;
                if count == 0 {
                    count = 256;
                }
                Ok(ScsiCmdResult::DataIn(self.read_blocks(lba, count)?))
            }
            0x0A => {
                // WRITE(6)
                let lba = (((cdb[1] & 0x1F) as u64) << 16) | ((cdb[2] as u64) << 8) | cdb[3] as u64;
                let mut count = cdb[4] as u64;
                if count == 0 {
                    count = 256;
                }
                match out_data {
                    None => Ok(ScsiCmdResult::DataOut((count * self.config.sector_size as u64) as usize)),
                    Some(data) => {
                        self.write_blocks(lba, data)?;
                        Ok(ScsiCmdResult::Status(STATUS_GOOD))
                    }
                }
            }
            0x28 | 0x2F => {
                // READ(10) / VERIFY(10) (verify treated as a read-and-discard)
                let lba = be32(&cdb[2..6]) as u64;
                let count = u16::from_be_bytes([cdb[7], cdb[8]]) as u64;
                if cdb[0] == 0x2F {
                    let _ = self.read_blocks(lba, count)?;
                    Ok(ScsiCmdResult::Status(STATUS_GOOD))
                } else {
                    Ok(ScsiCmdResult::DataIn(self.read_blocks(lba, count)?))
                }
            }
            0x2A => {
                // WRITE(10)
                let lba = be32(&cdb[2..6]) as u64;
                let count = u16::from_be_bytes([cdb[7], cdb[8]]) as u64;
                match out_data {
                    None => Ok(ScsiCmdResult::DataOut((count * self.config.sector_size as u64) as usize)),
                    Some(data) => {
                        self.write_blocks(lba, data)?;
                        Ok(ScsiCmdResult::Status(STATUS_GOOD))
                    }
                }
            }
            0x2E => {
                // WRITE AND VERIFY(10): write, then read back and compare.
                let lba = be32(&cdb[2..6]) as u64;
                let count = u16::from_be_bytes([cdb[7], cdb[8]]) as u64;
                match out_data {
                    None => Ok(ScsiCmdResult::DataOut((count * self.config.sector_size as u64) as usize)),
                    Some(data) => {
                        self.write_blocks(lba, data)?;
                        let written_back = self.read_blocks(lba, count)?;
                        if written_back != data {
                            return Err(CommandError::WriteFault);
                        }
                        Ok(ScsiCmdResult::Status(STATUS_GOOD))
                    }
                }
            }
            0x25 => {
                // READ CAPACITY(10)
                let pmi = cdb[8] & 1;
                let lba = be32(&cdb[2..6]);
                if pmi != 0 && lba != 0 {
                    return Err(CommandError::InvalidCdbField);
                }
                let last_lba = self.blocks().saturating_sub(1) as u32;
                let mut data = vec![0u8; 8];
                data[0..4].copy_from_slice(&last_lba.to_be_bytes());
                data[4..8].copy_from_slice(&(self.config.sector_size as u32).to_be_bytes());
                Ok(ScsiCmdResult::DataIn(data))
            }
            0x01 | 0x0B | 0x2B => Ok(ScsiCmdResult::Status(STATUS_GOOD)), // REZERO/SEEK(6)/SEEK(10)
            0x36 => Ok(ScsiCmdResult::Status(STATUS_GOOD)), // LOCK/UNLOCK CACHE
            0x1B => {
                // START/STOP UNIT
                let start = cdb[4] & 1 != 0;
                self.started = start;
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x1E => {
                // PREVENT/ALLOW MEDIUM REMOVAL
                self.prevent_removal = cdb[4] & 1 != 0;
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x35 => Ok(ScsiCmdResult::Status(STATUS_GOOD)), // SYNCHRONIZE CACHE
            0x37 => {
                // READ DEFECT DATA: always an empty list
                Ok(ScsiCmdResult::DataIn(vec![0, 0, 0, 0]))
            }
            0x04 => {
                // FORMAT UNIT: accept and discard the parameter list
                match out_data {
                    None => Ok(ScsiCmdResult::DataOut(0)),
                    Some(_) => Ok(ScsiCmdResult::Status(STATUS_GOOD)),
                }
            }
            0x34 => {
                // PRE-FETCH
                let lba = be32(&cdb[2..6]) as u64;
                let count = u16::from_be_bytes([cdb[7], cdb[8]]).max(1) as u64;
                let _ = self.read_blocks(lba, count)?;
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            _ => Err(CommandError::InvalidCdbField),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing_store::BackingStore;
    use crate::config::DeviceKind;
    use std::io::Write;

    fn tempfile_store(size: usize, sector_size: usize) -> BackingStore {
        let mut path = std::env::temp_dir();
        path.push(format!("scsi_target_core_disk_test_{}", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        let mut data = vec![0u8; size];
        for (i, chunk) in data.chunks_mut(sector_size).enumerate() {
            chunk[0] = i as u8;
        }
        f.write_all(&data).unwrap();
        BackingStore::open(path.to_str().unwrap(), sector_size, None, None).unwrap()
    }

    #[test]
    fn read6_returns_requested_sectors() {
        let mut cfg = TargetConfig::new(0, DeviceKind::Fixed).unwrap();
        cfg.sector_size = 512;
        let mut target = DiskTarget::new(cfg);
        target.attach(tempfile_store(1024 * 1024, 512));

        let cdb = [0x08, 0x00, 0x00, 0x05, 0x02, 0x00];
        let result = target.specific_cmd(&cdb, None).unwrap();
        match result {
            ScsiCmdResult::DataIn(data) => {
                assert_eq!(data.len(), 1024);
                assert_eq!(data[0], 5);
                assert_eq!(data[512], 6);
            }
            _ => panic!("expected DataIn"),
        }
    }

    #[test]
    fn write_and_verify_confirms_the_write_by_reading_it_back() {
        let mut cfg = TargetConfig::new(0, DeviceKind::Fixed).unwrap();
        cfg.sector_size = 512;
        let mut target = DiskTarget::new(cfg);
        target.attach(tempfile_store(512 * 10, 512));

        let cdb = [0x2E, 0, 0, 0, 0, 2, 0, 0, 1, 0];
        let data = vec![0xAB; 512];
        match target.specific_cmd(&cdb, Some(&data)).unwrap() {
            ScsiCmdResult::Status(s) => assert_eq!(s, STATUS_GOOD),
            _ => panic!("expected Status"),
        }

        let read_cdb = [0x28, 0, 0, 0, 0, 2, 0, 0, 1, 0];
        match target.specific_cmd(&read_cdb, None).unwrap() {
            ScsiCmdResult::DataIn(d) => assert_eq!(d, vec![0xAB; 512]),
            _ => panic!("expected DataIn"),
        }
    }

    #[test]
    fn read_capacity_reports_highest_lba() {
        let mut cfg = TargetConfig::new(0, DeviceKind::Fixed).unwrap();
        cfg.sector_size = 512;
        let mut target = DiskTarget::new(cfg);
        target.attach(tempfile_store(512 * 100, 512));

        let cdb = [0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        match target.specific_cmd(&cdb, None).unwrap() {
            ScsiCmdResult::DataIn(data) => {
                let last_lba = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                assert_eq!(last_lba, 99);
            }
            _ => panic!("expected DataIn"),
        }
    }
}
