//! Tape engine: multi-file sequential-access model. Each backing image is
//! a concatenation of "files" separated by filemarks; tape position tracks
//! both the current file and the block offset within it, so crossing a
//! filemark boundary during a fixed-block READ/WRITE can be detected and
//! reported the way a real drive reports it (short read + CHECK CONDITION
//! with the filemark bit set, not silent truncation).

use crate::backing_store::BackingStore;
use crate::config::{DeviceKind, TargetConfig};
use crate::error::CommandError;
use crate::sense::{self, SenseCode, STATUS_GOOD};

use super::{ScsiCmdResult, SenseState, Target};

/// One logical file on the tape: a contiguous run of fixed-size blocks,
/// terminated by a filemark.
#[derive(Debug, Clone, Copy)]
struct TapeFile {
    /// Absolute block offset (from BOT) where this file's data begins.
    start_block: u64,
    /// Number of data blocks in this file.
    block_count: u64,
}

pub struct TapeTarget {
    config: TargetConfig,
    store: Option<BackingStore>,
    files: Vec<TapeFile>,
    sense: SenseState,
    /// Absolute block position from beginning-of-tape. `tape_pos =
    /// tape_mark_block_offset + file_relative_lba` where
    /// `tape_mark_block_offset` is `files[current_file].start_block`.
    tape_pos: u64,
    current_file: usize,
    fixed_block_len: usize,
    started: bool,
}

impl TapeTarget {
    pub fn new(mut config: TargetConfig) -> Self {
        config.kind = DeviceKind::Tape;
        let fixed_block_len = config.sector_size;
        Self {
            config,
            store: None,
            files: Vec::new(),
            sense: SenseState::default(),
            tape_pos: 0,
            current_file: 0,
            fixed_block_len,
            started: true,
        }
    }

    /// Loads a backing image laid out as `file_block_counts` consecutive
    /// runs of `fixed_block_len`-byte blocks, one filemark between each.
    pub fn load(&mut self, store: BackingStore, file_block_counts: &[u64]) {
        self.store = Some(store);
        self.files.clear();
        let mut offset = 0u64;
        for &count in file_block_counts {
            self.files.push(TapeFile { start_block: offset, block_count: count });
            offset += count;
        }
        self.tape_pos = 0;
        self.current_file = 0;
    }

    fn current(&self) -> Option<&TapeFile> {
        self.files.get(self.current_file)
    }

    fn file_relative_block(&self) -> u64 {
        match self.current() {
            Some(f) => self.tape_pos - f.start_block,
            None => 0,
        }
    }

    fn at_filemark(&self) -> bool {
        match self.current() {
            Some(f) => self.file_relative_block() >= f.block_count,
            None => true,
        }
    }

    fn rewind(&mut self) {
        self.tape_pos = 0;
        self.current_file = 0;
    }

    fn space_filemarks(&mut self, count: i32) -> Result<(), CommandError> {
        if count == 0 {
            return Ok(());
        }
        if count > 0 {
            for _ in 0..count {
                if self.current_file + 1 >= self.files.len() {
                    return Err(CommandError::EndOfData);
                }
                self.current_file += 1;
                self.tape_pos = self.files[self.current_file].start_block;
            }
        } else {
            for _ in 0..(-count) {
                if self.current_file == 0 {
                    return Err(CommandError::EndOfData);
                }
                self.current_file -= 1;
                self.tape_pos = self.files[self.current_file].start_block;
            }
        }
        Ok(())
    }

    /// Reads up to `count` fixed-size blocks, stopping early (without
    /// error) if a filemark is hit first. Returns the data actually read
    /// plus how many of the requested blocks were *not* read, so the
    /// caller can post a filemark-flagged sense on a short read instead of
    /// failing the whole transfer.
    fn read_fixed_blocks(&mut self, count: u32) -> Result<(Vec<u8>, u32), CommandError> {
        let block_len = self.fixed_block_len as u64;
        let mut out = Vec::with_capacity((count as u64 * block_len) as usize);
        let mut read = 0u32;
        while read < count {
            if self.at_filemark() {
                break;
            }
            let pos = self.tape_pos;
            let store = self.store.as_mut().ok_or(CommandError::MediumNotPresent)?;
            store.seek(pos * block_len).map_err(|_| CommandError::UnrecoveredRead)?;
            let mut buf = vec![0u8; block_len as usize];
            store.read(&mut buf).map_err(|_| CommandError::UnrecoveredRead)?;
            out.extend_from_slice(&buf);
            self.tape_pos += 1;
            read += 1;
        }
        Ok((out, count - read))
    }

    fn write_fixed_blocks(&mut self, data: &[u8]) -> Result<(), CommandError> {
        let block_len = self.fixed_block_len;
        if data.len() % block_len != 0 {
            return Err(CommandError::InvalidCdbField);
        }
        let count = data.len() / block_len;
        for chunk in data.chunks(block_len) {
            let pos = self.tape_pos;
            let store = self.store.as_mut().ok_or(CommandError::MediumNotPresent)?;
            store.seek(pos * block_len as u64).map_err(|_| CommandError::WriteFault)?;
            store.write(chunk).map_err(|_| CommandError::WriteFault)?;
            self.tape_pos += 1;
        }
        if let Some(f) = self.files.get_mut(self.current_file) {
            f.block_count = f.block_count.max(self.tape_pos - f.start_block);
        }
        let _ = count;
        Ok(())
    }
}

impl Target for TapeTarget {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Tape
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
        (0x01, true)
    }

    fn mode_sense_page(&self, page: u8) -> Option<Vec<u8>> {
        match page {
            0x00 => Some(vec![0x00, 0x02, 0, 0]),
            _ => None,
        }
    }

    fn block_size(&self) -> usize {
        self.fixed_block_len
    }

    fn block_count(&self) -> u64 {
        self.files.iter().map(|f| f.block_count).sum()
    }

    fn specific_cmd(&mut self, cdb: &[u8], out_data: Option<&[u8]>) -> Result<ScsiCmdResult, CommandError> {
        match cdb[0] {
            0x01 => {
                // REWIND
                self.rewind();
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x05 => {
                // READ BLOCK LIMITS
                let mut data = vec![0u8; 6];
                data[0] = 0;
                data[1..4].copy_from_slice(&(self.fixed_block_len as u32).to_be_bytes()[1..4]);
                data[4..6].copy_from_slice(&(self.fixed_block_len as u16).to_be_bytes());
                Ok(ScsiCmdResult::DataIn(data))
            }
            0x08 => {
                // READ(6)
                let fixed = cdb[1] & 1 != 0;
                let sili = cdb[1] & 0x02 != 0;
                let len = ((cdb[2] as u32) << 16) | ((cdb[3] as u32) << 8) | cdb[4] as u32;
                if fixed {
                    let (data, short_by) = self.read_fixed_blocks(len)?;
                    if short_by > 0 {
                        // Filemark hit partway through: NO SENSE with the
                        // filemark bit set and INFO = blocks not
                        // transferred, not an error — the data actually
                        // read is still good.
                        self.sense_mut().post_code(
                            SenseCode::new(sense::KEY_NO_SENSE, sense::ASC_NO_ADDITIONAL_SENSE),
                            short_by,
                            true,
                        );
                    }
                    Ok(ScsiCmdResult::DataIn(data))
                } else {
                    // Variable-block mode: one logical record per command,
                    // `len` is a byte count rather than a block count. Its
                    // length must equal the live block size unless SILI
                    // suppresses the mismatch check.
                    if self.at_filemark() {
                        self.sense_mut().post_code(
                            SenseCode::new(sense::KEY_NO_SENSE, sense::ASC_NO_ADDITIONAL_SENSE),
                            len,
                            true,
                        );
                        return Ok(ScsiCmdResult::DataIn(Vec::new()));
                    }
                    let block_len = self.fixed_block_len as u32;
                    let (mut data, _) = self.read_fixed_blocks(1)?;
                    if len != block_len && !sili {
                        let residual = (len as i64 - block_len as i64).unsigned_abs() as u32;
                        self.sense_mut().post_code(
                            SenseCode::new(sense::KEY_NO_SENSE, sense::ASC_NO_ADDITIONAL_SENSE),
                            residual,
                            false,
                        );
                    }
                    data.truncate(len as usize);
                    Ok(ScsiCmdResult::DataIn(data))
                }
            }
            0x0A => {
                // WRITE(6)
                let fixed = cdb[1] & 1 != 0;
                if !fixed {
                    return Err(CommandError::InvalidCdbField);
                }
                let count = ((cdb[2] as u32) << 16) | ((cdb[3] as u32) << 8) | cdb[4] as u32;
                let expected_len = count as usize * self.fixed_block_len;
                match out_data {
                    None => Ok(ScsiCmdResult::DataOut(expected_len)),
                    Some(data) => {
                        self.write_fixed_blocks(data)?;
                        Ok(ScsiCmdResult::Status(STATUS_GOOD))
                    }
                }
            }
            0x10 => {
                // WRITE FILEMARKS: truncates the current file at the
                // write head and opens a new, empty one after it.
                self.files.truncate(self.current_file + 1);
                if let Some(f) = self.files.get_mut(self.current_file) {
                    f.block_count = self.tape_pos - f.start_block;
                }
                self.files.push(TapeFile { start_block: self.tape_pos, block_count: 0 });
                self.current_file += 1;
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x11 => {
                // SPACE: only filemark spacing (code 001) is implemented;
                // block spacing (code 000) reports BLANK CHECK rather than
                // silently no-opping.
                let code = cdb[1] & 0x07;
                let count = i32::from_be_bytes([
                    if cdb[2] & 0x80 != 0 { 0xFF } else { 0x00 },
                    cdb[2],
                    cdb[3],
                    cdb[4],
                ]);
                match code {
                    0x01 => {
                        self.space_filemarks(count)?;
                        Ok(ScsiCmdResult::Status(STATUS_GOOD))
                    }
                    _ => Err(CommandError::EndOfData),
                }
            }
            0x13 => {
                // VERIFY: treated as a fixed-block read-and-discard.
                let count = ((cdb[2] as u32) << 16) | ((cdb[3] as u32) << 8) | cdb[4] as u32;
                let _ = self.read_fixed_blocks(count)?;
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x19 => {
                // ERASE
                if let Some(f) = self.files.get_mut(self.current_file) {
                    f.block_count = self.tape_pos - f.start_block;
                }
                self.files.truncate(self.current_file + 1);
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x2B => {
                // SEEK/LOCATE(10): absolute block address in bytes 3..7.
                let block = u32::from_be_bytes([cdb[3], cdb[4], cdb[5], cdb[6]]) as u64;
                let file_idx = self
                    .files
                    .iter()
                    .position(|f| block >= f.start_block && block < f.start_block + f.block_count.max(1))
                    .ok_or(CommandError::LbaOutOfRange)?;
                self.current_file = file_idx;
                self.tape_pos = block;
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x34 => {
                // READ POSITION
                let mut data = vec![0u8; 20];
                data[0] = 0;
                data[4..8].copy_from_slice(&(self.tape_pos as u32).to_be_bytes());
                data[8..12].copy_from_slice(&(self.tape_pos as u32).to_be_bytes());
                Ok(ScsiCmdResult::DataIn(data))
            }
            _ => Err(CommandError::InvalidCdbField),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tempfile_store(size: usize, sector_size: usize) -> BackingStore {
        let mut path = std::env::temp_dir();
        path.push(format!("scsi_target_core_tape_test_{}", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![0u8; size]).unwrap();
        BackingStore::open(path.to_str().unwrap(), sector_size, None, None).unwrap()
    }

    fn new_target(block_len: usize) -> TapeTarget {
        let mut cfg = TargetConfig::new(0, DeviceKind::Tape).unwrap();
        cfg.sector_size = block_len;
        TapeTarget::new(cfg)
    }

    #[test]
    fn read_stops_at_filemark_and_flags_sense_without_failing() {
        let mut target = new_target(512);
        target.load(tempfile_store(512 * 20, 512), &[5, 5]);

        // Request 7 blocks from a 5-block file: should return exactly the
        // 5 available blocks and post a filemark-flagged NO SENSE for the
        // 2 blocks short, not fail the command outright.
        let cdb = [0x08, 0x01, 0x00, 0x00, 0x07, 0x00];
        let result = target.specific_cmd(&cdb, None).unwrap();
        match result {
            ScsiCmdResult::DataIn(d) => assert_eq!(d.len(), 5 * 512),
            _ => panic!("expected DataIn"),
        }
        let (code, info, filemark) = target.sense.consume();
        assert_eq!(code.key, sense::KEY_NO_SENSE);
        assert!(filemark);
        assert_eq!(info, 2);
    }

    #[test]
    fn variable_block_read_returns_one_record_and_flags_length_mismatch() {
        let mut target = new_target(512);
        target.load(tempfile_store(512 * 20, 512), &[5, 5]);

        // Variable-block mode (FIXED bit clear), requested length 256
        // against a live block size of 512, SILI not set: expect a
        // truncated 256-byte record and a residual-length sense.
        let cdb = [0x08, 0x00, 0x00, 0x01, 0x00, 0x00];
        let result = target.specific_cmd(&cdb, None).unwrap();
        match result {
            ScsiCmdResult::DataIn(d) => assert_eq!(d.len(), 256),
            _ => panic!("expected DataIn"),
        }
        let (code, info, filemark) = target.sense.consume();
        assert_eq!(code.key, sense::KEY_NO_SENSE);
        assert!(!filemark);
        assert_eq!(info, 256);
        assert_eq!(target.tape_pos, 1);
    }

    #[test]
    fn space_filemarks_crosses_into_second_file() {
        let mut target = new_target(512);
        target.load(tempfile_store(512 * 20, 512), &[5, 5]);

        let cdb = [0x11, 0x01, 0x00, 0x00, 0x01, 0x00];
        target.specific_cmd(&cdb, None).unwrap();
        assert_eq!(target.current_file, 1);
        assert_eq!(target.tape_pos, 5);

        let cdb_back = [0x11, 0x01, 0xFF, 0xFF, 0xFF, 0x00];
        target.specific_cmd(&cdb_back, None).unwrap();
        assert_eq!(target.current_file, 0);
        assert_eq!(target.tape_pos, 0);
    }

    #[test]
    fn tape_position_tracks_file_relative_offset() {
        let mut target = new_target(512);
        target.load(tempfile_store(512 * 20, 512), &[5, 5]);
        target.space_filemarks(1).unwrap();
        target.tape_pos += 2;
        assert_eq!(target.file_relative_block(), 2);
    }
}
