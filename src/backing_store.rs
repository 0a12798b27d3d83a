//! Backing store: uniform read/write/seek over a file, a raw block-device
//! sector range, or a flash ROM region.
//!
//! Grounded on the reference firmware's `ImageBackingStore`, which folds all
//! three over one class with mode flags; here each mode is its own
//! implementation behind one small interface; callers don't need to care
//! which one they have.

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(feature = "mmap")]
use memmap2::MmapMut;

use crate::error::BackingStoreError;

pub const SD_SECTOR_SIZE: usize = 512;

/// A raw sector-addressable device (an SD card, in the reference design).
/// Board bring-up owns the concrete implementation; this crate only needs
/// to read and write fixed-size sectors by index.
pub trait BlockDevice: Send {
    fn sector_count(&self) -> u32;
    fn read_sectors(&mut self, first_sector: u32, buf: &mut [u8]) -> Result<(), BackingStoreError>;
    fn write_sectors(&mut self, first_sector: u32, buf: &[u8]) -> Result<(), BackingStoreError>;
}

/// A reserved flash region holding a flat disk image, checked for presence
/// at open time.
pub trait RomDevice: Send {
    /// Returns the image size in bytes if a valid ROM image header is
    /// present, `None` otherwise.
    fn image_size(&self) -> Option<u64>;
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BackingStoreError>;
}

/// Parsed form of the `RAW:<first>:<last>` / `ROM:` / filesystem-path
/// pseudo-path grammar.
pub enum ImageSpec<'a> {
    File(&'a Path),
    Raw { first_sector: u32, last_sector: u32 },
    Rom,
}

pub fn parse_image_spec(path: &str) -> Result<ImageSpec<'_>, BackingStoreError> {
    if let Some(rest) = ci_strip_prefix(path, "RAW:") {
        let mut parts = rest.splitn(2, ':');
        let first = parts.next().unwrap_or("");
        let last = parts.next().ok_or_else(|| {
            BackingStoreError::InvalidSpec(format!("missing ':' in raw spec {path}"))
        })?;
        let first_sector: u32 = first
            .parse()
            .map_err(|_| BackingStoreError::InvalidSpec(path.to_string()))?;
        let last_sector: u32 = last
            .parse()
            .map_err(|_| BackingStoreError::InvalidSpec(path.to_string()))?;
        Ok(ImageSpec::Raw {
            first_sector,
            last_sector,
        })
    } else if ci_strip_prefix(path, "ROM:").is_some() {
        Ok(ImageSpec::Rom)
    } else {
        Ok(ImageSpec::File(Path::new(path)))
    }
}

fn ci_strip_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

enum FileBacking {
    #[cfg(feature = "mmap")]
    Mmap(MmapMut),
    Buffered(Vec<u8>),
}

impl FileBacking {
    fn len(&self) -> usize {
        match self {
            #[cfg(feature = "mmap")]
            Self::Mmap(m) => m.len(),
            Self::Buffered(v) => v.len(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            #[cfg(feature = "mmap")]
            Self::Mmap(m) => m,
            Self::Buffered(v) => v,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            #[cfg(feature = "mmap")]
            Self::Mmap(m) => m,
            Self::Buffered(v) => v,
        }
    }
}

enum Kind {
    File {
        data: FileBacking,
        path: PathBuf,
        readonly: bool,
    },
    Raw {
        device: Box<dyn BlockDevice>,
        first_sector: u32,
        last_sector: u32,
        cursor_sector: u32,
        /// Set once a misaligned `seek` downgrades this store to
        /// byte-addressable (filesystem-style) I/O; `byte_pos` then holds
        /// the exact cursor instead of a whole-sector one.
        downgraded: bool,
        byte_pos: u64,
    },
    Rom {
        device: Box<dyn RomDevice>,
        size: u64,
        cursor: u64,
    },
}

/// One open disk/CD/tape image, in whichever of the three backing modes it
/// resolved to at open time.
pub struct BackingStore {
    kind: Kind,
    /// Byte cursor for the `File` variant only; Raw/Rom track their own
    /// cursor inline since they're sector/offset addressed differently.
    file_cursor: u64,
}

impl BackingStore {
    /// Opens `path`, interpreting `RAW:`/`ROM:` prefixes per
    /// [`parse_image_spec`]. `sector_size` is the SCSI logical block size
    /// the caller intends to use against this store; RAW images require it
    /// to be a multiple of [`SD_SECTOR_SIZE`].
    pub fn open(
        path: &str,
        sector_size: usize,
        raw_device: Option<Box<dyn BlockDevice>>,
        rom_device: Option<Box<dyn RomDevice>>,
    ) -> Result<Self, BackingStoreError> {
        match parse_image_spec(path)? {
            ImageSpec::Raw {
                first_sector,
                last_sector,
            } => {
                if !sector_size.is_multiple_of(SD_SECTOR_SIZE) {
                    return Err(BackingStoreError::UnsupportedBlockSize {
                        block_size: sector_size,
                        sector_size: SD_SECTOR_SIZE,
                    });
                }
                let device =
                    raw_device.ok_or_else(|| BackingStoreError::NotFound(path.to_string()))?;
                let count = device.sector_count();
                let last_sector = if last_sector >= count {
                    log::warn!("Limiting RAW image mapping to device sector count: {count}");
                    count.saturating_sub(1)
                } else {
                    last_sector
                };
                Ok(Self {
                    kind: Kind::Raw {
                        device,
                        first_sector,
                        last_sector,
                        cursor_sector: first_sector,
                        downgraded: false,
                        byte_pos: 0,
                    },
                    file_cursor: 0,
                })
            }
            ImageSpec::Rom => {
                let device =
                    rom_device.ok_or_else(|| BackingStoreError::NotFound(path.to_string()))?;
                let size = device.image_size().unwrap_or(0);
                if size == 0 {
                    return Err(BackingStoreError::NotFound("no ROM image present".into()));
                }
                Ok(Self {
                    kind: Kind::Rom {
                        device,
                        size,
                        cursor: 0,
                    },
                    file_cursor: 0,
                })
            }
            ImageSpec::File(p) => Self::open_file(p, sector_size),
        }
    }

    fn open_file(path: &Path, sector_size: usize) -> Result<Self, BackingStoreError> {
        if !path.exists() {
            return Err(BackingStoreError::NotFound(path.display().to_string()));
        }
        let readonly = fs::metadata(path)
            .map(|m| m.permissions().readonly())
            .unwrap_or(false);

        #[cfg(feature = "mmap")]
        let data = {
            use fs2::FileExt;
            use std::fs::OpenOptions;

            let file = OpenOptions::new()
                .read(true)
                .write(!readonly)
                .open(path)?;
            let len = file.metadata()?.len() as usize;
            if !len.is_multiple_of(sector_size) {
                return Err(BackingStoreError::UnsupportedBlockSize {
                    block_size: sector_size,
                    sector_size: len,
                });
            }
            if !readonly {
                file.try_lock_exclusive().map_err(|_| {
                    BackingStoreError::InvalidSpec(format!(
                        "could not lock {}: already open elsewhere",
                        path.display()
                    ))
                })?;
            }
            let mmap = unsafe { memmap2::MmapOptions::new().len(len.max(1)).map_mut(&file)? };
            FileBacking::Mmap(mmap)
        };

        #[cfg(not(feature = "mmap"))]
        let data = {
            let bytes = fs::read(path)?;
            if !bytes.len().is_multiple_of(sector_size) {
                return Err(BackingStoreError::UnsupportedBlockSize {
                    block_size: sector_size,
                    sector_size: bytes.len(),
                });
            }
            FileBacking::Buffered(bytes)
        };

        Ok(Self {
            kind: Kind::File {
                data,
                path: path.to_path_buf(),
                readonly,
            },
            file_cursor: 0,
        })
    }

    pub fn is_open(&self) -> bool {
        true
    }

    pub fn is_writable(&self) -> bool {
        match &self.kind {
            Kind::File { readonly, .. } => !readonly,
            Kind::Raw { .. } => true,
            Kind::Rom { .. } => false,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.kind, Kind::Raw { .. })
    }

    pub fn is_rom(&self) -> bool {
        matches!(self.kind, Kind::Rom { .. })
    }

    /// Returns `(first_sector, last_sector)` of the on-device contiguous
    /// range for RAW/ROM stores, so a caller can bypass this abstraction
    /// entirely for bulk transfers. Plain files have no such range: unlike
    /// the original firmware we have no filesystem-extent query available,
    /// so file-backed images always go through [`Self::read`]/[`Self::write`].
    pub fn contiguous_range(&self) -> Option<(u32, u32)> {
        match &self.kind {
            Kind::Raw {
                first_sector,
                last_sector,
                ..
            } => Some((*first_sector, *last_sector)),
            Kind::Rom { .. } => Some((0, 0)),
            Kind::File { .. } => None,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.kind {
            Kind::File { data, .. } => data.len() as u64,
            Kind::Raw {
                first_sector,
                last_sector,
                ..
            } => (*last_sector - *first_sector + 1) as u64 * SD_SECTOR_SIZE as u64,
            Kind::Rom { size, .. } => *size,
        }
    }

    pub fn seek(&mut self, pos: u64) -> Result<(), BackingStoreError> {
        match &mut self.kind {
            Kind::File { data, .. } => {
                if pos > data.len() as u64 {
                    return Err(BackingStoreError::OutOfRange);
                }
                self.file_cursor = pos;
                Ok(())
            }
            Kind::Raw {
                first_sector,
                last_sector,
                cursor_sector,
                downgraded,
                byte_pos,
            } => {
                let span_bytes = (*last_sector - *first_sector + 1) as u64 * SD_SECTOR_SIZE as u64;
                if pos > span_bytes {
                    return Err(BackingStoreError::OutOfRange);
                }
                if !pos.is_multiple_of(SD_SECTOR_SIZE as u64) {
                    log::debug!(
                        "RAW image seek to unaligned offset {pos}, downgrading to byte-addressable I/O"
                    );
                    *downgraded = true;
                }
                *byte_pos = pos;
                *cursor_sector = *first_sector + (pos / SD_SECTOR_SIZE as u64) as u32;
                Ok(())
            }
            Kind::Rom { size, cursor, .. } => {
                if pos > *size {
                    return Err(BackingStoreError::OutOfRange);
                }
                *cursor = pos;
                Ok(())
            }
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, BackingStoreError> {
        match &mut self.kind {
            Kind::File { data, .. } => {
                let start = self.file_cursor as usize;
                let end = (start + buf.len()).min(data.len());
                if end <= start {
                    return Ok(0);
                }
                let n = end - start;
                buf[..n].copy_from_slice(&data.as_slice()[start..end]);
                self.file_cursor += n as u64;
                Ok(n)
            }
            Kind::Raw {
                device,
                cursor_sector,
                first_sector,
                last_sector,
                downgraded,
                byte_pos,
            } => {
                if *downgraded {
                    let n = raw_read_bytes(device.as_mut(), *first_sector, *last_sector, *byte_pos, buf)?;
                    *byte_pos += n as u64;
                    *cursor_sector = *first_sector + (*byte_pos / SD_SECTOR_SIZE as u64) as u32;
                    return Ok(n);
                }
                if !buf.len().is_multiple_of(SD_SECTOR_SIZE) {
                    return Err(BackingStoreError::OutOfRange);
                }
                let sectors = (buf.len() / SD_SECTOR_SIZE) as u32;
                if *cursor_sector + sectors > *last_sector + 1 {
                    return Err(BackingStoreError::OutOfRange);
                }
                device.read_sectors(*cursor_sector, buf)?;
                *cursor_sector += sectors;
                *byte_pos = (*cursor_sector - *first_sector) as u64 * SD_SECTOR_SIZE as u64;
                Ok(buf.len())
            }
            Kind::Rom {
                device,
                cursor,
                size,
            } => {
                let remaining = size.saturating_sub(*cursor) as usize;
                let n = buf.len().min(remaining);
                if n == 0 {
                    return Ok(0);
                }
                device.read_at(*cursor, &mut buf[..n])?;
                *cursor += n as u64;
                Ok(n)
            }
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize, BackingStoreError> {
        match &mut self.kind {
            Kind::File { data, readonly, .. } => {
                if *readonly {
                    return Err(BackingStoreError::WriteProtected);
                }
                let start = self.file_cursor as usize;
                let end = (start + buf.len()).min(data.len());
                if end <= start {
                    return Err(BackingStoreError::OutOfRange);
                }
                let n = end - start;
                data.as_mut_slice()[start..end].copy_from_slice(&buf[..n]);
                self.file_cursor += n as u64;
                Ok(n)
            }
            Kind::Raw {
                device,
                cursor_sector,
                first_sector,
                last_sector,
                downgraded,
                byte_pos,
            } => {
                if *downgraded {
                    let n = raw_write_bytes(device.as_mut(), *first_sector, *last_sector, *byte_pos, buf)?;
                    *byte_pos += n as u64;
                    *cursor_sector = *first_sector + (*byte_pos / SD_SECTOR_SIZE as u64) as u32;
                    return Ok(n);
                }
                if !buf.len().is_multiple_of(SD_SECTOR_SIZE) {
                    return Err(BackingStoreError::OutOfRange);
                }
                let sectors = (buf.len() / SD_SECTOR_SIZE) as u32;
                if *cursor_sector + sectors > *last_sector + 1 {
                    return Err(BackingStoreError::OutOfRange);
                }
                device.write_sectors(*cursor_sector, buf)?;
                *cursor_sector += sectors;
                *byte_pos = (*cursor_sector - *first_sector) as u64 * SD_SECTOR_SIZE as u64;
                Ok(buf.len())
            }
            Kind::Rom { .. } => {
                log::error!("attempted to write to a ROM drive");
                Err(BackingStoreError::WriteProtected)
            }
        }
    }

    pub fn flush(&mut self) -> Result<(), BackingStoreError> {
        // mmap'd files are flushed by the OS on munmap/msync; raw and ROM
        // devices have no separate metadata to commit.
        Ok(())
    }

    pub fn position(&self) -> u64 {
        match &self.kind {
            Kind::File { .. } => self.file_cursor,
            Kind::Raw { byte_pos, .. } => *byte_pos,
            Kind::Rom { cursor, .. } => *cursor,
        }
    }

    pub fn image_path(&self) -> Option<&Path> {
        match &self.kind {
            Kind::File { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Services a byte-addressable read against a sector-granular `BlockDevice`
/// by round-tripping whole sectors and slicing out the requested range.
fn raw_read_bytes(
    device: &mut dyn BlockDevice,
    first_sector: u32,
    last_sector: u32,
    byte_pos: u64,
    buf: &mut [u8],
) -> Result<usize, BackingStoreError> {
    let mut done = 0;
    let mut pos = byte_pos;
    while done < buf.len() {
        let sector_index = first_sector + (pos / SD_SECTOR_SIZE as u64) as u32;
        if sector_index > last_sector {
            break;
        }
        let offset_in_sector = (pos % SD_SECTOR_SIZE as u64) as usize;
        let mut sector_buf = [0u8; SD_SECTOR_SIZE];
        device.read_sectors(sector_index, &mut sector_buf)?;
        let take = (SD_SECTOR_SIZE - offset_in_sector).min(buf.len() - done);
        buf[done..done + take].copy_from_slice(&sector_buf[offset_in_sector..offset_in_sector + take]);
        pos += take as u64;
        done += take;
    }
    Ok(done)
}

/// Services a byte-addressable write against a sector-granular `BlockDevice`
/// with a read-modify-write per touched sector.
fn raw_write_bytes(
    device: &mut dyn BlockDevice,
    first_sector: u32,
    last_sector: u32,
    byte_pos: u64,
    buf: &[u8],
) -> Result<usize, BackingStoreError> {
    let mut done = 0;
    let mut pos = byte_pos;
    while done < buf.len() {
        let sector_index = first_sector + (pos / SD_SECTOR_SIZE as u64) as u32;
        if sector_index > last_sector {
            break;
        }
        let offset_in_sector = (pos % SD_SECTOR_SIZE as u64) as usize;
        let mut sector_buf = [0u8; SD_SECTOR_SIZE];
        device.read_sectors(sector_index, &mut sector_buf)?;
        let take = (SD_SECTOR_SIZE - offset_in_sector).min(buf.len() - done);
        sector_buf[offset_in_sector..offset_in_sector + take].copy_from_slice(&buf[done..done + take]);
        device.write_sectors(sector_index, &sector_buf)?;
        pos += take as u64;
        done += take;
    }
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tempfile(bytes: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "scsi_target_core_test_{}_{:p}",
            std::process::id(),
            bytes
        ));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn read_write_round_trip_through_file_backing() {
        let data = vec![0u8; 4096];
        let path = tempfile(&data);
        let mut store = BackingStore::open(path.to_str().unwrap(), 512, None, None).unwrap();
        assert_eq!(store.size(), 4096);
        assert!(store.is_writable());

        store.seek(512).unwrap();
        store.write(&[0xAB; 512]).unwrap();

        store.seek(512).unwrap();
        let mut buf = [0u8; 512];
        store.read(&mut buf).unwrap();
        assert_eq!(buf, [0xAB; 512]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn parse_image_spec_recognizes_prefixes() {
        assert!(matches!(
            parse_image_spec("RAW:0:1000").unwrap(),
            ImageSpec::Raw {
                first_sector: 0,
                last_sector: 1000
            }
        ));
        assert!(matches!(parse_image_spec("ROM:").unwrap(), ImageSpec::Rom));
        assert!(matches!(
            parse_image_spec("HD10.img").unwrap(),
            ImageSpec::File(_)
        ));
    }

    #[test]
    fn unaligned_raw_size_is_rejected() {
        struct FakeDevice;
        impl BlockDevice for FakeDevice {
            fn sector_count(&self) -> u32 {
                1000
            }
            fn read_sectors(&mut self, _: u32, _: &mut [u8]) -> Result<(), BackingStoreError> {
                Ok(())
            }
            fn write_sectors(&mut self, _: u32, _: &[u8]) -> Result<(), BackingStoreError> {
                Ok(())
            }
        }

        let err = BackingStore::open("RAW:0:99", 300, Some(Box::new(FakeDevice)), None)
            .expect_err("300 is not a multiple of 512");
        assert!(matches!(
            err,
            BackingStoreError::UnsupportedBlockSize { .. }
        ));
    }

    struct MemoryDevice {
        sectors: Vec<[u8; SD_SECTOR_SIZE]>,
    }

    impl MemoryDevice {
        fn new(count: usize) -> Self {
            Self { sectors: vec![[0u8; SD_SECTOR_SIZE]; count] }
        }
    }

    impl BlockDevice for MemoryDevice {
        fn sector_count(&self) -> u32 {
            self.sectors.len() as u32
        }
        fn read_sectors(&mut self, first_sector: u32, buf: &mut [u8]) -> Result<(), BackingStoreError> {
            buf.copy_from_slice(&self.sectors[first_sector as usize]);
            Ok(())
        }
        fn write_sectors(&mut self, first_sector: u32, buf: &[u8]) -> Result<(), BackingStoreError> {
            self.sectors[first_sector as usize].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn misaligned_raw_seek_downgrades_instead_of_erroring() {
        let mut store =
            BackingStore::open("RAW:0:9", 512, Some(Box::new(MemoryDevice::new(10))), None).unwrap();

        store.seek(300).expect("misaligned seek downgrades rather than erroring");
        assert_eq!(store.position(), 300);

        let mut buf = [0u8; 8];
        let n = store.read(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(store.position(), 308);
    }

    #[test]
    fn downgraded_raw_write_then_read_round_trips_across_a_sector_boundary() {
        let mut store =
            BackingStore::open("RAW:0:9", 512, Some(Box::new(MemoryDevice::new(10))), None).unwrap();

        // Straddle the sector-0/sector-1 boundary.
        store.seek(510).unwrap();
        store.write(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();

        store.seek(510).unwrap();
        let mut buf = [0u8; 4];
        store.read(&mut buf).unwrap();
        assert_eq!(buf, [0xAA, 0xBB, 0xCC, 0xDD]);
    }
}
