//! CD-ROM engine: READ TOC (formats 0-3), tray eject, and the disk-engine
//! read path reused for user-data sectors.
//!
//! TOC field layout is grounded on `formatTrackInfo`/`formatRawTrackInfo`:
//! MSF fields use `lba/75/60, lba/75%60, lba%75` with no 2-second lead-in
//! offset; the "raw" (full TOC) descriptor additionally carries session
//! number and uses the track's pregap start as its absolute-time field.

use crate::backing_store::BackingStore;
use crate::config::{DeviceKind, TargetConfig};
use crate::cue::{CueTrack, TrackType};
use crate::error::CommandError;
use crate::sense::STATUS_GOOD;
use crate::types::LatchingEvent;

use super::{ScsiCmdResult, SenseState, Target};

pub const TRACK_LEADOUT: u8 = 0xAA;

fn lba_to_msf(lba: u32) -> (u8, u8, u8) {
    ((lba / 75 / 60) as u8, (lba / 75 % 60) as u8, (lba % 75) as u8)
}

pub struct CdromTarget {
    config: TargetConfig,
    store: Option<BackingStore>,
    tracks: Vec<CueTrack>,
    sense: SenseState,
    event_eject: LatchingEvent,
    started: bool,
}

impl CdromTarget {
    pub fn new(mut config: TargetConfig) -> Self {
        config.kind = DeviceKind::Optical;
        if config.sector_size == 0 {
            config.sector_size = 2048;
        }
        Self {
            config,
            store: None,
            tracks: Vec::new(),
            sense: SenseState::default(),
            event_eject: LatchingEvent::default(),
            started: true,
        }
    }

    pub fn load(&mut self, store: BackingStore, tracks: Vec<CueTrack>) {
        self.store = Some(store);
        self.tracks = tracks;
        self.event_eject = LatchingEvent::default();
    }

    pub fn eject_media(&mut self) {
        self.store = None;
        self.event_eject.set();
    }

    /// `None` once consumed; `Some(0x03)` (media removed) the one time
    /// after an eject.
    pub fn take_event(&mut self) -> Option<u8> {
        if self.event_eject.get_clear() {
            Some(0x03)
        } else {
            None
        }
    }

    fn blocks(&self) -> u64 {
        self.store
            .as_ref()
            .map(|s| s.size().div_ceil(self.config.sector_size as u64))
            .unwrap_or(0)
    }

    fn leadout_lba(&self) -> u32 {
        self.blocks() as u32
    }

    /// Synthesizes the format-0 (plain) TOC. Falls back to a single
    /// hardcoded data track spanning the whole image when no CUE sheet was
    /// loaded, matching the reference firmware's behavior for a bare .iso.
    fn read_toc(&self, msf: bool, track: u8, alloc_len: usize) -> Result<Vec<u8>, CommandError> {
        let tracks: Vec<CueTrack> = if self.tracks.is_empty() {
            vec![CueTrack {
                number: 1,
                track_type: TrackType::Data,
                data_start: 0,
                pregap_start: 0,
            }]
        } else {
            self.tracks.clone()
        };

        if track == TRACK_LEADOUT {
            let mut result = vec![0u8; 12];
            result[1] = 10;
            result[2] = 1;
            result[3] = 1;
            result[7] = 0x14;
            result[8] = TRACK_LEADOUT;
            write_addr(&mut result[8..12], self.leadout_lba(), msf);
            result.truncate(alloc_len.max(4));
            return Ok(result);
        }

        if track != 0 && track != 1 {
            return Err(CommandError::InvalidCdbField);
        }

        let mut result = vec![0u8; 4 + 8 * (tracks.len() + 1)];
        result[2] = tracks.first().map(|t| t.number).unwrap_or(1);
        result[3] = TRACK_LEADOUT;

        let mut offset = 4;
        for t in &tracks {
            let control = if t.track_type == TrackType::Audio { 0x10 } else { 0x14 };
            result[offset + 1] = control;
            result[offset + 2] = t.number;
            write_addr(&mut result[offset + 4..offset + 8], t.data_start, msf);
            offset += 8;
        }
        result[offset + 1] = 0x14;
        result[offset + 2] = TRACK_LEADOUT;
        write_addr(&mut result[offset + 4..offset + 8], self.leadout_lba(), msf);

        let total_len = (result.len() - 2) as u16;
        result[0..2].copy_from_slice(&total_len.to_be_bytes());
        result.truncate(alloc_len.max(4));
        Ok(result)
    }

    /// Synthesizes the format-2/3 ("full TOC") response: A0/A1/A2/B0/C0
    /// session-boundary records followed by one descriptor per track.
    /// Format 3 additionally BCD-encodes every time field.
    fn read_full_toc(&self, bcd: bool, alloc_len: usize) -> Vec<u8> {
        let tracks: Vec<CueTrack> = if self.tracks.is_empty() {
            vec![CueTrack {
                number: 1,
                track_type: TrackType::Data,
                data_start: 0,
                pregap_start: 0,
            }]
        } else {
            self.tracks.clone()
        };
        let first_track = tracks.first().map(|t| t.number).unwrap_or(1);
        let last_track = tracks.last().map(|t| t.number).unwrap_or(1);
        let (lm, ls, lf) = lba_to_msf(self.leadout_lba());

        let mut body = Vec::new();
        push_full_toc_entry(&mut body, 0xA0, 0, 0, 0, 0, first_track, 0x00, 0, bcd);
        push_full_toc_entry(&mut body, 0xA1, 0, 0, 0, 0, last_track, 0, 0, bcd);
        push_full_toc_entry(&mut body, 0xA2, 0, 0, 0, 0, lm, ls, lf, bcd);
        // Single-session image: no next-session pointer (B0) or ATIP (C0)
        // data applies, but the reference builder always emits the markers.
        push_full_toc_entry(&mut body, 0xB0, 0, 0, 0, 0, 0, 0, 0, bcd);
        push_full_toc_entry(&mut body, 0xC0, 0, 0, 0, 0, 0, 0, 0, bcd);

        for t in &tracks {
            let control = if t.track_type == TrackType::Audio { 0x10 } else { 0x14 };
            let (m, s, f) = lba_to_msf(t.data_start);
            push_full_toc_entry(&mut body, t.number, control, 0, 0, 0, m, s, f, bcd);
        }

        let mut result = vec![0u8; 4 + body.len()];
        let total_len = (result.len() - 2) as u16;
        result[0..2].copy_from_slice(&total_len.to_be_bytes());
        result[2] = 1; // first complete session
        result[3] = 1; // last complete session
        result[4..].copy_from_slice(&body);
        result.truncate(alloc_len.max(4));
        result
    }
}

/// One 11-byte full-TOC descriptor: session/ADR-control/TNO/POINT, the
/// absolute (min,sec,frame), a zero byte, then PMIN/PSEC/PFRAME.
#[allow(clippy::too_many_arguments)]
fn push_full_toc_entry(
    out: &mut Vec<u8>,
    point: u8,
    adr_control: u8,
    min: u8,
    sec: u8,
    frame: u8,
    pmin: u8,
    psec: u8,
    pframe: u8,
    bcd: bool,
) {
    let enc = |v: u8| if bcd { to_bcd(v) } else { v };
    let control = if adr_control == 0 { 0x10 } else { adr_control };
    out.push(1); // session number: always 1 for a single-session image
    out.push(control);
    out.push(0); // TNO
    out.push(point);
    out.push(enc(min));
    out.push(enc(sec));
    out.push(enc(frame));
    out.push(0);
    out.push(enc(pmin));
    out.push(enc(psec));
    out.push(enc(pframe));
}

fn to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

fn write_addr(dst: &mut [u8], lba: u32, msf: bool) {
    if msf {
        let (m, s, f) = lba_to_msf(lba);
        dst[1] = m;
        dst[2] = s;
        dst[3] = f;
    } else {
        dst.copy_from_slice(&lba.to_be_bytes());
    }
}

impl Target for CdromTarget {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Optical
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
        (0x05, true)
    }

    fn mode_sense_page(&self, page: u8) -> Option<Vec<u8>> {
        match page {
            0x0D => Some(vec![0x0D, 0x06, 0, 0, 0, 0x3C, 0x00, 0x0F]),
            0x0E => Some(vec![0x0E, 0x0E, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            0x2A => Some(vec![0x2A, 0x14, 0x3F, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            _ => None,
        }
    }

    fn block_size(&self) -> usize {
        self.config.sector_size
    }

    fn block_count(&self) -> u64 {
        self.blocks()
    }

    fn specific_cmd(&mut self, cdb: &[u8], _out_data: Option<&[u8]>) -> Result<ScsiCmdResult, CommandError> {
        match cdb[0] {
            0x08 | 0x28 => {
                let store = self.store.as_mut().ok_or(CommandError::MediumNotPresent)?;
                let sector_size = self.config.sector_size as u64;
                let (lba, count) = if cdb[0] == 0x08 {
                    let lba = (((cdb[1] & 0x1F) as u64) << 16) | ((cdb[2] as u64) << 8) | cdb[3] as u64;
                    let count = if cdb[4] == 0 { 256 } else { cdb[4] as u64 };
                    (lba, count)
                } else {
                    let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]) as u64;
                    let count = u16::from_be_bytes([cdb[7], cdb[8]]) as u64;
                    (lba, count)
                };
                store.seek(lba * sector_size).map_err(|_| CommandError::LbaOutOfRange)?;
                let mut buf = vec![0u8; (count * sector_size) as usize];
                let n = store.read(&mut buf).unwrap_or(0);
                if n < buf.len() {
                    // Short final sector on an unpadded image: zero-fill the tail.
                    for b in &mut buf[n..] {
                        *b = 0;
                    }
                }
                Ok(ScsiCmdResult::DataIn(buf))
            }
            0x0A | 0x2A => {
                log::error!("attempted to write to CD-ROM");
                Err(CommandError::WriteProtected)
            }
            0x1B => {
                let code = cdb[4] & 0b11;
                if code == 0b10 {
                    self.eject_media();
                }
                self.started = code != 0b10;
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x1E => Ok(ScsiCmdResult::Status(STATUS_GOOD)),
            0x25 => {
                let last_lba = self.blocks().saturating_sub(1) as u32;
                let mut data = vec![0u8; 8];
                data[0..4].copy_from_slice(&last_lba.to_be_bytes());
                data[4..8].copy_from_slice(&(self.config.sector_size as u32).to_be_bytes());
                Ok(ScsiCmdResult::DataIn(data))
            }
            0x43 => {
                let format = cdb[9] >> 6;
                let track = cdb[6];
                let alloc_len = u16::from_be_bytes([cdb[7], cdb[8]]) as usize;
                let msf = cdb[1] & 0x02 != 0;
                match format {
                    0 => Ok(ScsiCmdResult::DataIn(self.read_toc(msf, track, alloc_len)?)),
                    1 => {
                        // session info: single-session, single-track image.
                        let mut result = vec![0u8; 12];
                        result[1] = 10;
                        result[2] = 1;
                        result[3] = 1;
                        result[7] = 0x14;
                        result[8] = 1;
                        Ok(ScsiCmdResult::DataIn(result))
                    }
                    2 => Ok(ScsiCmdResult::DataIn(self.read_full_toc(false, alloc_len))),
                    3 => Ok(ScsiCmdResult::DataIn(self.read_full_toc(true, alloc_len))),
                    _ => Err(CommandError::InvalidCdbField),
                }
            }
            0x44 => {
                // READ HEADER: data mode byte + start address of the block
                // addressed by the CDB (mode 1, the only data-track mode
                // this engine models).
                let msf = cdb[1] & 0x02 != 0;
                let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
                let mut data = vec![0u8; 8];
                data[0] = 0x01;
                write_addr(&mut data[4..8], lba, msf);
                Ok(ScsiCmdResult::DataIn(data))
            }
            0x4A => {
                // GET EVENT STATUS NOTIFICATION: media class only (tray
                // eject / media-removal events raised by `eject_media`).
                let class_request = cdb[4];
                let mut data = vec![0u8; 8];
                if class_request & 0x10 == 0 {
                    data[2] = 0x80; // NEA: requested class unsupported
                } else if let Some(event_code) = self.take_event() {
                    data[2] = 0x04; // notification class: media
                    data[3] = 0x10; // supported classes: media
                    data[4] = event_code;
                    data[5] = if self.store.is_some() { 0x02 } else { 0x00 };
                } else {
                    data[2] = 0x80 | 0x04; // NEA, no event pending
                    data[3] = 0x10;
                }
                data[0..2].copy_from_slice(&4u16.to_be_bytes());
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
        path.push(format!("scsi_target_core_cdrom_test_{}", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![0u8; size]).unwrap();
        BackingStore::open(path.to_str().unwrap(), sector_size, None, None).unwrap()
    }

    #[test]
    fn write_to_cdrom_is_always_rejected() {
        let cfg = TargetConfig::new(0, DeviceKind::Optical).unwrap();
        let mut target = CdromTarget::new(cfg);
        target.load(tempfile_store(2048 * 4, 2048), vec![]);
        let cdb = [0x2A, 0, 0, 0, 0, 0, 0, 0, 1, 0];
        let err = target.specific_cmd(&cdb, Some(&[0u8; 2048])).unwrap_err();
        assert_eq!(err, CommandError::WriteProtected);
    }

    #[test]
    fn toc_with_two_tracks_has_correct_leadout() {
        let cfg = TargetConfig::new(0, DeviceKind::Optical).unwrap();
        let mut target = CdromTarget::new(cfg);
        let image_sectors = 23_567 + 100;
        target.load(
            tempfile_store(2048 * image_sectors, 2048),
            vec![
                CueTrack { number: 1, track_type: TrackType::Audio, data_start: 0, pregap_start: 0 },
                CueTrack { number: 2, track_type: TrackType::Data, data_start: 23_567, pregap_start: 23_567 },
            ],
        );

        let data = target.read_toc(false, 0, 1024).unwrap();
        assert_eq!(data[2], 1);
        assert_eq!(data[3], TRACK_LEADOUT);
        // first track descriptor
        assert_eq!(data[4 + 1], 0x10);
        assert_eq!(data[4 + 2], 1);
        // second track descriptor
        assert_eq!(data[12 + 1], 0x14);
        assert_eq!(data[12 + 2], 2);
        let second_lba = u32::from_be_bytes([data[12 + 4], data[12 + 5], data[12 + 6], data[12 + 7]]);
        assert_eq!(second_lba, 23_567);
    }

    #[test]
    fn full_toc_format_2_lists_session_markers_before_tracks() {
        let cfg = TargetConfig::new(0, DeviceKind::Optical).unwrap();
        let mut target = CdromTarget::new(cfg);
        target.load(
            tempfile_store(2048 * 4, 2048),
            vec![CueTrack { number: 1, track_type: TrackType::Data, data_start: 0, pregap_start: 0 }],
        );
        let data = target.read_full_toc(false, 1024);
        // A0 / A1 / A2 / B0 / C0 (5 * 11 bytes), then one track descriptor.
        assert_eq!(data[4 + 3], 0xA0);
        assert_eq!(data[4 + 11 + 3], 0xA1);
        assert_eq!(data[4 + 22 + 3], 0xA2);
        assert_eq!(data[4 + 33 + 3], 0xB0);
        assert_eq!(data[4 + 44 + 3], 0xC0);
        assert_eq!(data[4 + 55 + 3], 1); // first (and only) track's POINT
    }

    #[test]
    fn full_toc_format_3_bcd_encodes_time_fields() {
        let cfg = TargetConfig::new(0, DeviceKind::Optical).unwrap();
        let mut target = CdromTarget::new(cfg);
        target.load(
            tempfile_store(2048 * (75 * 12 + 1), 2048),
            vec![CueTrack { number: 1, track_type: TrackType::Data, data_start: 0, pregap_start: 0 }],
        );
        // leadout lba = 75*12 (= exactly 12 seconds): M=0,S=12,F=0 -> BCD 0x12
        // in the A2 entry's PSEC field (local byte index 9).
        let data = target.read_full_toc(true, 1024);
        assert_eq!(data[4 + 22 + 9], 0x12);
    }

    #[test]
    fn get_event_status_reports_media_removal_once() {
        let cfg = TargetConfig::new(0, DeviceKind::Optical).unwrap();
        let mut target = CdromTarget::new(cfg);
        target.load(tempfile_store(2048 * 4, 2048), vec![]);
        target.eject_media();

        let cdb = [0x4A, 0, 0, 0, 0x10, 0, 0, 0, 8, 0];
        let data = match target.specific_cmd(&cdb, None).unwrap() {
            ScsiCmdResult::DataIn(d) => d,
            _ => panic!("expected DataIn"),
        };
        assert_eq!(data[2], 0x04);
        assert_eq!(data[4], 0x03);

        let data = match target.specific_cmd(&cdb, None).unwrap() {
            ScsiCmdResult::DataIn(d) => d,
            _ => panic!("expected DataIn"),
        };
        assert_eq!(data[2], 0x80 | 0x04); // NEA: no second event queued
    }

    #[test]
    fn eject_raises_removal_event_once() {
        let cfg = TargetConfig::new(0, DeviceKind::Optical).unwrap();
        let mut target = CdromTarget::new(cfg);
        target.load(tempfile_store(2048 * 4, 2048), vec![]);
        target.eject_media();
        assert!(!target.unit_ready());
        assert_eq!(target.take_event(), Some(0x03));
        assert_eq!(target.take_event(), None);
    }
}
