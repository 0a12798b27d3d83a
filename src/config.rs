//! Typed configuration model (C8): the projection of an already-parsed
//! `section -> key -> value` view into per-target and global settings.
//! Parsing the `.ini` text itself, and walking directories for image
//! files, are external collaborators; this module only validates and
//! defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type SectionView = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum DeviceKind {
    Fixed,
    Removable,
    Optical,
    Floppy,
    MagnetoOptical,
    Tape,
    Sequential,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quirks {
    None,
    Apple,
    Omti,
    OmtiLike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemPreset {
    None,
    Mac,
    MacPlus,
    Mpc3000,
}

impl SystemPreset {
    fn parse(s: &str) -> Self {
        match s {
            "Mac" => Self::Mac,
            "MacPlus" => Self::MacPlus,
            "MPC3000" => Self::Mpc3000,
            _ => Self::None,
        }
    }

    /// Defaults bundle applied before any explicit `[SCSI]`/`[SCSIn]` keys
    /// are layered on top.
    pub fn defaults(self) -> PresetDefaults {
        match self {
            Self::None => PresetDefaults::default(),
            Self::Mac => PresetDefaults {
                quirks: Quirks::Apple,
                enable_scsi2: true,
                enable_sel_latch: true,
                selection_delay_ms: 0,
            },
            Self::MacPlus => PresetDefaults {
                quirks: Quirks::Apple,
                enable_scsi2: false,
                enable_sel_latch: true,
                selection_delay_ms: 0,
            },
            Self::Mpc3000 => PresetDefaults {
                quirks: Quirks::Omti,
                enable_scsi2: false,
                enable_sel_latch: false,
                selection_delay_ms: 10,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PresetDefaults {
    pub quirks: Quirks,
    pub enable_scsi2: bool,
    pub enable_sel_latch: bool,
    pub selection_delay_ms: u32,
}

impl Default for PresetDefaults {
    fn default() -> Self {
        Self {
            quirks: Quirks::None,
            enable_scsi2: true,
            enable_sel_latch: false,
            selection_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub initiator_id: u8,
    pub debug: bool,
    pub log_mask: u8,
    pub enable_unit_attention: bool,
    pub enable_scsi2: bool,
    pub enable_sel_latch: bool,
    pub map_luns_to_ids: bool,
    pub enable_parity: bool,
    pub max_sync_speed_mbs: u32,
    pub selection_delay_ms: u32,
    pub system: SystemPreset,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            initiator_id: 7,
            debug: false,
            log_mask: 0xFF,
            enable_unit_attention: true,
            enable_scsi2: true,
            enable_sel_latch: false,
            map_luns_to_ids: false,
            enable_parity: true,
            max_sync_speed_mbs: 10,
            selection_delay_ms: 0,
            system: SystemPreset::None,
        }
    }
}

impl GlobalConfig {
    pub fn from_sections(sections: &SectionView) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let Some(scsi) = sections.get("SCSI") else {
            return Ok(cfg);
        };

        if let Some(v) = scsi.get("System") {
            cfg.system = SystemPreset::parse(v);
            let defaults = cfg.system.defaults();
            cfg.enable_scsi2 = defaults.enable_scsi2;
            cfg.enable_sel_latch = defaults.enable_sel_latch;
            cfg.selection_delay_ms = defaults.selection_delay_ms;
        }
        if let Some(v) = scsi.get("InitiatorID") {
            cfg.initiator_id = parse_key(scsi, "InitiatorID", v)?;
        }
        if let Some(v) = scsi.get("Debug") {
            cfg.debug = parse_bool(v);
        }
        if let Some(v) = scsi.get("LogMask") {
            cfg.log_mask = parse_key(scsi, "LogMask", v)?;
        }
        if let Some(v) = scsi.get("EnableUnitAttention") {
            cfg.enable_unit_attention = parse_bool(v);
        }
        if let Some(v) = scsi.get("EnableSCSI2") {
            cfg.enable_scsi2 = parse_bool(v);
        }
        if let Some(v) = scsi.get("EnableSelLatch") {
            cfg.enable_sel_latch = parse_bool(v);
        }
        if let Some(v) = scsi.get("MapLunsToIDs") {
            cfg.map_luns_to_ids = parse_bool(v);
        }
        if let Some(v) = scsi.get("EnableParity") {
            cfg.enable_parity = parse_bool(v);
        }
        if let Some(v) = scsi.get("MaxSyncSpeed") {
            cfg.max_sync_speed_mbs = parse_key(scsi, "MaxSyncSpeed", v)?;
        }
        if let Some(v) = scsi.get("SelectionDelay") {
            cfg.selection_delay_ms = parse_key(scsi, "SelectionDelay", v)?;
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: u8,
    pub kind: DeviceKind,
    pub sectors_per_track: u32,
    pub heads_per_cylinder: u32,
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
    pub serial: [u8; 8],
    pub sector_size: usize,
    pub quirks: Quirks,
    pub prefetch_bytes: u32,
    pub right_align_strings: bool,
    pub reinsert_cd_on_inquiry: bool,
}

const VALID_SECTOR_SIZES: [usize; 6] = [256, 512, 1024, 2048, 4096, 8192];

impl TargetConfig {
    pub fn new(id: u8, kind: DeviceKind) -> Result<Self, ConfigError> {
        if id > 7 {
            return Err(ConfigError::TargetIdOutOfRange(id));
        }
        let default_sector_size = if kind == DeviceKind::Optical { 2048 } else { 512 };
        Ok(Self {
            id,
            kind,
            sectors_per_track: 63,
            heads_per_cylinder: 255,
            vendor: pad_ascii_n::<8>(b"SCSI2SD ", 8, false),
            product: pad_ascii_n::<16>(b"TARGET CORE     ", 16, false),
            revision: pad_ascii_n::<4>(b"1.0 ", 4, false),
            serial: pad_ascii_n::<8>(b"        ", 8, false),
            sector_size: default_sector_size,
            quirks: Quirks::None,
            prefetch_bytes: 0,
            right_align_strings: false,
            reinsert_cd_on_inquiry: false,
        })
    }

    pub fn from_section(
        id: u8,
        section: &HashMap<String, String>,
        preset: &PresetDefaults,
    ) -> Result<Self, ConfigError> {
        let kind = match section.get("Type").map(String::as_str) {
            Some("fixed") | None => DeviceKind::Fixed,
            Some("removable") => DeviceKind::Removable,
            Some("optical") => DeviceKind::Optical,
            Some("floppy") => DeviceKind::Floppy,
            Some("mo") => DeviceKind::MagnetoOptical,
            Some("sequential") => DeviceKind::Sequential,
            Some("tape") => DeviceKind::Tape,
            Some("network") => DeviceKind::Network,
            Some(other) => return Err(ConfigError::UnknownDeviceKind(other.to_string())),
        };

        let mut cfg = Self::new(id, kind)?;
        cfg.quirks = preset.quirks;

        if let Some(v) = section.get("SectorsPerTrack") {
            cfg.sectors_per_track = parse_key(section, "SectorsPerTrack", v)?;
        }
        if let Some(v) = section.get("HeadsPerCylinder") {
            cfg.heads_per_cylinder = parse_key(section, "HeadsPerCylinder", v)?;
        }
        if let Some(v) = section.get("Vendor") {
            cfg.vendor = pad_ascii_n::<8>(v.as_bytes(), 8, cfg.right_align_strings);
        }
        if let Some(v) = section.get("Product") {
            cfg.product = pad_ascii_n::<16>(v.as_bytes(), 16, cfg.right_align_strings);
        }
        if let Some(v) = section.get("Version") {
            cfg.revision = pad_ascii_n::<4>(v.as_bytes(), 4, cfg.right_align_strings);
        }
        if let Some(v) = section.get("Serial") {
            cfg.serial = pad_ascii_n::<8>(v.as_bytes(), 8, cfg.right_align_strings);
        }
        if let Some(v) = section.get("PrefetchBytes") {
            cfg.prefetch_bytes = parse_key(section, "PrefetchBytes", v)?;
        }
        if let Some(v) = section.get("RightAlignStrings") {
            cfg.right_align_strings = parse_bool(v);
        }
        if let Some(v) = section.get("ReinsertCDOnInquiry") {
            cfg.reinsert_cd_on_inquiry = parse_bool(v);
        }
        if let Some(v) = section.get("Quirks") {
            cfg.quirks = match v.as_str() {
                "apple" => Quirks::Apple,
                "omti" => Quirks::Omti,
                "omti-like" => Quirks::OmtiLike,
                _ => Quirks::None,
            };
        }

        let sector_size: usize = match section.get("SectorSize") {
            Some(v) => parse_key(section, "SectorSize", v)?,
            None => cfg.sector_size,
        };
        if !VALID_SECTOR_SIZES.contains(&sector_size) {
            return Err(ConfigError::UnsupportedSectorSize(sector_size));
        }
        cfg.sector_size = sector_size;

        Ok(cfg)
    }
}

// Only 4/8/16-length fields appear in the data model (revision/vendor-
// and-serial/product respectively).
fn pad_ascii_n<const N: usize>(bytes: &[u8], len: usize, right_align: bool) -> [u8; N] {
    debug_assert!(len <= N);
    let mut out = [0x20u8; N];
    let take = bytes.len().min(len);
    if right_align {
        out[(len - take)..len].copy_from_slice(&bytes[..take]);
    } else {
        out[..take].copy_from_slice(&bytes[..take]);
    }
    out
}

fn parse_bool(v: &str) -> bool {
    matches!(v, "1" | "true" | "True" | "yes" | "on")
}

fn parse_key<T: std::str::FromStr>(
    _section: &HashMap<String, String>,
    key: &str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_preset_enables_apple_quirks_and_sel_latch() {
        let defaults = SystemPreset::Mac.defaults();
        assert_eq!(defaults.quirks, Quirks::Apple);
        assert!(defaults.enable_sel_latch);
    }

    #[test]
    fn unsupported_sector_size_is_rejected() {
        let mut section = HashMap::new();
        section.insert("SectorSize".to_string(), "300".to_string());
        let err = TargetConfig::from_section(0, &section, &PresetDefaults::default())
            .expect_err("300 isn't a valid SCSI sector size");
        assert!(matches!(err, ConfigError::UnsupportedSectorSize(300)));
    }

    #[test]
    fn vendor_string_is_space_padded() {
        let cfg = TargetConfig::new(0, DeviceKind::Fixed).unwrap();
        assert_eq!(&cfg.vendor, b"SCSI2SD ");
    }

    #[test]
    fn omti_like_quirks_string_is_recognized() {
        let mut section = HashMap::new();
        section.insert("Quirks".to_string(), "omti-like".to_string());
        let cfg = TargetConfig::from_section(0, &section, &PresetDefaults::default()).unwrap();
        assert_eq!(cfg.quirks, Quirks::OmtiLike);
    }
}
