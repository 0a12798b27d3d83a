//! Network target kind: a minimal, spec-consistent stub. The original
//! Ethernet-adapter emulation this models has no CDB table or wire framing
//! described anywhere in scope, so this only implements what the data
//! model commits to: a processor-type INQUIRY, an always-ready unit, and
//! a flat refusal of any data-transfer command. A full packet-level
//! implementation belongs on top of `Target`, the same way the disk/CD-ROM/
//! tape engines sit on top of it.

use crate::config::{DeviceKind, TargetConfig};
use crate::error::CommandError;

use super::{ScsiCmdResult, SenseState, Target};

pub struct NetworkTarget {
    config: TargetConfig,
    sense: SenseState,
}

impl NetworkTarget {
    pub fn new(mut config: TargetConfig) -> Self {
        config.kind = DeviceKind::Network;
        Self {
            config,
            sense: SenseState::default(),
        }
    }
}

impl Target for NetworkTarget {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Network
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
        (0x03, false) // processor device
    }

    fn mode_sense_page(&self, _page: u8) -> Option<Vec<u8>> {
        None
    }

    fn block_size(&self) -> usize {
        0
    }

    fn block_count(&self) -> u64 {
        0
    }

    fn specific_cmd(&mut self, _cdb: &[u8], _out_data: Option<&[u8]>) -> Result<ScsiCmdResult, CommandError> {
        Err(CommandError::InvalidCdbField)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_target_always_reports_ready_but_refuses_data_transfer() {
        let cfg = TargetConfig::new(0, DeviceKind::Network).unwrap();
        let mut target = NetworkTarget::new(cfg);
        assert!(target.unit_ready());
        let cdb = [0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0];
        assert!(target.specific_cmd(&cdb, None).is_err());
    }
}
