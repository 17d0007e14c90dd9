//! Border-router key and topology state, loaded from a JSON file at
//! startup.

use crate::router::topology::Topology;
use crate::types::{AsId, Error, IfId, Result, Sv};
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IfaceEntry {
    pub id: u16,
    pub to_as: u64,
    pub overlay: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RouterConfig {
    pub local_as: u64,
    pub sv: [u8; 32],
    pub interfaces: Vec<IfaceEntry>,
}

impl RouterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path).map_err(|_| Error::Transport)?;
        serde_json::from_slice(&data).map_err(|_| Error::Transport)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_vec_pretty(self).map_err(|_| Error::Internal)?;
        std::fs::write(path, data).map_err(|_| Error::Transport)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_as == 0 || self.interfaces.is_empty() {
            return Err(Error::Internal);
        }
        Ok(())
    }

    pub fn into_parts(self) -> (AsId, Sv, Topology) {
        let local_as = AsId(self.local_as);
        let mut topo = Topology::new(local_as);
        for iface in &self.interfaces {
            topo.add_interface(IfId(iface.id), AsId(iface.to_as), iface.overlay.clone());
        }
        (local_as, Sv(self.sv), topo)
    }
}
