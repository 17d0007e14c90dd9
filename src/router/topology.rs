//! Local interface map of the border router: which interface ids exist,
//! which neighbor AS they lead to, and how to reach the far end on the
//! underlay.

use crate::types::{AsId, Error, IfId, Result};
use alloc::string::String;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub to_as: AsId,
    pub overlay: String,
}

#[derive(Clone, Debug, Default)]
pub struct Topology {
    pub local_as: AsId,
    interfaces: HashMap<IfId, LinkInfo>,
}

impl Topology {
    pub fn new(local_as: AsId) -> Self {
        Topology {
            local_as,
            interfaces: HashMap::new(),
        }
    }

    pub fn add_interface(&mut self, ifid: IfId, to_as: AsId, overlay: impl Into<String>) {
        self.interfaces.insert(
            ifid,
            LinkInfo {
                to_as,
                overlay: overlay.into(),
            },
        );
    }

    pub fn interface(&self, ifid: IfId) -> Option<&LinkInfo> {
        self.interfaces.get(&ifid)
    }

    /// The egress interface must exist locally or the packet is
    /// undeliverable.
    pub fn validate_local_if(&self, ifid: IfId) -> Result<&LinkInfo> {
        self.interfaces.get(&ifid).ok_or(Error::InvalidInterface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_rejects() {
        let mut topo = Topology::new(AsId(1));
        topo.add_interface(IfId(2), AsId(9), "10.0.0.9:30041");
        assert!(topo.validate_local_if(IfId(2)).is_ok());
        assert_eq!(
            topo.validate_local_if(IfId(3)).unwrap_err(),
            Error::InvalidInterface
        );
    }
}
