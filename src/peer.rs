use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::Asn;

/// One known peer: its gossip URL, ASN, and (once exchanged) public key PEM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub url: String,
    pub asn: Asn,
    pub public_key_pem: Option<String>,
}

/// The node's view of the network: every known peer keyed by ASN, plus this
/// node's own entry so self-signed transactions verify too. Protected by
/// `asn_nodes_mutex`/`bc_nodes_mutex` in the concurrency model (see
/// `crate::node::Node`); this struct itself holds no lock.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: HashMap<Asn, PeerInfo>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: PeerInfo) {
        self.peers.insert(info.asn.clone(), info);
    }

    pub fn is_known(&self, asn: &str) -> bool {
        self.peers.contains_key(asn)
    }

    pub fn public_key_pem(&self, asn: &str) -> Option<String> {
        self.peers.get(asn).and_then(|p| p.public_key_pem.clone())
    }

    pub fn set_public_key(&mut self, asn: &str, pem: String) {
        if let Some(p) = self.peers.get_mut(asn) {
            p.public_key_pem = Some(pem);
        }
    }

    pub fn urls(&self) -> Vec<(String, Asn)> {
        self.peers.values().map(|p| (p.url.clone(), p.asn.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_asn_has_no_key() {
        let table = PeerTable::new();
        assert!(table.public_key_pem("65000").is_none());
        assert!(!table.is_known("65000"));
    }

    #[test]
    fn insert_then_set_key_round_trips() {
        let mut table = PeerTable::new();
        table.insert(PeerInfo { url: "http://x:5000".into(), asn: "65000".into(), public_key_pem: None });
        assert!(table.is_known("65000"));
        table.set_public_key("65000", "PEM".into());
        assert_eq!(table.public_key_pem("65000").unwrap(), "PEM");
    }
}
