use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::chain::{compute_block_hash, proof_of_work, Chain};
use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::identity::NodeIdentity;
use crate::model::{Asn, Block, Prefix};
use crate::peer::{PeerInfo, PeerTable};

/// Standing bootstrap lease handed to every genesis holder, matching the
/// reference chain's seed constant.
pub const GENESIS_LEASE_MONTHS: u32 = 1000;

#[derive(Debug, Deserialize)]
struct PeerRecord {
    ip: String,
    port: u16,
    asn: Asn,
}

/// Loads `bgp_network.csv` (header + `ip,port,asn` rows) into a `PeerTable`.
/// A startup-fatal `ConfigError` on any parse failure: there is no state yet
/// worth protecting by carrying on with a partial peer set.
pub fn load_peers(path: &Path) -> NodeResult<PeerTable> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| NodeError::Config(format!("cannot read peers csv {}: {e}", path.display())))?;
    let mut table = PeerTable::new();
    for record in reader.deserialize::<PeerRecord>() {
        let record = record.map_err(|e| NodeError::Config(format!("malformed peer row in {}: {e}", path.display())))?;
        table.insert(PeerInfo { url: format!("http://{}:{}", record.ip, record.port), asn: record.asn, public_key_pem: None });
    }
    Ok(table)
}

/// Loads the prefix→AS bootstrap map: one `prefix,asn` pair per line, blank
/// lines and `#`-prefixed comments skipped.
pub fn load_prefix_map(path: &Path) -> NodeResult<Vec<(Asn, Prefix)>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| NodeError::Config(format!("cannot read prefix map {}: {e}", path.display())))?;
    let mut holdings = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, ',');
        let prefix = parts.next().map(str::trim);
        let asn = parts.next().map(str::trim);
        match (prefix, asn) {
            (Some(prefix), Some(asn)) if !prefix.is_empty() && !asn.is_empty() => {
                holdings.push((asn.to_string(), prefix.to_string()));
            }
            _ => {
                return Err(NodeError::Config(format!(
                    "malformed prefix map line {} in {}",
                    lineno + 1,
                    path.display()
                )))
            }
        }
    }
    Ok(holdings)
}

/// Builds and mines the genesis block: an empty transaction list, chained
/// from `previousHash = "-1"`, signed by this node's own key. Genesis carries
/// no transactions -- bootstrap holdings are seeded directly into
/// `WorldState` (see `crate::state::WorldState::seed_genesis`) rather than
/// recorded as ledger entries, matching the reference chain's out-of-band
/// genesis seeding.
pub fn build_genesis_block(identity: &NodeIdentity, timestamp: f64) -> NodeResult<Block> {
    let (nonce, hash) = proof_of_work(timestamp, "-1", &[]);
    let signature = hex::encode(identity.sign(hash.as_bytes())?);
    Ok(Block {
        index: 0,
        timestamp,
        previous_hash: "-1".to_string(),
        nonce,
        hash,
        miner_asn: identity.asn.clone(),
        signature,
        transactions: vec![],
    })
}

pub fn genesis_chain(identity: &NodeIdentity, timestamp: f64) -> NodeResult<Chain> {
    let mut chain = Chain::new();
    chain.push(build_genesis_block(identity, timestamp)?);
    Ok(chain)
}

/// Recomputes genesis's own hash to sanity-check it against `is_structurally_valid`'s
/// previous-hash linkage expectations for block 1; exposed for tests and for a
/// node verifying a peer-supplied genesis during `/resolve`.
pub fn genesis_hash(block: &Block) -> String {
    compute_block_hash(block.timestamp, &block.previous_hash, &block.transactions, block.nonce)
}

/// Full bootstrap: load peers + prefix map from the paths in `config`, seed
/// `WorldState`, and mine the genesis block. Any failure here is fatal -- the
/// caller (`main`) logs and exits non-zero.
pub fn bootstrap(
    config: &NodeConfig,
    identity: &NodeIdentity,
    timestamp: f64,
) -> NodeResult<(PeerTable, Vec<(Asn, Prefix)>, Chain)> {
    let peers = load_peers(&config.peers_csv)?;
    let holdings = load_prefix_map(&config.prefix_map)?;
    let chain = genesis_chain(identity, timestamp)?;
    Ok((peers, holdings, chain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_peers_parses_header_and_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ip,port,asn").unwrap();
        writeln!(file, "10.0.0.1,5000,8522").unwrap();
        writeln!(file, "10.0.0.2,5001,13335").unwrap();
        let peers = load_peers(file.path()).unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.is_known("8522"));
        assert!(peers.is_known("13335"));
    }

    #[test]
    fn load_prefix_map_skips_blank_and_comment_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# bootstrap map").unwrap();
        writeln!(file, "139.91.0.0/16,8522").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "1.3.33.0/24,133741").unwrap();
        let holdings = load_prefix_map(file.path()).unwrap();
        assert_eq!(holdings, vec![
            ("8522".to_string(), "139.91.0.0/16".to_string()),
            ("133741".to_string(), "1.3.33.0/24".to_string()),
        ]);
    }

    #[test]
    fn load_prefix_map_rejects_malformed_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this-has-no-comma").unwrap();
        assert!(load_prefix_map(file.path()).is_err());
    }

    #[test]
    fn genesis_block_hash_begins_with_difficulty_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let identity = NodeIdentity::load_or_generate("8522", &dir.path().join("key.pem")).unwrap();
        let block = build_genesis_block(&identity, 1.0).unwrap();
        assert!(block.hash.starts_with(crate::chain::DIFFICULTY_PREFIX));
        assert_eq!(genesis_hash(&block), block.hash);
    }
}
