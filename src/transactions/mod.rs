//! The five transaction variants and their pure validators. Each validator
//! reads an immutable snapshot of world state (and, for Revoke/Update, the
//! chain's assign lookup) and either returns the fully-built `Transaction`
//! (input/output populated) or a `NodeError::SemanticInvalid`/`Malformed`.

pub mod assign;
pub mod bgp_announce;
pub mod bgp_withdraw;
pub mod revoke;
pub mod update;

use sha2::{Digest, Sha256};

use crate::error::{NodeError, NodeResult};
use crate::peer::PeerTable;

pub use assign::{build_assign, AssignRequest};
pub use bgp_announce::{build_bgp_announce, BgpAnnounceRequest};
pub use bgp_withdraw::{build_bgp_withdraw, BgpWithdrawRequest};
pub use revoke::{build_revoke, RevokeRequest};
pub use update::{build_update, UpdateRequest};

/// `txid = SHA-256(asSource || keyfield || time)`, hex-encoded -- the common
/// formula every variant's `calculate_hash` follows, with `keyfield` varying
/// per variant.
pub fn compute_txid(as_source: &str, keyfield: &str, time: f64) -> String {
    let msg = format!("{as_source}{keyfield}{time}");
    hex::encode(Sha256::digest(msg.as_bytes()))
}

/// Verifies a transaction's signature against the asSource's public key in
/// the peer directory, rejecting unknown peers and bad signatures alike as
/// `SignatureInvalid` (the spec treats signature failure as semantic invalid).
pub fn verify_source_signature(
    peers: &PeerTable,
    as_source: &str,
    txid: &str,
    signature_hex: &str,
) -> NodeResult<()> {
    let pem = peers.public_key_pem(as_source).ok_or(NodeError::SignatureInvalid)?;
    let sig = hex::decode(signature_hex).map_err(|_| NodeError::SignatureInvalid)?;
    crate::identity::verify(&pem, txid.as_bytes(), &sig).map_err(|_| NodeError::SignatureInvalid)
}

pub fn require_known_peers(peers: &PeerTable, asns: &[String]) -> NodeResult<()> {
    for asn in asns {
        if !peers.is_known(asn) {
            return Err(NodeError::SemanticInvalid(format!("unknown ASN {asn}")));
        }
    }
    Ok(())
}
