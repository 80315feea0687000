use serde::{Deserialize, Serialize};

/// Sentinel ASN meaning "the prefix itself has no upstream in this shard."
pub const ORIGIN_SENTINEL: &str = "0";

/// One month in seconds, per the reference implementation's lease arithmetic.
pub const MONTH_SECS: f64 = 2_629_743.83;

pub type Prefix = String;
pub type Asn = String;
pub type Txid = String;

/// A single holding of a prefix by an AS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseRecord {
    pub asn: Asn,
    pub lease_duration: u32,
    pub transfer_tag: bool,
    pub last_assign_txid: Txid,
}

/// Ordered set of current holders of a prefix.
pub type PrefixState = Vec<LeaseRecord>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BgpMeta {
    pub project: String,
    pub collector: String,
    pub asn_peer: String,
    pub bgp_timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignOutputItem {
    pub prefix: Prefix,
    pub as_dest: Asn,
    pub lease_duration: u32,
    pub transfer_tag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevokeOutput {
    pub prefix: Prefix,
    pub as_source: Asn,
    pub new_lease: u32,
    pub transfer_tag: bool,
    /// The revoked Assign's own `last_assign` (its ancestor txid, e.g. `"-1"`
    /// for a genesis-sourced Assign) -- not the Assign's own txid -- so the
    /// restored `as_source` record's ancestry is preserved across the revoke.
    pub last_assign: Txid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateOutputItem {
    pub prefix: Prefix,
    pub as_dest: Asn,
    pub new_lease: u32,
    pub transfer_tag: bool,
}

/// A single `(asSrc, asSource, asDst)` path recorded by a BGP announcement, one
/// per element of `asSourceList x asDestList`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BgpPath {
    pub prefix: Prefix,
    pub as_src: Asn,
    pub as_source: Asn,
    pub as_dst: Asn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignTx {
    pub txid: Txid,
    pub as_source: Asn,
    pub time: f64,
    pub signature: String,
    pub prefix: Prefix,
    pub as_dest_list: Vec<Asn>,
    pub source_lease: u32,
    pub lease_duration: u32,
    pub transfer_tag: bool,
    pub last_assign: Txid,
    pub output: Vec<AssignOutputItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevokeTx {
    pub txid: Txid,
    pub as_source: Asn,
    pub time: f64,
    pub signature: String,
    pub assign_txid: Txid,
    pub output: RevokeOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateTx {
    pub txid: Txid,
    pub as_source: Asn,
    pub time: f64,
    pub signature: String,
    pub assign_txid: Txid,
    pub new_lease: u32,
    pub output: Vec<UpdateOutputItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BgpAnnounceTx {
    pub txid: Txid,
    pub as_source: Asn,
    pub time: f64,
    pub signature: String,
    pub prefix: Prefix,
    pub as_source_list: Vec<Asn>,
    pub as_dest_list: Vec<Asn>,
    pub meta: BgpMeta,
    pub output: Vec<BgpPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BgpWithdrawTx {
    pub txid: Txid,
    pub as_source: Asn,
    pub time: f64,
    pub signature: String,
    pub prefix: Prefix,
    pub meta: BgpMeta,
}

/// Tagged union of the five on-chain transaction variants. Dispatch for
/// validation, application, and hashing goes through a single `match` rather
/// than dynamic dispatch (see the design rationale this crate follows for
/// transaction handling).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Transaction {
    Assign(AssignTx),
    Revoke(RevokeTx),
    Update(UpdateTx),
    #[serde(rename = "BGP Announce")]
    BgpAnnounce(BgpAnnounceTx),
    #[serde(rename = "BGP Withdraw")]
    BgpWithdraw(BgpWithdrawTx),
}

impl Transaction {
    pub fn txid(&self) -> &str {
        match self {
            Transaction::Assign(t) => &t.txid,
            Transaction::Revoke(t) => &t.txid,
            Transaction::Update(t) => &t.txid,
            Transaction::BgpAnnounce(t) => &t.txid,
            Transaction::BgpWithdraw(t) => &t.txid,
        }
    }

    pub fn as_source(&self) -> &str {
        match self {
            Transaction::Assign(t) => &t.as_source,
            Transaction::Revoke(t) => &t.as_source,
            Transaction::Update(t) => &t.as_source,
            Transaction::BgpAnnounce(t) => &t.as_source,
            Transaction::BgpWithdraw(t) => &t.as_source,
        }
    }

    pub fn time(&self) -> f64 {
        match self {
            Transaction::Assign(t) => t.time,
            Transaction::Revoke(t) => t.time,
            Transaction::Update(t) => t.time,
            Transaction::BgpAnnounce(t) => t.time,
            Transaction::BgpWithdraw(t) => t.time,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            Transaction::Assign(t) => &t.signature,
            Transaction::Revoke(t) => &t.signature,
            Transaction::Update(t) => &t.signature,
            Transaction::BgpAnnounce(t) => &t.signature,
            Transaction::BgpWithdraw(t) => &t.signature,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Transaction::Assign(_) => "Assign",
            Transaction::Revoke(_) => "Revoke",
            Transaction::Update(_) => "Update",
            Transaction::BgpAnnounce(_) => "BGP Announce",
            Transaction::BgpWithdraw(_) => "BGP Withdraw",
        }
    }
}

/// A mined block. `hash` and `signature` are populated once PoW/signing complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub index: u64,
    pub timestamp: f64,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
    pub miner_asn: Asn,
    pub signature: String,
    pub transactions: Vec<Transaction>,
}
