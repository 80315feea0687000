use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::chain::Chain;
use crate::model::{Asn, Prefix, Transaction, Txid};

/// Pending pool plus the per-round dedupe/accounting structures of §4.4/§4.5.
/// Guarded by `pt_mutex` in the concurrency model (`crate::node::Node`); this
/// struct itself is plain data.
#[derive(Debug, Default)]
pub struct PendingPool {
    pub transactions: Vec<Transaction>,
    /// Assigns this node issued, kept so an auto-Revoke can be synthesized
    /// once a replay discovers the lease has expired.
    pub my_assignments: HashSet<Txid>,
    /// Per advertising AS: hashes of announcements broadcast since its last
    /// Withdraw. `true` means "currently active, don't re-accept a duplicate."
    bgp_txid_announced: HashMap<String, bool>,
    as_to_announced_txids: HashMap<Asn, HashSet<String>>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Drops from the pool any transaction already present in the (possibly
    /// just-replaced) chain -- step 1 of the mining pipeline, after
    /// `resolveConflicts`.
    pub fn drop_already_chained(&mut self, chain: &Chain) {
        self.transactions.retain(|t| !chain.txid_to_block.contains_key(t.txid()));
    }

    /// Step 2: BGPAnnounce transactions whose prefix is in the
    /// "assigned-in-this-round" set never reach the BGP ledger.
    pub fn drop_announces_for_assigned(&mut self, assigned_this_round: &HashSet<Prefix>) {
        self.transactions.retain(|t| match t {
            Transaction::BgpAnnounce(a) => !assigned_this_round.contains(&a.prefix),
            _ => true,
        });
    }

    /// Step 3: lease-sum pruning. Assigns are capped by their own
    /// `source_lease`. Updates are gated by a single running maximum shared
    /// across the whole pass -- not per `as_source` -- matching the
    /// reference `check_lease`'s `current_update_lease`: an Update only gets
    /// a chance to be kept if its `new_lease` exceeds every lease accepted
    /// so far in this pass, by any AS. Once past that gate, the per-AS sum
    /// against the referenced Assign's `source_lease` still applies.
    pub fn lease_sum_prune(&mut self, chain: &Chain) {
        let mut assign_sum: HashMap<Asn, u32> = HashMap::new();
        let mut update_sum: HashMap<Asn, u32> = HashMap::new();
        let mut current_update_lease: i64 = -2000;

        let drained: Vec<Transaction> = self.transactions.drain(..).collect();
        let mut kept = Vec::with_capacity(drained.len());

        for tx in drained {
            match &tx {
                Transaction::Assign(a) => {
                    let sum = assign_sum.entry(a.as_source.clone()).or_insert(0);
                    *sum += a.lease_duration;
                    if *sum <= a.source_lease {
                        kept.push(tx);
                    }
                }
                Transaction::Update(u) => {
                    let Some(assign) = chain.find_assign(&u.assign_txid) else { continue };
                    if u.new_lease as i64 > current_update_lease {
                        current_update_lease = u.new_lease as i64;
                        let sum = update_sum.entry(u.as_source.clone()).or_insert(0);
                        *sum += u.new_lease;
                        if *sum <= assign.source_lease {
                            kept.push(tx);
                        }
                    }
                }
                _ => kept.push(tx),
            }
        }
        self.transactions = kept;
    }

    pub fn has_pending_withdraw(&self, prefix: &str, as_source: &str) -> bool {
        self.transactions.iter().any(|t| match t {
            Transaction::BgpWithdraw(w) => w.prefix == prefix && w.as_source == as_source,
            _ => false,
        })
    }

    /// `sha256(as_source || prefix || as_source_list || as_dest_list ||
    /// bgp_timestamp)`, the memoization key for the duplicate-announce guard.
    pub fn announce_dedupe_hash(
        as_source: &str,
        prefix: &str,
        as_source_list: &[Asn],
        as_dest_list: &[Asn],
        bgp_timestamp: f64,
    ) -> String {
        let msg = format!("{as_source}{prefix}{as_source_list:?}{as_dest_list:?}{bgp_timestamp}");
        hex::encode(Sha256::digest(msg.as_bytes()))
    }

    pub fn is_duplicate_announce(&self, hash: &str) -> bool {
        self.bgp_txid_announced.get(hash).copied().unwrap_or(false)
    }

    pub fn mark_announced(&mut self, as_source: &str, hash: String) {
        self.bgp_txid_announced.insert(hash.clone(), true);
        self.as_to_announced_txids.entry(as_source.to_string()).or_default().insert(hash);
    }

    /// A Withdraw from `as_source` resets every remembered announcement hash
    /// for that AS, allowing them to be re-announced.
    pub fn reset_announced_for(&mut self, as_source: &str) {
        if let Some(hashes) = self.as_to_announced_txids.get_mut(as_source) {
            for h in hashes.iter() {
                self.bgp_txid_announced.insert(h.clone(), false);
            }
            hashes.clear();
        }
    }

    pub fn clear_round_accounting(&mut self) {
        // The dedupe maps persist across rounds by design (§4.5); only the
        // per-mining-round accumulators in `lease_sum_prune` are scoped to a
        // single pass, and those are local to that function already.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignOutputItem, AssignTx};

    fn assign(as_source: &str, lease: u32, source_lease: u32) -> Transaction {
        Transaction::Assign(AssignTx {
            txid: format!("{as_source}-{lease}"),
            as_source: as_source.into(),
            time: 0.0,
            signature: String::new(),
            prefix: "p".into(),
            as_dest_list: vec!["dst".into()],
            source_lease,
            lease_duration: lease,
            transfer_tag: false,
            last_assign: "-1".into(),
            output: vec![AssignOutputItem { prefix: "p".into(), as_dest: "dst".into(), lease_duration: lease, transfer_tag: false }],
        })
    }

    #[test]
    fn lease_sum_prune_drops_assign_that_overflows_source_lease() {
        let chain = Chain::new();
        let mut pool = PendingPool::new();
        pool.push(assign("13335", 60, 100));
        pool.push(assign("13335", 50, 100)); // 60+50 > 100, dropped
        pool.lease_sum_prune(&chain);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn announce_dedupe_hash_is_stable() {
        let a = PendingPool::announce_dedupe_hash("133741", "1.3.33.0/24", &["0".into()], &["13335".into()], 1.0);
        let b = PendingPool::announce_dedupe_hash("133741", "1.3.33.0/24", &["0".into()], &["13335".into()], 1.0);
        assert_eq!(a, b);
    }

    #[test]
    fn withdraw_resets_dedupe_for_that_as() {
        let mut pool = PendingPool::new();
        pool.mark_announced("133741", "hash1".into());
        assert!(pool.is_duplicate_announce("hash1"));
        pool.reset_announced_for("133741");
        assert!(!pool.is_duplicate_announce("hash1"));
    }
}
