use std::collections::HashMap;

use crate::graph::ReachabilityGraph;
use crate::model::{
    Asn, BgpPath, LeaseRecord, Prefix, PrefixState, Transaction, ORIGIN_SENTINEL,
};

/// The full derived world state: per-prefix holdings and per-prefix
/// reachability topology. Never mutated except by forward block application
/// or a full replay (see `crate::replay`).
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    pub state: HashMap<Prefix, PrefixState>,
    pub graphs: HashMap<Prefix, ReachabilityGraph>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holders_of(&self, prefix: &str) -> &[LeaseRecord] {
        self.state.get(prefix).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn holds(&self, prefix: &str, asn: &str) -> bool {
        self.holders_of(prefix).iter().any(|r| r.asn == asn)
    }

    pub fn graph_of(&self, prefix: &str) -> Option<&ReachabilityGraph> {
        self.graphs.get(prefix)
    }

    pub fn graph_mut(&mut self, prefix: &str) -> &mut ReachabilityGraph {
        self.graphs.entry(prefix.to_string()).or_default()
    }

    /// Seeds genesis holdings: each `(asn, prefix)` pair gets a standing lease
    /// and an edge `asn -> prefix` in that prefix's reachability graph.
    pub fn seed_genesis(&mut self, holdings: &[(Asn, Prefix)], genesis_lease_months: u32) {
        for (asn, prefix) in holdings {
            self.state.entry(prefix.clone()).or_default().push(LeaseRecord {
                asn: asn.clone(),
                lease_duration: genesis_lease_months,
                transfer_tag: true,
                last_assign_txid: "-1".to_string(),
            });
            self.graph_mut(prefix).add_edge(asn, prefix);
        }
    }

    /// Dispatches application of a single transaction's effects. The
    /// transaction is assumed already validated; this function only mutates
    /// state, it never rejects.
    pub fn apply(&mut self, tx: &Transaction) {
        match tx {
            Transaction::Assign(t) => {
                let holders = self.state.entry(t.prefix.clone()).or_default();
                holders.retain(|r| r.asn != t.as_source);
                let mut new_holders = Vec::new();
                for item in &t.output {
                    if !holders.iter().any(|r| r.asn == item.as_dest) {
                        holders.push(LeaseRecord {
                            asn: item.as_dest.clone(),
                            lease_duration: item.lease_duration,
                            transfer_tag: item.transfer_tag,
                            last_assign_txid: t.txid.clone(),
                        });
                        new_holders.push(item.as_dest.clone());
                    }
                }
                let graph = self.graph_mut(&t.prefix);
                graph.clear_topo(&t.prefix, &t.as_source);
                for h in &new_holders {
                    graph.add_edge(h, &t.prefix);
                }
            }
            Transaction::Revoke(t) => {
                let prefix = t.output.prefix.clone();
                // the caller (transactions::revoke) stamps `former_holders` via
                // the Assign lookup at validation time; apply only needs the
                // output, since the former holders are exactly those removed.
                let holders = self.state.entry(prefix.clone()).or_default();
                let graph = self.graphs.entry(prefix.clone()).or_default();
                holders.retain(|r| {
                    let remove = r.last_assign_txid == t.assign_txid;
                    if remove {
                        graph.clear_topo(&prefix, &r.asn);
                    }
                    !remove
                });
                holders.retain(|r| r.asn != t.as_source);
                holders.push(LeaseRecord {
                    asn: t.as_source.clone(),
                    lease_duration: t.output.new_lease,
                    transfer_tag: t.output.transfer_tag,
                    last_assign_txid: t.output.last_assign.clone(),
                });
                graph.add_edge(&t.as_source, &prefix);
            }
            Transaction::Update(t) => {
                if let Some(item) = t.output.first() {
                    let holders = self.state.entry(item.prefix.clone()).or_default();
                    for out in &t.output {
                        for rec in holders.iter_mut() {
                            if rec.asn == out.as_dest {
                                rec.lease_duration = out.new_lease;
                                rec.transfer_tag = out.transfer_tag;
                            }
                        }
                    }
                }
            }
            Transaction::BgpAnnounce(t) => {
                let graph = self.graph_mut(&t.prefix);
                apply_announce_paths(graph, &t.output);
            }
            Transaction::BgpWithdraw(t) => {
                let graph = self.graph_mut(&t.prefix);
                graph.apply_withdraw(&t.prefix, &t.as_source);
            }
        }
    }
}

pub fn apply_announce_paths(graph: &mut ReachabilityGraph, paths: &[BgpPath]) {
    for path in paths {
        if path.as_src == ORIGIN_SENTINEL {
            graph.add_edge(&path.as_source, &path.prefix);
            graph.add_edge(&path.as_dst, &path.as_source);
        } else {
            graph.add_edge(&path.as_source, &path.as_src);
            graph.add_edge(&path.as_dst, &path.as_source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignOutputItem, AssignTx};

    #[test]
    fn genesis_seed_matches_scenario_one() {
        let mut ws = WorldState::new();
        ws.seed_genesis(&[("8522".to_string(), "139.91.0.0/16".to_string())], 1000);
        let holders = ws.holders_of("139.91.0.0/16");
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].asn, "8522");
        assert_eq!(holders[0].last_assign_txid, "-1");
        assert!(ws.graph_of("139.91.0.0/16").unwrap().has_edge("8522", "139.91.0.0/16"));
    }

    #[test]
    fn assign_removes_source_and_adds_destinations() {
        let mut ws = WorldState::new();
        ws.seed_genesis(&[("8522".to_string(), "139.91.0.0/16".to_string())], 1000);
        let tx = Transaction::Assign(AssignTx {
            txid: "tx1".into(),
            as_source: "8522".into(),
            time: 1.0,
            signature: String::new(),
            prefix: "139.91.0.0/16".into(),
            as_dest_list: vec!["13335".into()],
            source_lease: 1000,
            lease_duration: 100,
            transfer_tag: false,
            last_assign: "-1".into(),
            output: vec![AssignOutputItem {
                prefix: "139.91.0.0/16".into(),
                as_dest: "13335".into(),
                lease_duration: 100,
                transfer_tag: false,
            }],
        });
        ws.apply(&tx);
        assert!(!ws.holds("139.91.0.0/16", "8522"));
        assert!(ws.holds("139.91.0.0/16", "13335"));
        assert!(!ws.graph_of("139.91.0.0/16").unwrap().has_edge("8522", "139.91.0.0/16"));
    }
}
