use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// CLI surface: `main [-p port] [-a asn] [-i ip]` plus the bootstrap/observability
/// flags the ambient stack needs. Every flag has a default so the node boots with
/// nothing but `cargo run`.
#[derive(Parser, Debug, Clone)]
#[command(name = "ip-bgp-ledger", about = "Permissioned IP allocation + BGP ledger node")]
pub struct Cli {
    #[arg(short = 'p', long, default_value_t = 5000)]
    pub port: u16,

    #[arg(short = 'a', long, default_value = "0")]
    pub asn: String,

    #[arg(short = 'i', long, default_value = "localhost")]
    pub ip: String,

    #[arg(long, default_value = "bgp_network.csv")]
    pub peers_csv: PathBuf,

    #[arg(long, default_value = "prefix_to_as.txt")]
    pub prefix_map: PathBuf,

    #[arg(long, default_value = "node_key.pem")]
    pub key_path: PathBuf,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Merged runtime configuration: CLI flags plus defaults. Kept as a plain struct
/// (rather than threading `Cli` everywhere) so non-CLI callers (tests) can build
/// one directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub ip: String,
    pub port: u16,
    pub asn: String,
    pub peers_csv: PathBuf,
    pub prefix_map: PathBuf,
    pub key_path: PathBuf,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ip: "localhost".to_string(),
            port: 5000,
            asn: "0".to_string(),
            peers_csv: PathBuf::from("bgp_network.csv"),
            prefix_map: PathBuf::from("prefix_to_as.txt"),
            key_path: PathBuf::from("node_key.pem"),
            log_level: "info".to_string(),
        }
    }
}

impl From<Cli> for NodeConfig {
    fn from(cli: Cli) -> Self {
        Self {
            ip: cli.ip,
            port: cli.port,
            asn: cli.asn,
            peers_csv: cli.peers_csv,
            prefix_map: cli.prefix_map,
            key_path: cli.key_path,
            log_level: cli.log_level,
        }
    }
}

impl NodeConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.ip, "localhost");
    }

    #[test]
    fn base_url_formats_host_and_port() {
        let cfg = NodeConfig { ip: "127.0.0.1".into(), port: 5001, ..Default::default() };
        assert_eq!(cfg.base_url(), "http://127.0.0.1:5001");
    }
}
