//! Node configuration
//!
//! One TOML file: node settings at the top level, engine settings under
//! `[governance]`. Every field has a default, so an empty file is valid.

use clap::ValueEnum;
use governance::types::decimal;
use governance::{Address, GovernanceConfig, Power};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Sled,
}

/// Development token balance minted at startup
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Allocation {
    pub address: Address,
    #[serde(with = "decimal")]
    pub amount: Power,
    #[serde(default)]
    pub self_delegate: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_name: String,
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub storage: StorageKind,
    /// Used when `RUST_LOG` is unset
    pub log_level: String,
    /// Signer address to hex Ed25519 public key
    pub signer_keys: BTreeMap<Address, String>,
    pub allocations: Vec<Allocation>,
    pub governance: GovernanceConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "civic-node".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 24101)),
            data_dir: PathBuf::from("$HOME/.civic/data"),
            storage: StorageKind::Memory,
            log_level: "info".to_string(),
            signer_keys: BTreeMap::new(),
            allocations: Vec::new(),
            governance: GovernanceConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, Box<dyn Error>> {
        let config: NodeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        self.governance.validate()?;
        if self.node_name.trim().is_empty() {
            return Err("node_name must not be empty".into());
        }
        if self.storage == StorageKind::Sled && self.data_dir.as_os_str().is_empty() {
            return Err("data_dir is required for sled storage".into());
        }
        Ok(())
    }

    /// `data_dir` with a leading `$HOME` expanded
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_prefix("$HOME") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(format!("{}{}", home, rest))
        }
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = NodeConfig::from_toml("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.storage, StorageKind::Memory);
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/civic");
        let config = NodeConfig {
            data_dir: PathBuf::from("$HOME/data"),
            ..NodeConfig::default()
        };
        assert_eq!(config.resolved_data_dir(), PathBuf::from("/home/civic/data"));

        let plain = NodeConfig {
            data_dir: PathBuf::from("/var/lib/civic"),
            ..NodeConfig::default()
        };
        assert_eq!(plain.resolved_data_dir(), PathBuf::from("/var/lib/civic"));
    }
}
