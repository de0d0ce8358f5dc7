// Node configuration

use crate::consensus::Target;
use crate::error::Result;
use std::path::PathBuf;

pub const DEFAULT_NODE_ID: u16 = 3000;
pub const DEFAULT_DIFFICULTY: u32 = 16;
pub const DEFAULT_BOOTSTRAP: &str = "localhost:3000";

/// Per-node settings; the node id doubles as the listening port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Directory holding the chain database and wallet file
    pub data_dir: PathBuf,
    pub node_id: u16,
    /// Leading zero bits required of block hashes
    pub difficulty: u32,
    pub bootstrap_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            node_id: DEFAULT_NODE_ID,
            difficulty: DEFAULT_DIFFICULTY,
            bootstrap_addr: DEFAULT_BOOTSTRAP.to_string(),
        }
    }
}

impl NodeConfig {
    pub fn node_addr(&self) -> String {
        format!("localhost:{}", self.node_id)
    }

    pub fn blockchain_path(&self) -> PathBuf {
        self.data_dir.join(format!("blockchain_{}.db", self.node_id))
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.json", self.node_id))
    }

    pub fn target(&self) -> Result<Target> {
        Ok(Target::from_difficulty(self.difficulty)?)
    }
}
