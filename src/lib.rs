// minicoin: a minimal proof-of-work ledger with UTXO tracking and peer sync

pub mod chain;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use chain::{Blockchain, ChainIterator};
pub use cli::{Cli, CliHandler, Commands};
pub use config::NodeConfig;
pub use consensus::{BlockValidator, CancelToken, Miner, Target, ValidationError};
pub use crate::core::{Block, Hash256, Transaction, TxInput, TxOutput};
pub use error::{Error, Result};
pub use network::{Message, Node, Peer};
pub use storage::{OutPoint, Storage, UtxoSet};
pub use wallet::{Address, Keystore, TransactionBuilder};
