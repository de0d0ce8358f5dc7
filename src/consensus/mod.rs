// Consensus and validation logic

pub mod pow;
pub mod validation;

pub use pow::{CancelToken, Miner, MiningResult, Target, MAX_DIFFICULTY};
pub use validation::{BlockValidator, TransactionValidator, ValidationError};
