// Transaction and block validation

use crate::consensus::pow::{Miner, Target};
use crate::core::{Block, Hash256, Transaction, BLOCK_REWARD};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Block hash doesn't meet PoW target
    #[error("invalid proof of work")]
    InvalidProofOfWork,
    /// Difficulty outside the supported range
    #[error("invalid difficulty {0}, expected 1..=255")]
    InvalidDifficulty(u32),
    /// Stored block hash doesn't match the block's contents
    #[error("block hash does not match its contents")]
    HashMismatch,
    /// Stored transaction hash doesn't match the transaction's contents
    #[error("transaction {0} hash does not match its contents")]
    TxHashMismatch(Hash256),
    /// Block has no transactions
    #[error("block has no transactions")]
    NoTransactions,
    /// First transaction is not coinbase
    #[error("missing coinbase transaction")]
    MissingCoinbase,
    /// More than one coinbase transaction
    #[error("multiple coinbase transactions")]
    MultipleCoinbase,
    /// Coinbase mints something other than the block reward
    #[error("coinbase mints {0}, expected {BLOCK_REWARD}")]
    InvalidReward(u64),
    /// Transaction has no inputs or outputs
    #[error("transaction has no inputs or outputs")]
    EmptyTransaction,
    /// Signature verification failed
    #[error("invalid signature in transaction {0}")]
    InvalidSignature(Hash256),
    /// Non-coinbase input carries no signature
    #[error("unsigned input in transaction {0}")]
    MissingSignature(Hash256),
    /// Non-coinbase input with a negative output index
    #[error("invalid output index {0}")]
    InvalidOutputIndex(i64),
    /// Output already spent, or spent twice in one block or transaction
    #[error("output {vout} of transaction {txid} is already spent")]
    DoubleSpend { txid: Hash256, vout: i64 },
    /// A transaction with this hash is already recorded
    #[error("transaction {0} already exists")]
    DuplicateTransaction(Hash256),
    /// Outputs exceed the value of the inputs
    #[error("outputs ({outputs}) exceed inputs ({inputs})")]
    ValueCreated { inputs: u64, outputs: u64 },
    /// Address failed to decode or its checksum is wrong
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    /// The chain tip moved while a block was being prepared
    #[error("chain tip changed while the block was being built")]
    StaleTip,
    /// Block does not sit directly on top of the local tip
    #[error("block at height {height} does not extend the local tip")]
    DoesNotExtendTip { height: u64 },
    /// Output or input values sum past `u64::MAX`
    #[error("transaction values overflow a 64-bit amount")]
    ValueOverflow,
    /// Coinbase transactions only enter the chain inside blocks
    #[error("coinbase transaction cannot be relayed on its own")]
    CoinbaseInMempool,
}

/// Block validator
pub struct BlockValidator {
    /// PoW miner for verification
    miner: Miner,
}

impl BlockValidator {
    /// Create a new block validator with fixed difficulty
    pub fn new(target: Target) -> Self {
        Self {
            miner: Miner::new(target),
        }
    }

    /// Validate everything about a block that needs no chain context:
    /// hash integrity, proof of work, coinbase placement and reward,
    /// transaction structure and intra-block double spends.
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        if !block.has_valid_hash() {
            return Err(ValidationError::HashMismatch);
        }

        // Genesis is mined like any other block
        if !self.miner.target.is_valid_hash(&block.hash) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        let Some((coinbase, rest)) = block.transactions.split_first() else {
            return Err(ValidationError::NoTransactions);
        };

        if !coinbase.is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }
        if rest.iter().any(|tx| tx.is_coinbase()) {
            return Err(ValidationError::MultipleCoinbase);
        }

        let minted = coinbase.total_output_value().ok_or(ValidationError::ValueOverflow)?;
        if minted != BLOCK_REWARD {
            return Err(ValidationError::InvalidReward(minted));
        }

        let mut spent = HashSet::new();
        for tx in &block.transactions {
            TransactionValidator::validate_structure(tx)?;
            for input in tx.inputs.iter().filter(|input| !input.is_coinbase()) {
                if !spent.insert((input.prev_tx_hash, input.prev_index)) {
                    return Err(ValidationError::DoubleSpend {
                        txid: input.prev_tx_hash,
                        vout: input.prev_index,
                    });
                }
            }
        }

        Ok(())
    }

    /// Check if the block's stored nonce satisfies the target
    pub fn check_pow(&self, block: &Block) -> bool {
        self.miner.verify(block)
    }
}

/// Transaction validator (for mempool validation)
pub struct TransactionValidator;

impl TransactionValidator {
    /// Shape checks that need no UTXO lookups
    pub fn validate_structure(tx: &Transaction) -> Result<(), ValidationError> {
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }

        if tx.tx_hash != tx.hash() {
            return Err(ValidationError::TxHashMismatch(tx.tx_hash));
        }

        if tx.total_output_value().is_none() {
            return Err(ValidationError::ValueOverflow);
        }

        if tx.is_coinbase() {
            return Ok(());
        }

        let mut seen = HashSet::new();
        for input in &tx.inputs {
            if input.output_index().is_none() {
                return Err(ValidationError::InvalidOutputIndex(input.prev_index));
            }
            if input.signature.is_empty() || input.pub_key.is_empty() {
                return Err(ValidationError::MissingSignature(tx.tx_hash));
            }
            if !seen.insert((input.prev_tx_hash, input.prev_index)) {
                return Err(ValidationError::DoubleSpend {
                    txid: input.prev_tx_hash,
                    vout: input.prev_index,
                });
            }
        }

        Ok(())
    }

    /// Validate a transaction for mempool acceptance
    pub fn validate_for_mempool(tx: &Transaction) -> Result<(), ValidationError> {
        if tx.is_coinbase() {
            return Err(ValidationError::CoinbaseInMempool);
        }
        Self::validate_structure(tx)
    }
}
