// Blockchain: ordered blocks on top of ledger storage

mod iter;

pub use iter::ChainIterator;

use crate::consensus::{BlockValidator, CancelToken, Miner, Target, TransactionValidator, ValidationError};
use crate::core::{Block, Hash256, Transaction};
use crate::error::{Error, NotFoundError, Result, StorageError};
use crate::storage::{collect_unspent, OutPoint, Storage, UtxoSet};
use crate::wallet::Address;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Blockchain handle. Cheap to clone; clones share the same storage.
#[derive(Clone)]
pub struct Blockchain {
    storage: Storage,
    target: Target,
}

impl Blockchain {
    /// Create a new chain at `path` with a freshly mined genesis block paying `address`
    pub fn create<P: AsRef<Path>>(path: P, address: &Address, target: Target) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(Error::ChainExists(path.to_path_buf()));
        }
        Self::initialize(Storage::new(path)?, address, target)
    }

    /// Create a new chain at `path` from an existing network's genesis block
    pub fn create_with_genesis<P: AsRef<Path>>(path: P, genesis: &Block, target: Target) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(Error::ChainExists(path.to_path_buf()));
        }
        Self::initialize_with_genesis(Storage::new(path)?, genesis, target)
    }

    /// Open the chain stored at `path`
    pub fn open<P: AsRef<Path>>(path: P, target: Target) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ChainMissing(path.to_path_buf()));
        }

        let storage = Storage::new(path)?;
        if storage.blockchain.get_tip()?.is_none() {
            return Err(Error::ChainMissing(path.to_path_buf()));
        }
        Self::load(storage, target)
    }

    /// Mine a genesis block into empty storage
    pub fn initialize(storage: Storage, address: &Address, target: Target) -> Result<Self> {
        let coinbase = Transaction::new_coinbase(address.to_pubkey_hash()?);
        let mut genesis = Block::new(0, Hash256::zero(), vec![coinbase]);

        let result = Miner::new(target).mine(&mut genesis, &CancelToken::new());
        if !result.success {
            return Err(Error::MiningCancelled);
        }
        log::info!("Mined genesis block {} in {:?}", genesis.hash, result.duration);

        Self::initialize_with_genesis(storage, &genesis, target)
    }

    /// Store an already mined genesis block into empty storage
    pub fn initialize_with_genesis(storage: Storage, genesis: &Block, target: Target) -> Result<Self> {
        if genesis.height != 0 || !genesis.is_genesis() {
            return Err(ValidationError::DoesNotExtendTip { height: genesis.height }.into());
        }
        BlockValidator::new(target).validate_block(genesis)?;

        storage.commit_block(genesis, None)?;
        let chain = Self { storage, target };
        chain.reindex_utxo()?;
        chain.flush()?;

        log::info!("Created blockchain with genesis {}", genesis.hash);
        Ok(chain)
    }

    /// Wrap storage that already holds a chain, rebuilding the UTXO index if it
    /// does not reflect the stored tip
    pub fn load(storage: Storage, target: Target) -> Result<Self> {
        let chain = Self { storage, target };
        let tip = chain.tip()?;

        if chain.storage.utxo_set.synced_tip()? != Some(tip) {
            log::warn!("UTXO index does not match tip {}, rebuilding", tip);
            let count = chain.reindex_utxo()?;
            log::info!("Rebuilt UTXO index: {} transactions", count);
        }

        Ok(chain)
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.storage.utxo_set
    }

    /// Hash of the most recently admitted block
    pub fn tip(&self) -> Result<Hash256> {
        self.storage
            .blockchain
            .get_tip()?
            .ok_or_else(|| StorageError::Corrupt("tip pointer missing".to_string()).into())
    }

    /// Iterate from the current tip back to genesis
    pub fn iter(&self) -> ChainIterator {
        let db = self.storage.blockchain.clone();
        match self.tip() {
            Ok(tip) => ChainIterator::new(db, Some(tip)),
            Err(e) => ChainIterator::failed(db, e),
        }
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        self.storage
            .blockchain
            .get_block(hash)?
            .ok_or_else(|| NotFoundError::Block(*hash).into())
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        self.storage.blockchain.has_block(hash)
    }

    /// Height of the tip block
    pub fn best_height(&self) -> Result<u64> {
        Ok(self.get_block(&self.tip()?)?.height)
    }

    /// All block hashes, tip first
    pub fn block_hashes(&self) -> Result<Vec<Hash256>> {
        self.iter().map(|block| block.map(|b| b.hash)).collect()
    }

    /// Find a transaction by scanning backward from the tip
    pub fn find_transaction(&self, txid: &Hash256) -> Result<Transaction> {
        for block in self.iter() {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.tx_hash == *txid) {
                return Ok(tx);
            }
        }
        Err(NotFoundError::Transaction(*txid).into())
    }

    /// Transactions referenced by the inputs of `tx`
    pub fn referenced_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash256, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in tx.inputs.iter().filter(|input| !input.is_coinbase()) {
            if !prev_txs.contains_key(&input.prev_tx_hash) {
                let prev = self.find_transaction(&input.prev_tx_hash)?;
                prev_txs.insert(input.prev_tx_hash, prev);
            }
        }
        Ok(prev_txs)
    }

    /// Check the signatures of `tx` against the outputs it spends
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.referenced_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Check non-coinbase transactions against the current UTXO index:
    /// every input unspent and used once, no value created, valid signatures.
    pub fn validate_transactions<'a, I>(&self, transactions: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut spent = HashSet::new();

        for tx in transactions {
            TransactionValidator::validate_for_mempool(tx)?;

            let mut input_value = 0u64;
            for input in &tx.inputs {
                let double_spend = ValidationError::DoubleSpend {
                    txid: input.prev_tx_hash,
                    vout: input.prev_index,
                };
                let vout = input
                    .output_index()
                    .ok_or(ValidationError::InvalidOutputIndex(input.prev_index))?;
                let outpoint = OutPoint::new(input.prev_tx_hash, vout);

                if !spent.insert(outpoint) {
                    return Err(double_spend.into());
                }
                let output = self.storage.utxo_set.get_output(&outpoint)?.ok_or(double_spend)?;
                input_value = input_value
                    .checked_add(output.value)
                    .ok_or(ValidationError::ValueOverflow)?;
            }

            let output_value = tx.total_output_value().ok_or(ValidationError::ValueOverflow)?;
            if output_value > input_value {
                return Err(ValidationError::ValueCreated {
                    inputs: input_value,
                    outputs: output_value,
                }
                .into());
            }

            if !self.verify_transaction(tx)? {
                return Err(ValidationError::InvalidSignature(tx.tx_hash).into());
            }
        }

        Ok(())
    }

    /// Verify `transactions`, add a coinbase paying `reward_to`, mine a block
    /// on the current tip and commit it together with its UTXO changes.
    /// Nothing is written unless every step succeeds.
    pub fn mine_block(
        &self,
        transactions: Vec<Transaction>,
        reward_to: &Address,
        cancel: &CancelToken,
    ) -> Result<Block> {
        self.validate_transactions(&transactions)?;

        let tip = self.tip()?;
        let height = self.get_block(&tip)?.height + 1;

        let mut block_txs = Vec::with_capacity(transactions.len() + 1);
        block_txs.push(Transaction::new_coinbase(reward_to.to_pubkey_hash()?));
        block_txs.extend(transactions);

        let mut block = Block::new(height, tip, block_txs);
        let result = Miner::new(self.target).mine(&mut block, cancel);
        if !result.success {
            return Err(Error::MiningCancelled);
        }

        self.storage.commit_block(&block, Some(tip))?;
        log::info!(
            "Mined block {} at height {} ({} attempts, {:.0} H/s)",
            block.hash,
            block.height,
            result.attempts,
            result.hash_rate()
        );
        Ok(block)
    }

    /// Admit a block received from a peer. Returns `false` if the block is
    /// already stored. Proof of work, hash integrity and every transaction
    /// are checked, and the block must sit directly on the local tip.
    pub fn add_block(&self, block: &Block) -> Result<bool> {
        if self.has_block(&block.hash)? {
            return Ok(false);
        }

        BlockValidator::new(self.target).validate_block(block)?;

        let tip = self.tip()?;
        let tip_height = self.get_block(&tip)?.height;
        if block.prev_hash != tip || block.height != tip_height + 1 {
            return Err(ValidationError::DoesNotExtendTip { height: block.height }.into());
        }

        self.validate_transactions(block.regular_transactions())?;
        self.storage.commit_block(block, Some(tip))?;

        log::info!("Added block {} at height {}", block.hash, block.height);
        Ok(true)
    }

    /// Balance of `address` according to the UTXO index
    pub fn get_balance(&self, address: &Address) -> Result<u64> {
        self.storage.utxo_set.balance_of(&address.to_pubkey_hash()?)
    }

    /// Rebuild the UTXO index from a full chain scan.
    /// Returns the number of transactions with unspent outputs.
    pub fn reindex_utxo(&self) -> Result<usize> {
        let tip = self.tip()?;
        let unspent = collect_unspent(ChainIterator::new(self.storage.blockchain.clone(), Some(tip)))?;
        self.storage.replace_utxos(tip, &unspent)?;
        Ok(unspent.len())
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    #[cfg(test)]
    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }
}
