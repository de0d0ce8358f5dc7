// Storage layer for blockchain and UTXO set

mod blockchain_db;
mod utxo_set;

pub use blockchain_db::{BlockchainDB, TIP_KEY};
pub use utxo_set::{collect_unspent, decode_utxos, encode_utxos, OutPoint, Utxo, UtxoSet, SYNCED_TIP_KEY};

use crate::consensus::ValidationError;
use crate::core::{Block, Hash256, Serializable};
use crate::error::{Error, Result, StorageError};
use blockchain_db::decode_hash;
use sled::transaction::{abort, TransactionError, TransactionResult};
use sled::{Db, Transactional};
use std::collections::BTreeMap;
use std::path::Path;

const BLOCKS_TREE: &str = "blocks";
const UTXOS_TREE: &str = "utxos";

fn map_transaction_error(e: TransactionError<Error>) -> Error {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Database(e).into(),
    }
}

/// Storage manager - one sled database holding the block tree and the UTXO tree
#[derive(Clone)]
pub struct Storage {
    db: Db,
    pub blockchain: BlockchainDB,
    pub utxo_set: UtxoSet,
}

impl Storage {
    /// Open (or create) the ledger database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create an in-memory storage (for testing)
    pub fn memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let blockchain = BlockchainDB::new(db.open_tree(BLOCKS_TREE)?);
        let utxo_set = UtxoSet::new(db.open_tree(UTXOS_TREE)?);
        Ok(Self {
            db,
            blockchain,
            utxo_set,
        })
    }

    /// Persist `block` as the new tip and apply it to the UTXO index, atomically.
    ///
    /// `expected_tip` is the tip the block was built on (`None` for genesis);
    /// if the stored tip differs the commit aborts with `StaleTip` and
    /// nothing is written.
    pub fn commit_block(&self, block: &Block, expected_tip: Option<Hash256>) -> Result<()> {
        let encoded = block.serialize();
        let hash = block.hash.as_bytes().as_slice();

        let result: TransactionResult<(), Error> = (self.blockchain.tree(), self.utxo_set.tree())
            .transaction(|(blocks, utxos)| {
                let current = match blocks.get(TIP_KEY)? {
                    Some(data) => match decode_hash(&data) {
                        Ok(tip) => Some(tip),
                        Err(e) => return abort(e.into()),
                    },
                    None => None,
                };
                if current != expected_tip {
                    return abort(ValidationError::StaleTip.into());
                }

                blocks.insert(hash, encoded.as_slice())?;
                blocks.insert(TIP_KEY, hash)?;

                UtxoSet::apply_block(utxos, &block.transactions)?;
                UtxoSet::write_synced_tip(utxos, &block.hash)?;
                Ok(())
            });

        result.map_err(map_transaction_error)
    }

    /// Replace the whole UTXO index with `unspent`, computed for `tip`.
    /// Aborts with `StaleTip` if a block was committed in the meantime.
    pub fn replace_utxos(&self, tip: Hash256, unspent: &BTreeMap<Hash256, Vec<Utxo>>) -> Result<()> {
        let stale_keys: Vec<sled::IVec> = self
            .utxo_set
            .tree()
            .iter()
            .keys()
            .collect::<std::result::Result<_, _>>()?;

        let encoded: Vec<(Hash256, Vec<u8>)> = unspent
            .iter()
            .map(|(txid, utxos)| (*txid, encode_utxos(utxos)))
            .collect();

        let result: TransactionResult<(), Error> = (self.blockchain.tree(), self.utxo_set.tree())
            .transaction(|(blocks, utxos)| {
                let current = match blocks.get(TIP_KEY)? {
                    Some(data) => decode_hash(&data).ok(),
                    None => None,
                };
                if current != Some(tip) {
                    return abort(ValidationError::StaleTip.into());
                }

                for key in &stale_keys {
                    utxos.remove(key.clone())?;
                }
                for (txid, value) in &encoded {
                    utxos.insert(txid.as_bytes().as_slice(), value.as_slice())?;
                }
                UtxoSet::write_synced_tip(utxos, &tip)?;
                Ok(())
            });

        result.map_err(map_transaction_error)
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, TxInput, TxOutput};

    fn block_on(prev: Option<&Block>, transactions: Vec<Transaction>) -> Block {
        let (height, prev_hash) = match prev {
            Some(b) => (b.height + 1, b.hash),
            None => (0, Hash256::zero()),
        };
        let mut block = Block::new(height, prev_hash, transactions);
        block.hash = block.compute_hash();
        block
    }

    fn spend(prev: &Transaction, index: i64, outputs: Vec<TxOutput>) -> Transaction {
        Transaction::new(
            vec![TxInput {
                prev_tx_hash: prev.tx_hash,
                prev_index: index,
                signature: vec![1; 64],
                pub_key: vec![2; 33],
            }],
            outputs,
        )
    }

    #[test]
    fn test_commit_genesis() {
        let storage = Storage::memory().unwrap();
        let coinbase = Transaction::new_coinbase([1; 20]);
        let genesis = block_on(None, vec![coinbase.clone()]);

        storage.commit_block(&genesis, None).unwrap();

        assert_eq!(storage.blockchain.get_tip().unwrap(), Some(genesis.hash));
        assert_eq!(storage.blockchain.get_block(&genesis.hash).unwrap(), Some(genesis.clone()));
        assert!(storage.blockchain.has_block(&genesis.hash).unwrap());
        assert_eq!(storage.utxo_set.synced_tip().unwrap(), Some(genesis.hash));
        assert_eq!(storage.utxo_set.balance_of(&[1; 20]).unwrap(), 10);
        assert_eq!(storage.utxo_set.count_transactions().unwrap(), 1);
    }

    #[test]
    fn test_commit_spend_updates_index() {
        let storage = Storage::memory().unwrap();
        let coinbase = Transaction::new_coinbase([1; 20]);
        let genesis = block_on(None, vec![coinbase.clone()]);
        storage.commit_block(&genesis, None).unwrap();

        let tx = spend(&coinbase, 0, vec![TxOutput::new(3, [2; 20]), TxOutput::new(7, [1; 20])]);
        let next = block_on(Some(&genesis), vec![Transaction::new_coinbase([3; 20]), tx.clone()]);
        storage.commit_block(&next, Some(genesis.hash)).unwrap();

        assert!(storage.utxo_set.get(&coinbase.tx_hash).unwrap().is_empty());
        assert_eq!(storage.utxo_set.balance_of(&[2; 20]).unwrap(), 3);
        assert_eq!(storage.utxo_set.balance_of(&[1; 20]).unwrap(), 7);
        assert_eq!(
            storage.utxo_set.get_output(&OutPoint::new(tx.tx_hash, 1)).unwrap(),
            Some(TxOutput::new(7, [1; 20]))
        );
    }

    #[test]
    fn test_stale_tip_rejected() {
        let storage = Storage::memory().unwrap();
        let genesis = block_on(None, vec![Transaction::new_coinbase([1; 20])]);
        storage.commit_block(&genesis, None).unwrap();

        let other = block_on(None, vec![Transaction::new_coinbase([2; 20])]);
        let err = storage.commit_block(&other, None).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::StaleTip)));
        assert!(!storage.blockchain.has_block(&other.hash).unwrap());
    }

    #[test]
    fn test_missing_output_aborts_whole_commit() {
        let storage = Storage::memory().unwrap();
        let coinbase = Transaction::new_coinbase([1; 20]);
        let genesis = block_on(None, vec![coinbase.clone()]);
        storage.commit_block(&genesis, None).unwrap();

        let bad = spend(&coinbase, 4, vec![TxOutput::new(1, [2; 20])]);
        let next = block_on(Some(&genesis), vec![Transaction::new_coinbase([3; 20]), bad]);
        let err = storage.commit_block(&next, Some(genesis.hash)).unwrap_err();

        assert!(matches!(err, Error::Validation(ValidationError::DoubleSpend { vout: 4, .. })));
        assert_eq!(storage.blockchain.get_tip().unwrap(), Some(genesis.hash));
        assert!(!storage.blockchain.has_block(&next.hash).unwrap());
        assert_eq!(storage.utxo_set.balance_of(&[1; 20]).unwrap(), 10);
        assert_eq!(storage.utxo_set.balance_of(&[3; 20]).unwrap(), 0);
        assert_eq!(storage.utxo_set.synced_tip().unwrap(), Some(genesis.hash));
    }

    #[test]
    fn test_replace_utxos() {
        let storage = Storage::memory().unwrap();
        let genesis = block_on(None, vec![Transaction::new_coinbase([1; 20])]);
        storage.commit_block(&genesis, None).unwrap();

        let mut unspent = BTreeMap::new();
        unspent.insert(Hash256::new([9; 32]), vec![Utxo::new(2, TxOutput::new(4, [5; 20]))]);
        storage.replace_utxos(genesis.hash, &unspent).unwrap();

        assert_eq!(storage.utxo_set.snapshot().unwrap(), unspent);
        assert_eq!(storage.utxo_set.synced_tip().unwrap(), Some(genesis.hash));

        let err = storage.replace_utxos(Hash256::new([1; 32]), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::StaleTip)));
    }
}
