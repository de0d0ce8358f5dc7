// UTXO (Unspent Transaction Output) index
//
// One entry per transaction that still has unspent outputs:
// tx hash -> [(index, output), ...] in index order. The reserved key "L"
// records the tip the index reflects.

use crate::consensus::ValidationError;
use crate::core::serialize::{read_array, read_varint, write_varint};
use crate::core::{Block, Hash256, Transaction, TxOutput};
use crate::error::{Error, Result, StorageError};
use crate::storage::blockchain_db::decode_hash;
use sled::transaction::{abort, ConflictableTransactionResult, TransactionalTree};
use sled::{IVec, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;

/// Reserved key holding the tip hash this index was last brought up to
pub const SYNCED_TIP_KEY: &[u8] = b"L";

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// One unspent output together with its position in the owning transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub index: u32,
    pub output: TxOutput,
}

impl Utxo {
    pub fn new(index: u32, output: TxOutput) -> Self {
        Self { index, output }
    }
}

/// Encode the unspent list of one transaction
pub fn encode_utxos(utxos: &[Utxo]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + utxos.len() * 32);
    write_varint(&mut buf, utxos.len() as u64);
    for utxo in utxos {
        buf.extend_from_slice(&utxo.index.to_le_bytes());
        utxo.output.write_to(&mut buf);
    }
    buf
}

/// Decode the unspent list of one transaction
pub fn decode_utxos(data: &[u8]) -> std::result::Result<Vec<Utxo>, StorageError> {
    let corrupt = |e: std::io::Error| StorageError::Corrupt(format!("utxo record: {}", e));
    let mut cursor = Cursor::new(data);

    let count = read_varint(&mut cursor).map_err(corrupt)? as usize;
    let mut utxos = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let index = u32::from_le_bytes(read_array::<4, _>(&mut cursor).map_err(corrupt)?);
        let output = TxOutput::read_from(&mut cursor).map_err(corrupt)?;
        utxos.push(Utxo { index, output });
    }

    if cursor.position() as usize != data.len() {
        return Err(StorageError::Corrupt("trailing bytes in utxo record".to_string()));
    }
    Ok(utxos)
}

/// Compute the unspent set of a chain from a tip-to-genesis walk.
///
/// Within one block every input is recorded before any output, so
/// outputs spent later in the same block are excluded as well.
pub fn collect_unspent<I>(blocks: I) -> Result<BTreeMap<Hash256, Vec<Utxo>>>
where
    I: IntoIterator<Item = Result<Block>>,
{
    let mut spent: HashMap<Hash256, HashSet<u32>> = HashMap::new();
    let mut unspent = BTreeMap::new();

    for block in blocks {
        let block = block?;

        for tx in block.regular_transactions() {
            for input in &tx.inputs {
                if let Some(index) = input.output_index() {
                    spent.entry(input.prev_tx_hash).or_default().insert(index);
                }
            }
        }

        for tx in &block.transactions {
            let spent_here = spent.get(&tx.tx_hash);
            let outputs: Vec<Utxo> = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| Utxo::new(index as u32, output.clone()))
                .filter(|utxo| !spent_here.is_some_and(|s| s.contains(&utxo.index)))
                .collect();

            if !outputs.is_empty() {
                unspent.insert(tx.tx_hash, outputs);
            }
        }
    }

    Ok(unspent)
}

/// UTXO set database
#[derive(Clone)]
pub struct UtxoSet {
    tree: Tree,
}

impl UtxoSet {
    pub(crate) fn new(tree: Tree) -> Self {
        Self { tree }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Iterate `(tx hash, unspent list)` entries in key order, skipping the marker
    fn entries(&self) -> impl Iterator<Item = Result<(Hash256, Vec<Utxo>)>> + '_ {
        self.tree.iter().filter_map(|item| {
            let (key, value) = match item {
                Ok(kv) => kv,
                Err(e) => return Some(Err(e.into())),
            };
            if key.len() != 32 {
                return None;
            }
            Some(
                decode_hash(&key)
                    .and_then(|txid| Ok((txid, decode_utxos(&value)?)))
                    .map_err(Error::from),
            )
        })
    }

    /// Unspent outputs of one transaction
    pub fn get(&self, txid: &Hash256) -> Result<Vec<Utxo>> {
        match self.tree.get(txid.as_bytes())? {
            Some(data) => Ok(decode_utxos(&data)?),
            None => Ok(Vec::new()),
        }
    }

    /// The output at `outpoint`, if still unspent
    pub fn get_output(&self, outpoint: &OutPoint) -> Result<Option<TxOutput>> {
        Ok(self
            .get(&outpoint.txid)?
            .into_iter()
            .find(|utxo| utxo.index == outpoint.vout)
            .map(|utxo| utxo.output))
    }

    /// All unspent outputs locked to `pubkey_hash`, in key then index order
    pub fn unspent_for(&self, pubkey_hash: &[u8; 20]) -> Result<Vec<(OutPoint, TxOutput)>> {
        let mut found = Vec::new();
        for entry in self.entries() {
            let (txid, utxos) = entry?;
            for utxo in utxos {
                if utxo.output.is_locked_with(pubkey_hash) {
                    found.push((OutPoint::new(txid, utxo.index), utxo.output));
                }
            }
        }
        Ok(found)
    }

    /// Sum of all unspent outputs locked to `pubkey_hash`
    pub fn balance_of(&self, pubkey_hash: &[u8; 20]) -> Result<u64> {
        Ok(self
            .unspent_for(pubkey_hash)?
            .iter()
            .fold(0u64, |total, (_, output)| total.saturating_add(output.value)))
    }

    /// Greedily pick outputs of `pubkey_hash` until `amount` is covered.
    /// Returns the accumulated value, which is below `amount` if funds are short.
    pub fn find_spendable(&self, pubkey_hash: &[u8; 20], amount: u64) -> Result<(u64, Vec<OutPoint>)> {
        let mut accumulated = 0u64;
        let mut selected = Vec::new();

        for (outpoint, output) in self.unspent_for(pubkey_hash)? {
            if accumulated >= amount {
                break;
            }
            accumulated = accumulated.saturating_add(output.value);
            selected.push(outpoint);
        }

        Ok((accumulated, selected))
    }

    /// Number of transactions with unspent outputs
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for entry in self.entries() {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Full index contents, for comparisons against a rebuild
    pub fn snapshot(&self) -> Result<BTreeMap<Hash256, Vec<Utxo>>> {
        self.entries().collect()
    }

    /// Tip this index was last synchronized with
    pub fn synced_tip(&self) -> Result<Option<Hash256>> {
        match self.tree.get(SYNCED_TIP_KEY)? {
            Some(data) => Ok(Some(decode_hash(&data)?)),
            None => Ok(None),
        }
    }

    /// Apply a newly committed block inside a storage transaction.
    ///
    /// Every input removes its referenced index from the source entry (the
    /// entry is dropped once empty); then the transaction's own outputs
    /// become a fresh entry. A missing reference aborts the whole commit.
    pub fn apply_block(
        tree: &TransactionalTree,
        transactions: &[Transaction],
    ) -> ConflictableTransactionResult<(), Error> {
        for tx in transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let double_spend = || {
                        Error::from(ValidationError::DoubleSpend {
                            txid: input.prev_tx_hash,
                            vout: input.prev_index,
                        })
                    };

                    let Some(index) = input.output_index() else {
                        return abort(double_spend());
                    };
                    let key = input.prev_tx_hash.as_bytes().as_slice();
                    let Some(data) = tree.get(key)? else {
                        return abort(double_spend());
                    };

                    let mut utxos = match decode_utxos(&data) {
                        Ok(utxos) => utxos,
                        Err(e) => return abort(e.into()),
                    };
                    let before = utxos.len();
                    utxos.retain(|utxo| utxo.index != index);
                    if utxos.len() == before {
                        return abort(double_spend());
                    }

                    if utxos.is_empty() {
                        tree.remove(key)?;
                    } else {
                        tree.insert(key, encode_utxos(&utxos))?;
                    }
                }
            }

            let key = tx.tx_hash.as_bytes().as_slice();
            if tree.get(key)?.is_some() {
                return abort(ValidationError::DuplicateTransaction(tx.tx_hash).into());
            }

            let outputs: Vec<Utxo> = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| Utxo::new(index as u32, output.clone()))
                .collect();
            tree.insert(key, encode_utxos(&outputs))?;
        }

        Ok(())
    }

    /// Record the tip the index reflects, inside a storage transaction
    pub fn write_synced_tip(tree: &TransactionalTree, tip: &Hash256) -> ConflictableTransactionResult<(), Error> {
        tree.insert(SYNCED_TIP_KEY, IVec::from(tip.as_bytes().as_slice()))?;
        Ok(())
    }
}
