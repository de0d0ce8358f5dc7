// Block data structures

use crate::core::serialize::{read_array, read_u64, read_varint, write_varint};
use crate::core::{sha256, transactions_root, Hash256, Serializable, Transaction};
use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

/// Block - a height-indexed batch of transactions sealed by proof of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the chain, 0 for genesis
    pub height: u64,
    /// Hash of the previous block (zero for genesis)
    pub prev_hash: Hash256,
    /// Transactions, coinbase first
    pub transactions: Vec<Transaction>,
    /// Creation time (Unix seconds)
    pub timestamp: u64,
    /// Proof-of-work hash over all other fields
    pub hash: Hash256,
    /// Nonce solving the proof of work
    pub nonce: u64,
}

impl Block {
    /// Create an unmined candidate block stamped with the current time
    pub fn new(height: u64, prev_hash: Hash256, transactions: Vec<Transaction>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            height,
            prev_hash,
            transactions,
            timestamp,
            hash: Hash256::zero(),
            nonce: 0,
        }
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }

    /// Merkle commitment to this block's transactions
    pub fn merkle_root(&self) -> Hash256 {
        transactions_root(&self.transactions)
    }

    /// Proof-of-work preimage for `nonce`:
    /// height ‖ prev_hash ‖ merkle_root ‖ timestamp ‖ nonce, integers big-endian
    pub fn pow_data(&self, merkle_root: &Hash256, nonce: u64) -> [u8; 88] {
        let mut data = [0u8; 88];
        data[0..8].copy_from_slice(&self.height.to_be_bytes());
        data[8..40].copy_from_slice(self.prev_hash.as_bytes());
        data[40..72].copy_from_slice(merkle_root.as_bytes());
        data[72..80].copy_from_slice(&self.timestamp.to_be_bytes());
        data[80..88].copy_from_slice(&nonce.to_be_bytes());
        data
    }

    /// Recompute the hash from the block's fields and stored nonce
    pub fn compute_hash(&self) -> Hash256 {
        sha256(&self.pow_data(&self.merkle_root(), self.nonce))
    }

    /// Whether the stored hash matches the block's contents
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Transactions other than the leading coinbase
    pub fn regular_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|tx| !tx.is_coinbase())
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());

        write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write_to(&mut buf);
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);

        let header = (|| -> std::io::Result<_> {
            let height = read_u64(&mut cursor)?;
            let prev_hash = Hash256::new(read_array::<32, _>(&mut cursor)?);
            let timestamp = read_u64(&mut cursor)?;
            let hash = Hash256::new(read_array::<32, _>(&mut cursor)?);
            let nonce = read_u64(&mut cursor)?;
            let tx_count = read_varint(&mut cursor)? as usize;
            Ok((height, prev_hash, timestamp, hash, nonce, tx_count))
        })();
        let (height, prev_hash, timestamp, hash, nonce, tx_count) =
            header.map_err(|e| format!("Invalid block header: {}", e))?;

        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for i in 0..tx_count {
            let tx = Transaction::from_reader(&mut cursor)
                .map_err(|e| format!("Invalid transaction {}: {}", i, e))?;
            transactions.push(tx);
        }

        if cursor.position() as usize != data.len() {
            return Err("Trailing bytes after block".to_string());
        }

        Ok(Self {
            height,
            prev_hash,
            transactions,
            timestamp,
            hash,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput};

    fn sample_block() -> Block {
        let coinbase = Transaction::new_coinbase([1; 20]);
        let spend = Transaction::new(
            vec![TxInput {
                prev_tx_hash: coinbase.tx_hash,
                prev_index: 0,
                signature: vec![0xaa; 64],
                pub_key: vec![0x02; 33],
            }],
            vec![TxOutput::new(3, [2; 20]), TxOutput::new(7, [1; 20])],
        );

        let mut block = Block::new(4, Hash256::new([9; 32]), vec![coinbase, spend]);
        block.nonce = 42;
        block.hash = block.compute_hash();
        block
    }

    #[test]
    fn test_block_serialization() {
        let block = sample_block();
        let serialized = block.serialize();
        let deserialized = Block::deserialize(&serialized).unwrap();
        assert_eq!(block, deserialized);
    }

    #[test]
    fn test_truncated_block_rejected() {
        let serialized = sample_block().serialize();
        assert!(Block::deserialize(&serialized[..serialized.len() - 3]).is_err());
        assert!(Block::deserialize(&serialized[..20]).is_err());
        assert!(Block::deserialize(&[]).is_err());
    }

    #[test]
    fn test_hash_covers_every_field() {
        let block = sample_block();
        assert!(block.has_valid_hash());

        let mut changed = block.clone();
        changed.nonce += 1;
        assert!(!changed.has_valid_hash());

        let mut changed = block.clone();
        changed.height += 1;
        assert!(!changed.has_valid_hash());

        let mut changed = block.clone();
        changed.timestamp += 1;
        assert!(!changed.has_valid_hash());

        let mut changed = block.clone();
        changed.transactions[1].outputs[0].value = 4;
        changed.transactions[1].refresh_hash();
        assert!(!changed.has_valid_hash());
    }

    #[test]
    fn test_genesis_detection() {
        let genesis = Block::new(0, Hash256::zero(), vec![Transaction::new_coinbase([1; 20])]);
        assert!(genesis.is_genesis());
        assert!(!sample_block().is_genesis());
        assert_eq!(sample_block().regular_transactions().count(), 1);
    }
}
