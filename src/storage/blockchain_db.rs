// Block tree: serialized blocks keyed by hash, plus the tip pointer

use crate::core::{Block, Hash256, Serializable};
use crate::error::{Result, StorageError};
use sled::{IVec, Tree};

/// Reserved key holding the current tip hash
pub const TIP_KEY: &[u8] = b"L";

/// Decode a stored 32-byte hash
pub(crate) fn decode_hash(data: &IVec) -> std::result::Result<Hash256, StorageError> {
    Hash256::from_slice(data).map_err(StorageError::Corrupt)
}

/// Decode a stored block
pub(crate) fn decode_block(data: &IVec) -> std::result::Result<Block, StorageError> {
    Block::deserialize(data).map_err(|e| StorageError::Corrupt(format!("block record: {}", e)))
}

/// Blockchain database
#[derive(Clone)]
pub struct BlockchainDB {
    tree: Tree,
}

impl BlockchainDB {
    pub(crate) fn new(tree: Tree) -> Self {
        Self { tree }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        match self.tree.get(hash.as_bytes())? {
            Some(data) => Ok(Some(decode_block(&data)?)),
            None => Ok(None),
        }
    }

    /// Check if a block exists
    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.tree.contains_key(hash.as_bytes())?)
    }

    /// Get the chain tip (best block hash)
    pub fn get_tip(&self) -> Result<Option<Hash256>> {
        match self.tree.get(TIP_KEY)? {
            Some(data) => Ok(Some(decode_hash(&data)?)),
            None => Ok(None),
        }
    }
}
