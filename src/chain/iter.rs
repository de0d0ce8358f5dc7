// Tip-to-genesis block iterator

use crate::core::{Block, Hash256};
use crate::error::{Error, NotFoundError, Result};
use crate::storage::BlockchainDB;

/// Walks the chain backward from a starting hash, yielding each block once.
/// Ends after the genesis block, or after the first error.
pub struct ChainIterator {
    db: BlockchainDB,
    next: Option<Hash256>,
    error: Option<Error>,
}

impl ChainIterator {
    pub(crate) fn new(db: BlockchainDB, start: Option<Hash256>) -> Self {
        Self {
            db,
            next: start,
            error: None,
        }
    }

    /// An iterator that yields `error` once and then ends
    pub(crate) fn failed(db: BlockchainDB, error: Error) -> Self {
        Self {
            db,
            next: None,
            error: Some(error),
        }
    }
}

impl Iterator for ChainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.error.take() {
            return Some(Err(error));
        }

        let hash = self.next.take()?;
        match self.db.get_block(&hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.next = Some(block.prev_hash);
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(NotFoundError::Block(hash).into())),
            Err(e) => Some(Err(e)),
        }
    }
}
