// Merkle digest over a block's transactions

use crate::core::{sha256, Hash256, Transaction};

/// Hash the concatenation of two digests
fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left.as_bytes());
    combined[32..].copy_from_slice(right.as_bytes());
    sha256(&combined)
}

/// Merkle root over an ordered list of transaction hashes.
///
/// Leaves are `sha256(tx_hash)`. Whenever a level has an odd number of
/// nodes the last one is paired with itself, a lone leaf included, so the
/// root is always at least one pairing above the leaves. An empty list
/// commits to the zero hash.
pub fn merkle_root(tx_hashes: &[Hash256]) -> Hash256 {
    if tx_hashes.is_empty() {
        return Hash256::zero();
    }

    let mut level: Vec<Hash256> = tx_hashes.iter().map(|h| sha256(h.as_bytes())).collect();

    loop {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [single] => hash_pair(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        if level.len() == 1 {
            return level[0];
        }
    }
}

/// Merkle root of a block's transactions
pub fn transactions_root(transactions: &[Transaction]) -> Hash256 {
    let hashes: Vec<Hash256> = transactions.iter().map(|tx| tx.tx_hash).collect();
    merkle_root(&hashes)
}
