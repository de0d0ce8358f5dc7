// Proof of Work implementation

use crate::consensus::ValidationError;
use crate::core::{sha256, Block, Hash256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Highest supported difficulty (target = 2)
pub const MAX_DIFFICULTY: u32 = 255;

/// Difficulty target: a block hash, read as a big-endian 256-bit integer,
/// must be strictly below `1 << (256 - difficulty)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Required leading zero bits
    pub difficulty: u32,
    threshold: [u8; 32],
}

impl Target {
    /// Create a target from a difficulty in `1..=255`
    pub fn from_difficulty(difficulty: u32) -> Result<Self, ValidationError> {
        if difficulty == 0 || difficulty > MAX_DIFFICULTY {
            return Err(ValidationError::InvalidDifficulty(difficulty));
        }

        let bit = (256 - difficulty) as usize;
        let mut threshold = [0u8; 32];
        threshold[31 - bit / 8] = 1 << (bit % 8);

        Ok(Self {
            difficulty,
            threshold,
        })
    }

    /// Threshold as a hash value
    pub fn to_hash256(&self) -> Hash256 {
        Hash256::new(self.threshold)
    }

    /// Check if a hash meets this target (hash < target)
    #[inline]
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        // Lexicographic order on big-endian bytes is numeric order
        hash.as_bytes() < &self.threshold
    }

    /// Count leading zero bits in the threshold
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;
        for byte in &self.threshold {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }
}

/// Shared flag that stops an in-flight mining run
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Proof of Work miner
#[derive(Debug, Clone, Copy)]
pub struct Miner {
    /// Fixed difficulty target
    pub target: Target,
}

impl Miner {
    /// Create a new miner with fixed difficulty
    pub fn new(target: Target) -> Self {
        Self { target }
    }

    /// Search nonces from 0 until the block hash meets the target.
    /// On success the block's `nonce` and `hash` are set. The cancel
    /// token is checked before every attempt.
    pub fn mine(&self, block: &mut Block, cancel: &CancelToken) -> MiningResult {
        let start_time = Instant::now();
        let merkle_root = block.merkle_root();
        let mut attempts = 0u64;

        for nonce in 0..=u64::MAX {
            if cancel.is_cancelled() {
                log::debug!("Mining of block {} cancelled after {} attempts", block.height, attempts);
                break;
            }

            let hash = sha256(&block.pow_data(&merkle_root, nonce));
            attempts += 1;

            if self.target.is_valid_hash(&hash) {
                block.nonce = nonce;
                block.hash = hash;
                return MiningResult {
                    success: true,
                    nonce,
                    hash,
                    attempts,
                    duration: start_time.elapsed(),
                };
            }

            // Progress indicator every 100k attempts
            if attempts % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!("Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        MiningResult {
            success: false,
            nonce: 0,
            hash: Hash256::zero(),
            attempts,
            duration: start_time.elapsed(),
        }
    }

    /// Verify that a block's stored nonce satisfies PoW
    pub fn verify(&self, block: &Block) -> bool {
        self.target.is_valid_hash(&block.compute_hash())
    }
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    /// Whether mining succeeded
    pub success: bool,
    /// The nonce that was found
    pub nonce: u64,
    /// The resulting hash
    pub hash: Hash256,
    /// Number of attempts
    pub attempts: u64,
    /// Time taken
    pub duration: std::time::Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    fn candidate() -> Block {
        Block::new(1, Hash256::new([3; 32]), vec![Transaction::new_coinbase([5; 20])])
    }

    #[test]
    fn test_target_from_difficulty() {
        let target = Target::from_difficulty(8).unwrap();
        let mut expected = [0u8; 32];
        expected[0] = 0x01;
        assert_eq!(target.to_hash256(), Hash256::new(expected));
        assert_eq!(target.leading_zeros(), 7);

        let target = Target::from_difficulty(1).unwrap();
        assert_eq!(target.to_hash256().as_bytes()[0], 0x80);

        let target = Target::from_difficulty(255).unwrap();
        assert_eq!(target.to_hash256().as_bytes()[31], 0x02);
    }

    #[test]
    fn test_difficulty_out_of_range() {
        assert_eq!(Target::from_difficulty(0), Err(ValidationError::InvalidDifficulty(0)));
        assert_eq!(Target::from_difficulty(256), Err(ValidationError::InvalidDifficulty(256)));
    }

    #[test]
    fn test_target_validation() {
        let target = Target::from_difficulty(8).unwrap();

        assert!(target.is_valid_hash(&Hash256::zero()));
        assert!(!target.is_valid_hash(&Hash256::new([0xff; 32])));

        // Exactly the threshold is not below it
        assert!(!target.is_valid_hash(&target.to_hash256()));

        let mut just_below = [0xff; 32];
        just_below[0] = 0x00;
        assert!(target.is_valid_hash(&Hash256::new(just_below)));
    }

    #[test]
    fn test_pow_mining_easy() {
        let miner = Miner::new(Target::from_difficulty(8).unwrap());
        let mut block = candidate();

        let result = miner.mine(&mut block, &CancelToken::new());
        assert!(result.success);
        assert_eq!(block.nonce, result.nonce);
        assert_eq!(block.hash, result.hash);
        assert_eq!(block.hash.as_bytes()[0], 0);
        assert!(block.has_valid_hash());
        assert!(miner.verify(&block));
    }

    #[test]
    fn test_pow_verification_rejects_wrong_nonce() {
        let miner = Miner::new(Target::from_difficulty(8).unwrap());
        let mut block = candidate();
        miner.mine(&mut block, &CancelToken::new());

        // Walk forward to a nonce that does not satisfy the target
        let mut tampered = block.clone();
        loop {
            tampered.nonce += 1;
            if !miner.target.is_valid_hash(&tampered.compute_hash()) {
                break;
            }
        }
        assert!(!miner.verify(&tampered));
    }

    #[test]
    fn test_cancelled_mining_stops() {
        let miner = Miner::new(Target::from_difficulty(MAX_DIFFICULTY).unwrap());
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut block = candidate();
        let result = miner.mine(&mut block, &cancel);
        assert!(!result.success);
        assert_eq!(result.attempts, 0);
        assert!(block.hash.is_zero());
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let miner = Miner::new(Target::from_difficulty(MAX_DIFFICULTY).unwrap());
        let cancel = CancelToken::new();

        let handle = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                let mut block = candidate();
                miner.mine(&mut block, &cancel)
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        cancel.cancel();
        let result = handle.join().unwrap();
        assert!(!result.success);
        assert!(result.attempts > 0);
    }
}
