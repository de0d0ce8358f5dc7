// Shared node state: known peers, pending transactions, pending block fetches

use crate::consensus::CancelToken;
use crate::core::{Hash256, Transaction};
use std::collections::{HashMap, VecDeque};

/// State shared by every connection handler. Always accessed under one lock.
#[derive(Debug, Default)]
pub struct Registry {
    known_peers: Vec<String>,
    mempool: HashMap<Hash256, Transaction>,
    blocks_in_transit: VecDeque<Hash256>,
    mining: Option<CancelToken>,
}

impl Registry {
    /// Start with the bootstrap node as the only known peer
    pub fn new(bootstrap_addr: &str) -> Self {
        Self {
            known_peers: vec![bootstrap_addr.to_string()],
            ..Self::default()
        }
    }

    /// Register a peer; returns true if it was not known yet
    pub fn add_peer(&mut self, addr: &str) -> bool {
        if self.is_known(addr) {
            return false;
        }
        self.known_peers.push(addr.to_string());
        true
    }

    pub fn remove_peer(&mut self, addr: &str) {
        self.known_peers.retain(|peer| peer != addr);
    }

    pub fn is_known(&self, addr: &str) -> bool {
        self.known_peers.iter().any(|peer| peer == addr)
    }

    pub fn known_peers(&self) -> &[String] {
        &self.known_peers
    }

    /// Known peers other than those in `exclude`
    pub fn peers_except(&self, exclude: &[&str]) -> Vec<String> {
        self.known_peers
            .iter()
            .filter(|peer| !exclude.contains(&peer.as_str()))
            .cloned()
            .collect()
    }

    /// Pool a transaction; returns false if it was already pooled
    pub fn add_to_mempool(&mut self, tx: Transaction) -> bool {
        self.mempool.insert(tx.tx_hash, tx).is_none()
    }

    pub fn in_mempool(&self, txid: &Hash256) -> bool {
        self.mempool.contains_key(txid)
    }

    pub fn mempool_get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.mempool.get(txid)
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    /// Pooled transactions, ordered by hash
    pub fn mempool_transactions(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.mempool.values().cloned().collect();
        txs.sort_by_key(|tx| tx.tx_hash);
        txs
    }

    /// Drop pooled transactions that are now in a block
    pub fn remove_from_mempool<'a, I>(&mut self, txs: I)
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        for tx in txs {
            self.mempool.remove(&tx.tx_hash);
        }
    }

    /// Replace the pending fetch queue
    pub fn queue_blocks(&mut self, hashes: impl IntoIterator<Item = Hash256>) {
        self.blocks_in_transit = hashes.into_iter().collect();
    }

    pub fn next_block_in_transit(&mut self) -> Option<Hash256> {
        self.blocks_in_transit.pop_front()
    }

    pub fn blocks_in_transit(&self) -> usize {
        self.blocks_in_transit.len()
    }

    pub fn clear_blocks_in_transit(&mut self) {
        self.blocks_in_transit.clear();
    }

    /// Claim the miner. Returns a token for the new run, or `None` if a run is in progress.
    pub fn start_mining(&mut self) -> Option<CancelToken> {
        if self.mining.is_some() {
            return None;
        }
        let token = CancelToken::new();
        self.mining = Some(token.clone());
        Some(token)
    }

    pub fn finish_mining(&mut self) {
        self.mining = None;
    }

    /// Abort the in-flight mining run, if any
    pub fn cancel_mining(&mut self) -> bool {
        match &self.mining {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
