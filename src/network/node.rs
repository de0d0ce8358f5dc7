// Network node - peer synchronization state machine

use crate::chain::Blockchain;
use crate::core::{Block, Hash256, Transaction};
use crate::error::{Error, NotFoundError, ProtocolError, Result};
use crate::network::message::{
    AddrMessage, BlockMessage, GetBlocksMessage, GetDataMessage, InvMessage, InvType, Message, TxMessage,
    VersionMessage,
};
use crate::network::{read_message, Peer, Registry};
use crate::wallet::Address;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// A message to deliver to `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: String,
    pub message: Message,
}

impl Outbound {
    fn new(to: impl Into<String>, message: Message) -> Self {
        Self { to: to.into(), message }
    }
}

/// Network node
#[derive(Clone)]
pub struct Node {
    /// Address this node listens on and announces
    pub addr: String,
    /// Seed node every other node reports to
    pub bootstrap_addr: String,
    /// Reward address when this node mines pooled transactions
    pub miner: Option<Address>,
    chain: Blockchain,
    registry: Arc<Mutex<Registry>>,
}

impl Node {
    /// Create a new node
    pub fn new(addr: impl Into<String>, bootstrap_addr: impl Into<String>, chain: Blockchain, miner: Option<Address>) -> Self {
        let bootstrap_addr = bootstrap_addr.into();
        let registry = Registry::new(&bootstrap_addr);
        Self {
            addr: addr.into(),
            bootstrap_addr,
            miner,
            chain,
            registry: Arc::new(Mutex::new(registry)),
        }
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn registry(&self) -> &Arc<Mutex<Registry>> {
        &self.registry
    }

    pub fn is_bootstrap(&self) -> bool {
        self.addr == self.bootstrap_addr
    }

    /// Bind the listener, announce ourselves to the bootstrap node and serve
    /// one message per accepted connection until the listener fails
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await.map_err(ProtocolError::Io)?;
        log::info!(
            "Node listening on {} (height {}{})",
            self.addr,
            self.chain.best_height()?,
            if self.miner.is_some() { ", mining" } else { "" }
        );

        if !self.is_bootstrap() {
            let hello = Outbound::new(self.bootstrap_addr.clone(), self.version_message()?);
            self.dispatch(vec![hello]).await;
        }

        loop {
            let (mut stream, remote) = listener.accept().await.map_err(ProtocolError::Io)?;
            let node = self.clone();

            tokio::spawn(async move {
                // The stream is dropped (closed) as soon as the message is read
                let message = match read_message(&mut stream).await {
                    Ok(message) => message,
                    Err(e) => {
                        log::warn!("Dropping connection from {}: {}", remote, e);
                        return;
                    }
                };
                drop(stream);

                log::debug!("Received {} from {}", message.message_type().as_str(), remote);
                match node.handle(message).await {
                    Ok(outbound) => node.dispatch(outbound).await,
                    Err(e) if e.is_recoverable() => log::warn!("Request from {} failed: {}", remote, e),
                    Err(e) => log::error!("Request from {} failed: {}", remote, e),
                }
            });
        }
    }

    /// Deliver messages, forgetting peers that cannot be reached
    pub async fn dispatch(&self, outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            if let Err(e) = Peer::new(to.clone()).send(&message).await {
                log::warn!("Peer {} unreachable: {}", to, e);
                if to != self.bootstrap_addr {
                    self.registry.lock().await.remove_peer(&to);
                }
            }
        }
    }

    /// Run chain work that touches storage or scans blocks off the async workers
    async fn with_chain<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Blockchain) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let chain = self.chain.clone();
        tokio::task::spawn_blocking(move || f(chain)).await?
    }

    fn version_message(&self) -> Result<Message> {
        Ok(Message::version(&self.addr, self.chain.best_height()?))
    }

    /// React to one inbound message, returning the messages to send
    pub async fn handle(&self, message: Message) -> Result<Vec<Outbound>> {
        match message {
            Message::Version(m) => self.handle_version(m).await,
            Message::Addr(m) => self.handle_addr(m).await,
            Message::GetBlocks(m) => self.handle_get_blocks(m).await,
            Message::Inv(m) => self.handle_inv(m).await,
            Message::GetData(m) => self.handle_get_data(m).await,
            Message::Block(m) => self.handle_block(m).await,
            Message::Tx(m) => self.handle_tx(m).await,
        }
    }

    async fn handle_version(&self, m: VersionMessage) -> Result<Vec<Outbound>> {
        let mut outbound = Vec::new();
        let local_height = self.chain.best_height()?;

        if local_height > m.best_height {
            outbound.push(Outbound::new(&m.addr_from, self.version_message()?));
        } else if local_height < m.best_height {
            outbound.push(Outbound::new(&m.addr_from, Message::get_blocks(&self.addr)));
        }

        if m.addr_from != self.addr {
            let mut registry = self.registry.lock().await;
            if registry.add_peer(&m.addr_from) {
                log::info!("New peer {} at height {}", m.addr_from, m.best_height);
                if self.is_bootstrap() {
                    let addr_list = registry.known_peers().to_vec();
                    outbound.push(Outbound::new(&m.addr_from, Message::Addr(AddrMessage { addr_list })));
                }
            }
        }

        Ok(outbound)
    }

    async fn handle_addr(&self, m: AddrMessage) -> Result<Vec<Outbound>> {
        let mut registry = self.registry.lock().await;
        for addr in m.addr_list.iter().filter(|addr| **addr != self.addr) {
            registry.add_peer(addr);
        }
        log::debug!("Now {} known peers", registry.known_peers().len());
        Ok(Vec::new())
    }

    async fn handle_get_blocks(&self, m: GetBlocksMessage) -> Result<Vec<Outbound>> {
        let hashes = self.with_chain(|chain| chain.block_hashes()).await?;
        Ok(vec![Outbound::new(&m.addr_from, Message::inv(&self.addr, InvType::Block, hashes))])
    }

    async fn handle_inv(&self, m: InvMessage) -> Result<Vec<Outbound>> {
        log::debug!("Inventory from {}: {} {:?} items", m.addr_from, m.items.len(), m.kind);

        match m.kind {
            InvType::Block => {
                // Announced tip first; fetch missing blocks oldest first
                let mut missing = Vec::new();
                for hash in m.items.iter().rev() {
                    if !self.chain.has_block(hash)? {
                        missing.push(*hash);
                    }
                }

                let mut missing = missing.into_iter();
                let Some(first) = missing.next() else {
                    return Ok(Vec::new());
                };
                self.registry.lock().await.queue_blocks(missing);

                Ok(vec![Outbound::new(&m.addr_from, Message::get_data(&self.addr, InvType::Block, first))])
            }
            InvType::Tx => {
                let registry = self.registry.lock().await;
                Ok(m.items
                    .iter()
                    .filter(|hash| !registry.in_mempool(hash))
                    .map(|hash| Outbound::new(&m.addr_from, Message::get_data(&self.addr, InvType::Tx, *hash)))
                    .collect())
            }
        }
    }

    async fn handle_get_data(&self, m: GetDataMessage) -> Result<Vec<Outbound>> {
        let reply = match m.kind {
            InvType::Block => match self.chain.get_block(&m.hash) {
                Ok(block) => Some(Message::block(&self.addr, &block)),
                Err(Error::NotFound(NotFoundError::Block(_))) => None,
                Err(e) => return Err(e),
            },
            InvType::Tx => {
                let registry = self.registry.lock().await;
                registry.mempool_get(&m.hash).map(|tx| Message::tx(&self.addr, tx))
            }
        };

        match reply {
            Some(message) => Ok(vec![Outbound::new(&m.addr_from, message)]),
            None => {
                log::debug!("{} asked for unknown {:?} {}", m.addr_from, m.kind, m.hash);
                Ok(Vec::new())
            }
        }
    }

    async fn handle_block(&self, m: BlockMessage) -> Result<Vec<Outbound>> {
        let block = m.decode()?;
        let mut outbound = Vec::new();

        let admitted = {
            let block = block.clone();
            self.with_chain(move |chain| chain.add_block(&block)).await
        };
        match admitted {
            Ok(true) => {
                let mut registry = self.registry.lock().await;
                if registry.cancel_mining() {
                    log::info!("Cancelling local mining, block {} arrived first", block.hash);
                }
                registry.remove_from_mempool(&block.transactions);

                if self.is_bootstrap() {
                    for peer in registry.peers_except(&[self.addr.as_str(), m.addr_from.as_str()]) {
                        outbound.push(Outbound::new(peer, Message::inv(&self.addr, InvType::Block, vec![block.hash])));
                    }
                }
            }
            Ok(false) => log::debug!("Already have block {}", block.hash),
            Err(e) if e.is_recoverable() => {
                log::warn!("Rejected block {} from {}: {}", block.hash, m.addr_from, e);
                self.registry.lock().await.clear_blocks_in_transit();
                return Ok(outbound);
            }
            Err(e) => return Err(e),
        }

        let next = self.registry.lock().await.next_block_in_transit();
        match next {
            Some(hash) => outbound.push(Outbound::new(&m.addr_from, Message::get_data(&self.addr, InvType::Block, hash))),
            None => log::debug!("Block download complete at height {}", self.chain.best_height()?),
        }

        Ok(outbound)
    }

    async fn handle_tx(&self, m: TxMessage) -> Result<Vec<Outbound>> {
        let tx = m.decode()?;
        let txid = tx.tx_hash;

        let checked = {
            let tx = tx.clone();
            self.with_chain(move |chain| chain.validate_transactions([&tx])).await
        };
        if let Err(e) = checked {
            if e.is_recoverable() {
                log::warn!("Rejected transaction {} from {}: {}", txid, m.addr_from, e);
                return Ok(Vec::new());
            }
            return Err(e);
        }

        let mut registry = self.registry.lock().await;
        if !registry.add_to_mempool(tx) {
            return Ok(Vec::new());
        }
        log::info!("Pooled transaction {} ({} pending)", txid, registry.mempool_len());

        let mut outbound = Vec::new();
        if self.is_bootstrap() {
            for peer in registry.peers_except(&[self.addr.as_str(), m.addr_from.as_str()]) {
                outbound.push(Outbound::new(peer, Message::inv(&self.addr, InvType::Tx, vec![txid])));
            }
        }
        drop(registry);

        if let Some(reward_to) = &self.miner {
            outbound.extend(self.mine_pending(reward_to).await?);
        }
        Ok(outbound)
    }

    /// Mine blocks from the pool until it is drained, a run is already in
    /// progress elsewhere, or mining is cancelled
    async fn mine_pending(&self, reward_to: &Address) -> Result<Vec<Outbound>> {
        let mut outbound = Vec::new();

        loop {
            let (cancel, pooled) = {
                let mut registry = self.registry.lock().await;
                if registry.mempool_len() == 0 {
                    break;
                }
                let Some(cancel) = registry.start_mining() else {
                    break;
                };
                (cancel, registry.mempool_transactions())
            };

            let reward_to = reward_to.clone();
            let result = self
                .with_chain(move |chain| {
                    let transactions = select_transactions(&chain, pooled);
                    if transactions.is_empty() {
                        return Ok(None);
                    }
                    chain.mine_block(transactions, &reward_to, &cancel).map(Some)
                })
                .await;

            let mut registry = self.registry.lock().await;
            registry.finish_mining();

            match result {
                Ok(Some(block)) => {
                    registry.remove_from_mempool(&block.transactions);
                    outbound.extend(self.announce_mined(&registry, &block));
                }
                Ok(None) => {
                    // Nothing in the pool can be mined any more
                    let stale = registry.mempool_transactions();
                    registry.remove_from_mempool(&stale);
                    break;
                }
                Err(Error::MiningCancelled) => {
                    log::info!("Mining cancelled");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    // Typically a peer block moved the tip while we were mining
                    log::warn!("Discarding mined block: {}", e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outbound)
    }

    fn announce_mined(&self, registry: &Registry, block: &Block) -> Vec<Outbound> {
        if self.is_bootstrap() {
            let inv = |peer: String| Outbound::new(peer, Message::inv(&self.addr, InvType::Block, vec![block.hash]));
            registry.peers_except(&[self.addr.as_str()]).into_iter().map(inv).collect()
        } else {
            vec![Outbound::new(&self.bootstrap_addr, Message::block(&self.addr, block))]
        }
    }

    /// Hashes of the pooled transactions
    pub async fn mempool_hashes(&self) -> Vec<Hash256> {
        self.registry
            .lock()
            .await
            .mempool_transactions()
            .iter()
            .map(|tx| tx.tx_hash)
            .collect()
    }
}

/// Pooled transactions that are valid together against the current chain
fn select_transactions(chain: &Blockchain, pooled: Vec<Transaction>) -> Vec<Transaction> {
    let mut selected: Vec<Transaction> = Vec::new();
    for tx in pooled {
        match chain.validate_transactions(selected.iter().chain(std::iter::once(&tx))) {
            Ok(()) => selected.push(tx),
            Err(e) => log::debug!("Leaving transaction {} out of the block: {}", tx.tx_hash, e),
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{CancelToken, Target};
    use crate::core::BLOCK_REWARD;
    use crate::storage::Storage;
    use crate::wallet::{Keystore, TransactionBuilder};

    const BOOTSTRAP: &str = "localhost:3000";
    const NODE_A: &str = "localhost:3001";
    const NODE_B: &str = "localhost:3002";
    const NODE_C: &str = "localhost:3003";

    fn target() -> Target {
        Target::from_difficulty(6).unwrap()
    }

    /// A chain with `height` blocks on top of genesis, plus a peer chain sharing its genesis
    fn chains(keystore: &mut Keystore, height: u64) -> (Blockchain, Blockchain, Address) {
        let alice = keystore.new_address();
        let chain = Blockchain::initialize(Storage::memory().unwrap(), &alice, target()).unwrap();
        let genesis = chain.get_block(&chain.tip().unwrap()).unwrap();
        let peer_chain = Blockchain::initialize_with_genesis(Storage::memory().unwrap(), &genesis, target()).unwrap();

        for _ in 0..height {
            chain.mine_block(vec![], &alice, &CancelToken::new()).unwrap();
        }
        (chain, peer_chain, alice)
    }

    #[tokio::test]
    async fn test_version_height_comparison() {
        let mut keystore = Keystore::new();
        let (chain, _, _) = chains(&mut keystore, 5);
        let node = Node::new(NODE_A, BOOTSTRAP, chain, None);

        // Peer is behind: tell it our height
        let out = node.handle(Message::version(NODE_B, 2)).await.unwrap();
        assert_eq!(out, vec![Outbound::new(NODE_B, Message::version(NODE_A, 5))]);
        assert!(node.registry().lock().await.is_known(NODE_B));

        // Peer is ahead: ask for its blocks
        let out = node.handle(Message::version(NODE_C, 9)).await.unwrap();
        assert_eq!(out, vec![Outbound::new(NODE_C, Message::get_blocks(NODE_A))]);

        // Same height: nothing to do
        let out = node.handle(Message::version(NODE_B, 5)).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_shares_known_peers() {
        let mut keystore = Keystore::new();
        let (chain, _, _) = chains(&mut keystore, 0);
        let node = Node::new(BOOTSTRAP, BOOTSTRAP, chain, None);

        node.handle(Message::version(NODE_A, 0)).await.unwrap();
        let out = node.handle(Message::version(NODE_B, 0)).await.unwrap();
        assert_eq!(
            out,
            vec![Outbound::new(
                NODE_B,
                Message::Addr(AddrMessage {
                    addr_list: vec![BOOTSTRAP.to_string(), NODE_A.to_string(), NODE_B.to_string()]
                })
            )]
        );

        // Known peers are not told again
        assert!(node.handle(Message::version(NODE_B, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_addr_merges_known_peers() {
        let mut keystore = Keystore::new();
        let (chain, _, _) = chains(&mut keystore, 0);
        let node = Node::new(NODE_A, BOOTSTRAP, chain, None);

        let addr_list = vec![BOOTSTRAP.to_string(), NODE_A.to_string(), NODE_B.to_string()];
        let out = node.handle(Message::Addr(AddrMessage { addr_list })).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(node.registry().lock().await.known_peers(), [BOOTSTRAP, NODE_B]);
    }

    #[tokio::test]
    async fn test_get_blocks_returns_inventory() {
        let mut keystore = Keystore::new();
        let (chain, _, _) = chains(&mut keystore, 2);
        let hashes = chain.block_hashes().unwrap();
        let node = Node::new(NODE_A, BOOTSTRAP, chain, None);

        let out = node.handle(Message::get_blocks(NODE_B)).await.unwrap();
        assert_eq!(out, vec![Outbound::new(NODE_B, Message::inv(NODE_A, InvType::Block, hashes))]);
    }

    #[tokio::test]
    async fn test_get_data() {
        let mut keystore = Keystore::new();
        let (chain, _, _) = chains(&mut keystore, 1);
        let tip = chain.get_block(&chain.tip().unwrap()).unwrap();
        let node = Node::new(NODE_A, BOOTSTRAP, chain, None);

        let out = node.handle(Message::get_data(NODE_B, InvType::Block, tip.hash)).await.unwrap();
        assert_eq!(out, vec![Outbound::new(NODE_B, Message::block(NODE_A, &tip))]);

        // Unknown objects get no reply
        let unknown = Hash256::new([0xab; 32]);
        assert!(node.handle(Message::get_data(NODE_B, InvType::Block, unknown)).await.unwrap().is_empty());
        assert!(node.handle(Message::get_data(NODE_B, InvType::Tx, unknown)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_block_download() {
        let mut keystore = Keystore::new();
        let (chain_a, chain_b, _) = chains(&mut keystore, 2);
        let hashes = chain_a.block_hashes().unwrap(); // [h2, h1, genesis]
        let node_b = Node::new(NODE_B, BOOTSTRAP, chain_b, None);

        let out = node_b.handle(Message::inv(NODE_A, InvType::Block, hashes.clone())).await.unwrap();
        assert_eq!(out, vec![Outbound::new(NODE_A, Message::get_data(NODE_B, InvType::Block, hashes[1]))]);
        assert_eq!(node_b.registry().lock().await.blocks_in_transit(), 1);

        let first = chain_a.get_block(&hashes[1]).unwrap();
        let out = node_b.handle(Message::block(NODE_A, &first)).await.unwrap();
        assert_eq!(out, vec![Outbound::new(NODE_A, Message::get_data(NODE_B, InvType::Block, hashes[0]))]);

        let second = chain_a.get_block(&hashes[0]).unwrap();
        let out = node_b.handle(Message::block(NODE_A, &second)).await.unwrap();
        assert!(out.is_empty());

        assert_eq!(node_b.chain().best_height().unwrap(), 2);
        assert_eq!(node_b.chain().tip().unwrap(), hashes[0]);

        // Nothing left to fetch once in sync
        let out = node_b.handle(Message::inv(NODE_A, InvType::Block, hashes)).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_block_stops_download() {
        let mut keystore = Keystore::new();
        let (chain_a, chain_b, _) = chains(&mut keystore, 2);
        let hashes = chain_a.block_hashes().unwrap();
        let node_b = Node::new(NODE_B, BOOTSTRAP, chain_b, None);

        node_b.handle(Message::inv(NODE_A, InvType::Block, hashes.clone())).await.unwrap();

        // Arrives out of order: does not extend the tip
        let second = chain_a.get_block(&hashes[0]).unwrap();
        let out = node_b.handle(Message::block(NODE_A, &second)).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(node_b.registry().lock().await.blocks_in_transit(), 0);
        assert_eq!(node_b.chain().best_height().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_announces_admitted_block() {
        let mut keystore = Keystore::new();
        let (chain_a, chain_b, _) = chains(&mut keystore, 1);
        let block = chain_a.get_block(&chain_a.tip().unwrap()).unwrap();
        let bootstrap = Node::new(BOOTSTRAP, BOOTSTRAP, chain_b, None);
        bootstrap.registry().lock().await.add_peer(NODE_A);
        bootstrap.registry().lock().await.add_peer(NODE_B);

        let out = bootstrap.handle(Message::block(NODE_A, &block)).await.unwrap();
        assert_eq!(out, vec![Outbound::new(NODE_B, Message::inv(BOOTSTRAP, InvType::Block, vec![block.hash]))]);
    }

    #[tokio::test]
    async fn test_bootstrap_gossips_transactions() {
        let mut keystore = Keystore::new();
        let (chain, _, alice) = chains(&mut keystore, 0);
        let bob = keystore.new_address();
        let tx = TransactionBuilder::new(&keystore, &chain).build(&alice, &[(bob, 3)]).unwrap();

        let bootstrap = Node::new(BOOTSTRAP, BOOTSTRAP, chain, None);
        for peer in [NODE_A, NODE_B, NODE_C] {
            bootstrap.registry().lock().await.add_peer(peer);
        }

        let out = bootstrap.handle(Message::tx(NODE_A, &tx)).await.unwrap();
        let inv = Message::inv(BOOTSTRAP, InvType::Tx, vec![tx.tx_hash]);
        assert_eq!(out, vec![Outbound::new(NODE_B, inv.clone()), Outbound::new(NODE_C, inv)]);
        assert_eq!(bootstrap.mempool_hashes().await, vec![tx.tx_hash]);

        // A peer that already pooled it does not ask again
        let out = bootstrap.handle(Message::inv(NODE_B, InvType::Tx, vec![tx.tx_hash])).await.unwrap();
        assert!(out.is_empty());

        let out = bootstrap.handle(Message::get_data(NODE_B, InvType::Tx, tx.tx_hash)).await.unwrap();
        assert_eq!(out, vec![Outbound::new(NODE_B, Message::tx(BOOTSTRAP, &tx))]);
    }

    #[tokio::test]
    async fn test_inv_tx_requests_unknown_transactions() {
        let mut keystore = Keystore::new();
        let (chain, _, _) = chains(&mut keystore, 0);
        let node = Node::new(NODE_A, BOOTSTRAP, chain, None);
        let txid = Hash256::new([5; 32]);

        let out = node.handle(Message::inv(BOOTSTRAP, InvType::Tx, vec![txid])).await.unwrap();
        assert_eq!(out, vec![Outbound::new(BOOTSTRAP, Message::get_data(NODE_A, InvType::Tx, txid))]);
    }

    #[tokio::test]
    async fn test_invalid_transaction_not_pooled() {
        let mut keystore = Keystore::new();
        let (chain, _, alice) = chains(&mut keystore, 0);
        let bob = keystore.new_address();
        let mut tx = TransactionBuilder::new(&keystore, &chain).build(&alice, &[(bob, 3)]).unwrap();
        tx.inputs[0].signature[5] ^= 0xff;
        tx.refresh_hash();

        let bootstrap = Node::new(BOOTSTRAP, BOOTSTRAP, chain, None);
        bootstrap.registry().lock().await.add_peer(NODE_B);

        let out = bootstrap.handle(Message::tx(NODE_A, &tx)).await.unwrap();
        assert!(out.is_empty());
        assert!(bootstrap.mempool_hashes().await.is_empty());
    }

    #[tokio::test]
    async fn test_miner_mines_pooled_transaction() {
        let mut keystore = Keystore::new();
        let (chain, _, alice) = chains(&mut keystore, 0);
        let bob = keystore.new_address();
        let tx = TransactionBuilder::new(&keystore, &chain).build(&alice, &[(bob.clone(), 3)]).unwrap();

        let miner = Node::new(NODE_A, BOOTSTRAP, chain, Some(bob.clone()));
        let out = miner.handle(Message::tx(BOOTSTRAP, &tx)).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, BOOTSTRAP);
        let Message::Block(m) = &out[0].message else {
            panic!("expected a block, got {:?}", out[0].message.message_type());
        };
        let block = m.decode().unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(block.transactions[1], tx);

        assert_eq!(miner.chain().tip().unwrap(), block.hash);
        assert_eq!(miner.chain().get_balance(&bob).unwrap(), 3 + BLOCK_REWARD);
        assert!(miner.mempool_hashes().await.is_empty());
    }

    #[tokio::test]
    async fn test_mining_bootstrap_gossips_then_mines() {
        let mut keystore = Keystore::new();
        let (chain, _, alice) = chains(&mut keystore, 0);
        let bob = keystore.new_address();
        let tx = TransactionBuilder::new(&keystore, &chain).build(&alice, &[(bob.clone(), 3)]).unwrap();

        let bootstrap = Node::new(BOOTSTRAP, BOOTSTRAP, chain, Some(bob.clone()));
        bootstrap.registry().lock().await.add_peer(NODE_A);
        bootstrap.registry().lock().await.add_peer(NODE_B);

        let out = bootstrap.handle(Message::tx(NODE_A, &tx)).await.unwrap();

        let tip = bootstrap.chain().tip().unwrap();
        assert_eq!(bootstrap.chain().best_height().unwrap(), 1);
        assert_eq!(
            out,
            vec![
                Outbound::new(NODE_B, Message::inv(BOOTSTRAP, InvType::Tx, vec![tx.tx_hash])),
                Outbound::new(NODE_A, Message::inv(BOOTSTRAP, InvType::Block, vec![tip])),
                Outbound::new(NODE_B, Message::inv(BOOTSTRAP, InvType::Block, vec![tip])),
            ]
        );
        assert_eq!(bootstrap.chain().get_balance(&bob).unwrap(), 3 + BLOCK_REWARD);
        assert!(bootstrap.mempool_hashes().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let mut keystore = Keystore::new();
        let (chain, _, _) = chains(&mut keystore, 0);
        let node = Node::new(NODE_A, BOOTSTRAP, chain, None);

        let message = Message::Block(BlockMessage {
            addr_from: NODE_B.to_string(),
            block: vec![0; 10],
        });
        let err = node.handle(message).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.is_recoverable());
    }
}
