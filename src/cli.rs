// CLI commands

use crate::chain::Blockchain;
use crate::config::{NodeConfig, DEFAULT_BOOTSTRAP, DEFAULT_DIFFICULTY, DEFAULT_NODE_ID};
use crate::consensus::{CancelToken, Miner, ValidationError};
use crate::core::{Block, Serializable};
use crate::error::{Error, ProtocolError, Result};
use crate::network::{Message, Node, Peer};
use crate::wallet::{Address, Keystore, TransactionBuilder};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minicoin")]
#[command(about = "Minimal proof-of-work cryptocurrency node", long_about = None)]
pub struct Cli {
    /// Directory holding per-node chain and wallet files
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Node id, also the listening port
    #[arg(long, global = true, env = "NODE_ID", default_value_t = DEFAULT_NODE_ID)]
    pub node_id: u16,

    /// Leading zero bits required of block hashes
    #[arg(long, global = true, default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: u32,

    /// Address of the bootstrap node
    #[arg(long, global = true, default_value = DEFAULT_BOOTSTRAP)]
    pub bootstrap: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn config(&self) -> NodeConfig {
        NodeConfig {
            data_dir: self.data_dir.clone(),
            node_id: self.node_id,
            difficulty: self.difficulty,
            bootstrap_addr: self.bootstrap.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new blockchain, paying the genesis reward to ADDRESS
    CreateChain {
        #[arg(long, value_parser = parse_address, required_unless_present = "genesis")]
        address: Option<Address>,
        /// Join an existing network using its exported genesis block instead
        #[arg(long, conflicts_with = "address")]
        genesis: Option<PathBuf>,
    },

    /// Write the genesis block to a file for other nodes to import
    ExportGenesis {
        #[arg(long)]
        out: PathBuf,
    },

    /// Send coins, e.g. `--to addr1:3,addr2:4`
    Send {
        #[arg(long, value_parser = parse_address)]
        from: Address,
        #[arg(long, value_delimiter = ',', value_parser = parse_recipient, required = true)]
        to: Vec<(Address, u64)>,
        /// Mine the transaction into a block locally instead of submitting it to the bootstrap node
        #[arg(long)]
        mine: bool,
    },

    /// Get balance for an address
    GetBalance {
        #[arg(long, value_parser = parse_address)]
        address: Address,
    },

    /// Print every block from the tip back to genesis
    PrintChain,

    /// Run a network node
    StartNode {
        /// Mine pooled transactions, paying rewards to this address
        #[arg(long, value_parser = parse_address)]
        miner: Option<Address>,
    },

    /// Create a new address in this node's wallet
    CreateWallet,

    /// List the addresses in this node's wallet
    ListAddresses,

    /// Rebuild the UTXO index from the stored chain
    ReindexUtxo,
}

fn parse_address(s: &str) -> std::result::Result<Address, String> {
    Address::parse(s).map_err(|e| e.to_string())
}

/// `ADDRESS:AMOUNT`
fn parse_recipient(s: &str) -> std::result::Result<(Address, u64), String> {
    let (address, amount) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected ADDRESS:AMOUNT, got {:?}", s))?;
    let amount: u64 = amount
        .trim()
        .parse()
        .map_err(|e| format!("invalid amount {:?}: {}", amount, e))?;
    if amount == 0 {
        return Err("amount must be positive".to_string());
    }
    Ok((parse_address(address.trim())?, amount))
}

/// CLI handler
pub struct CliHandler {
    config: NodeConfig,
}

impl CliHandler {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Handle CLI command
    pub fn handle(&self, command: Commands) -> Result<()> {
        match command {
            Commands::CreateChain { address, genesis } => self.create_chain(address.as_ref(), genesis),
            Commands::ExportGenesis { out } => self.export_genesis(out),
            Commands::Send { from, to, mine } => self.send(&from, &to, mine),
            Commands::GetBalance { address } => self.get_balance(&address),
            Commands::PrintChain => self.print_chain(),
            Commands::StartNode { miner } => self.start_node(miner),
            Commands::CreateWallet => self.create_wallet(),
            Commands::ListAddresses => self.list_addresses(),
            Commands::ReindexUtxo => self.reindex_utxo(),
        }
    }

    fn open_chain(&self) -> Result<Blockchain> {
        Blockchain::open(self.config.blockchain_path(), self.config.target()?)
    }

    fn create_chain(&self, address: Option<&Address>, genesis: Option<PathBuf>) -> Result<()> {
        let path = self.config.blockchain_path();
        let target = self.config.target()?;

        let chain = match (genesis, address) {
            (Some(file), _) => {
                let encoded = fs::read_to_string(&file)?;
                let bytes = hex::decode(encoded.trim())
                    .map_err(|e| ProtocolError::Malformed(format!("genesis file {}: {}", file.display(), e)))?;
                let block = Block::deserialize(&bytes).map_err(ProtocolError::Malformed)?;
                Blockchain::create_with_genesis(&path, &block, target)?
            }
            (None, Some(address)) => {
                println!("Mining genesis block at difficulty {}...", target.difficulty);
                Blockchain::create(&path, address, target)?
            }
            (None, None) => return Err(ValidationError::InvalidAddress("no genesis address given".to_string()).into()),
        };

        println!("Blockchain created at {}", path.display());
        println!("  Genesis: {}", chain.tip()?);
        Ok(())
    }

    fn export_genesis(&self, out: PathBuf) -> Result<()> {
        let chain = self.open_chain()?;
        let genesis = match chain.iter().last() {
            Some(block) => block?,
            None => return Err(Error::ChainMissing(self.config.blockchain_path())),
        };

        fs::write(&out, hex::encode(genesis.serialize()))?;
        println!("Genesis block {} written to {}", genesis.hash, out.display());
        Ok(())
    }

    fn send(&self, from: &Address, recipients: &[(Address, u64)], mine: bool) -> Result<()> {
        let keystore = Keystore::open(self.config.wallet_path())?;
        let chain = self.open_chain()?;

        let tx = TransactionBuilder::new(&keystore, &chain).build(from, recipients)?;
        let total: u64 = recipients.iter().map(|(_, amount)| amount).sum();

        if mine {
            let block = chain.mine_block(vec![tx.clone()], from, &CancelToken::new())?;
            chain.flush()?;
            println!("Sent {} in transaction {}", total, tx.tx_hash);
            println!("  Mined into block {} at height {}", block.hash, block.height);
        } else {
            // Release the database before handing over to the network
            drop(chain);
            let message = Message::tx(&self.config.node_addr(), &tx);
            let bootstrap = Peer::new(self.config.bootstrap_addr.clone());
            runtime()?.block_on(bootstrap.send(&message))?;
            println!("Submitted transaction {} ({} coins) to {}", tx.tx_hash, total, bootstrap.addr);
        }

        Ok(())
    }

    fn get_balance(&self, address: &Address) -> Result<()> {
        let chain = self.open_chain()?;
        println!("Balance of {}: {}", address, chain.get_balance(address)?);
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let chain = self.open_chain()?;
        let miner = Miner::new(chain.target());

        for block in chain.iter() {
            let block = block?;
            println!("============ Block {} ============", block.hash);
            println!("Height: {}", block.height);
            println!("Prev. block: {}", block.prev_hash);
            println!("Timestamp: {}", block.timestamp);
            println!("Nonce: {}", block.nonce);
            println!("PoW: {}", miner.verify(&block));

            for tx in &block.transactions {
                println!("--- Transaction {}", tx.tx_hash);
                for (i, input) in tx.inputs.iter().enumerate() {
                    if input.is_coinbase() {
                        println!("  Input {}: coinbase", i);
                    } else {
                        println!("  Input {}: {}:{}", i, input.prev_tx_hash, input.prev_index);
                    }
                }
                for (i, output) in tx.outputs.iter().enumerate() {
                    let owner = Address::from_pubkey_hash(&output.pubkey_hash);
                    println!("  Output {}: {} to {}", i, output.value, owner);
                }
            }
            println!();
        }
        Ok(())
    }

    fn start_node(&self, miner: Option<Address>) -> Result<()> {
        if let Some(address) = &miner {
            println!("Mining is on. Rewards go to {}", address);
        }

        let chain = self.open_chain()?;
        let node = Node::new(self.config.node_addr(), self.config.bootstrap_addr.clone(), chain, miner);
        println!("Starting node {}", node.addr);
        runtime()?.block_on(node.run())
    }

    fn create_wallet(&self) -> Result<()> {
        let path = self.config.wallet_path();
        let mut keystore = Keystore::open(&path)?;
        let address = keystore.new_address();
        keystore.save(&path)?;
        println!("New address: {}", address);
        Ok(())
    }

    fn list_addresses(&self) -> Result<()> {
        let keystore = Keystore::open(self.config.wallet_path())?;
        let addresses = keystore.list_addresses();
        println!("Addresses ({}):", addresses.len());
        for address in addresses {
            println!("  {}", address);
        }
        Ok(())
    }

    fn reindex_utxo(&self) -> Result<()> {
        let chain = self.open_chain()?;
        let count = chain.reindex_utxo()?;
        chain.flush()?;
        println!("Done! There are {} transactions in the UTXO set.", count);
        Ok(())
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}
