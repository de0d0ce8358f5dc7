// Wallet and transaction building

mod keystore;
mod tx_builder;

pub use keystore::{Address, KeyPair, Keystore, ADDRESS_VERSION};
pub use tx_builder::TransactionBuilder;
