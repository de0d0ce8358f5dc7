// Transaction builder

use crate::chain::Blockchain;
use crate::consensus::ValidationError;
use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{Error, Result};
use crate::wallet::{Address, Keystore};

/// Transaction builder
pub struct TransactionBuilder<'a> {
    keystore: &'a Keystore,
    chain: &'a Blockchain,
}

impl<'a> TransactionBuilder<'a> {
    /// Create a new transaction builder
    pub fn new(keystore: &'a Keystore, chain: &'a Blockchain) -> Self {
        Self { keystore, chain }
    }

    /// Build and sign a transaction paying each recipient from `from`'s unspent
    /// outputs. Outputs are selected greedily in index order; any excess comes
    /// back to `from` as a change output.
    pub fn build(&self, from: &Address, recipients: &[(Address, u64)]) -> Result<Transaction> {
        if recipients.is_empty() {
            return Err(ValidationError::EmptyTransaction.into());
        }

        let keypair = self.keystore.lookup(from)?;
        let sender_hash = keypair.pubkey_hash();

        let amount = recipients
            .iter()
            .try_fold(0u64, |total, (_, value)| total.checked_add(*value))
            .ok_or(ValidationError::ValueOverflow)?;

        let (available, selected) = self.chain.utxo_set().find_spendable(&sender_hash, amount)?;
        if available < amount {
            return Err(Error::InsufficientFunds {
                have: available,
                need: amount,
            });
        }

        let inputs: Vec<TxInput> = selected
            .iter()
            .map(|outpoint| TxInput::new(outpoint.txid, outpoint.vout as i64, keypair.pubkey_bytes()))
            .collect();

        let mut outputs = Vec::with_capacity(recipients.len() + 1);
        for (to, value) in recipients {
            outputs.push(TxOutput::new(*value, to.to_pubkey_hash()?));
        }
        if available > amount {
            outputs.push(TxOutput::new(available - amount, sender_hash));
        }

        let mut tx = Transaction::new(inputs, outputs);
        let prev_txs = self.chain.referenced_transactions(&tx)?;
        tx.sign(&keypair.secret_key, &prev_txs)?;
        tx.refresh_hash();

        log::debug!("Built transaction {} spending {} outputs", tx.tx_hash, selected.len());
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{CancelToken, Target};
    use crate::core::BLOCK_REWARD;
    use crate::error::NotFoundError;
    use crate::storage::Storage;

    fn setup() -> (Keystore, Blockchain, Address) {
        let mut keystore = Keystore::new();
        let alice = keystore.new_address();
        let target = Target::from_difficulty(6).unwrap();
        let chain = Blockchain::initialize(Storage::memory().unwrap(), &alice, target).unwrap();
        (keystore, chain, alice)
    }

    #[test]
    fn test_transaction_builder() {
        let (mut keystore, chain, alice) = setup();
        let bob = keystore.new_address();
        let carol = keystore.new_address();

        let builder = TransactionBuilder::new(&keystore, &chain);
        let tx = builder.build(&alice, &[(bob.clone(), 3), (carol.clone(), 2)]).unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 3); // Two payments + change
        assert_eq!(tx.outputs[0], TxOutput::new(3, bob.to_pubkey_hash().unwrap()));
        assert_eq!(tx.outputs[1], TxOutput::new(2, carol.to_pubkey_hash().unwrap()));
        assert_eq!(tx.outputs[2], TxOutput::new(BLOCK_REWARD - 5, alice.to_pubkey_hash().unwrap()));
        assert_eq!(tx.tx_hash, tx.hash());
        assert!(chain.verify_transaction(&tx).unwrap());
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let (mut keystore, chain, alice) = setup();
        let bob = keystore.new_address();

        let tx = TransactionBuilder::new(&keystore, &chain)
            .build(&alice, &[(bob.clone(), BLOCK_REWARD)])
            .unwrap();
        assert_eq!(tx.outputs.len(), 1);
        assert!(tx.total_output_value().unwrap() <= BLOCK_REWARD);
    }

    #[test]
    fn test_spans_multiple_outputs() {
        let (mut keystore, chain, alice) = setup();
        let bob = keystore.new_address();
        chain.mine_block(vec![], &alice, &CancelToken::new()).unwrap();

        let tx = TransactionBuilder::new(&keystore, &chain)
            .build(&alice, &[(bob.clone(), 15)])
            .unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs[1].value, 5);
        chain.validate_transactions([&tx]).unwrap();
    }

    #[test]
    fn test_insufficient_funds() {
        let (mut keystore, chain, alice) = setup();
        let bob = keystore.new_address();

        let builder = TransactionBuilder::new(&keystore, &chain);
        let result = builder.build(&alice, &[(bob.clone(), BLOCK_REWARD + 1)]);
        assert!(matches!(
            result,
            Err(Error::InsufficientFunds { have: BLOCK_REWARD, need: 11 })
        ));

        // Bob owns nothing at all
        let result = builder.build(&bob, &[(alice.clone(), 1)]);
        assert!(matches!(result, Err(Error::InsufficientFunds { have: 0, need: 1 })));
        assert_eq!(chain.get_balance(&alice).unwrap(), BLOCK_REWARD);
    }

    #[test]
    fn test_overflowing_request() {
        let (mut keystore, chain, alice) = setup();
        let bob = keystore.new_address();

        let result = TransactionBuilder::new(&keystore, &chain).build(&alice, &[(bob.clone(), u64::MAX), (bob, 1)]);
        assert!(matches!(result, Err(Error::Validation(ValidationError::ValueOverflow))));
    }

    #[test]
    fn test_unknown_sender() {
        let (keystore, chain, alice) = setup();
        let stranger = Address::from_pubkey_hash(&[7; 20]);

        let result = TransactionBuilder::new(&keystore, &chain).build(&stranger, &[(alice, 1)]);
        assert!(matches!(result, Err(Error::NotFound(NotFoundError::Wallet(_)))));
    }
}
