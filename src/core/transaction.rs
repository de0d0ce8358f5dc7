// Transaction data structures, signing and verification

use crate::core::serialize::{read_array, read_u64, read_var_bytes, read_varint, write_var_bytes, write_varint};
use crate::core::{hash160, sha256, Hash256, Serializable};
use crate::error::{NotFoundError, Result};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::collections::HashMap;
use std::io::{Cursor, Read};

/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_INDEX: i64 = -1;

/// Fixed reward minted by every coinbase transaction
pub const BLOCK_REWARD: u64 = 10;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Hash of the transaction holding the spent output
    pub prev_tx_hash: Hash256,
    /// Index of the spent output, or `COINBASE_INDEX`
    pub prev_index: i64,
    /// ECDSA signature (compact, 64 bytes); empty until signed.
    /// Coinbase inputs carry arbitrary data here instead.
    pub signature: Vec<u8>,
    /// Signer's raw public key; empty for coinbase
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `prev_tx_hash:prev_index`
    pub fn new(prev_tx_hash: Hash256, prev_index: i64, pub_key: Vec<u8>) -> Self {
        Self {
            prev_tx_hash,
            prev_index,
            signature: Vec::new(),
            pub_key,
        }
    }

    /// Create a coinbase input. `data` makes otherwise identical coinbases distinct.
    pub fn coinbase(data: Vec<u8>) -> Self {
        Self {
            prev_tx_hash: Hash256::zero(),
            prev_index: COINBASE_INDEX,
            signature: data,
            pub_key: Vec::new(),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.prev_index == COINBASE_INDEX
    }

    /// Index of the spent output, `None` for the coinbase sentinel or a negative index
    pub fn output_index(&self) -> Option<u32> {
        u32::try_from(self.prev_index).ok()
    }

    /// Whether this input was created by the owner of `pubkey_hash`
    pub fn uses_key(&self, pubkey_hash: &[u8; 20]) -> bool {
        hash160(&self.pub_key) == *pubkey_hash
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.prev_tx_hash.as_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        write_var_bytes(buf, &self.signature);
        write_var_bytes(buf, &self.pub_key);
    }

    fn read_from<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<Self> {
        let prev_tx_hash = Hash256::new(read_array::<32, R>(reader)?);
        let prev_index = i64::from_le_bytes(read_array::<8, R>(reader)?);
        let signature = read_var_bytes(reader)?;
        let pub_key = read_var_bytes(reader)?;

        Ok(Self {
            prev_tx_hash,
            prev_index,
            signature,
            pub_key,
        })
    }
}

/// Transaction output - an amount locked to one public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    /// RIPEMD160(SHA256(pubkey)) of the recipient
    pub pubkey_hash: [u8; 20],
}

impl TxOutput {
    pub fn new(value: u64, pubkey_hash: [u8; 20]) -> Self {
        Self { value, pubkey_hash }
    }

    /// Whether the output can be unlocked by the owner of `pubkey_hash`
    pub fn is_locked_with(&self, pubkey_hash: &[u8; 20]) -> bool {
        self.pubkey_hash == *pubkey_hash
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28);
        self.write_to(&mut buf);
        buf
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&self.pubkey_hash);
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<Self> {
        let value = read_u64(reader)?;
        let pubkey_hash = read_array::<20, R>(reader)?;
        Ok(Self { value, pubkey_hash })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Digest of the transaction with this field zeroed
    pub tx_hash: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and set its hash
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            tx_hash: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.tx_hash = tx.hash();
        tx
    }

    /// Create a coinbase transaction minting `BLOCK_REWARD` to `pubkey_hash`
    pub fn new_coinbase(pubkey_hash: [u8; 20]) -> Self {
        let data: [u8; 24] = rand::random();
        Self::new(
            vec![TxInput::coinbase(data.to_vec())],
            vec![TxOutput::new(BLOCK_REWARD, pubkey_hash)],
        )
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// SHA256 of the serialized transaction with `tx_hash` zeroed
    pub fn hash(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.tx_hash = Hash256::zero();
        sha256(&copy.serialize())
    }

    /// Recompute and store `tx_hash` (after any field changed)
    pub fn refresh_hash(&mut self) {
        self.tx_hash = self.hash();
    }

    /// Sum of the output values, or `None` if it does not fit in a `u64`
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs.iter().try_fold(0u64, |total, out| total.checked_add(out.value))
    }

    /// Copy with every input's signature and public key cleared
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx_hash: input.prev_tx_hash,
                prev_index: input.prev_index,
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();

        Transaction {
            tx_hash: self.tx_hash,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Digest signed by input `index`: the trimmed copy with only that input
    /// "unlocked" by the public key hash of the output it spends.
    fn signing_digest(trimmed: &mut Transaction, index: usize, prev_pubkey_hash: &[u8; 20]) -> Hash256 {
        trimmed.inputs[index].pub_key = prev_pubkey_hash.to_vec();
        let digest = trimmed.hash();
        trimmed.inputs[index].pub_key = Vec::new();
        digest
    }

    /// Output spent by `input`, looked up in `prev_txs`
    fn spent_output<'a>(input: &TxInput, prev_txs: &'a HashMap<Hash256, Transaction>) -> Result<&'a TxOutput> {
        let missing = || NotFoundError::Output {
            txid: input.prev_tx_hash,
            index: input.prev_index,
        };
        let prev_tx = prev_txs
            .get(&input.prev_tx_hash)
            .ok_or(NotFoundError::Transaction(input.prev_tx_hash))?;
        let index = input.output_index().ok_or_else(missing)?;
        Ok(prev_tx.outputs.get(index as usize).ok_or_else(missing)?)
    }

    /// Sign every input with `secret_key`. No-op for coinbase.
    pub fn sign(&mut self, secret_key: &SecretKey, prev_txs: &HashMap<Hash256, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::signing_only();
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let prev_output = Self::spent_output(&self.inputs[index], prev_txs)?;
            let digest = Self::signing_digest(&mut trimmed, index, &prev_output.pubkey_hash);

            let message = Message::from_digest(digest.0);
            let signature = secp.sign_ecdsa(&message, secret_key);
            self.inputs[index].signature = signature.serialize_compact().to_vec();
        }

        Ok(())
    }

    /// Check every input's signature against the output it spends.
    /// Always true for coinbase; a missing referenced output is an error.
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let secp = Secp256k1::verification_only();
        let mut trimmed = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let prev_output = Self::spent_output(input, prev_txs)?;

            if !input.uses_key(&prev_output.pubkey_hash) {
                return Ok(false);
            }

            let digest = Self::signing_digest(&mut trimmed, index, &prev_output.pubkey_hash);
            let message = Message::from_digest(digest.0);

            let Ok(signature) = Signature::from_compact(&input.signature) else {
                return Ok(false);
            };
            let Ok(public_key) = PublicKey::from_slice(&input.pub_key) else {
                return Ok(false);
            };

            if secp.verify_ecdsa(&message, &signature, &public_key).is_err() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Deserialize from a reader
    pub fn from_reader<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<Self> {
        let tx_hash = Hash256::new(read_array::<32, R>(reader)?);

        let input_count = read_varint(reader)? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(reader)?);
        }

        let output_count = read_varint(reader)? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(reader)?);
        }

        Ok(Self {
            tx_hash,
            inputs,
            outputs,
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.tx_hash.as_bytes());

        write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(buf);
        }

        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(buf);
        }
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> std::result::Result<Self, String> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor).map_err(|e| e.to_string())?;
        if cursor.position() as usize != data.len() {
            return Err("Trailing bytes after transaction".to_string());
        }
        Ok(tx)
    }
}
