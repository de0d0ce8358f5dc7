// Key management and addresses

use crate::consensus::ValidationError;
use crate::core::{hash160, hash256};
use crate::error::{Error, NotFoundError, Result};
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Version byte prefixed to the public key hash
pub const ADDRESS_VERSION: u8 = 0x00;
const CHECKSUM_LEN: usize = 4;

/// Base58Check address: version ‖ pubkey hash ‖ first 4 bytes of hash256(version ‖ pubkey hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create address from public key hash
    pub fn from_pubkey_hash(hash: &[u8; 20]) -> Self {
        let mut payload = Vec::with_capacity(1 + 20 + CHECKSUM_LEN);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(hash);
        let checksum = hash256(&payload);
        payload.extend_from_slice(&checksum.as_bytes()[..CHECKSUM_LEN]);
        Self(bs58::encode(payload).into_string())
    }

    /// Parse and validate an address string
    pub fn parse(s: &str) -> Result<Self> {
        let address = Self(s.trim().to_string());
        address.to_pubkey_hash()?;
        Ok(address)
    }

    /// Get address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the public key hash, checking version and checksum
    pub fn to_pubkey_hash(&self) -> Result<[u8; 20]> {
        let invalid = || Error::from(ValidationError::InvalidAddress(self.0.clone()));

        let bytes = bs58::decode(&self.0).into_vec().map_err(|_| invalid())?;
        if bytes.len() != 1 + 20 + CHECKSUM_LEN || bytes[0] != ADDRESS_VERSION {
            return Err(invalid());
        }

        let (payload, checksum) = bytes.split_at(1 + 20);
        if hash256(payload).as_bytes()[..CHECKSUM_LEN] != *checksum {
            return Err(invalid());
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok(hash)
    }

    /// Whether the address decodes with a matching checksum
    pub fn validate(&self) -> bool {
        self.to_pubkey_hash().is_ok()
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serializable key pair (for storage)
#[derive(Serialize, Deserialize)]
struct SerializableKeyPair {
    secret_key: String,
}

/// Key pair
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(&secp, secret_key)
    }

    fn from_secret_key(secp: &Secp256k1<secp256k1::All>, secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key(secp);
        let address = Address::from_pubkey_hash(&hash160(&public_key.serialize()));
        Self {
            secret_key,
            public_key,
            address,
        }
    }

    /// Create from hex-encoded secret key bytes
    fn from_secret_hex(secp: &Secp256k1<secp256k1::All>, secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex).map_err(|e| Error::Keystore(format!("Invalid secret key: {}", e)))?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|e| Error::Keystore(format!("Invalid secret key: {}", e)))?;
        Ok(Self::from_secret_key(secp, secret_key))
    }

    /// Get public key bytes (compressed)
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    /// Get pubkey hash
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.pubkey_bytes())
    }
}

/// Keystore - manages multiple key pairs
#[derive(Default)]
pub struct Keystore {
    keys: HashMap<Address, KeyPair>,
}

impl Keystore {
    /// Create a new keystore
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new address
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address.clone();
        self.keys.insert(address.clone(), keypair);
        address
    }

    /// Key pair for `address`
    pub fn lookup(&self, address: &Address) -> Result<&KeyPair> {
        self.keys
            .get(address)
            .ok_or_else(|| NotFoundError::Wallet(address.to_string()).into())
    }

    /// All addresses, sorted
    pub fn list_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Count addresses
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data: HashMap<&Address, SerializableKeyPair> = self
            .keys
            .iter()
            .map(|(addr, kp)| {
                let secret_key = hex::encode(kp.secret_key.secret_bytes());
                (addr, SerializableKeyPair { secret_key })
            })
            .collect();

        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| Error::Keystore(format!("Failed to serialize keystore: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Keystore(format!("Failed to create keystore directory: {}", e)))?;
        }
        fs::write(path, json).map_err(|e| Error::Keystore(format!("Failed to write keystore file: {}", e)))?;

        Ok(())
    }

    /// Load keystore from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Keystore(format!("Failed to read keystore file: {}", e)))?;

        let data: HashMap<Address, SerializableKeyPair> = serde_json::from_str(&json)
            .map_err(|e| Error::Keystore(format!("Failed to deserialize keystore: {}", e)))?;

        let secp = Secp256k1::new();
        let mut keys = HashMap::new();
        for (addr, stored) in data {
            let kp = KeyPair::from_secret_hex(&secp, &stored.secret_key)?;
            if kp.address != addr {
                return Err(Error::Keystore(format!("Key does not match address {}", addr)));
            }
            keys.insert(addr, kp);
        }

        Ok(Self { keys })
    }

    /// Load the keystore at `path`, or start an empty one if the file is absent
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}
