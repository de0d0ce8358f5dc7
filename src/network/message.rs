// Network protocol messages
//
// Wire format: 12-byte zero-padded ASCII command tag followed by a JSON payload.

use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Length of the command tag
pub const COMMAND_LENGTH: usize = 12;

/// Protocol version announced in `version` messages
pub const PROTOCOL_VERSION: u32 = 1;

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Version,
    Addr,
    Block,
    Inv,
    GetBlocks,
    GetData,
    Tx,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Version => "version",
            MessageType::Addr => "addr",
            MessageType::Block => "block",
            MessageType::Inv => "inv",
            MessageType::GetBlocks => "getblocks",
            MessageType::GetData => "getdata",
            MessageType::Tx => "tx",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "version" => Some(MessageType::Version),
            "addr" => Some(MessageType::Addr),
            "block" => Some(MessageType::Block),
            "inv" => Some(MessageType::Inv),
            "getblocks" => Some(MessageType::GetBlocks),
            "getdata" => Some(MessageType::GetData),
            "tx" => Some(MessageType::Tx),
            _ => None,
        }
    }

    /// Zero-padded command tag
    pub fn command(&self) -> [u8; COMMAND_LENGTH] {
        let mut tag = [0u8; COMMAND_LENGTH];
        let name = self.as_str().as_bytes();
        tag[..name.len()].copy_from_slice(name);
        tag
    }
}

/// Inventory type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvType {
    Block,
    Tx,
}

/// Version message - handshake carrying the sender's best height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: u32,
    pub best_height: u64,
    pub addr_from: String,
}

/// Known-peer list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrMessage {
    pub addr_list: Vec<String>,
}

/// Request for the receiver's block hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksMessage {
    pub addr_from: String,
}

/// Inventory announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvMessage {
    pub addr_from: String,
    pub kind: InvType,
    pub items: Vec<Hash256>,
}

/// Request for one block or transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDataMessage {
    pub addr_from: String,
    pub kind: InvType,
    pub hash: Hash256,
}

/// One serialized block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub addr_from: String,
    pub block: Vec<u8>,
}

impl BlockMessage {
    pub fn decode(&self) -> Result<Block, ProtocolError> {
        Block::deserialize(&self.block).map_err(ProtocolError::Malformed)
    }
}

/// One serialized transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMessage {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

impl TxMessage {
    pub fn decode(&self) -> Result<Transaction, ProtocolError> {
        Transaction::deserialize(&self.transaction).map_err(ProtocolError::Malformed)
    }
}

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Addr(AddrMessage),
    Block(BlockMessage),
    Inv(InvMessage),
    GetBlocks(GetBlocksMessage),
    GetData(GetDataMessage),
    Tx(TxMessage),
}

impl Message {
    pub fn version(addr_from: &str, best_height: u64) -> Self {
        Message::Version(VersionMessage {
            version: PROTOCOL_VERSION,
            best_height,
            addr_from: addr_from.to_string(),
        })
    }

    pub fn get_blocks(addr_from: &str) -> Self {
        Message::GetBlocks(GetBlocksMessage {
            addr_from: addr_from.to_string(),
        })
    }

    pub fn inv(addr_from: &str, kind: InvType, items: Vec<Hash256>) -> Self {
        Message::Inv(InvMessage {
            addr_from: addr_from.to_string(),
            kind,
            items,
        })
    }

    pub fn get_data(addr_from: &str, kind: InvType, hash: Hash256) -> Self {
        Message::GetData(GetDataMessage {
            addr_from: addr_from.to_string(),
            kind,
            hash,
        })
    }

    pub fn block(addr_from: &str, block: &Block) -> Self {
        Message::Block(BlockMessage {
            addr_from: addr_from.to_string(),
            block: block.serialize(),
        })
    }

    pub fn tx(addr_from: &str, tx: &Transaction) -> Self {
        Message::Tx(TxMessage {
            addr_from: addr_from.to_string(),
            transaction: tx.serialize(),
        })
    }

    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Version(_) => MessageType::Version,
            Message::Addr(_) => MessageType::Addr,
            Message::Block(_) => MessageType::Block,
            Message::Inv(_) => MessageType::Inv,
            Message::GetBlocks(_) => MessageType::GetBlocks,
            Message::GetData(_) => MessageType::GetData,
            Message::Tx(_) => MessageType::Tx,
        }
    }

    /// Address the sender listens on, when the message carries one
    pub fn sender(&self) -> Option<&str> {
        match self {
            Message::Version(m) => Some(&m.addr_from),
            Message::Addr(_) => None,
            Message::Block(m) => Some(&m.addr_from),
            Message::Inv(m) => Some(&m.addr_from),
            Message::GetBlocks(m) => Some(&m.addr_from),
            Message::GetData(m) => Some(&m.addr_from),
            Message::Tx(m) => Some(&m.addr_from),
        }
    }

    /// Serialize message to bytes: command tag + JSON payload
    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            Message::Version(m) => serde_json::to_vec(m),
            Message::Addr(m) => serde_json::to_vec(m),
            Message::Block(m) => serde_json::to_vec(m),
            Message::Inv(m) => serde_json::to_vec(m),
            Message::GetBlocks(m) => serde_json::to_vec(m),
            Message::GetData(m) => serde_json::to_vec(m),
            Message::Tx(m) => serde_json::to_vec(m),
        }
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let mut bytes = Vec::with_capacity(COMMAND_LENGTH + payload.len());
        bytes.extend_from_slice(&self.message_type().command());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Deserialize message from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < COMMAND_LENGTH {
            return Err(ProtocolError::Malformed(format!("message too short: {} bytes", data.len())));
        }

        let (tag, payload) = data.split_at(COMMAND_LENGTH);
        let command = String::from_utf8_lossy(tag).trim_end_matches('\0').to_string();
        let msg_type = MessageType::from_string(&command).ok_or(ProtocolError::UnknownCommand(command))?;

        Ok(match msg_type {
            MessageType::Version => Message::Version(decode_payload(payload)?),
            MessageType::Addr => Message::Addr(decode_payload(payload)?),
            MessageType::Block => Message::Block(decode_payload(payload)?),
            MessageType::Inv => Message::Inv(decode_payload(payload)?),
            MessageType::GetBlocks => Message::GetBlocks(decode_payload(payload)?),
            MessageType::GetData => Message::GetData(decode_payload(payload)?),
            MessageType::Tx => Message::Tx(decode_payload(payload)?),
        })
    }
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
