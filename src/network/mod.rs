// P2P networking

mod message;
mod node;
mod peer;
mod registry;

pub use message::{
    AddrMessage, BlockMessage, GetBlocksMessage, GetDataMessage, InvMessage, InvType, Message, MessageType, TxMessage,
    VersionMessage, COMMAND_LENGTH, PROTOCOL_VERSION,
};
pub use node::{Node, Outbound};
pub use peer::{read_message, Peer, IO_TIMEOUT, MAX_MESSAGE_SIZE};
pub use registry::Registry;
