// One-shot peer transport: one message per TCP connection

use crate::error::{ProtocolError, Result};
use crate::network::Message;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Upper bound on a single message
pub const MAX_MESSAGE_SIZE: u64 = 32 * 1024 * 1024;

/// Time allowed to connect, write or read one message
pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// A remote node, identified by its listening address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub addr: String,
}

impl Peer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Dial the peer, write one message and close the connection
    pub async fn send(&self, message: &Message) -> Result<()> {
        let data = message.serialize()?;

        let mut stream = timeout(IO_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ProtocolError::Timeout)?
            .map_err(ProtocolError::Io)?;

        timeout(IO_TIMEOUT, async {
            stream.write_all(&data).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| ProtocolError::Timeout)?
        .map_err(ProtocolError::Io)?;

        log::debug!("Sent {} to {}", message.message_type().as_str(), self.addr);
        Ok(())
    }
}

/// Read one message until the sender closes its side
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Message> {
    let mut data = Vec::new();
    let mut limited = stream.take(MAX_MESSAGE_SIZE + 1);

    timeout(IO_TIMEOUT, limited.read_to_end(&mut data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
        .map_err(ProtocolError::Io)?;

    if data.len() as u64 > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::Malformed(format!("message exceeds {} bytes", MAX_MESSAGE_SIZE)).into());
    }

    Ok(Message::deserialize(&data)?)
}
