//! TCP front end.
//!
//! Each connection gets its own [`Session`]. Clients send newline-delimited
//! JSON control messages; the relay answers with length-prefixed records:
//!
//! ```text
//! +--------+----------------+-------------------+
//! | tag u8 | length u32 LE  | payload           |
//! +--------+----------------+-------------------+
//!   1 = JSON message (metadata / analytics)
//!   2 = raw frame (nx * ny * 4 bytes, row-major f32)
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::control::Outbound;
use crate::error::{RelayError, Result};
use crate::session::Session;
use crate::supervisor::EngineLauncher;

/// Record tag for JSON text messages.
pub const TAG_MESSAGE: u8 = 1;
/// Record tag for binary frames.
pub const TAG_FRAME: u8 = 2;

/// Outbound messages buffered per client before frames and analytics are dropped.
const OUTBOUND_QUEUE: usize = 32;

/// Encode one outbound record.
pub fn encode_record(message: &Outbound) -> Result<Vec<u8>> {
    let (tag, payload) = match message {
        Outbound::Message(msg) => (TAG_MESSAGE, serde_json::to_vec(msg)?),
        Outbound::Frame(bytes) => (TAG_FRAME, bytes.clone()),
    };
    let len: u32 = payload.len().try_into().map_err(|_| {
        RelayError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "record too large",
        ))
    })?;

    let mut record = Vec::with_capacity(5 + payload.len());
    record.push(tag);
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Write one outbound record and flush.
pub async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, message: &Outbound) -> Result<()> {
    let record = encode_record(message)?;
    writer.write_all(&record).await?;
    writer.flush().await?;
    Ok(())
}

/// Relay server accepting client connections.
pub struct RelayServer {
    listener: TcpListener,
    launcher: Arc<dyn EngineLauncher>,
    next_id: AtomicU64,
}

impl RelayServer {
    /// Bind to `addr`.
    pub async fn bind(addr: SocketAddr, launcher: Arc<dyn EngineLauncher>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "relay listening");
        Ok(Self {
            listener,
            launcher,
            next_id: AtomicU64::new(1),
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            tracing::info!(session = id, %peer, "client connected");
            tokio::spawn(handle_connection(id, stream, self.launcher.clone()));
        }
    }
}

async fn handle_connection(id: u64, stream: TcpStream, launcher: Arc<dyn EngineLauncher>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(session = id, error = %e, "set_nodelay failed");
    }
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_record(&mut writer, &message).await {
                tracing::debug!(session = id, error = %e, "client write failed");
                break;
            }
        }
    });

    let session = Session::new(id, launcher, tx);
    match session.serve(BufReader::new(reader)).await {
        Ok(()) | Err(RelayError::Disconnected) => {}
        Err(e) => tracing::warn!(session = id, error = %e, "session ended with error"),
    }

    // The session has dropped its sender; the writer drains and exits.
    if let Err(e) = writer_task.await {
        tracing::error!(session = id, error = %e, "writer task panicked");
    }
    tracing::info!(session = id, "client disconnected");
}
