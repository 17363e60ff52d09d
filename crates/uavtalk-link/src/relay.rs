//! Raw UAVTalk relay
//!
//! Optional TCP listener that splices raw frame bytes to and from the
//! controller link so a desktop GCS can share it: every CRC-valid inbound
//! frame is mirrored to the connected peer, and anything the peer writes is
//! injected into the link writer untouched. One peer at a time.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Queue depth on both relay directions.
const RELAY_QUEUE: usize = 100;

/// The link side of the relay: raw bytes in from the peer, valid frames
/// mirrored out to it.
pub struct RelayHandle {
    pub injected: mpsc::Receiver<Vec<u8>>,
    pub mirror: mpsc::Sender<Vec<u8>>,
}

/// Start the relay listener and hand back the link side.
pub fn spawn(port: u16) -> RelayHandle {
    let (injected_tx, injected_rx) = mpsc::channel(RELAY_QUEUE);
    let (mirror_tx, mirror_rx) = mpsc::channel(RELAY_QUEUE);

    tokio::spawn(async move {
        if let Err(e) = listen(port, injected_tx, mirror_rx).await {
            warn!("relay listener failed: {e}");
        }
    });

    RelayHandle { injected: injected_rx, mirror: mirror_tx }
}

async fn listen(
    port: u16,
    injected: mpsc::Sender<Vec<u8>>,
    mut mirror: mpsc::Receiver<Vec<u8>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "relay listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                info!(%addr, "relay peer connected");
                if let Err(e) = serve_peer(stream, &injected, &mut mirror).await {
                    warn!("relay peer error: {e}");
                }
                info!(%addr, "relay peer disconnected");
            }
            // Nobody is attached; discard mirrored frames.
            frame = mirror.recv() => {
                if frame.is_none() {
                    return Ok(());
                }
            }
        }
    }
}

async fn serve_peer(
    stream: TcpStream,
    injected: &mpsc::Sender<Vec<u8>>,
    mirror: &mut mpsc::Receiver<Vec<u8>>,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                if injected.try_send(buf[..n].to_vec()).is_err() {
                    warn!("relay inject queue full, dropping {n} bytes");
                }
            }
            frame = mirror.recv() => {
                match frame {
                    Some(bytes) => writer.write_all(&bytes).await?,
                    None => return Ok(()),
                }
            }
        }
    }
}
