//! Link I/O tasks
//!
//! One writer loop and one blocking pump per link. The pump owns the
//! transport handle: it drains queued outbound frames, polls the link for
//! bytes, and feeds the deframer; decoded packets surface to the session
//! state machine strictly in wire order. The writer loop serializes
//! outbound packets and multiplexes in raw bytes injected by the relay.
//! Any link error tears both down, the session is told to reset, and the
//! link is reopened after a 1 s backoff.

use crate::framing::{self, Deframer};
use crate::link::{Link, LinkConfig, MAX_HID_FRAME_SIZE};
use crate::relay::RelayHandle;
use std::io;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, info, warn};
use uavtalk_core::{Catalog, Packet};

/// Depth of every bounded queue on the link path.
pub const QUEUE_DEPTH: usize = 10;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// What the link surfaces to the session state machine.
#[derive(Debug)]
pub enum LinkEvent {
    /// Transport (re)opened; the session starts its handshake.
    Up,
    /// Transport died; the session discards all per-session state.
    Down,
    /// A decoded inbound packet.
    Packet(Packet),
}

/// Drive the controller link until the session side shuts down.
///
/// Reconnects forever: open the transport (1 s backoff on failure), run the
/// pump and writer until an I/O error, notify the session, repeat.
pub async fn run(
    catalog: Arc<Catalog>,
    config: LinkConfig,
    to_session: mpsc::Sender<LinkEvent>,
    mut from_session: mpsc::Receiver<Packet>,
    mut relay: Option<RelayHandle>,
) {
    loop {
        let opened = {
            let config = config.clone();
            task::spawn_blocking(move || config.open()).await
        };
        let link = match opened {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!("link open failed: {e}");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
            Err(e) => {
                warn!("link open task failed: {e}");
                return;
            }
        };

        if to_session.send(LinkEvent::Up).await.is_err() {
            return;
        }

        let (frames_tx, frames_rx) = std_mpsc::sync_channel::<Vec<u8>>(QUEUE_DEPTH);
        let mirror = relay.as_ref().map(|r| r.mirror.clone());
        let mut pump = task::spawn_blocking({
            let catalog = catalog.clone();
            let events = to_session.clone();
            move || pump(link, catalog, frames_rx, events, mirror)
        });

        loop {
            tokio::select! {
                result = &mut pump => {
                    match result {
                        Ok(Ok(())) => info!("link closed"),
                        Ok(Err(e)) => warn!("link error: {e}"),
                        Err(e) => warn!("link task failed: {e}"),
                    }
                    break;
                }
                packet = from_session.recv() => {
                    let Some(packet) = packet else { return };
                    match framing::encode(&packet) {
                        Ok(frame) => queue_frame(&frames_tx, frame),
                        Err(e) => {
                            warn!(object = %packet.definition.name, "dropping outbound packet: {e}");
                        }
                    }
                }
                bytes = injected(&mut relay) => queue_frame(&frames_tx, bytes),
            }
        }

        if to_session.send(LinkEvent::Down).await.is_err() {
            return;
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

/// Enqueue toward the pump; a saturated writer queue drops the frame.
fn queue_frame(frames_tx: &std_mpsc::SyncSender<Vec<u8>>, frame: Vec<u8>) {
    match frames_tx.try_send(frame) {
        Ok(()) => {}
        Err(std_mpsc::TrySendError::Full(_)) => warn!("writer queue full, dropping frame"),
        Err(std_mpsc::TrySendError::Disconnected(_)) => {}
    }
}

/// Raw bytes from the relay peer, or forever-pending when no relay is
/// configured.
async fn injected(relay: &mut Option<RelayHandle>) -> Vec<u8> {
    loop {
        match relay {
            Some(handle) => match handle.injected.recv().await {
                Some(bytes) => return bytes,
                None => *relay = None,
            },
            None => std::future::pending().await,
        }
    }
}

/// Blocking link pump: interleaves outbound frame writes with read polls.
fn pump(
    mut link: Box<dyn Link>,
    catalog: Arc<Catalog>,
    frames_rx: std_mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<LinkEvent>,
    mirror: Option<mpsc::Sender<Vec<u8>>>,
) -> io::Result<()> {
    let mut deframer = Deframer::new(catalog.max_object_length());
    let mut buf = [0u8; MAX_HID_FRAME_SIZE];

    loop {
        loop {
            match frames_rx.try_recv() {
                Ok(frame) => {
                    link.write(&frame)?;
                }
                Err(std_mpsc::TryRecvError::Empty) => break,
                Err(std_mpsc::TryRecvError::Disconnected) => return Ok(()),
            }
        }

        let n = link.read(&mut buf)?;
        if n == 0 {
            continue;
        }
        deframer.extend(&buf[..n]);

        while let Some(result) = deframer.next_frame() {
            match result {
                Ok(frame) => {
                    if let Some(mirror) = &mirror {
                        // Relay peers are lossy by design.
                        let _ = mirror.try_send(frame.to_vec());
                    }
                    match framing::decode(&catalog, &frame) {
                        Ok(packet) => {
                            if events.blocking_send(LinkEvent::Packet(packet)).is_err() {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            warn!("dropping frame: {e}");
                            debug!(frame = %framing::hex_dump(&frame), "offending frame");
                        }
                    }
                }
                Err(e) => warn!("discarded corrupt span: {e}"),
            }
        }
    }
}
