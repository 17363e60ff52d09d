//! Websocket subscriber surface
//!
//! Each peer connecting to the listener becomes one dispatcher connection.
//! Frames are JSON text in the `{type, payload}` envelope; anything that
//! does not parse as a known bus message is logged and discarded.

use crate::dispatcher::DispatcherHandle;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};
use uavtalk_core::BusMessage;

/// Accept subscribers until the listener fails.
pub async fn serve(port: u16, dispatcher: DispatcherHandle) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "websocket server started");

    loop {
        let (stream, addr) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(socket) => {
                    info!(%addr, "subscriber connected");
                    serve_subscriber(socket, dispatcher).await;
                    info!(%addr, "subscriber disconnected");
                }
                Err(e) => warn!(%addr, "websocket handshake failed: {e}"),
            }
        });
    }
}

async fn serve_subscriber(socket: WebSocketStream<TcpStream>, dispatcher: DispatcherHandle) {
    let Some(mut connection) = dispatcher.attach().await else {
        return;
    };
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            inbound = connection.incoming.recv() => {
                // A closed queue is the dispatcher shutting down.
                let Some(message) = inbound else { break };
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("bus message not serializable: {e}"),
                }
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<BusMessage>(&text) {
                            Ok(message) => {
                                if connection.outgoing.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("discarding unrecognized frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Binary and control frames are not part of the
                    // subscriber protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("websocket error: {e}");
                        break;
                    }
                }
            }
        }
    }
}
