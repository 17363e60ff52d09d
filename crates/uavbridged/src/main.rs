//! uavbridged - UAVTalk telemetry bridge daemon
//!
//! Wires the pieces together: catalog load, dispatcher, the controller
//! link with its session state machine, the optional raw relay, and the
//! websocket subscriber surface.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uavbridged::config::Config;
use uavbridged::dispatcher::{Dispatcher, QUEUE_DEPTH};
use uavbridged::websocket;
use uavtalk_core::Catalog;
use uavtalk_link::session::Session;
use uavtalk_link::{relay, transport};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };
    if let Err(e) = config.validate() {
        error!("invalid arguments: {e}");
        return ExitCode::from(1);
    }

    info!("uavbridged v{}", env!("CARGO_PKG_VERSION"));

    let catalog = match Catalog::load(&config.definitions) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!("failed to load object definitions: {e}");
            return ExitCode::from(2);
        }
    };

    let (dispatcher, handle) = Dispatcher::new();
    tokio::spawn(dispatcher.run());

    // The controller side is one dispatcher connection: link tasks feed the
    // session state machine, which owns all session state.
    let Some(link_connection) = handle.attach().await else {
        error!("dispatcher unavailable");
        return ExitCode::FAILURE;
    };
    let (event_tx, event_rx) = mpsc::channel(QUEUE_DEPTH);
    let (packet_tx, packet_rx) = mpsc::channel(QUEUE_DEPTH);

    let session = match Session::new(
        catalog.clone(),
        packet_tx,
        event_rx,
        link_connection.outgoing,
        link_connection.incoming,
    ) {
        Ok(session) => session,
        Err(e) => {
            error!("cannot establish controller session: {e}");
            return ExitCode::from(2);
        }
    };
    tokio::spawn(session.run());

    let relay_handle = config.relay_port.map(relay::spawn);
    tokio::spawn(transport::run(
        catalog,
        config.link_config(),
        event_tx,
        packet_rx,
        relay_handle,
    ));

    tokio::select! {
        result = websocket::serve(config.port, handle) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("websocket server failed: {e}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            ExitCode::SUCCESS
        }
    }
}
