//! Configuration for uavbridged

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use uavtalk_link::LinkConfig;

/// uavbridged - UAVTalk telemetry bridge and router
#[derive(Parser, Debug, Clone)]
#[command(name = "uavbridged")]
#[command(about = "Bridges a UAVTalk flight controller to JSON websocket subscribers")]
pub struct Config {
    /// Directory containing the XML object definitions
    pub definitions: PathBuf,

    /// Websocket listener port for subscribers
    #[arg(long, default_value_t = 4224)]
    pub port: u16,

    /// Controller transport
    #[arg(long, value_enum, default_value = "tcp")]
    pub link: LinkKind,

    /// Controller address for the tcp link
    #[arg(long, default_value = "localhost:9000")]
    pub tcp_addr: String,

    /// USB vendor id for the usb link
    #[arg(long, default_value = "0x20a0", value_parser = parse_usb_id)]
    pub usb_vid: u16,

    /// USB product id for the usb link
    #[arg(long, default_value = "0x41d0", value_parser = parse_usb_id)]
    pub usb_pid: u16,

    /// Raw UAVTalk relay listener port (disabled when absent)
    #[arg(long)]
    pub relay_port: Option<u16>,
}

/// Supported controller transports.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Tcp,
    Usb,
}

impl Config {
    pub fn link_config(&self) -> LinkConfig {
        match self.link {
            LinkKind::Tcp => LinkConfig::Tcp { addr: self.tcp_addr.clone() },
            LinkKind::Usb => LinkConfig::Usb { vid: self.usb_vid, pid: self.usb_pid },
        }
    }

    /// Validate what clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.definitions.is_dir() {
            anyhow::bail!("{} is not a directory", self.definitions.display());
        }
        if self.relay_port == Some(self.port) {
            anyhow::bail!("relay port conflicts with the websocket port");
        }
        Ok(())
    }
}

fn parse_usb_id(value: &str) -> Result<u16, String> {
    let value = value.trim();
    let (digits, radix) = match value.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (value, 10),
    };
    u16::from_str_radix(digits, radix).map_err(|e| e.to_string())
}
