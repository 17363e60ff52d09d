//! Controller link adapters
//!
//! A [`Link`] is a blocking byte pipe to the flight controller. A read of 0
//! means "no data yet, try again"; any error means the link is dead and the
//! caller reconnects with backoff. The USB HID variant hides the 64-byte
//! report framing: payload chunks of at most 62 bytes behind a two-byte
//! `[report id, chunk length]` prefix in each direction.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use tracing::info;

/// Largest HID report on the telemetry interface.
pub const MAX_HID_FRAME_SIZE: usize = 64;

/// Report prefix: report id and chunk length.
const HID_PREFIX: usize = 2;

/// Poll interval for blocking reads.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Blocking byte transport to the controller.
pub trait Link: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means no data within the poll
    /// interval.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// How to reach the controller.
#[derive(Clone, Debug)]
pub enum LinkConfig {
    /// TCP stream, e.g. a simulator or serial-over-network bridge.
    Tcp { addr: String },
    /// USB HID telemetry interface.
    Usb { vid: u16, pid: u16 },
}

impl LinkConfig {
    /// Open the transport. Errors here trigger the 1 s reconnect backoff.
    pub fn open(&self) -> io::Result<Box<dyn Link>> {
        match self {
            Self::Tcp { addr } => Ok(Box::new(TcpLink::connect(addr)?)),
            Self::Usb { vid, pid } => Ok(Box::new(UsbLink::open(*vid, *pid)?)),
        }
    }
}

/// Plain TCP link.
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        info!(%addr, "tcp link up");
        Ok(Self { stream })
    }
}

impl Link for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf) {
            // A clean EOF is a dead link, not "try again".
            Ok(0) => Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write_all(buf)?;
        Ok(buf.len())
    }
}

/// USB HID link with report packetization.
pub struct UsbLink {
    device: hidapi::HidDevice,
    // Keeps the backing context alive for the device's lifetime.
    _api: hidapi::HidApi,
    report: [u8; MAX_HID_FRAME_SIZE],
}

impl UsbLink {
    pub fn open(vid: u16, pid: u16) -> io::Result<Self> {
        let api = hidapi::HidApi::new().map_err(io::Error::other)?;
        let device = api.open(vid, pid).map_err(io::Error::other)?;
        info!("usb hid link up ({vid:04x}:{pid:04x})");
        Ok(Self { device, _api: api, report: [0; MAX_HID_FRAME_SIZE] })
    }
}

impl Link for UsbLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .device
            .read_timeout(&mut self.report, READ_TIMEOUT.as_millis() as i32)
            .map_err(io::Error::other)?;
        if n < HID_PREFIX {
            return Ok(0);
        }
        // Reports carry [report id, payload length, payload...].
        let payload = (self.report[1] as usize).min(n - HID_PREFIX).min(buf.len());
        buf[..payload].copy_from_slice(&self.report[HID_PREFIX..HID_PREFIX + payload]);
        Ok(payload)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut offset = 0;
        while offset < buf.len() {
            let chunk = (buf.len() - offset).min(MAX_HID_FRAME_SIZE - HID_PREFIX);
            self.report[0] = 0x02;
            self.report[1] = chunk as u8;
            self.report[HID_PREFIX..HID_PREFIX + chunk]
                .copy_from_slice(&buf[offset..offset + chunk]);

            let written = self
                .device
                .write(&self.report[..HID_PREFIX + chunk])
                .map_err(io::Error::other)?;
            if written < HID_PREFIX {
                return Err(io::ErrorKind::WriteZero.into());
            }
            // The prefix bytes never count toward the caller's offset.
            offset += written - HID_PREFIX;
        }
        Ok(offset)
    }
}
