//! Transport for reaching a VBUS device over LAN or serial
//!
//! The device streams continuously; reads are therefore window-based: open
//! a connection, soak up bytes for a short window, hand the buffer to the
//! decoder. LAN adapters (VBus/LAN) speak a small line protocol before the
//! raw stream starts: `+HELLO` greeting, `PASS <password>`, then `DATA` to
//! switch into streaming mode.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serial2::SerialPort;
use thiserror::Error;

use crate::framing::count_sync;

/// Default TCP port of VBus/LAN adapters
pub const DEFAULT_LAN_PORT: u16 = 7053;

/// Default baud rate of the VBUS serial interface
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Poll timeout for individual reads inside a capture window
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device rejected handshake: {0}")]
    HandshakeRejected(String),

    #[error("no response from device during handshake")]
    NoResponse,
}

/// How to reach the device
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "connection", rename_all = "lowercase")]
pub enum TransportConfig {
    /// VBus/LAN adapter
    Lan {
        host: String,
        #[serde(default = "default_lan_port")]
        port: u16,
        password: String,
    },
    /// Direct serial attachment
    Serial {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

fn default_lan_port() -> u16 {
    DEFAULT_LAN_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// An open connection to a VBUS device
///
/// Reads are blocking with short timeouts; callers on an async runtime
/// should drive this from a blocking task.
pub enum VBusConnection {
    Lan(TcpStream),
    Serial(SerialPort),
}

impl VBusConnection {
    /// Open a connection and complete the handshake
    ///
    /// For LAN this logs in and requests the data stream; serial devices
    /// stream unconditionally, so opening the port is all there is to it.
    pub fn open(config: &TransportConfig) -> Result<Self, TransportError> {
        match config {
            TransportConfig::Lan {
                host,
                port,
                password,
            } => {
                tracing::info!("connecting to VBus/LAN adapter at {host}:{port}");
                let stream = TcpStream::connect((host.as_str(), *port))?;
                stream.set_read_timeout(Some(READ_TIMEOUT))?;
                let mut conn = VBusConnection::Lan(stream);
                conn.login(password)?;
                conn.request_data()?;
                Ok(conn)
            }
            TransportConfig::Serial { port, baud_rate } => {
                tracing::info!("opening serial port {port} at {baud_rate} baud");
                let mut serial = SerialPort::open(port, *baud_rate)?;
                serial.set_read_timeout(READ_TIMEOUT)?;
                Ok(VBusConnection::Serial(serial))
            }
        }
    }

    /// LAN login: wait for the greeting, then authenticate
    fn login(&mut self, password: &str) -> Result<(), TransportError> {
        let greeting = self.read_response()?;
        if !greeting.starts_with(b"+HELLO") {
            return Err(TransportError::HandshakeRejected(
                String::from_utf8_lossy(&greeting).trim().to_string(),
            ));
        }

        self.write_all(format!("PASS {password}\n").as_bytes())?;
        let reply = self.read_response()?;
        if !reply.starts_with(b"+OK") {
            return Err(TransportError::HandshakeRejected(
                String::from_utf8_lossy(&reply).trim().to_string(),
            ));
        }
        Ok(())
    }

    /// Ask a LAN adapter to (re)start streaming; no-op on serial
    ///
    /// The `+OK` acknowledgement is not waited for: on anything but the
    /// first request the stream is already flowing and any reply bytes are
    /// indistinguishable from stream noise, which the frame splitter
    /// discards anyway.
    pub fn request_data(&mut self) -> Result<(), TransportError> {
        if let VBusConnection::Lan(_) = self {
            self.write_all(b"DATA\n")?;
        }
        Ok(())
    }

    /// Read raw bytes for a fixed window
    ///
    /// Returns whatever accumulated when the window closes, possibly
    /// nothing. The sync count is logged so operators can spot a silent
    /// bus.
    pub fn read_window(&mut self, window: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + window;
        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];

        while Instant::now() < deadline {
            match self.read_chunk(&mut chunk) {
                Ok(0) => {
                    tracing::warn!("connection closed by peer");
                    break;
                }
                Ok(n) => data.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(
            bytes = data.len(),
            sync_bytes = count_sync(&data),
            "capture window closed"
        );
        Ok(data)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            VBusConnection::Lan(stream) => stream.read(buf),
            VBusConnection::Serial(port) => port.read(buf),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            VBusConnection::Lan(stream) => stream.write_all(data),
            VBusConnection::Serial(port) => port.write_all(data),
        }
    }

    /// Read one handshake response, waiting up to a few poll timeouts
    fn read_response(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; 256];
        for _ in 0..4 {
            match self.read_chunk(&mut buf) {
                Ok(0) => break,
                Ok(n) => return Ok(buf[..n].to_vec()),
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TransportError::NoResponse)
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}
