//! Line-oriented serial transports.
//!
//! Each board streams newline-terminated ASCII records over its own serial line. A
//! [`LineTransport`] owns one such connection and exposes exactly what the acquisition
//! pipeline needs: open/close, single-write, and blocking line reads.
//!
//! Reads have no timeout: a board that stops talking stalls the poll loop rather than
//! raising errors. Writes are bounded by the configured write timeout, so a dead control
//! board cannot wedge a Stop.
//!
//! # Types
//!
//! - [`LineTransport`]: the transport contract
//! - [`SerialLine`]: implementation over any async byte stream (a real
//!   `tokio_serial::SerialStream` in production, `tokio::io::duplex` or
//!   `tokio_test::io::Mock` in tests)
//! - [`SharedLine`]: transport shared between the poll loop and the motor dispatcher
//! - [`mock::MockLine`]: scripted / generated in-memory transport

pub mod mock;

use crate::config::SerialConfig;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Longest record accepted from a board, terminator included.
pub const MAX_LINE_BYTES: usize = 1024;

/// Which board a transport talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    /// Displacement + timestamp board; also receives every protocol command
    Control,
    /// Sensor + force board
    Sensor,
}

impl std::fmt::Display for PortRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortRole::Control => write!(f, "control"),
            PortRole::Sensor => write!(f, "sensor"),
        }
    }
}

/// Contract for one line-oriented serial connection.
#[async_trait]
pub trait LineTransport: Send {
    /// Identifier of the currently open port, if any.
    fn port_name(&self) -> Option<&str>;

    /// Whether the last `open` succeeded and the connection has not been closed since.
    fn is_ready(&self) -> bool;

    /// Open `port`, replacing any previous connection.
    ///
    /// On failure the transport is left not-ready.
    async fn open(&mut self, port: &str) -> AppResult<()>;

    /// Release the connection. Closing a closed transport is a no-op.
    async fn close(&mut self) -> AppResult<()>;

    /// Send raw bytes (single-byte protocol commands).
    async fn write(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Wait for the next newline-terminated line and return it with trailing
    /// whitespace stripped.
    async fn read_line(&mut self) -> AppResult<String>;
}

/// Transport shared between the acquisition loop and the command dispatcher.
pub type SharedLine = Arc<Mutex<Box<dyn LineTransport>>>;

/// Wrap a transport for shared use.
pub fn wrap_shared<T: LineTransport + 'static>(line: T) -> SharedLine {
    Arc::new(Mutex::new(Box::new(line)))
}

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream`, `tokio::io::DuplexStream` and any mock
/// implementing the async I/O traits.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// List the serial device identifiers present on this machine.
#[cfg(feature = "instrument_serial")]
pub fn available_ports() -> AppResult<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(std::io::Error::from)?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

/// List the serial device identifiers present on this machine.
#[cfg(not(feature = "instrument_serial"))]
pub fn available_ports() -> AppResult<Vec<String>> {
    Err(DaqError::SerialFeatureDisabled)
}

/// Open a serial port with 8N1 framing and no flow control.
///
/// Port opening runs on the blocking pool so the host loop is not held up by slow
/// USB enumeration.
#[cfg(feature = "instrument_serial")]
pub async fn open_serial_async(port_path: &str, baud_rate: u32) -> AppResult<DynSerial> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    let stream = spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| DaqError::Connection {
        port: port_path.to_string(),
        reason: format!("open task failed: {e}"),
    })?
    .map_err(|e| DaqError::Connection {
        port: port_path.to_string(),
        reason: e.to_string(),
    })?;

    Ok(Box::new(stream))
}

/// Open a serial port with 8N1 framing and no flow control.
#[cfg(not(feature = "instrument_serial"))]
pub async fn open_serial_async(_port_path: &str, _baud_rate: u32) -> AppResult<DynSerial> {
    Err(DaqError::SerialFeatureDisabled)
}

/// [`LineTransport`] over an async byte stream.
pub struct SerialLine {
    baud_rate: u32,
    write_timeout: Duration,
    port_name: Option<String>,
    stream: Option<BufReader<DynSerial>>,
}

impl SerialLine {
    /// Create a closed line with the given settings.
    pub fn new(baud_rate: u32, write_timeout: Duration) -> Self {
        Self {
            baud_rate,
            write_timeout,
            port_name: None,
            stream: None,
        }
    }

    /// Create a closed line from the `[serial]` configuration section.
    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.baud_rate, config.write_timeout())
    }

    /// Adopt an already-open stream under `port_name`.
    pub fn attach(&mut self, port_name: impl Into<String>, stream: DynSerial) {
        self.port_name = Some(port_name.into());
        self.stream = Some(BufReader::new(stream));
    }

    /// Baud rate used by [`LineTransport::open`].
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn connected_port(&self) -> String {
        self.port_name.clone().unwrap_or_default()
    }
}

#[async_trait]
impl LineTransport for SerialLine {
    fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    fn is_ready(&self) -> bool {
        self.stream.is_some()
    }

    async fn open(&mut self, port: &str) -> AppResult<()> {
        self.stream = None;
        self.port_name = None;

        let stream = open_serial_async(port, self.baud_rate).await?;
        self.attach(port, stream);
        info!(port, baud_rate = self.baud_rate, "Serial port opened");
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let port = self.port_name.take().unwrap_or_default();
            // Dropping the stream releases the port.
            stream.get_mut().shutdown().await?;
            info!(port = %port, "Serial port closed");
        }
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        let port = self.connected_port();
        let timeout = self.write_timeout;
        let stream = self.stream.as_mut().ok_or(DaqError::NotOpen)?;

        let io = async {
            let inner = stream.get_mut();
            inner.write_all(bytes).await?;
            inner.flush().await
        };

        match tokio::time::timeout(timeout, io).await {
            Ok(Ok(())) => {
                debug!(port = %port, bytes = ?bytes, "Wrote to serial port");
                Ok(())
            }
            Ok(Err(e)) => Err(DaqError::Write {
                port,
                reason: e.to_string(),
            }),
            Err(_) => Err(DaqError::WriteTimeout {
                port,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn read_line(&mut self) -> AppResult<String> {
        let port = self.connected_port();
        let stream = self.stream.as_mut().ok_or(DaqError::NotOpen)?;

        let mut raw = Vec::with_capacity(64);
        let read = (&mut *stream)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut raw)
            .await?;
        if read == 0 {
            return Err(DaqError::UnexpectedEof { port });
        }
        if read == MAX_LINE_BYTES && raw.last() != Some(&b'\n') {
            // The rest of the run-on record is left in the stream and fails to parse.
            return Err(DaqError::MalformedLine {
                line: String::from_utf8_lossy(&raw[..32]).into_owned(),
                reason: format!("no line terminator within {MAX_LINE_BYTES} bytes"),
            });
        }

        let line = String::from_utf8(raw).map_err(|source| DaqError::Decode {
            port: port.clone(),
            source,
        })?;
        Ok(line.trim_end().to_string())
    }
}
