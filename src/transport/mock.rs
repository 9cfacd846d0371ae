//! Mock Transports
//!
//! In-memory [`LineTransport`] implementations for tests and bench runs without boards.
//!
//! # Available Mocks
//!
//! - [`MockLine::closed`] / [`MockLine::connected`] - scripted reads with failure injection,
//!   controlled through a cloneable [`MockHandle`]
//! - [`MockLine::generated`] - endless stream produced by a line generator, e.g.
//!   [`control_board`] and [`sensor_board`]
//!
//! A scripted line whose script is exhausted reports end of stream, so tests never hang
//! on a read.

use super::LineTransport;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Produces the `n`-th line of a generated stream.
pub type LineGenerator = Box<dyn FnMut(u64) -> String + Send>;

#[derive(Default)]
struct MockState {
    port: Option<String>,
    reads: VecDeque<AppResult<String>>,
    written: Vec<u8>,
    fail_writes: bool,
    unavailable: HashSet<String>,
    opens: usize,
    closes: usize,
}

/// Control surface of a [`MockLine`] that stays usable after the line is boxed.
#[derive(Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Queue a line for a future `read_line`.
    pub fn push_line(&self, line: impl Into<String>) {
        self.state.lock().reads.push_back(Ok(line.into()));
    }

    /// Queue several lines.
    pub fn push_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        state.reads.extend(lines.into_iter().map(|l| Ok(l.into())));
    }

    /// Queue a read failure.
    pub fn push_error(&self, error: DaqError) {
        self.state.lock().reads.push_back(Err(error));
    }

    /// Make every following write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make `open(port)` fail with a connection error.
    pub fn mark_unavailable(&self, port: impl Into<String>) {
        self.state.lock().unavailable.insert(port.into());
    }

    /// Bytes written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Number of queued reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.state.lock().reads.len()
    }

    /// Number of successful `open` calls.
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Number of `close` calls that released a connection.
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// Whether the line is currently open.
    pub fn is_open(&self) -> bool {
        self.state.lock().port.is_some()
    }
}

/// In-memory line transport.
pub struct MockLine {
    state: Arc<Mutex<MockState>>,
    port_cache: Option<String>,
    generator: Option<LineGenerator>,
    generated: u64,
    interval: Option<Duration>,
}

impl MockLine {
    /// Closed scripted line.
    pub fn closed() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        let line = Self {
            state: handle.state.clone(),
            port_cache: None,
            generator: None,
            generated: 0,
            interval: None,
        };
        (line, handle)
    }

    /// Scripted line already open on `port`.
    pub fn connected(port: impl Into<String>) -> (Self, MockHandle) {
        let (mut line, handle) = Self::closed();
        let port = port.into();
        {
            let mut state = handle.state.lock();
            state.port = Some(port.clone());
            state.opens = 1;
        }
        line.port_cache = Some(port);
        (line, handle)
    }

    /// Open line whose reads come from `generator`.
    pub fn generated(
        port: impl Into<String>,
        generator: impl FnMut(u64) -> String + Send + 'static,
    ) -> Self {
        let (mut line, _handle) = Self::connected(port);
        line.generator = Some(Box::new(generator));
        line
    }

    /// Wait `interval` before every generated line, roughly mimicking the board's
    /// output rate.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

#[async_trait]
impl LineTransport for MockLine {
    fn port_name(&self) -> Option<&str> {
        self.port_cache.as_deref()
    }

    fn is_ready(&self) -> bool {
        self.state.lock().port.is_some()
    }

    async fn open(&mut self, port: &str) -> AppResult<()> {
        let mut state = self.state.lock();
        state.port = None;
        self.port_cache = None;
        if state.unavailable.contains(port) {
            return Err(DaqError::Connection {
                port: port.to_string(),
                reason: "device not present".into(),
            });
        }
        state.port = Some(port.to_string());
        state.opens += 1;
        self.port_cache = Some(port.to_string());
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.port.take().is_some() {
            state.closes += 1;
        }
        self.port_cache = None;
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        let mut state = self.state.lock();
        let Some(port) = state.port.clone() else {
            return Err(DaqError::NotOpen);
        };
        if state.fail_writes {
            return Err(DaqError::Write {
                port,
                reason: "injected write failure".into(),
            });
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    async fn read_line(&mut self) -> AppResult<String> {
        let port = self.state.lock().port.clone().ok_or(DaqError::NotOpen)?;

        if let Some(generator) = self.generator.as_mut() {
            if let Some(interval) = self.interval {
                tokio::time::sleep(interval).await;
            }
            let line = generator(self.generated);
            self.generated += 1;
            return Ok(line);
        }

        self.state
            .lock()
            .reads
            .pop_front()
            .unwrap_or(Err(DaqError::UnexpectedEof { port }))
    }
}

/// Generator for the control board: two displacements and a microsecond timestamp
/// advancing by `period_us` per line.
pub fn control_board(start_us: u64, period_us: u64) -> impl FnMut(u64) -> String + Send {
    move |n| {
        let mut rng = rand::thread_rng();
        let disp1: f64 = rng.gen_range(0.0..100.0);
        let disp2: f64 = rng.gen_range(0.0..100.0);
        format!("{disp1:.3},{disp2:.3},{}", start_us + n * period_us)
    }
}

/// Generator for the sensor board: sensor and two force readings as 12-bit ADC counts.
pub fn sensor_board() -> impl FnMut(u64) -> String + Send {
    move |_| {
        let mut rng = rand::thread_rng();
        let sensor: u16 = rng.gen_range(0..4096);
        let force1: u16 = rng.gen_range(0..4096);
        let force2: u16 = rng.gen_range(0..4096);
        format!("{sensor},{force1},{force2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_reads_then_eof() {
        let (mut line, handle) = MockLine::connected("mock0");
        handle.push_lines(["a", "b"]);

        assert_eq!(line.read_line().await.unwrap(), "a");
        assert_eq!(line.read_line().await.unwrap(), "b");
        assert!(matches!(
            line.read_line().await,
            Err(DaqError::UnexpectedEof { .. })
        ));
    }

    #[tokio::test]
    async fn unavailable_port_leaves_line_not_ready() {
        let (mut line, handle) = MockLine::connected("mock0");
        handle.mark_unavailable("mock1");

        assert!(line.open("mock1").await.is_err());
        assert!(!line.is_ready());
        assert_eq!(line.port_name(), None);

        line.open("mock0").await.unwrap();
        assert!(line.is_ready());
        assert_eq!(handle.opens(), 2);
    }

    #[tokio::test]
    async fn write_failures_are_injectable() {
        let (mut line, handle) = MockLine::connected("mock0");
        line.write(b"3").await.unwrap();
        handle.fail_writes(true);
        assert!(matches!(line.write(b"4").await, Err(DaqError::Write { .. })));
        assert_eq!(handle.written(), b"3");
    }

    #[tokio::test]
    async fn board_generators_emit_three_fields() {
        let mut control = MockLine::generated("sim-control", control_board(5_000_000, 1_000));
        let mut sensor = MockLine::generated("sim-sensor", sensor_board());

        let first = control.read_line().await.unwrap();
        let second = control.read_line().await.unwrap();
        assert!(first.ends_with(",5000000"));
        assert!(second.ends_with(",5001000"));
        assert_eq!(sensor.read_line().await.unwrap().split(',').count(), 3);
    }

    #[tokio::test]
    async fn closed_generated_board_stops_talking() {
        let mut control = MockLine::generated("sim-control", control_board(0, 1_000));
        control.read_line().await.unwrap();

        control.close().await.unwrap();
        assert!(matches!(control.read_line().await, Err(DaqError::NotOpen)));

        control.open("sim-control").await.unwrap();
        assert!(control.read_line().await.unwrap().ends_with(",1000"));
    }
}
