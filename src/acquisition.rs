//! Acquisition loop.
//!
//! [`AcquisitionLoop`] owns the run state machine and the poll step that turns one line
//! from each board into one archived sample:
//!
//! ```text
//!   Idle ──start──► Running ──stop / length bound──► Stopped ──reset──► Idle
//!                      ▲                                │
//!                      └──────────────start─────────────┘
//! ```
//!
//! Polling is cooperative. The host calls [`AcquisitionLoop::on_tick`] again as soon as
//! it is otherwise idle; each tick blocks for at most one line per board and then hands
//! control back. Ticks are never re-entered, so the buffers and the time origin need no
//! locking.
//!
//! # Tick protocol
//!
//! - counter 0 is the priming tick: one line from each board is read and thrown away,
//!   because the boards emit a partial record when the stream starts.
//! - every later tick reads a pair, parses it, captures the time origin on the first
//!   good pair, archives the sample, and every [`DISPLAY_DECIMATION`]th tick refreshes
//!   the display series.
//! - transport and parse failures are reported and the tick is dropped; it is not
//!   retried.
//! - the counter advances on every tick; at `max_run_length` the run stops itself.

use crate::error::{AppResult, DaqError};
use crate::events::{AcquisitionEvent, DisplaySink, EventBus, StatusLevel};
use crate::protocol::Command;
use crate::sample::{parse_and_scale, Sample};
use crate::synchronizer::{SampleSynchronizer, DISPLAY_DECIMATION};
use crate::transport::SharedLine;
use tracing::{debug, info};

/// Run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// No run; buffers empty or freshly reset
    Idle,
    /// Polling
    Running,
    /// Polling ended; the last run's data is still held
    Stopped,
}

impl AcquisitionState {
    /// Lower-case state name.
    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Running => "running",
            AcquisitionState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Priming tick; data discarded
    Primed,
    /// A sample was archived
    Recorded {
        /// The display series was refreshed as well
        displayed: bool,
    },
    /// Read or parse failed; nothing recorded
    Skipped,
    /// Not running; nothing read
    Idle,
}

/// Run state machine plus the poll step.
pub struct AcquisitionLoop {
    control: SharedLine,
    sensor: SharedLine,
    sync: SampleSynchronizer,
    events: EventBus,
    sinks: Vec<Box<dyn DisplaySink>>,
    state: AcquisitionState,
    counter: u64,
    origin: Option<f64>,
    max_run_length: u64,
}

impl AcquisitionLoop {
    /// Loop over the two board transports.
    ///
    /// Protocol commands go to `control`; `max_run_length` bounds the ticks per run.
    pub fn new(
        control: SharedLine,
        sensor: SharedLine,
        events: EventBus,
        max_run_length: u64,
    ) -> Self {
        Self {
            control,
            sensor,
            sync: SampleSynchronizer::new(),
            events,
            sinks: Vec::new(),
            state: AcquisitionState::Idle,
            counter: 0,
            origin: None,
            max_run_length,
        }
    }

    /// Register a renderer for the display series.
    pub fn add_display_sink(&mut self, sink: Box<dyn DisplaySink>) {
        self.sinks.push(sink);
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Ticks performed since the last start.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Device time (seconds) of the first recorded sample of this run.
    pub fn origin(&self) -> Option<f64> {
        self.origin
    }

    /// Buffers of the current / last run.
    pub fn synchronizer(&self) -> &SampleSynchronizer {
        &self.sync
    }

    /// Full-rate samples of the current / last run.
    pub fn archive(&self) -> &[Sample] {
        self.sync.archive()
    }

    /// Whether both boards are connected.
    pub async fn ports_ready(&self) -> bool {
        self.control.lock().await.is_ready() && self.sensor.lock().await.is_ready()
    }

    fn set_state(&mut self, state: AcquisitionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Acquisition state change");
            self.state = state;
            self.events.publish(AcquisitionEvent::StateChanged(state));
        }
    }

    /// Begin a run.
    ///
    /// Requires both boards connected and the plot-start byte to be accepted by the
    /// control board; otherwise the state is left as it was and the error is returned
    /// for the caller to surface.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.state == AcquisitionState::Running {
            return Err(self.refuse("start"));
        }
        if !self.ports_ready().await {
            return Err(DaqError::PortsNotReady);
        }

        self.control
            .lock()
            .await
            .write(&[Command::PlotStart.code()])
            .await?;

        self.sync.reset();
        self.counter = 0;
        self.origin = None;
        self.set_state(AcquisitionState::Running);
        self.events.report(StatusLevel::Info, "Acquisition started");
        Ok(())
    }

    /// End the run.
    ///
    /// Polling stops unconditionally; the plot-stop byte is best effort and a failure
    /// to send it is reported here rather than returned.
    pub async fn stop(&mut self) -> AppResult<()> {
        if self.state != AcquisitionState::Running {
            return Err(self.refuse("stop"));
        }
        self.set_state(AcquisitionState::Stopped);

        let written = self
            .control
            .lock()
            .await
            .write(&[Command::PlotStop.code()])
            .await;
        if let Err(err) = written {
            self.events.report_error(&err);
        }

        info!(
            ticks = self.counter,
            samples = self.sync.archive().len(),
            "Acquisition stopped"
        );
        self.events.report(StatusLevel::Info, "Acquisition stopped");
        Ok(())
    }

    /// Discard the last run's data and return to Idle.
    ///
    /// Port connections are left as they are.
    pub fn reset(&mut self) -> AppResult<()> {
        if self.state == AcquisitionState::Running {
            return Err(self.refuse("reset"));
        }
        self.sync.reset();
        self.counter = 0;
        self.origin = None;
        self.set_state(AcquisitionState::Idle);
        Ok(())
    }

    fn refuse(&self, action: &'static str) -> DaqError {
        let err = DaqError::TransitionRefused {
            action,
            state: self.state.as_str(),
        };
        debug!(%err, "Transition refused");
        err
    }

    /// One poll step. See the module docs for the protocol.
    pub async fn on_tick(&mut self) -> TickOutcome {
        if self.state != AcquisitionState::Running {
            return TickOutcome::Idle;
        }

        let outcome = if self.counter == 0 {
            self.prime().await
        } else {
            self.acquire().await
        };

        self.counter += 1;
        if self.counter >= self.max_run_length {
            self.events.report(
                StatusLevel::Warning,
                format!(
                    "Run length limit of {} reached; acquisition stopped",
                    self.max_run_length
                ),
            );
            self.events.publish(AcquisitionEvent::RunLengthExceeded {
                ticks: self.counter,
            });
            self.set_state(AcquisitionState::Stopped);
        }
        outcome
    }

    /// Tick until the run stops, yielding to the host scheduler between ticks.
    pub async fn run_until_stopped(&mut self) {
        while self.state == AcquisitionState::Running {
            self.on_tick().await;
            tokio::task::yield_now().await;
        }
    }

    async fn read_pair(&self) -> AppResult<(String, String)> {
        let control_line = self.control.lock().await.read_line().await?;
        let sensor_line = self.sensor.lock().await.read_line().await?;
        Ok((control_line, sensor_line))
    }

    async fn prime(&mut self) -> TickOutcome {
        match self.read_pair().await {
            Ok((control_line, sensor_line)) => {
                let parsed = parse_and_scale(&control_line, &sensor_line).is_ok();
                debug!(parsed, "Discarded priming record");
            }
            Err(err) => self.events.report_error(&err),
        }
        TickOutcome::Primed
    }

    async fn acquire(&mut self) -> TickOutcome {
        let (control_line, sensor_line) = match self.read_pair().await {
            Ok(pair) => pair,
            Err(err) => {
                self.events.report_error(&err);
                return TickOutcome::Skipped;
            }
        };

        let raw = match self.sync.parse_and_scale(&control_line, &sensor_line) {
            Ok(sample) => sample,
            Err(err) => {
                self.events.report_error(&err);
                return TickOutcome::Skipped;
            }
        };

        let origin = match self.origin {
            Some(origin) => origin,
            None => {
                debug!(counter = self.counter, origin = raw.t, "Captured time origin");
                self.origin = Some(raw.t);
                raw.t
            }
        };
        let sample = raw.relative_to(origin);
        self.sync.record_sample(sample);

        let displayed = self.counter % DISPLAY_DECIMATION == 0;
        if displayed {
            let series = self.sync.record_for_display(sample);
            for sink in &mut self.sinks {
                sink.render(series);
            }
            self.events.publish(AcquisitionEvent::DisplayUpdated {
                points: series.len(),
                latest: sample,
            });
        }
        TickOutcome::Recorded { displayed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockHandle, MockLine};
    use crate::synchronizer::DisplaySeries;
    use crate::transport::wrap_shared;
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    const K: f64 = 3.3 / 4095.0;

    struct Rig {
        acq: AcquisitionLoop,
        control: MockHandle,
        sensor: MockHandle,
        events: EventBus,
    }

    fn rig(max_run_length: u64) -> Rig {
        let (control_line, control) = MockLine::connected("mock-control");
        let (sensor_line, sensor) = MockLine::connected("mock-sensor");
        let events = EventBus::default();
        let acq = AcquisitionLoop::new(
            wrap_shared(control_line),
            wrap_shared(sensor_line),
            events.clone(),
            max_run_length,
        );
        Rig {
            acq,
            control,
            sensor,
            events,
        }
    }

    /// Queue `n` well-formed pairs with timestamps `start_us + i * 1000`.
    fn feed(rig: &Rig, start_us: u64, n: u64) {
        for i in 0..n {
            rig.control
                .push_line(format!("{i}.0,{i}.5,{}", start_us + i * 1000));
            rig.sensor.push_line(format!("{},{},{}", i, 2 * i, 3 * i));
        }
    }

    #[tokio::test]
    async fn start_sends_plot_start() {
        let mut rig = rig(1 << 20);
        rig.acq.start().await.unwrap();
        assert_eq!(rig.acq.state(), AcquisitionState::Running);
        assert_eq!(rig.control.written(), b"0");
        assert!(rig.sensor.written().is_empty());
    }

    #[tokio::test]
    async fn start_refused_when_a_port_is_closed() {
        let (control_line, _control) = MockLine::connected("mock-control");
        let (sensor_line, _sensor) = MockLine::closed();
        let mut acq = AcquisitionLoop::new(
            wrap_shared(control_line),
            wrap_shared(sensor_line),
            EventBus::default(),
            1 << 20,
        );

        assert!(matches!(acq.start().await, Err(DaqError::PortsNotReady)));
        assert_eq!(acq.state(), AcquisitionState::Idle);
    }

    #[tokio::test]
    async fn failed_start_write_stays_idle() {
        let mut rig = rig(1 << 20);
        let mut rx = rig.events.subscribe();
        rig.control.fail_writes(true);

        assert!(matches!(rig.acq.start().await, Err(DaqError::Write { .. })));
        assert_eq!(rig.acq.state(), AcquisitionState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_stop_write_is_reported() {
        let mut rig = rig(1 << 20);
        rig.acq.start().await.unwrap();
        let mut rx = rig.events.subscribe();
        rig.control.fail_writes(true);

        rig.acq.stop().await.unwrap();

        let reported = std::iter::from_fn(|| rx.try_recv().ok()).any(|e| {
            matches!(
                e,
                AcquisitionEvent::Status {
                    level: StatusLevel::Error,
                    ..
                }
            )
        });
        assert!(reported);
    }

    #[tokio::test]
    async fn priming_tick_records_nothing() {
        let mut rig = rig(1 << 20);
        rig.control.push_line("1.0,2.0,1000000");
        rig.sensor.push_line("3000,4000,100");
        rig.acq.start().await.unwrap();

        assert_eq!(rig.acq.on_tick().await, TickOutcome::Primed);
        assert_eq!(rig.acq.counter(), 1);
        assert!(rig.acq.archive().is_empty());
        assert_eq!(rig.acq.origin(), None);
    }

    #[tokio::test]
    async fn first_sample_defines_origin() {
        let mut rig = rig(1 << 20);
        rig.control.push_lines(["1.0,2.0,1000000", "1.0,2.0,2000000"]);
        rig.sensor.push_lines(["3000,4000,100", "3000,4000,100"]);
        rig.acq.start().await.unwrap();

        rig.acq.on_tick().await;
        let outcome = rig.acq.on_tick().await;

        assert_eq!(outcome, TickOutcome::Recorded { displayed: false });
        assert_eq!(rig.acq.origin(), Some(2.0));
        let sample = rig.acq.archive()[0];
        assert_eq!(sample.t, 0.0);
        assert_eq!(sample.f1, 4000.0 * K);
        assert_eq!(sample.f2, 100.0 * K);
        assert_eq!(sample.disp1, 1.0);
        assert_eq!(sample.disp2, 2.0);
        assert_eq!(sample.sensor, 3000.0 * K);
    }

    #[tokio::test]
    async fn malformed_line_skips_tick_but_advances_counter() {
        let mut rig = rig(1 << 20);
        let mut rx = rig.events.subscribe();
        feed(&rig, 1_000_000, 1);
        rig.control.push_line("a,b");
        rig.sensor.push_line("1,2,3");
        rig.acq.start().await.unwrap();

        rig.acq.on_tick().await;
        assert_eq!(rig.acq.on_tick().await, TickOutcome::Skipped);
        assert_eq!(rig.acq.counter(), 2);
        assert!(rig.acq.archive().is_empty());

        let errors = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| {
                matches!(
                    e,
                    AcquisitionEvent::Status {
                        level: StatusLevel::Error,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn origin_waits_for_first_good_sample() {
        let mut rig = rig(1 << 20);
        feed(&rig, 1_000_000, 1);
        rig.control.push_line("garbage");
        rig.sensor.push_line("1,2,3");
        rig.control.push_line("0,0,3500000");
        rig.sensor.push_line("1,2,3");
        rig.acq.start().await.unwrap();

        for _ in 0..3 {
            rig.acq.on_tick().await;
        }
        assert_eq!(rig.acq.origin(), Some(3.5));
        assert_eq!(rig.acq.archive()[0].t, 0.0);
    }

    #[tokio::test]
    async fn non_finite_timestamp_never_becomes_origin() {
        let mut rig = rig(1 << 20);
        rig.control.push_lines(["0,0,0", "0,0,inf", "0,0,1000", "0,0,2000"]);
        rig.sensor.push_lines(["0,0,0", "0,0,0", "0,0,0", "0,0,0"]);
        rig.acq.start().await.unwrap();

        rig.acq.on_tick().await;
        assert_eq!(rig.acq.on_tick().await, TickOutcome::Skipped);
        assert_eq!(rig.acq.origin(), None);
        rig.acq.on_tick().await;
        rig.acq.on_tick().await;

        let origin = rig.acq.origin().unwrap();
        assert!((origin - 0.001).abs() < 1e-12);
        let times: Vec<f64> = rig.acq.archive().iter().map(|s| s.t).collect();
        assert_eq!(times.len(), 2);
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 0.001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn transport_error_skips_tick() {
        let mut rig = rig(1 << 20);
        feed(&rig, 1_000_000, 1);
        rig.control.push_error(DaqError::UnexpectedEof {
            port: "mock-control".into(),
        });
        rig.acq.start().await.unwrap();

        rig.acq.on_tick().await;
        assert_eq!(rig.acq.on_tick().await, TickOutcome::Skipped);
        assert_eq!(rig.acq.counter(), 2);
        assert_eq!(rig.acq.state(), AcquisitionState::Running);
    }

    #[tokio::test]
    async fn every_fifth_tick_is_displayed() {
        let mut rig = rig(1 << 20);
        let mut rx = rig.events.subscribe();
        feed(&rig, 1_000_000, 26);
        rig.acq.start().await.unwrap();

        for _ in 0..26 {
            rig.acq.on_tick().await;
        }

        let archive = rig.acq.archive();
        let display = rig.acq.synchronizer().display();
        assert_eq!(archive.len(), 25);
        assert_eq!(display.len(), 5);
        for k in 0..5 {
            assert_eq!(display.sample(k), Some(archive[5 * k + 4]));
        }

        let updates: Vec<usize> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                AcquisitionEvent::DisplayUpdated { points, .. } => Some(points),
                _ => None,
            })
            .collect();
        assert_eq!(updates, [1, 2, 3, 4, 5]);
    }

    struct RecordingSink(Arc<Mutex<Vec<DisplaySeries>>>);

    impl DisplaySink for RecordingSink {
        fn render(&mut self, series: &DisplaySeries) {
            self.0.lock().unwrap().push(series.clone());
        }
    }

    #[tokio::test]
    async fn sinks_receive_whole_series() {
        let mut rig = rig(1 << 20);
        let frames = Arc::new(Mutex::new(Vec::new()));
        rig.acq
            .add_display_sink(Box::new(RecordingSink(frames.clone())));
        feed(&rig, 1_000_000, 11);
        rig.acq.start().await.unwrap();

        for _ in 0..11 {
            rig.acq.on_tick().await;
        }

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 1);
        assert_eq!(frames[1].len(), 2);
        assert_eq!(frames[1].sample(1), Some(rig.acq.archive()[9]));
    }

    #[tokio::test]
    async fn times_are_monotonic_from_zero() {
        let mut rig = rig(1 << 20);
        feed(&rig, 7_000_000, 11);
        rig.acq.start().await.unwrap();
        for _ in 0..11 {
            rig.acq.on_tick().await;
        }

        let times: Vec<f64> = rig.acq.archive().iter().map(|s| s.t).collect();
        assert_eq!(times[0], 0.0);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert!((times[9] - 0.009).abs() < 1e-9);
    }

    #[tokio::test]
    #[traced_test]
    async fn run_stops_at_length_bound() {
        let mut rig = rig(4);
        let mut rx = rig.events.subscribe();
        feed(&rig, 1_000_000, 10);
        rig.acq.start().await.unwrap();

        rig.acq.run_until_stopped().await;

        assert_eq!(rig.acq.state(), AcquisitionState::Stopped);
        assert_eq!(rig.acq.counter(), 4);
        assert_eq!(rig.acq.archive().len(), 3);
        // The length bound does not send plot-stop.
        assert_eq!(rig.control.written(), b"0");
        assert!(logs_contain("Run length limit of 4 reached"));
        assert!(std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| matches!(e, AcquisitionEvent::RunLengthExceeded { ticks: 4 })));
    }

    #[tokio::test]
    async fn stop_is_best_effort() {
        let mut rig = rig(1 << 20);
        rig.acq.start().await.unwrap();
        rig.control.fail_writes(true);

        rig.acq.stop().await.unwrap();
        assert_eq!(rig.acq.state(), AcquisitionState::Stopped);
        assert_eq!(rig.acq.on_tick().await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn transitions_are_guarded() {
        let mut rig = rig(1 << 20);
        assert!(matches!(
            rig.acq.stop().await,
            Err(DaqError::TransitionRefused { action: "stop", .. })
        ));
        rig.acq.start().await.unwrap();
        assert!(rig.acq.start().await.is_err());
        assert!(rig.acq.reset().is_err());
    }

    #[tokio::test]
    async fn reset_clears_data_and_keeps_ports() {
        let mut rig = rig(1 << 20);
        feed(&rig, 1_000_000, 3);
        rig.acq.start().await.unwrap();
        for _ in 0..3 {
            rig.acq.on_tick().await;
        }
        rig.acq.stop().await.unwrap();
        assert_eq!(rig.acq.archive().len(), 2);

        rig.acq.reset().unwrap();
        assert_eq!(rig.acq.state(), AcquisitionState::Idle);
        assert!(rig.acq.archive().is_empty());
        assert_eq!(rig.acq.origin(), None);
        assert!(rig.acq.ports_ready().await);
        assert_eq!(rig.control.closes(), 0);
    }

    #[tokio::test]
    async fn restart_from_stopped_begins_a_fresh_run() {
        let mut rig = rig(1 << 20);
        feed(&rig, 1_000_000, 3);
        rig.acq.start().await.unwrap();
        for _ in 0..3 {
            rig.acq.on_tick().await;
        }
        rig.acq.stop().await.unwrap();

        feed(&rig, 9_000_000, 2);
        rig.acq.start().await.unwrap();
        assert!(rig.acq.archive().is_empty());
        rig.acq.on_tick().await;
        rig.acq.on_tick().await;
        assert_eq!(rig.acq.origin(), Some(9.001));
        assert_eq!(rig.control.written(), b"010");
    }
}
