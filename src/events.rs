//! Notifications from the acquisition core to its presentation layer.
//!
//! The core never calls into a UI. Everything a front end needs (status text, plot
//! refreshes, control enablement, motor-reversal toggles) is published on an
//! [`EventBus`] backed by a `tokio::sync::broadcast` channel; any number of listeners
//! subscribe with [`EventBus::subscribe`].
//!
//! Status messages double as log records: [`EventBus::report`] writes the message to
//! `tracing` at the matching level before broadcasting it.
//!
//! Plot data does not travel over the bus. A renderer registers a [`DisplaySink`] with the
//! acquisition loop and is handed the whole display series by reference on every refresh;
//! the bus only carries a lightweight [`AcquisitionEvent::DisplayUpdated`] notice.

use crate::acquisition::AcquisitionState;
use crate::error::DaqError;
use crate::protocol::Axis;
use crate::sample::Sample;
use crate::synchronizer::DisplaySeries;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default number of events a slow listener may fall behind before it lags.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Severity of a user-visible message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    /// Informational
    Info,
    /// Something the user should know about; data is still valid
    Warning,
    /// An operation failed
    Error,
}

/// Which user controls are currently actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlState {
    /// Start may be pressed
    pub start: bool,
    /// Stop may be pressed
    pub stop: bool,
    /// Reset may be pressed
    pub reset: bool,
}

impl ControlState {
    /// Controls for `state`, given whether both boards are connected.
    pub fn for_state(state: AcquisitionState, ports_ready: bool) -> Self {
        match state {
            AcquisitionState::Idle => Self {
                start: ports_ready,
                stop: false,
                reset: false,
            },
            AcquisitionState::Running => Self {
                start: false,
                stop: true,
                reset: false,
            },
            AcquisitionState::Stopped => Self {
                start: ports_ready,
                stop: false,
                reset: true,
            },
        }
    }
}

/// Something the presentation layer may want to react to.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// Status line text
    Status {
        /// Severity
        level: StatusLevel,
        /// Human-readable message
        message: String,
    },
    /// The acquisition state machine moved
    StateChanged(AcquisitionState),
    /// Control enablement changed
    ControlsChanged(ControlState),
    /// The display series grew by one point
    DisplayUpdated {
        /// Points now plotted per curve
        points: usize,
        /// The point just added
        latest: Sample,
    },
    /// A reverse command was sent for this axis
    MotorReversed(Axis),
    /// The run hit its length bound and stopped itself
    RunLengthExceeded {
        /// Poll ticks performed
        ticks: u64,
    },
}

/// Receiver of the decimated display series.
///
/// Called synchronously from the poll tick, so implementations must return quickly.
pub trait DisplaySink: Send {
    /// Redraw from `series`; every curve shares `series.t`.
    fn render(&mut self, series: &DisplaySeries);
}

/// Broadcast hub for [`AcquisitionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AcquisitionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Bus buffering up to `capacity` events per listener.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a listener.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.tx.subscribe()
    }

    /// Publish to every current listener. Publishing with no listeners is fine.
    pub fn publish(&self, event: AcquisitionEvent) {
        let _ = self.tx.send(event);
    }

    /// Log `message` and show it to the user.
    pub fn report(&self, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            StatusLevel::Info => info!("{message}"),
            StatusLevel::Warning => warn!("{message}"),
            StatusLevel::Error => error!("{message}"),
        }
        self.publish(AcquisitionEvent::Status { level, message });
    }

    /// Report a recoverable failure.
    pub fn report_error(&self, err: &DaqError) {
        self.report(StatusLevel::Error, err.to_string());
    }
}
