//! Motor command dispatch.
//!
//! The rig's two linear motors hang off the control board and are driven with the
//! single-byte commands from [`crate::protocol`]. Motor commands are fire-and-forget:
//! the board sends no acknowledgement, and a command may be issued in any acquisition
//! state.
//!
//! # Example Usage
//!
//! ```no_run
//! use kesf_daq::events::EventBus;
//! use kesf_daq::motor::CommandDispatcher;
//! use kesf_daq::protocol::Axis;
//! use kesf_daq::transport::{wrap_shared, LineTransport, SerialLine};
//!
//! # async fn demo() -> kesf_daq::error::AppResult<()> {
//! let mut line = SerialLine::new(115_200, std::time::Duration::from_secs(1));
//! line.open("/dev/ttyUSB0").await?;
//!
//! let motors = CommandDispatcher::new(wrap_shared(line), EventBus::default());
//! motors.start(Axis::One).await?;
//! motors.reverse(Axis::One).await?;
//! motors.stop(Axis::One).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::AppResult;
use crate::events::{AcquisitionEvent, EventBus};
use crate::protocol::{Axis, Command, MotorAction};
use crate::transport::SharedLine;
use tracing::debug;

/// Sends motor commands on the control board's line.
#[derive(Clone)]
pub struct CommandDispatcher {
    control: SharedLine,
    events: EventBus,
}

impl CommandDispatcher {
    /// Dispatcher writing to `control`.
    pub fn new(control: SharedLine, events: EventBus) -> Self {
        Self { control, events }
    }

    /// Start driving `axis`.
    pub async fn start(&self, axis: Axis) -> AppResult<()> {
        self.dispatch(axis, MotorAction::Start).await
    }

    /// Stop `axis`.
    pub async fn stop(&self, axis: Axis) -> AppResult<()> {
        self.dispatch(axis, MotorAction::Stop).await
    }

    /// Flip the drive direction of `axis`.
    ///
    /// On success a [`AcquisitionEvent::MotorReversed`] is published so a front end
    /// can toggle its direction indicator.
    pub async fn reverse(&self, axis: Axis) -> AppResult<()> {
        self.dispatch(axis, MotorAction::Reverse).await
    }

    /// Send one motor command.
    ///
    /// # Errors
    ///
    /// Whatever the control line's write returns (not open, rejected, timed out).
    pub async fn dispatch(&self, axis: Axis, action: MotorAction) -> AppResult<()> {
        let command = Command::Motor(axis, action);
        self.control.lock().await.write(&[command.code()]).await?;
        debug!(%command, code = %char::from(command.code()), "Motor command sent");

        if action == MotorAction::Reverse {
            self.events.publish(AcquisitionEvent::MotorReversed(axis));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaqError;
    use crate::transport::mock::MockLine;
    use crate::transport::wrap_shared;

    #[tokio::test]
    async fn writes_one_byte_per_command() {
        let (line, handle) = MockLine::connected("mock-control");
        let motors = CommandDispatcher::new(wrap_shared(line), EventBus::default());

        motors.start(Axis::One).await.unwrap();
        motors.stop(Axis::One).await.unwrap();
        motors.reverse(Axis::One).await.unwrap();
        motors.start(Axis::Two).await.unwrap();
        motors.stop(Axis::Two).await.unwrap();
        motors.reverse(Axis::Two).await.unwrap();

        assert_eq!(handle.written(), b"345789");
    }

    #[tokio::test]
    async fn reverse_is_announced() {
        let (line, _handle) = MockLine::connected("mock-control");
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let motors = CommandDispatcher::new(wrap_shared(line), events);

        motors.start(Axis::Two).await.unwrap();
        motors.reverse(Axis::Two).await.unwrap();

        match rx.try_recv().unwrap() {
            AcquisitionEvent::MotorReversed(axis) => assert_eq!(axis, Axis::Two),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_line_is_an_error() {
        let (line, handle) = MockLine::closed();
        let motors = CommandDispatcher::new(wrap_shared(line), EventBus::default());

        let err = motors.start(Axis::One).await.unwrap_err();
        assert!(matches!(err, DaqError::NotOpen));
        assert!(handle.written().is_empty());
    }

    #[tokio::test]
    async fn failed_reverse_is_not_announced() {
        let (line, handle) = MockLine::connected("mock-control");
        handle.fail_writes(true);
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let motors = CommandDispatcher::new(wrap_shared(line), events);

        assert!(motors.reverse(Axis::One).await.is_err());
        assert!(rx.try_recv().is_err());
    }
}
