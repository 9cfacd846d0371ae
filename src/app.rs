//! Application shell.
//!
//! [`KesfApp`] wires the two board transports, the [`AcquisitionLoop`], the motor
//! [`CommandDispatcher`] and the [`CsvArchive`] together, and turns user intents
//! ([`UserAction`]) into calls on them. It is the boundary at which failures stop: every
//! error raised while handling an action is reported on the [`EventBus`] and the app
//! keeps going.
//!
//! [`KesfApp::run`] is the host event loop. While a run is active it alternates one
//! acquisition tick with draining whatever actions have queued up; otherwise it sleeps
//! until the next action arrives.

use crate::acquisition::{AcquisitionLoop, AcquisitionState};
use crate::config::AppConfig;
use crate::error::{AppResult, DaqError};
use crate::events::{AcquisitionEvent, ControlState, DisplaySink, EventBus, StatusLevel};
use crate::motor::CommandDispatcher;
use crate::protocol::{Axis, MotorAction};
use crate::storage::CsvArchive;
use crate::transport::{LineTransport, PortRole, SharedLine};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument};

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// (Re)connect one board to `port`
    SelectPort {
        /// Which board
        role: PortRole,
        /// Port identifier, e.g. `/dev/ttyUSB0` or `COM3`
        port: String,
    },
    /// Begin a run
    Start,
    /// End the run
    Stop,
    /// Discard the last run
    Reset,
    /// Write the archive; `None` uses the suggested name
    Save {
        /// File stem without extension
        name: Option<String>,
    },
    /// Drive a motor
    Motor(Axis, MotorAction),
    /// Stop, disconnect and leave the event loop
    Exit,
}

/// The acquisition application.
pub struct KesfApp {
    config: AppConfig,
    control: SharedLine,
    sensor: SharedLine,
    acquisition: AcquisitionLoop,
    motors: CommandDispatcher,
    archive: CsvArchive,
    events: EventBus,
    controls: Option<ControlState>,
}

impl KesfApp {
    /// Build the app around a control-board and a sensor-board transport.
    ///
    /// The transports may be open already or be connected later through
    /// [`UserAction::SelectPort`].
    pub fn new(
        config: AppConfig,
        control: Box<dyn LineTransport>,
        sensor: Box<dyn LineTransport>,
    ) -> Self {
        Self::with_event_bus(config, control, sensor, EventBus::default())
    }

    /// Like [`KesfApp::new`], publishing on an existing bus.
    pub fn with_event_bus(
        config: AppConfig,
        control: Box<dyn LineTransport>,
        sensor: Box<dyn LineTransport>,
        events: EventBus,
    ) -> Self {
        let control: SharedLine = Arc::new(Mutex::new(control));
        let sensor: SharedLine = Arc::new(Mutex::new(sensor));
        let acquisition = AcquisitionLoop::new(
            control.clone(),
            sensor.clone(),
            events.clone(),
            config.acquisition.max_run_length,
        );
        let motors = CommandDispatcher::new(control.clone(), events.clone());
        let archive = CsvArchive::from_config(&config.storage);

        Self {
            config,
            control,
            sensor,
            acquisition,
            motors,
            archive,
            events,
            controls: None,
        }
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Bus the app publishes on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The acquisition loop, for inspection.
    pub fn acquisition(&self) -> &AcquisitionLoop {
        &self.acquisition
    }

    /// Register a renderer for the display series.
    pub fn add_display_sink(&mut self, sink: Box<dyn DisplaySink>) {
        self.acquisition.add_display_sink(sink);
    }

    /// File stem offered to the user when saving.
    pub fn default_save_name(&self) -> AppResult<String> {
        self.archive.default_stem()
    }

    fn line(&self, role: PortRole) -> &SharedLine {
        match role {
            PortRole::Control => &self.control,
            PortRole::Sensor => &self.sensor,
        }
    }

    /// Port a board is connected to, if any.
    pub async fn port_name(&self, role: PortRole) -> Option<String> {
        self.line(role).lock().await.port_name().map(str::to_owned)
    }

    /// Controls currently actionable.
    pub async fn controls(&self) -> ControlState {
        ControlState::for_state(
            self.acquisition.state(),
            self.acquisition.ports_ready().await,
        )
    }

    async fn refresh_controls(&mut self) {
        let controls = self.controls().await;
        if self.controls != Some(controls) {
            self.controls = Some(controls);
            self.events
                .publish(AcquisitionEvent::ControlsChanged(controls));
        }
    }

    /// Close `role`'s transport and reopen it on `port`.
    ///
    /// A failed open leaves the board disconnected. Refused while a run is active.
    #[instrument(skip(self))]
    pub async fn select_port(&mut self, role: PortRole, port: &str) -> AppResult<()> {
        if self.acquisition.state() == AcquisitionState::Running {
            return Err(DaqError::TransitionRefused {
                action: "change ports",
                state: self.acquisition.state().as_str(),
            });
        }

        {
            let mut line = self.line(role).lock().await;
            line.close().await?;
            line.open(port).await?;
        }
        self.events
            .report(StatusLevel::Info, format!("Connected to {port}"));
        Ok(())
    }

    /// Write the current archive to `<output_dir>/<name>.csv`.
    pub fn save(&self, name: Option<&str>) -> AppResult<PathBuf> {
        let name = match name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => self.default_save_name()?,
        };
        let path = self.archive.save(&name, self.acquisition.archive())?;
        self.events
            .report(StatusLevel::Info, format!("Saved {}", path.display()));
        Ok(path)
    }

    /// Stop any run and close both transports.
    ///
    /// Close failures are reported; the app is torn down regardless.
    pub async fn exit(&mut self) {
        if self.acquisition.state() == AcquisitionState::Running {
            if let Err(err) = self.acquisition.stop().await {
                self.events.report_error(&err);
            }
        }
        for role in [PortRole::Control, PortRole::Sensor] {
            if let Err(err) = self.line(role).lock().await.close().await {
                self.events.report_error(&err);
            }
        }
        info!("Application exiting");
    }

    /// Carry out one user action. Returns `false` once the app should exit.
    ///
    /// Failures are reported, never returned. Refused transitions only leave a debug
    /// record; the controls already show them as unavailable.
    pub async fn handle(&mut self, action: UserAction) -> bool {
        debug!(?action, "User action");
        let result = match action {
            UserAction::SelectPort { role, port } => self.select_port(role, &port).await,
            UserAction::Start => self.acquisition.start().await,
            UserAction::Stop => self.acquisition.stop().await,
            UserAction::Reset => self.acquisition.reset(),
            UserAction::Save { name } => self.save(name.as_deref()).map(|_| ()),
            UserAction::Motor(axis, action) => self.motors.dispatch(axis, action).await,
            UserAction::Exit => {
                self.exit().await;
                return false;
            }
        };

        match result {
            Ok(()) => {}
            Err(err @ DaqError::TransitionRefused { .. }) => debug!(%err, "Action ignored"),
            Err(err) => self.events.report_error(&err),
        }
        self.refresh_controls().await;
        true
    }

    /// Host event loop. Returns after [`UserAction::Exit`], or once every sender is gone
    /// and no run is active; a run in progress at that point is finished first.
    pub async fn run(&mut self, mut actions: mpsc::Receiver<UserAction>) {
        self.refresh_controls().await;
        loop {
            if self.acquisition.state() == AcquisitionState::Running {
                loop {
                    match actions.try_recv() {
                        Ok(action) => {
                            if !self.handle(action).await {
                                return;
                            }
                        }
                        Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                    }
                }
                self.acquisition.on_tick().await;
                if self.acquisition.state() != AcquisitionState::Running {
                    self.refresh_controls().await;
                }
                tokio::task::yield_now().await;
            } else {
                match actions.recv().await {
                    Some(action) => {
                        if !self.handle(action).await {
                            return;
                        }
                    }
                    None => {
                        self.exit().await;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockHandle, MockLine};

    fn app() -> (KesfApp, MockHandle, MockHandle) {
        let (control, control_handle) = MockLine::closed();
        let (sensor, sensor_handle) = MockLine::closed();
        let app = KesfApp::new(AppConfig::default(), Box::new(control), Box::new(sensor));
        (app, control_handle, sensor_handle)
    }

    #[tokio::test]
    async fn start_enabled_once_both_ports_connect() {
        let (mut app, _control, _sensor) = app();
        assert!(!app.controls().await.start);

        app.select_port(PortRole::Control, "COM3").await.unwrap();
        assert!(!app.controls().await.start);

        app.select_port(PortRole::Sensor, "COM4").await.unwrap();
        assert!(app.controls().await.start);
        assert_eq!(app.port_name(PortRole::Sensor).await.as_deref(), Some("COM4"));
    }

    #[tokio::test]
    async fn failed_open_leaves_port_disconnected() {
        let (mut app, control, _sensor) = app();
        let mut rx = app.events().subscribe();
        control.mark_unavailable("COM9");

        assert!(app.handle(UserAction::SelectPort {
            role: PortRole::Control,
            port: "COM9".into(),
        })
        .await);

        assert!(!control.is_open());
        match rx.try_recv().unwrap() {
            AcquisitionEvent::Status { level, message } => {
                assert_eq!(level, StatusLevel::Error);
                assert!(message.contains("COM9"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reselecting_closes_the_previous_port() {
        let (mut app, control, _sensor) = app();
        app.select_port(PortRole::Control, "COM3").await.unwrap();
        app.select_port(PortRole::Control, "COM5").await.unwrap();

        assert_eq!(control.opens(), 2);
        assert_eq!(control.closes(), 1);
        assert_eq!(app.port_name(PortRole::Control).await.as_deref(), Some("COM5"));
    }

    #[tokio::test]
    async fn start_without_ports_is_reported() {
        let (mut app, _control, _sensor) = app();
        let mut rx = app.events().subscribe();

        app.handle(UserAction::Start).await;

        assert_eq!(app.acquisition().state(), AcquisitionState::Idle);
        assert!(matches!(
            rx.try_recv().unwrap(),
            AcquisitionEvent::Status {
                level: StatusLevel::Error,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn motor_actions_reach_control_board() {
        let (mut app, control, sensor) = app();
        app.select_port(PortRole::Control, "COM3").await.unwrap();

        app.handle(UserAction::Motor(Axis::Two, MotorAction::Start))
            .await;
        app.handle(UserAction::Motor(Axis::Two, MotorAction::Reverse))
            .await;

        assert_eq!(control.written(), b"79");
        assert!(sensor.written().is_empty());
    }

    #[tokio::test]
    async fn exit_closes_both_ports() {
        let (mut app, control, sensor) = app();
        app.select_port(PortRole::Control, "COM3").await.unwrap();
        app.select_port(PortRole::Sensor, "COM4").await.unwrap();
        app.handle(UserAction::Start).await;

        assert!(!app.handle(UserAction::Exit).await);

        assert_eq!(control.written(), b"01");
        assert!(!control.is_open());
        assert!(!sensor.is_open());
    }

    #[tokio::test]
    async fn port_change_refused_while_running() {
        let (mut app, control, _sensor) = app();
        app.select_port(PortRole::Control, "COM3").await.unwrap();
        app.select_port(PortRole::Sensor, "COM4").await.unwrap();
        app.handle(UserAction::Start).await;

        let err = app
            .select_port(PortRole::Control, "COM5")
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::TransitionRefused { .. }));
        assert_eq!(app.port_name(PortRole::Control).await.as_deref(), Some("COM3"));
        assert_eq!(control.opens(), 1);
    }

    #[tokio::test]
    async fn bad_stem_format_is_reported_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.output_dir = dir.path().to_path_buf();
        config.storage.file_stem_format = "%Q-run".into();
        let (control, _control) = MockLine::closed();
        let (sensor, _sensor) = MockLine::closed();
        let mut app = KesfApp::new(config, Box::new(control), Box::new(sensor));
        let mut rx = app.events().subscribe();

        assert!(app.handle(UserAction::Save { name: None }).await);

        assert!(matches!(
            rx.try_recv().unwrap(),
            AcquisitionEvent::Status {
                level: StatusLevel::Error,
                ..
            }
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        app.handle(UserAction::Save {
            name: Some("named".into()),
        })
        .await;
        assert!(dir.path().join("named.csv").exists());
    }
}
