//! # KES-F DAQ Core Library
//!
//! Acquisition core of the KES-F rig: two serial boards stream partial records, this
//! crate pairs them into synchronized five-channel samples, keeps a full-rate archive
//! and a decimated display series, and drives the rig's two motors.
//!
//! ## Crate Structure
//!
//! - **`transport`**: the `LineTransport` contract, the serial implementation and port
//!   enumeration; `transport::mock` holds in-memory boards for tests and simulation.
//! - **`protocol`**: single-byte commands understood by the control board.
//! - **`sample`**: the `Sample` type and `parse_and_scale`.
//! - **`synchronizer`**: archive and display buffers.
//! - **`acquisition`**: the run state machine and poll tick.
//! - **`motor`**: motor command dispatch.
//! - **`events`**: the event bus and display sink seam towards a front end.
//! - **`storage`**: CSV archive output.
//! - **`app`**: `KesfApp`, which maps user actions onto the above.
//! - **`config`**, **`telemetry`**, **`error`**: ambient configuration, logging and the
//!   `DaqError` type.

pub mod acquisition;
pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod motor;
pub mod protocol;
pub mod sample;
pub mod storage;
pub mod synchronizer;
pub mod telemetry;
pub mod transport;
