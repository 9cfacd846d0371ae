//! Control board wire protocol.
//!
//! Every command is a single ASCII digit written to the control board's serial line:
//!
//! | Byte | Command |
//! |------|---------|
//! | `0`  | start streaming data lines |
//! | `1`  | stop streaming data lines |
//! | `3` / `4` / `5` | motor 1 start / stop / reverse |
//! | `7` / `8` / `9` | motor 2 start / stop / reverse |
//!
//! `2` and `6` are reserved by the firmware and never sent.

use std::fmt;

/// One motor axis of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Motor 1
    One,
    /// Motor 2
    Two,
}

impl Axis {
    /// Both axes, in wire order.
    pub const ALL: [Axis; 2] = [Axis::One, Axis::Two];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::One => write!(f, "motor 1"),
            Axis::Two => write!(f, "motor 2"),
        }
    }
}

/// What to do with a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorAction {
    /// Start driving in the current direction
    Start,
    /// Stop driving
    Stop,
    /// Flip the drive direction
    Reverse,
}

/// A command understood by the control board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Begin streaming data lines
    PlotStart,
    /// Stop streaming data lines
    PlotStop,
    /// Drive one axis
    Motor(Axis, MotorAction),
}

impl Command {
    /// Wire byte for this command.
    pub const fn code(self) -> u8 {
        match self {
            Command::PlotStart => b'0',
            Command::PlotStop => b'1',
            Command::Motor(Axis::One, MotorAction::Start) => b'3',
            Command::Motor(Axis::One, MotorAction::Stop) => b'4',
            Command::Motor(Axis::One, MotorAction::Reverse) => b'5',
            Command::Motor(Axis::Two, MotorAction::Start) => b'7',
            Command::Motor(Axis::Two, MotorAction::Stop) => b'8',
            Command::Motor(Axis::Two, MotorAction::Reverse) => b'9',
        }
    }

    /// Inverse of [`Command::code`]; reserved and unknown bytes map to `None`.
    pub const fn from_code(code: u8) -> Option<Self> {
        let command = match code {
            b'0' => Command::PlotStart,
            b'1' => Command::PlotStop,
            b'3' => Command::Motor(Axis::One, MotorAction::Start),
            b'4' => Command::Motor(Axis::One, MotorAction::Stop),
            b'5' => Command::Motor(Axis::One, MotorAction::Reverse),
            b'7' => Command::Motor(Axis::Two, MotorAction::Start),
            b'8' => Command::Motor(Axis::Two, MotorAction::Stop),
            b'9' => Command::Motor(Axis::Two, MotorAction::Reverse),
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::PlotStart => write!(f, "plot start"),
            Command::PlotStop => write!(f, "plot stop"),
            Command::Motor(axis, MotorAction::Start) => write!(f, "{axis} start"),
            Command::Motor(axis, MotorAction::Stop) => write!(f, "{axis} stop"),
            Command::Motor(axis, MotorAction::Reverse) => write!(f, "{axis} reverse"),
        }
    }
}
