//! Synchronized samples and raw-line parsing.
//!
//! The two boards each emit one comma-separated record per line:
//!
//! - control board: `disp1,disp2,timestamp_us`
//! - sensor board: `sensor,force1,force2`
//!
//! [`parse_and_scale`] pairs one line of each into a [`Sample`] in the canonical
//! `(t, F1, F2, Disp1, Disp2, Sensor)` order. Force and sensor readings are 12-bit ADC
//! counts and are converted to volts; displacements pass through unchanged.

use crate::error::{AppResult, DaqError};

/// ADC reference voltage.
pub const ADC_REFERENCE_VOLTS: f64 = 3.3;

/// Full-scale count of the 12-bit ADC.
pub const ADC_FULL_SCALE: f64 = 4095.0;

/// Seconds per microsecond.
pub const MICRO: f64 = 1e-6;

/// Fields per raw line.
const FIELDS_PER_LINE: usize = 3;

/// Convert a raw ADC count to volts.
pub fn adc_to_volts(raw: f64) -> f64 {
    raw * ADC_REFERENCE_VOLTS / ADC_FULL_SCALE
}

/// One synchronized measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds; the raw device time until the run origin is subtracted
    pub t: f64,
    /// Force channel 1, volts
    pub f1: f64,
    /// Force channel 2, volts
    pub f2: f64,
    /// Displacement 1, device units
    pub disp1: f64,
    /// Displacement 2, device units
    pub disp2: f64,
    /// Sensor output, volts
    pub sensor: f64,
}

impl Sample {
    /// Values in canonical order `(t, y1, y2, y3, y4, y5)`.
    pub fn to_array(&self) -> [f64; 6] {
        [self.t, self.f1, self.f2, self.disp1, self.disp2, self.sensor]
    }

    /// Value of one display channel.
    pub fn channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::F1 => self.f1,
            Channel::F2 => self.f2,
            Channel::Disp1 => self.disp1,
            Channel::Disp2 => self.disp2,
            Channel::Sensor => self.sensor,
        }
    }

    /// Same sample with time measured from `origin`.
    pub fn relative_to(mut self, origin: f64) -> Self {
        self.t -= origin;
        self
    }
}

/// The five plotted channels, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Force 1 (y1)
    F1,
    /// Force 2 (y2)
    F2,
    /// Displacement 1 (y3)
    Disp1,
    /// Displacement 2 (y4)
    Disp2,
    /// Sensor output (y5)
    Sensor,
}

impl Channel {
    /// All channels in canonical order.
    pub const ALL: [Channel; 5] = [
        Channel::F1,
        Channel::F2,
        Channel::Disp1,
        Channel::Disp2,
        Channel::Sensor,
    ];

    /// Column / legend name.
    pub fn label(self) -> &'static str {
        match self {
            Channel::F1 => "F1",
            Channel::F2 => "F2",
            Channel::Disp1 => "Disp1",
            Channel::Disp2 => "Disp2",
            Channel::Sensor => "Sensor",
        }
    }

    /// Axis title the channel is plotted against.
    pub fn axis_label(self) -> &'static str {
        match self {
            Channel::F1 | Channel::F2 => "Force / N",
            Channel::Disp1 | Channel::Disp2 => "Displacement / mm",
            Channel::Sensor => "Sensor Output / V",
        }
    }
}

/// Axis title of the shared time axis.
pub const TIME_AXIS_LABEL: &str = "Time / s";

fn split_fields(line: &str) -> AppResult<[f64; FIELDS_PER_LINE]> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != FIELDS_PER_LINE {
        return Err(DaqError::malformed(
            line,
            format!("expected {FIELDS_PER_LINE} fields, found {}", parts.len()),
        ));
    }

    let mut values = [0.0; FIELDS_PER_LINE];
    for (slot, part) in values.iter_mut().zip(&parts) {
        let value = part
            .trim()
            .parse::<f64>()
            .map_err(|_| DaqError::malformed(line, format!("{:?} is not a number", part.trim())))?;
        // `parse` accepts "nan" and "inf", which no board sends.
        if !value.is_finite() {
            return Err(DaqError::malformed(
                line,
                format!("{:?} is not a finite number", part.trim()),
            ));
        }
        *slot = value;
    }
    Ok(values)
}

/// Pair a control-board line and a sensor-board line into one [`Sample`].
///
/// Pure: no buffer is touched, so a failure never leaves partial state behind. The
/// returned sample's `t` is the raw device time in seconds.
///
/// # Errors
///
/// [`DaqError::MalformedLine`] if either line is not exactly three numeric fields.
pub fn parse_and_scale(control_line: &str, sensor_line: &str) -> AppResult<Sample> {
    let [disp1, disp2, timestamp_us] = split_fields(control_line)?;
    let [sensor, force1, force2] = split_fields(sensor_line)?;

    Ok(Sample {
        t: timestamp_us * MICRO,
        f1: adc_to_volts(force1),
        f2: adc_to_volts(force2),
        disp1,
        disp2,
        sensor: adc_to_volts(sensor),
    })
}
