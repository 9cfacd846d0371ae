//! Archive and display buffers.
//!
//! The [`SampleSynchronizer`] keeps two append-only views of a run:
//!
//! - the **archive**: every recorded [`Sample`], at full acquisition rate, which is what
//!   gets saved;
//! - the **display** series: every fifth poll's sample, stored column-wise so a plot can
//!   redraw all five curves against one shared time axis.
//!
//! The display series is a render cache. It is never saved and never read back into the
//! archive.

use crate::error::AppResult;
use crate::sample::{parse_and_scale, Channel, Sample};

/// Display decimation factor: one sample in every `DISPLAY_DECIMATION` polls is plotted.
pub const DISPLAY_DECIMATION: u64 = 5;

/// Column-wise copy of the plotted samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplaySeries {
    /// Shared time axis
    pub t: Vec<f64>,
    /// Force 1
    pub f1: Vec<f64>,
    /// Force 2
    pub f2: Vec<f64>,
    /// Displacement 1
    pub disp1: Vec<f64>,
    /// Displacement 2
    pub disp2: Vec<f64>,
    /// Sensor output
    pub sensor: Vec<f64>,
}

impl DisplaySeries {
    /// Number of plotted points per curve.
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// Whether nothing has been plotted yet.
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    fn push(&mut self, sample: &Sample) {
        self.t.push(sample.t);
        self.f1.push(sample.f1);
        self.f2.push(sample.f2);
        self.disp1.push(sample.disp1);
        self.disp2.push(sample.disp2);
        self.sensor.push(sample.sensor);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    /// `(t, y)` arrays for one curve.
    pub fn curve(&self, channel: Channel) -> (&[f64], &[f64]) {
        let y = match channel {
            Channel::F1 => &self.f1,
            Channel::F2 => &self.f2,
            Channel::Disp1 => &self.disp1,
            Channel::Disp2 => &self.disp2,
            Channel::Sensor => &self.sensor,
        };
        (&self.t, y)
    }

    /// Row `index` reassembled into a sample.
    pub fn sample(&self, index: usize) -> Option<Sample> {
        Some(Sample {
            t: *self.t.get(index)?,
            f1: *self.f1.get(index)?,
            f2: *self.f2.get(index)?,
            disp1: *self.disp1.get(index)?,
            disp2: *self.disp2.get(index)?,
            sensor: *self.sensor.get(index)?,
        })
    }
}

/// Owner of the archive and display buffers of one acquisition.
#[derive(Debug, Default)]
pub struct SampleSynchronizer {
    archive: Vec<Sample>,
    display: DisplaySeries,
}

impl SampleSynchronizer {
    /// Empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw line pair. Delegates to [`parse_and_scale`]; buffers are untouched.
    pub fn parse_and_scale(&self, control_line: &str, sensor_line: &str) -> AppResult<Sample> {
        parse_and_scale(control_line, sensor_line)
    }

    /// Append to the archive.
    pub fn record_sample(&mut self, sample: Sample) {
        self.archive.push(sample);
    }

    /// Append to the display series and return all of it.
    pub fn record_for_display(&mut self, sample: Sample) -> &DisplaySeries {
        self.display.push(&sample);
        &self.display
    }

    /// Empty both buffers.
    pub fn reset(&mut self) {
        self.archive.clear();
        self.display.clear();
    }

    /// Full-rate samples recorded so far.
    pub fn archive(&self) -> &[Sample] {
        &self.archive
    }

    /// Plotted samples so far.
    pub fn display(&self) -> &DisplaySeries {
        &self.display
    }
}
