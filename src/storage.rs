//! CSV archive of an acquisition run.
//!
//! One row per archived [`Sample`], columns `Time,F1,F2,Disp1,Disp2,Sensor`. The header
//! row is written even when the run recorded nothing.

use crate::config::StorageConfig;
use crate::error::{AppResult, DaqError};
use crate::sample::{Channel, Sample};
use chrono::format::{Item, StrftimeItems};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

/// Header of the time column.
pub const TIME_COLUMN: &str = "Time";

/// Column headers in canonical order.
pub fn header() -> Vec<&'static str> {
    std::iter::once(TIME_COLUMN)
        .chain(Channel::ALL.iter().map(|c| c.label()))
        .collect()
}

/// Reject chrono formats with unknown or incomplete specifiers.
pub fn check_file_stem_format(format: &str) -> AppResult<()> {
    if format.trim().is_empty() {
        return Err(DaqError::Config("file_stem_format must not be empty".into()));
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(DaqError::Config(format!("Invalid file_stem_format '{format}'")));
    }
    Ok(())
}

/// Suggested file stem for a run started now, e.g. `2024-0315-1402-project`.
pub fn default_file_stem(format: &str) -> AppResult<String> {
    check_file_stem_format(format)?;
    let mut stem = String::new();
    write!(stem, "{}", chrono::Local::now().format(format)).map_err(|_| {
        DaqError::Config(format!("file_stem_format '{format}' cannot be rendered"))
    })?;
    Ok(stem)
}

/// Writes archives into one output directory.
#[derive(Debug, Clone)]
pub struct CsvArchive {
    output_dir: PathBuf,
    file_stem_format: String,
}

impl CsvArchive {
    /// Archive writer for `output_dir`, suggesting names from the chrono `file_stem_format`.
    pub fn new(output_dir: impl Into<PathBuf>, file_stem_format: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_stem_format: file_stem_format.into(),
        }
    }

    /// Archive writer for the `[storage]` config section.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.output_dir.clone(), config.file_stem_format.clone())
    }

    /// Target directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File stem suggested to the user before saving.
    pub fn default_stem(&self) -> AppResult<String> {
        default_file_stem(&self.file_stem_format)
    }

    /// Where `name` would be saved.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{name}.csv"))
    }

    /// Write `samples` to `<output_dir>/<name>.csv`, replacing any existing file.
    ///
    /// The output directory is created if missing.
    pub fn save(&self, name: &str, samples: &[Sample]) -> AppResult<PathBuf> {
        if !self.output_dir.as_os_str().is_empty() && !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir)?;
        }
        let path = self.path_for(name);
        write_samples(File::create(&path)?, samples)?;
        info!(path = %path.display(), rows = samples.len(), "Archive saved");
        Ok(path)
    }
}

/// Write the header and one row per sample to `sink`.
pub fn write_samples<W: std::io::Write>(sink: W, samples: &[Sample]) -> AppResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(sink);
    writer.write_record(header())?;
    for sample in samples {
        writer.serialize(sample.to_array())?;
    }
    writer.flush()?;
    Ok(())
}
