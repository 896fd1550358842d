//! Append-only text streams of per-step results.
//!
//! Each accepted step appends one line per stream. Values are written in scientific
//! notation with 12 fractional digits. Only the root rank writes.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::comm::Communicator;
use crate::error::{Result, SimulationError};
use crate::homogenize::HomogenizedValues;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    /// Directory that receives all streams.
    pub directory: PathBuf,
    pub avg_stress: String,
    pub avg_pl_work: String,
    pub avg_def_grad: String,
    pub avg_dp_tensor: String,
    /// Also report plastic work, deformation gradient and plastic rate averages.
    pub additional_avgs: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            avg_stress: "avg_stress.txt".to_string(),
            avg_pl_work: "avg_pl_work.txt".to_string(),
            avg_def_grad: "avg_def_grad.txt".to_string(),
            avg_dp_tensor: "avg_dp_tensor.txt".to_string(),
            additional_avgs: false,
        }
    }
}

/// Formats values as one line of the output streams.
pub fn format_line(values: &[f64]) -> String {
    let mut line = values
        .iter()
        .map(|v| format!("{:.12e}", v))
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    line
}

fn append_line(path: &Path, values: &[f64]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(format_line(values).as_bytes())?;
    Ok(())
}

/// The output streams of a run.
///
/// Writes happen on the root rank only, but every fallible operation is collective: the
/// outcome on the root is shared with all ranks, so either every rank fails or none does.
#[derive(Clone)]
pub struct OutputStreams {
    options: OutputOptions,
    dt_file: PathBuf,
    comm: Arc<dyn Communicator>,
}

impl fmt::Debug for OutputStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStreams")
            .field("options", &self.options)
            .field("dt_file", &self.dt_file)
            .field("rank", &self.comm.rank())
            .finish()
    }
}

impl OutputStreams {
    pub fn new(options: OutputOptions, dt_file: &str, comm: Arc<dyn Communicator>) -> Result<Self> {
        let streams = Self {
            dt_file: options.directory.join(dt_file),
            options,
            comm,
        };
        streams.on_root(|| Ok(fs::create_dir_all(&streams.options.directory)?))?;
        Ok(streams)
    }

    pub fn options(&self) -> &OutputOptions {
        &self.options
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.options.directory.join(file_name)
    }

    pub fn dt_path(&self) -> &Path {
        &self.dt_file
    }

    pub fn append_dt(&self, dt: f64) -> Result<()> {
        self.on_root(|| append_line(&self.dt_file, &[dt]))
    }

    pub fn append_averages(&self, values: &HomogenizedValues) -> Result<()> {
        self.on_root(|| {
            append_line(&self.path(&self.options.avg_stress), &values.stress)?;
            if let Some(plastic_work) = values.plastic_work {
                append_line(&self.path(&self.options.avg_pl_work), &[plastic_work])?;
            }
            if let Some(def_grad) = &values.def_grad {
                append_line(&self.path(&self.options.avg_def_grad), def_grad)?;
            }
            if let Some(dp_tensor) = &values.dp_tensor {
                append_line(&self.path(&self.options.avg_dp_tensor), dp_tensor)?;
            }
            Ok(())
        })
    }

    /// Runs `write` on the root rank and shares its outcome with every rank.
    fn on_root(&self, write: impl FnOnce() -> Result<()>) -> Result<()> {
        let local = if self.comm.is_root() { write() } else { Ok(()) };
        let success = self.comm.all_reduce_and(local.is_ok());
        match local {
            Err(err) => Err(err),
            Ok(()) if success => Ok(()),
            Ok(()) => Err(SimulationError::CollectiveOutputFailure),
        }
    }
}
