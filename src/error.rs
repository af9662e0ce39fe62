use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::deser::fits::FitsError;

/// Errors raised by the void-finding pipeline.
///
/// Fatal conditions surface as `Err` and terminate the run; recoverable
/// conditions (dropped galaxies, regenerated masks or buffers) are logged
/// and never reach this type.
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("can't find tracer file {0}")]
  MissingTracerFile(PathBuf),
  #[error("not enough columns in {path}: need 3D position information, found {found}")]
  NotEnoughColumns { path: PathBuf, found: usize },
  #[error("zero or negative box length: {0}")]
  BadBoxLength(f64),
  #[error("expected tessellation output {0} is missing")]
  TessellationFailed(PathBuf),
  #[error("tessellation subprocess '{program}' exited with {status}")]
  SubprocessFailed { program: String, status: String },
  #[error("count {found} in {path} does not match expected {expected}")]
  CountMismatch {
    path: PathBuf,
    found: usize,
    expected: usize,
  },
  #[error("unequal structure counts in hierarchy and list files: {hierarchy} and {list}")]
  UnequalStructureCounts { hierarchy: usize, list: usize },
  #[error("{stage} produced zero-volume Voronoi cells")]
  ZeroVolumeCell { stage: &'static str },
  #[error("malformed {kind} file {path}: {msg}")]
  Malformed {
    kind: &'static str,
    path: PathBuf,
    msg: String,
  },
  #[error("sample info file {path} is missing key '{key}'")]
  MissingSampleKey { path: PathBuf, key: &'static str },
  #[error(transparent)]
  Fits(#[from] FitsError),
  #[error(transparent)]
  Io(#[from] io::Error),
}

impl PipelineError {
  pub(crate) fn malformed(kind: &'static str, path: &std::path::Path, msg: impl Into<String>) -> Self {
    Self::Malformed {
      kind,
      path: path.to_path_buf(),
      msg: msg.into(),
    }
  }
}
