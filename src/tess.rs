//! Driver for the external tessellation and watershed programs.
//!
//! The programs themselves (`vozisol`, `vozinit`/generated script,
//! `checkedges`, `jozovtrvol`) are collaborators invoked by path; the
//! trait seam lets tests substitute a fake producing deterministic files.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;

use crate::error::PipelineError;

/// Maximum density value used by the external programs to tag
/// edge-contaminated cells; the volume file stores its reciprocal.
pub const ZOBOV_MAX_DENS: f64 = 0.9e30;

/// Sentinel raw volume of an edge-contaminated Voronoi cell.
pub const EDGE_VOLUME_SENTINEL: f64 = 1.0 / ZOBOV_MAX_DENS;

/// Which structure class the watershed program is asked to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
  Void,
  Cluster,
}

impl StructureKind {
  /// Mode letter understood by the watershed program.
  pub fn mode_flag(self) -> &'static str {
    match self {
      StructureKind::Void => "v",
      StructureKind::Cluster => "c",
    }
  }

  /// Suffix distinguishing cluster-side raw files from void-side ones.
  pub fn file_suffix(self) -> &'static str {
    match self {
      StructureKind::Void => "",
      StructureKind::Cluster => "_c",
    }
  }

  /// Exponent of R_eff in the shape parameter λ.
  pub fn lambda_exponent(self) -> f64 {
    match self {
      StructureKind::Void => 1.2,
      StructureKind::Cluster => 1.6,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      StructureKind::Void => "voids",
      StructureKind::Cluster => "clusters",
    }
  }
}

/// Everything an external run needs to know about the sample.
#[derive(Debug, Clone)]
pub struct TessContext {
  /// Directory the programs run in and write their outputs to.
  pub work_dir: PathBuf,
  /// Binary tracer position file.
  pub posn_file: PathBuf,
  /// File-name stem of all raw outputs.
  pub handle: String,
  pub box_length: f64,
  pub n_tracers: usize,
  /// Per-run log receiving the subprocess stdout/stderr.
  pub log_file: PathBuf,
}

impl TessContext {
  /// Path of a raw output `<handle><ext>` inside the working directory.
  pub fn raw_path(&self, ext: &str) -> PathBuf {
    self.work_dir.join(format!("{}{}", self.handle, ext))
  }
}

/// The external tessellation engine, as seen by the pipeline.
pub trait Tessellator {
  /// Single-shot tessellation of the whole (non-periodic) sample,
  /// producing `<handle>.vol` with edge cells already tagged.
  fn run_isolated(&self, ctx: &TessContext) -> Result<(), PipelineError>;

  /// Sub-box tessellation of a periodic sample: emits and runs the
  /// generated driver script, producing `<handle>.vol`.
  fn run_divided(&self, ctx: &TessContext, box_div: u32, buffer_frac: f64) -> Result<(), PipelineError>;

  /// Rewrites `<handle>.vol` tagging cells adjacent to buffer particles
  /// with the edge sentinel.
  fn check_edges(&self, ctx: &TessContext) -> Result<(), PipelineError>;

  /// Produces the full merged zone hierarchy for one structure class:
  /// `<handle><suffix>.{txt,void,zone}` plus the adjacency file.
  fn run_watershed(&self, ctx: &TessContext, kind: StructureKind) -> Result<(), PipelineError>;
}

/// Invokes the real ZOBOV binaries found under `bin_dir`.
#[derive(Debug, Clone)]
pub struct ExternalTessellator {
  pub bin_dir: PathBuf,
}

impl ExternalTessellator {
  pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
    Self { bin_dir: bin_dir.into() }
  }

  fn run_logged(&self, ctx: &TessContext, program: &Path, args: &[String]) -> Result<(), PipelineError> {
    let log = OpenOptions::new().create(true).append(true).open(&ctx.log_file)?;
    let status = Command::new(program)
      .args(args)
      .current_dir(&ctx.work_dir)
      .stdout(log.try_clone()?)
      .stderr(log)
      .status()?;
    if !status.success() {
      return Err(PipelineError::SubprocessFailed {
        program: program.display().to_string(),
        status: status.to_string(),
      });
    }
    Ok(())
  }

  fn run_tool(&self, ctx: &TessContext, name: &str, args: &[String]) -> Result<(), PipelineError> {
    self.run_logged(ctx, &self.bin_dir.join(name), args)
  }
}

impl Tessellator for ExternalTessellator {
  fn run_isolated(&self, ctx: &TessContext) -> Result<(), PipelineError> {
    info!("calling vozisol to do the tessellation");
    self.run_tool(
      ctx,
      "vozisol",
      &[
        ctx.posn_file.display().to_string(),
        ctx.handle.clone(),
        format!("{}", ctx.box_length),
        format!("{}", ctx.n_tracers),
        format!("{:e}", ZOBOV_MAX_DENS),
      ],
    )?;
    expect_output(ctx, ".vol")
  }

  fn run_divided(&self, ctx: &TessContext, box_div: u32, buffer_frac: f64) -> Result<(), PipelineError> {
    info!("calling vozinit, voz1b1 and voztie to do the tessellation");
    self.run_tool(
      ctx,
      "vozinit",
      &[
        ctx.posn_file.display().to_string(),
        format!("{}", buffer_frac),
        format!("{}", ctx.box_length),
        format!("{}", box_div),
        ctx.handle.clone(),
      ],
    )?;
    // vozinit leaves a driver script in the working directory
    let script = ctx.work_dir.join(format!("scr{}", ctx.handle));
    self.run_logged(ctx, &script, &[])?;
    expect_output(ctx, ".vol")?;
    if script.exists() {
      fs::remove_file(&script)?;
    }
    Ok(())
  }

  fn check_edges(&self, ctx: &TessContext) -> Result<(), PipelineError> {
    self.run_tool(
      ctx,
      "checkedges",
      &[
        ctx.handle.clone(),
        format!("{}", ctx.n_tracers),
        format!("{:e}", ZOBOV_MAX_DENS),
      ],
    )?;
    expect_output(ctx, ".vol")
  }

  fn run_watershed(&self, ctx: &TessContext, kind: StructureKind) -> Result<(), PipelineError> {
    // zero thresholds: the full merged hierarchy is produced and all
    // thresholding is left to the post-processor
    self.run_tool(
      ctx,
      "jozovtrvol",
      &[
        kind.mode_flag().to_string(),
        ctx.handle.clone(),
        "0".to_string(),
        "0".to_string(),
      ],
    )?;
    expect_output(ctx, &format!("{}.void", kind.file_suffix()))
  }
}

/// Fails with `TessellationFailed` when the expected raw output is absent.
pub fn expect_output(ctx: &TessContext, ext: &str) -> Result<(), PipelineError> {
  let path = ctx.raw_path(ext);
  if path.exists() {
    Ok(())
  } else {
    Err(PipelineError::TessellationFailed(path))
  }
}

/// Copies `<handle>.vol` to `<handle>.trvol`, preserving the raw volumes
/// before edge tagging and reweighting overwrite them.
pub fn snapshot_raw_volumes(ctx: &TessContext) -> Result<(), PipelineError> {
  fs::copy(ctx.raw_path(".vol"), ctx.raw_path(".trvol"))?;
  Ok(())
}

/// Extensions of the raw outputs the external programs leave behind.
const RAW_EXTENSIONS: [&str; 6] = [".vol", ".trvol", ".adj", ".zone", ".txt", ".void"];

/// Removes the per-subbox scratch files and moves the raw outputs of both
/// structure classes into `raw_dir`, leaving the working directory clean.
pub fn stage_raw_outputs(ctx: &TessContext, raw_dir: &Path) -> Result<(), PipelineError> {
  fs::create_dir_all(raw_dir)?;
  let scratch_prefix = format!("part.{}.", ctx.handle);
  for entry in fs::read_dir(&ctx.work_dir)? {
    let entry = entry?;
    if !entry.file_type()?.is_file() {
      continue;
    }
    let name = entry.file_name().to_string_lossy().into_owned();
    if name.starts_with(&scratch_prefix) {
      fs::remove_file(entry.path())?;
      continue;
    }
    let is_raw = [StructureKind::Void, StructureKind::Cluster].iter().any(|kind| {
      RAW_EXTENSIONS
        .iter()
        .any(|ext| name == format!("{}{}{}", ctx.handle, kind.file_suffix(), ext))
    });
    if is_raw {
      fs::rename(entry.path(), raw_dir.join(&name))?;
    }
  }
  Ok(())
}

/// A log file for one run, created under `<work_dir>/log/`.
pub fn run_log_path(work_dir: &Path, handle: &str) -> Result<PathBuf, PipelineError> {
  let log_dir = work_dir.join("log");
  fs::create_dir_all(&log_dir)?;
  Ok(log_dir.join(format!("{}-zobov.out", handle)))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ctx_in(dir: &Path) -> TessContext {
    TessContext {
      work_dir: dir.to_path_buf(),
      posn_file: dir.join("t_pos.dat"),
      handle: "t".to_string(),
      box_length: 100.0,
      n_tracers: 10,
      log_file: dir.join("log.out"),
    }
  }

  #[test]
  fn staging_moves_outputs_and_drops_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ctx_in(dir.path());
    for name in [
      "t.vol", "t.adj", "t.zone", "t_c.vol", "part.t.00", "part.t.01", "other.txt", "t_pos.dat",
    ] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    let raw_dir = dir.path().join("rawZOBOV");
    stage_raw_outputs(&ctx, &raw_dir).unwrap();
    assert!(raw_dir.join("t.vol").exists());
    assert!(raw_dir.join("t.adj").exists());
    assert!(raw_dir.join("t.zone").exists());
    assert!(raw_dir.join("t_c.vol").exists());
    assert!(!dir.path().join("t.vol").exists());
    assert!(!dir.path().join("part.t.00").exists());
    // unrelated files and the pipeline's own inputs stay put
    assert!(dir.path().join("other.txt").exists());
    assert!(dir.path().join("t_pos.dat").exists());
  }

  #[test]
  fn missing_output_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ctx_in(dir.path());
    assert!(matches!(
      expect_output(&ctx, ".vol"),
      Err(PipelineError::TessellationFailed(_))
    ));
    std::fs::write(ctx.raw_path(".vol"), b"x").unwrap();
    assert!(expect_output(&ctx, ".vol").is_ok());
  }

  #[test]
  fn external_subprocess_appends_to_log() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ctx_in(dir.path());
    let tess = ExternalTessellator::new("/bin");
    // use a harmless real program twice to check append semantics
    tess.run_logged(&ctx, Path::new("/bin/echo"), &["first".to_string()]).unwrap();
    tess.run_logged(&ctx, Path::new("/bin/echo"), &["second".to_string()]).unwrap();
    let log = std::fs::read_to_string(&ctx.log_file).unwrap();
    assert!(log.contains("first") && log.contains("second"));
  }
}
