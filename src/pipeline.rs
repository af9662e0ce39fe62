//! End-to-end orchestration: input conditioning, buffer synthesis, the
//! external tessellation run, volume reweighting, watershed pruning and
//! centre extraction, stage by stage with all hand-offs through files.
//!
//! Configuration is immutable once the pipeline is constructed; everything
//! the stages derive lives in the mutable [`SampleState`], the slice of
//! which needed to resume post-processing is persisted to
//! `sample_info.txt`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::buffers::{generate_buffers, BufferParams};
use crate::centres::{self, CentreContext, SurveyGeometry};
use crate::cosmo::Cosmology;
use crate::deser::fits;
use crate::error::PipelineError;
use crate::mask::{SkyMask, SYNTH_DEPTH};
use crate::reweight::reweight_survey_volumes;
use crate::selection::{SelectionFunction, DEFAULT_N_BINS};
use crate::tess::{self, StructureKind, TessContext, Tessellator};
use crate::tracers::{load_binary_columns, load_text_columns, TracerTable};
use crate::watershed::{self, Thresholds, WatershedFiles};

/// How the tracer sample is bounded.
#[derive(Debug, Clone)]
pub enum SampleMode {
  /// Periodic cubic simulation box of the given side.
  Box { box_length: f64 },
  /// Sky survey over an angular mask and a redshift range.
  Survey {
    omega_m: f64,
    z_min: f64,
    z_max: f64,
    /// HEALPix mask file; a missing one is synthesized from the tracers.
    mask_file: Option<PathBuf>,
    /// Correct cell volumes for the radial selection function.
    use_z_weights: bool,
    /// Correct cell volumes for angular completeness.
    use_ang_weights: bool,
    /// Input catalogue is a FITS BINTABLE with RA, DEC, Z columns.
    fits_input: bool,
  },
}

/// How the external tessellation is invoked.
#[derive(Debug, Clone, Copy)]
pub enum TessMode {
  /// One isolated run over the whole sample (the survey default).
  Isolated,
  /// Sub-box decomposition of a periodic box.
  Divided { box_div: u32, buffer_frac: f64 },
}

/// Immutable run configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct Config {
  pub tracer_file: PathBuf,
  /// Input columns holding (x, y, z), or (RA, Dec, z) in survey mode.
  pub posn_cols: [usize; 3],
  /// Stem of every file this run produces.
  pub handle: String,
  pub output_folder: PathBuf,
  pub mode: SampleMode,
  pub tess_mode: TessMode,
  /// Previously generated buffer file to reuse instead of resynthesis.
  pub buffer_file: Option<PathBuf>,
  pub buffer: BufferParams,
  /// Seed for buffer synthesis; a fresh one is drawn when absent.
  pub seed: Option<u64>,
  pub selection_n_bins: usize,
  pub min_dens_cut: f64,
  pub void_min_num: u64,
  pub use_barycentres: bool,
  pub void_prefix: String,
  pub find_clusters: bool,
  pub max_dens_cut: f64,
  pub cluster_min_num: u64,
  pub cluster_prefix: String,
}

impl Config {
  /// A box-mode configuration with the usual defaults.
  pub fn for_box(tracer_file: impl Into<PathBuf>, handle: impl Into<String>, output_folder: impl Into<PathBuf>, box_length: f64) -> Self {
    Self {
      tracer_file: tracer_file.into(),
      posn_cols: [0, 1, 2],
      handle: handle.into(),
      output_folder: output_folder.into(),
      mode: SampleMode::Box { box_length },
      tess_mode: TessMode::Divided { box_div: 2, buffer_frac: 0.1 },
      buffer_file: None,
      buffer: BufferParams::default(),
      seed: None,
      selection_n_bins: DEFAULT_N_BINS,
      min_dens_cut: 1.0,
      void_min_num: 1,
      use_barycentres: true,
      void_prefix: "Voids".into(),
      find_clusters: false,
      max_dens_cut: 1.0,
      cluster_min_num: 1,
      cluster_prefix: "Clusters".into(),
    }
  }

  /// A survey-mode configuration with the usual defaults.
  pub fn for_survey(tracer_file: impl Into<PathBuf>, handle: impl Into<String>, output_folder: impl Into<PathBuf>, z_min: f64, z_max: f64) -> Self {
    Self {
      mode: SampleMode::Survey {
        omega_m: 0.308,
        z_min,
        z_max,
        mask_file: None,
        use_z_weights: true,
        use_ang_weights: true,
        fits_input: false,
      },
      tess_mode: TessMode::Isolated,
      ..Self::for_box(tracer_file, handle, output_folder, 0.0)
    }
  }

  fn is_box(&self) -> bool {
    matches!(self.mode, SampleMode::Box { .. })
  }
}

/// Mutable per-run state derived from the inputs.
#[derive(Debug, Default)]
pub struct SampleState {
  /// The tracer table, evictable between stages.
  pub tracers: Option<TracerTable>,
  pub n_tracers: usize,
  pub n_mocks: usize,
  pub n_total: usize,
  pub n_non_edge: usize,
  pub box_length: f64,
  pub tracer_dens: f64,
  pub f_sky: f64,
  pub mask: Option<SkyMask>,
  pub cosmo: Option<Cosmology>,
}

pub struct Pipeline {
  cfg: Config,
  state: SampleState,
}

impl Pipeline {
  /// Loads and conditions the tracer sample, derives the mask and the
  /// selection function, and synthesizes buffers: everything up to the
  /// point where the tessellation inputs can be written.
  pub fn new(cfg: Config) -> Result<Self, PipelineError> {
    info!("==== starting the void-finding ====");
    if !cfg.tracer_file.exists() {
      return Err(PipelineError::MissingTracerFile(cfg.tracer_file.clone()));
    }
    fs::create_dir_all(&cfg.output_folder)?;
    let mut pipeline = Self { cfg, state: SampleState::default() };
    match pipeline.cfg.mode.clone() {
      SampleMode::Box { box_length } => pipeline.prepare_box(box_length)?,
      SampleMode::Survey {
        omega_m,
        z_min,
        z_max,
        ref mask_file,
        use_z_weights,
        ..
      } => pipeline.prepare_survey(omega_m, z_min, z_max, mask_file.as_deref(), use_z_weights)?,
    }
    Ok(pipeline)
  }

  /// Text catalogues by default; the pipeline's own binary column layout
  /// for `.dat`/`.bin` inputs.
  fn load_rows(&self) -> Result<Vec<[f64; 3]>, PipelineError> {
    let binary = matches!(
      self.cfg.tracer_file.extension().and_then(|e| e.to_str()),
      Some("dat") | Some("bin")
    );
    if binary {
      load_binary_columns(&self.cfg.tracer_file)
    } else {
      load_text_columns(&self.cfg.tracer_file, self.cfg.posn_cols)
    }
  }

  fn prepare_box(&mut self, box_length: f64) -> Result<(), PipelineError> {
    if box_length <= 0.0 {
      return Err(PipelineError::BadBoxLength(box_length));
    }
    info!("loading tracer positions from {}", self.cfg.tracer_file.display());
    let rows = self.load_rows()?;
    let mut table = TracerTable::from_positions(&rows);
    table.wrap_periodic(box_length);
    let n = table.len();
    self.state = SampleState {
      n_tracers: n,
      n_mocks: 0,
      n_total: n,
      n_non_edge: n,
      box_length,
      tracer_dens: n as f64 / box_length.powi(3),
      f_sky: 1.0,
      tracers: Some(table),
      mask: None,
      cosmo: None,
    };
    Ok(())
  }

  fn prepare_survey(
    &mut self,
    omega_m: f64,
    z_min: f64,
    z_max: f64,
    mask_file: Option<&Path>,
    use_z_weights: bool,
  ) -> Result<(), PipelineError> {
    let cosmo = Cosmology::new(omega_m);
    info!("loading tracer positions from {}", self.cfg.tracer_file.display());
    let fits_input = matches!(self.cfg.mode, SampleMode::Survey { fits_input: true, .. });
    let rows = if fits_input {
      fits::read_survey_catalogue(&self.cfg.tracer_file)?
    } else {
      self.load_rows()?
    };
    let mut table = TracerTable::from_sky(&rows, &cosmo);

    let dropped = table.cut_redshift_range(z_min, z_max);
    if dropped > 0 {
      info!("cut {} galaxies outside the redshift limits", dropped);
    }

    // mask: load when available, otherwise synthesize from the tracers
    let mask = match mask_file {
      Some(path) if path.exists() => {
        let mask = SkyMask::from_fits(path)?;
        table.cut_masked(&mask);
        mask
      }
      _ => {
        warn!("sky mask not provided or not found, generating approximate one");
        let mask = SkyMask::synthesize(&table.ra, &table.dec, SYNTH_DEPTH);
        mask.write_fits(&self.mask_path())?;
        mask
      }
    };
    let f_sky = mask.f_sky();

    table.dedupe_exact();
    let n_tracers = table.len();
    info!("kept {} tracers after all cuts", n_tracers);

    let r_near = cosmo.comoving_distance(z_min);
    let r_far = cosmo.comoving_distance(z_max);
    let survey_volume = f_sky * 4.0 * std::f64::consts::PI * (r_far.powi(3) - r_near.powi(3)) / 3.0;
    let tracer_dens = n_tracers as f64 / survey_volume;

    if use_z_weights {
      let selfn = SelectionFunction::measure(
        &table.redshift,
        &cosmo,
        z_min,
        z_max,
        f_sky,
        tracer_dens,
        self.cfg.selection_n_bins,
      );
      selfn.write(&self.selfn_path())?;
    }

    // buffers: reuse a previous set when offered, else synthesize
    let buffers = match &self.cfg.buffer_file {
      Some(path) if path.exists() => {
        info!("loading pre-computed buffer mocks from {}", path.display());
        TracerTable::read_binary_any(path, true)?
      }
      other => {
        if other.is_some() {
          warn!("could not find the buffer mock file, regenerating");
        }
        let mut rng = match self.cfg.seed {
          Some(seed) => StdRng::seed_from_u64(seed),
          None => StdRng::from_os_rng(),
        };
        let outcome = generate_buffers(
          &table,
          &mask,
          &cosmo,
          z_min,
          z_max,
          f_sky,
          tracer_dens,
          &self.cfg.buffer,
          &mut rng,
        );
        outcome.buffers.write_binary(&self.mocks_path())?;
        info!("buffer mocks written to {}", self.mocks_path().display());
        outcome.buffers
      }
    };
    // the enclosing cube is fixed by the farthest point of the sample
    let max_abs = table
      .x
      .iter()
      .chain(&table.y)
      .chain(&table.z)
      .chain(&buffers.x)
      .chain(&buffers.y)
      .chain(&buffers.z)
      .fold(0.0f64, |acc, &v| acc.max(v.abs()));
    let box_length = 2.0 * max_abs + 1.0;

    let n_mocks = buffers.len();
    table.append(&buffers);
    // observer to box coordinates for the tessellation
    table.shift_positions(0.5 * box_length);

    self.state = SampleState {
      n_tracers,
      n_mocks,
      n_total: n_tracers + n_mocks,
      n_non_edge: n_tracers,
      box_length,
      tracer_dens,
      f_sky,
      tracers: Some(table),
      mask: Some(mask),
      cosmo: Some(cosmo),
    };
    Ok(())
  }

  /// Restores a pipeline for post-processing only, from the sample-info
  /// file of an earlier run.
  pub fn resume(cfg: Config) -> Result<Self, PipelineError> {
    let mut pipeline = Self { cfg, state: SampleState::default() };
    pipeline.read_sample_info()?;
    if let SampleMode::Survey { omega_m, ref mask_file, .. } = pipeline.cfg.mode {
      pipeline.state.cosmo = Some(Cosmology::new(omega_m));
      let mask_path = match mask_file {
        Some(path) if path.exists() => path.clone(),
        _ => pipeline.mask_path(),
      };
      pipeline.state.mask = Some(SkyMask::from_fits(&mask_path)?);
      pipeline.state.f_sky = pipeline.state.mask.as_ref().unwrap().f_sky();
    }
    Ok(pipeline)
  }

  pub fn state(&self) -> &SampleState {
    &self.state
  }

  pub fn posn_path(&self) -> PathBuf {
    self.cfg.output_folder.join(format!("{}_pos.dat", self.cfg.handle))
  }

  pub fn mocks_path(&self) -> PathBuf {
    self.cfg.output_folder.join(format!("{}_mocks.dat", self.cfg.handle))
  }

  pub fn mask_path(&self) -> PathBuf {
    self.cfg.output_folder.join(format!("{}_mask.fits", self.cfg.handle))
  }

  pub fn selfn_path(&self) -> PathBuf {
    self.cfg.output_folder.join(format!("{}_selFn.txt", self.cfg.handle))
  }

  pub fn sample_info_path(&self) -> PathBuf {
    self.cfg.output_folder.join("sample_info.txt")
  }

  pub fn raw_dir(&self) -> PathBuf {
    self.cfg.output_folder.join("rawZOBOV")
  }

  /// Writes the binary tessellation input and the sample-info file.
  pub fn write_tessellation_inputs(&self) -> Result<(), PipelineError> {
    let table = self.state.tracers.as_ref().expect("tracer table not loaded");
    table.write_binary(&self.posn_path())?;
    self.write_sample_info()?;
    Ok(())
  }

  fn write_sample_info(&self) -> Result<(), PipelineError> {
    let s = &self.state;
    let info = format!(
      "handle = {}\nis_box = {}\nnum_tracers = {}\nnum_mocks = {}\nnum_non_edge = {}\nbox_length = {}\ntracer_dens = {:e}\n",
      self.cfg.handle, self.cfg.is_box(), s.n_tracers, s.n_mocks, s.n_non_edge, s.box_length, s.tracer_dens
    );
    fs::write(self.sample_info_path(), info)?;
    Ok(())
  }

  fn read_sample_info(&mut self) -> Result<(), PipelineError> {
    let path = self.sample_info_path();
    let content = fs::read_to_string(&path)?;
    let mut keys = BTreeMap::new();
    for line in content.lines() {
      if let Some((key, value)) = line.split_once('=') {
        keys.insert(key.trim().to_string(), value.trim().to_string());
      }
    }
    let lookup = |key: &'static str| -> Result<String, PipelineError> {
      keys
        .get(key)
        .cloned()
        .ok_or(PipelineError::MissingSampleKey { path: path.clone(), key })
    };
    let parse = |key: &'static str, raw: String| -> Result<f64, PipelineError> {
      raw
        .parse()
        .map_err(|_| PipelineError::malformed("sample info", &path, format!("bad value for {}", key)))
    };
    self.state.n_tracers = parse("num_tracers", lookup("num_tracers")?)? as usize;
    self.state.n_mocks = parse("num_mocks", lookup("num_mocks")?)? as usize;
    self.state.n_non_edge = parse("num_non_edge", lookup("num_non_edge")?)? as usize;
    self.state.box_length = parse("box_length", lookup("box_length")?)?;
    self.state.tracer_dens = parse("tracer_dens", lookup("tracer_dens")?)?;
    self.state.n_total = self.state.n_tracers + self.state.n_mocks;
    Ok(())
  }

  /// Evicts the tracer table from memory; the binary position file keeps
  /// a re-readable copy.
  pub fn delete_tracer_info(&mut self) {
    self.state.tracers = None;
  }

  /// Re-reads the tracer table written by [`write_tessellation_inputs`].
  pub fn reread_tracer_info(&mut self) -> Result<(), PipelineError> {
    let table = TracerTable::read_binary(&self.posn_path(), self.state.n_total, !self.cfg.is_box())?;
    self.state.tracers = Some(table);
    Ok(())
  }

  fn ensure_tracers(&mut self) -> Result<(), PipelineError> {
    let loaded = self.state.tracers.as_ref().map(|t| t.len()).unwrap_or(0);
    if loaded != self.state.n_total {
      self.reread_tracer_info()?;
    }
    Ok(())
  }

  fn tess_context(&self) -> Result<TessContext, PipelineError> {
    Ok(TessContext {
      work_dir: self.cfg.output_folder.clone(),
      posn_file: self.posn_path(),
      handle: self.cfg.handle.clone(),
      box_length: self.state.box_length,
      n_tracers: self.state.n_tracers,
      log_file: tess::run_log_path(&self.cfg.output_folder, &self.cfg.handle)?,
    })
  }

  /// Runs the external tessellation, rescales the volumes (survey mode),
  /// produces the full merged hierarchy for each requested structure
  /// class and stages all raw outputs under `rawZOBOV/`.
  pub fn run_tessellation(&mut self, tess: &dyn Tessellator) -> Result<(), PipelineError> {
    let ctx = self.tess_context()?;
    // free the table around the heavy external step
    self.delete_tracer_info();
    match self.cfg.tess_mode {
      TessMode::Isolated => tess.run_isolated(&ctx)?,
      TessMode::Divided { box_div, buffer_frac } => {
        tess.run_divided(&ctx, box_div, buffer_frac)?;
        tess::snapshot_raw_volumes(&ctx)?;
        if self.state.n_mocks > 0 {
          tess.check_edges(&ctx)?;
        }
      }
    }
    info!("tessellation done");

    let cluster_vol = ctx.raw_path(&format!("{}.vol", StructureKind::Cluster.file_suffix()));
    if self.cfg.is_box() {
      if self.cfg.find_clusters {
        fs::copy(ctx.raw_path(".vol"), &cluster_vol)?;
      }
    } else {
      self.ensure_tracers()?;
      let table = self.state.tracers.as_ref().expect("tracer table not loaded");
      let (use_z_weights, use_ang_weights) = match self.cfg.mode {
        SampleMode::Survey { use_z_weights, use_ang_weights, .. } => (use_z_weights, use_ang_weights),
        SampleMode::Box { .. } => unreachable!(),
      };
      let selfn;
      let z_weights = if use_z_weights {
        selfn = SelectionFunction::read(&self.selfn_path())?;
        Some((&selfn, &table.redshift[..self.state.n_tracers]))
      } else {
        None
      };
      let ang_weights = if use_ang_weights {
        let mask = self.state.mask.as_ref().expect("mask not loaded");
        Some((mask, &table.ra[..self.state.n_tracers], &table.dec[..self.state.n_tracers]))
      } else {
        None
      };
      let n_non_edge = reweight_survey_volumes(
        &ctx.raw_path(".vol"),
        self.state.n_tracers,
        self.state.n_total,
        self.state.tracer_dens,
        self.state.box_length,
        z_weights,
        ang_weights,
        self.cfg.find_clusters.then_some(cluster_vol.as_path()),
      )?;
      self.state.n_non_edge = n_non_edge;
    }

    tess.run_watershed(&ctx, StructureKind::Void)?;
    if self.cfg.find_clusters {
      tess.run_watershed(&ctx, StructureKind::Cluster)?;
    }

    tess::stage_raw_outputs(&ctx, &self.raw_dir())?;
    self.write_sample_info()?;
    Ok(())
  }

  fn watershed_files(&self, prefix: &str) -> WatershedFiles {
    WatershedFiles {
      raw_dir: self.raw_dir(),
      handle: self.cfg.handle.clone(),
      out_dir: self.cfg.output_folder.clone(),
      prefix: prefix.to_string(),
    }
  }

  fn centre_context<'a>(&'a self, table: &'a TracerTable) -> CentreContext<'a> {
    let survey = match &self.cfg.mode {
      SampleMode::Box { .. } => None,
      SampleMode::Survey { z_min, z_max, .. } => Some(SurveyGeometry {
        cosmo: self.state.cosmo.as_ref().expect("cosmology not initialized"),
        z_min: *z_min,
        z_max: *z_max,
        mask: self.state.mask.as_ref().expect("mask not loaded"),
      }),
    };
    CentreContext {
      tracers: table,
      n_tracers: self.state.n_tracers,
      n_total: self.state.n_total,
      box_length: self.state.box_length,
      handle: &self.cfg.handle,
      survey,
    }
  }

  /// Prunes the void hierarchy, extracts circumcentres (and barycentres
  /// when enabled) and writes the void catalogue files.
  pub fn postprocess_voids(&mut self) -> Result<(), PipelineError> {
    self.ensure_tracers()?;
    let files = self.watershed_files(&self.cfg.void_prefix);
    let outcome = watershed::postprocess(
      StructureKind::Void,
      &files,
      Thresholds {
        core_dens_cut: self.cfg.min_dens_cut,
        min_num_parts: self.cfg.void_min_num,
      },
      self.state.n_tracers,
      self.state.n_total,
      self.state.n_non_edge,
      self.state.box_length,
    )?;
    let table = self.state.tracers.as_ref().expect("tracer table not loaded");
    let ctx = self.centre_context(table);
    let mut edge_flags = outcome.edge_flags;
    centres::find_void_circumcentres(&ctx, &files, &outcome.wtd_avg_dens, &mut edge_flags)?;
    if self.cfg.use_barycentres {
      centres::find_void_barycentres(&ctx, &files, &mut edge_flags)?;
    }
    Ok(())
  }

  /// Prunes the cluster hierarchy and writes the cluster catalogue.
  pub fn postprocess_clusters(&mut self) -> Result<(), PipelineError> {
    self.ensure_tracers()?;
    let files = self.watershed_files(&self.cfg.cluster_prefix);
    let outcome = watershed::postprocess(
      StructureKind::Cluster,
      &files,
      Thresholds {
        core_dens_cut: self.cfg.max_dens_cut,
        min_num_parts: self.cfg.cluster_min_num,
      },
      self.state.n_tracers,
      self.state.n_total,
      self.state.n_non_edge,
      self.state.box_length,
    )?;
    let table = self.state.tracers.as_ref().expect("tracer table not loaded");
    let ctx = self.centre_context(table);
    centres::write_cluster_catalogue(&ctx, &files, &outcome.edge_flags)?;
    Ok(())
  }

  /// The whole pipeline in order: inputs, tessellation, post-processing.
  pub fn run(&mut self, tess: &dyn Tessellator) -> Result<(), PipelineError> {
    self.write_tessellation_inputs()?;
    self.run_tessellation(tess)?;
    self.postprocess_voids()?;
    if self.cfg.find_clusters {
      self.postprocess_clusters()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_tracer_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::for_box(dir.path().join("nope.txt"), "t", dir.path(), 100.0);
    assert!(matches!(Pipeline::new(cfg), Err(PipelineError::MissingTracerFile(_))));
  }

  #[test]
  fn bad_box_length_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let tracer_file = dir.path().join("cat.txt");
    std::fs::write(&tracer_file, "1 1 1\n2 2 2\n").unwrap();
    let cfg = Config::for_box(&tracer_file, "t", dir.path(), 0.0);
    assert!(matches!(Pipeline::new(cfg), Err(PipelineError::BadBoxLength(_))));
  }

  #[test]
  fn box_preparation_wraps_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    let tracer_file = dir.path().join("cat.txt");
    std::fs::write(&tracer_file, "1 1 1\n-2 6 3\n4 4 11\n").unwrap();
    let cfg = Config::for_box(&tracer_file, "t", dir.path().join("out"), 10.0);
    let pipeline = Pipeline::new(cfg).unwrap();
    let s = pipeline.state();
    assert_eq!(s.n_tracers, 3);
    assert_eq!(s.n_total, 3);
    assert_eq!(s.tracer_dens, 3.0 / 1000.0);
    let table = s.tracers.as_ref().unwrap();
    assert_eq!(table.position(1), [8.0, 6.0, 3.0]);
    assert_eq!(table.position(2), [4.0, 4.0, 1.0]);
  }

  #[test]
  fn sample_info_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let tracer_file = dir.path().join("cat.txt");
    std::fs::write(&tracer_file, "1 1 1\n2 2 2\n").unwrap();
    let out = dir.path().join("out");
    let cfg = Config::for_box(&tracer_file, "t", &out, 50.0);
    let pipeline = Pipeline::new(cfg.clone()).unwrap();
    pipeline.write_tessellation_inputs().unwrap();

    let resumed = Pipeline::resume(cfg).unwrap();
    assert_eq!(resumed.state().n_tracers, 2);
    assert_eq!(resumed.state().n_mocks, 0);
    assert_eq!(resumed.state().box_length, 50.0);
    assert!((resumed.state().tracer_dens - 2.0 / 50.0f64.powi(3)).abs() < 1e-18);
  }

  #[test]
  fn evict_and_reread_restores_table() {
    let dir = tempfile::tempdir().unwrap();
    let tracer_file = dir.path().join("cat.txt");
    std::fs::write(&tracer_file, "1 1 1\n2 2 2\n").unwrap();
    let cfg = Config::for_box(&tracer_file, "t", dir.path().join("out"), 50.0);
    let mut pipeline = Pipeline::new(cfg).unwrap();
    pipeline.write_tessellation_inputs().unwrap();
    let before = pipeline.state().tracers.as_ref().unwrap().clone();
    pipeline.delete_tracer_info();
    assert!(pipeline.state().tracers.is_none());
    pipeline.reread_tracer_info().unwrap();
    let after = pipeline.state().tracers.as_ref().unwrap();
    assert_eq!(after.x, before.x);
    assert_eq!(after.z, before.z);
  }
}
