use std::error::Error;
use std::path::PathBuf;

use clap::Parser;

use zobov::buffers::BufferParams;
use zobov::pipeline::{Config, Pipeline, SampleMode, TessMode};
use zobov::selection::DEFAULT_N_BINS;
use zobov::tess::ExternalTessellator;

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None, allow_negative_numbers = true)]
/// Find cosmic voids (and superclusters) in a tracer catalogue with the
/// ZOBOV watershed algorithm.
enum Args {
  #[clap(name = "run")]
  /// Run the full pipeline: conditioning, tessellation, post-processing
  Run(Run),
  #[clap(name = "postprocess")]
  /// Re-run only the post-processing of an earlier tessellation
  Postprocess(Postprocess),
}

#[derive(Debug, Parser)]
struct SampleArgs {
  #[clap(value_name = "FILE")]
  /// Input tracer catalogue (text, optionally gzipped, or FITS)
  tracer_file: PathBuf,
  #[clap(short = 'H', long = "handle", default_value = "sample")]
  /// Stem used for all files this run produces
  handle: String,
  #[clap(short = 'o', long = "output", default_value = ".")]
  /// Output directory
  output: PathBuf,
  #[clap(long = "box-length")]
  /// Side of the periodic simulation box (box mode); omit for survey mode
  box_length: Option<f64>,
  #[clap(long = "posn-cols", value_delimiter = ',', num_args = 3, default_values_t = [0usize, 1, 2])]
  /// The three input columns holding x,y,z (or RA,Dec,z)
  posn_cols: Vec<usize>,
  #[clap(long = "omega-m", default_value = "0.308")]
  /// Matter density parameter of the flat background cosmology
  omega_m: f64,
  #[clap(long = "z-min", default_value = "0.43")]
  /// Lower redshift limit of the survey sample
  z_min: f64,
  #[clap(long = "z-max", default_value = "0.7")]
  /// Upper redshift limit of the survey sample
  z_max: f64,
  #[clap(short = 'm', long = "mask", value_name = "FILE")]
  /// HEALPix FITS completeness mask; synthesized from tracers if absent
  mask: Option<PathBuf>,
  #[clap(long = "fits-input")]
  /// Read the catalogue as a FITS BINTABLE with RA, DEC, Z columns
  fits_input: bool,
  #[clap(long = "no-z-weights")]
  /// Disable the radial selection-function volume correction
  no_z_weights: bool,
  #[clap(long = "no-ang-weights")]
  /// Disable the angular completeness volume correction
  no_ang_weights: bool,
  #[clap(long = "min-dens-cut", default_value = "1.0")]
  /// Upper bound on a void's core density in mean-density units
  min_dens_cut: f64,
  #[clap(long = "void-min-num", default_value = "1")]
  /// Minimum particle count of a void's seed zone
  void_min_num: u64,
  #[clap(long = "void-prefix", default_value = "Voids")]
  /// Name prefix of the void output files
  void_prefix: String,
  #[clap(long = "no-barycentres")]
  /// Skip the volume-weighted barycentre catalogue
  no_barycentres: bool,
  #[clap(short = 'c', long = "clusters")]
  /// Also find superclusters
  clusters: bool,
  #[clap(long = "max-dens-cut", default_value = "1.0")]
  /// Lower bound on a cluster's core density in mean-density units
  max_dens_cut: f64,
  #[clap(long = "cluster-min-num", default_value = "1")]
  /// Minimum particle count of a cluster's seed zone
  cluster_min_num: u64,
  #[clap(long = "cluster-prefix", default_value = "Clusters")]
  /// Name prefix of the cluster output files
  cluster_prefix: String,
}

impl SampleArgs {
  fn into_config(self) -> Config {
    let mode = match self.box_length {
      Some(box_length) => SampleMode::Box { box_length },
      None => SampleMode::Survey {
        omega_m: self.omega_m,
        z_min: self.z_min,
        z_max: self.z_max,
        mask_file: self.mask.clone(),
        use_z_weights: !self.no_z_weights,
        use_ang_weights: !self.no_ang_weights,
        fits_input: self.fits_input,
      },
    };
    let tess_mode = match mode {
      SampleMode::Box { .. } => TessMode::Divided { box_div: 2, buffer_frac: 0.1 },
      SampleMode::Survey { .. } => TessMode::Isolated,
    };
    Config {
      tracer_file: self.tracer_file,
      posn_cols: [self.posn_cols[0], self.posn_cols[1], self.posn_cols[2]],
      handle: self.handle,
      output_folder: self.output,
      mode,
      tess_mode,
      buffer_file: None,
      buffer: BufferParams::default(),
      seed: None,
      selection_n_bins: DEFAULT_N_BINS,
      min_dens_cut: self.min_dens_cut,
      void_min_num: self.void_min_num,
      use_barycentres: !self.no_barycentres,
      void_prefix: self.void_prefix,
      find_clusters: self.clusters,
      max_dens_cut: self.max_dens_cut,
      cluster_min_num: self.cluster_min_num,
      cluster_prefix: self.cluster_prefix,
    }
  }
}

#[derive(Debug, Parser)]
struct Run {
  #[clap(flatten)]
  sample: SampleArgs,
  #[clap(short = 'b', long = "bin-dir", default_value = "./bin")]
  /// Directory holding the external tessellation binaries
  bin_dir: PathBuf,
  #[clap(long = "box-div", default_value = "2")]
  /// Number of sub-box divisions per axis (box mode)
  box_div: u32,
  #[clap(long = "buffer-frac", default_value = "0.1")]
  /// Fraction of the box length used as sub-box buffer (box mode)
  buffer_frac: f64,
  #[clap(long = "mock-dens-ratio", default_value = "10.0")]
  /// Buffer mock density as a multiple of the tracer density
  mock_dens_ratio: f64,
  #[clap(long = "guard-spacing", default_value = "1.0")]
  /// Multiplier on the nominal guard drop threshold
  guard_spacing: f64,
  #[clap(long = "mock-file", value_name = "FILE")]
  /// Reuse previously generated buffer mocks from this file
  mock_file: Option<PathBuf>,
  #[clap(long = "seed")]
  /// Seed for the buffer synthesis random draws
  seed: Option<u64>,
}

impl Run {
  fn exec(self) -> Result<(), Box<dyn Error>> {
    let mut cfg = self.sample.into_config();
    if let SampleMode::Box { .. } = cfg.mode {
      cfg.tess_mode = TessMode::Divided { box_div: self.box_div, buffer_frac: self.buffer_frac };
    }
    cfg.buffer = BufferParams {
      mock_dens_ratio: self.mock_dens_ratio,
      guard_spacing: self.guard_spacing,
    };
    cfg.buffer_file = self.mock_file;
    cfg.seed = self.seed;
    let tess = ExternalTessellator::new(self.bin_dir);
    let mut pipeline = Pipeline::new(cfg)?;
    pipeline.run(&tess)?;
    Ok(())
  }
}

#[derive(Debug, Parser)]
struct Postprocess {
  #[clap(flatten)]
  sample: SampleArgs,
}

impl Postprocess {
  fn exec(self) -> Result<(), Box<dyn Error>> {
    let find_clusters = self.sample.clusters;
    let cfg = self.sample.into_config();
    let mut pipeline = Pipeline::resume(cfg)?;
    pipeline.postprocess_voids()?;
    if find_clusters {
      pipeline.postprocess_clusters()?;
    }
    Ok(())
  }
}

fn main() -> Result<(), Box<dyn Error>> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();
  match args {
    Args::Run(run) => run.exec(),
    Args::Postprocess(post) => post.exec(),
  }
}
