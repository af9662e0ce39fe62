//! Sky completeness masks on the HEALPix grid: synthesis from tracer
//! positions, boundary-collar determination, resolution changes and the
//! angular lookups used by buffer placement and volume weighting.

use std::f64::consts::{FRAC_PI_2, PI};
use std::path::Path;

use log::info;

use crate::deser::fits;
use crate::error::PipelineError;

const TWICE_PI: f64 = 2.0 * PI;

/// Default resolution of a mask synthesized from tracer positions.
pub const SYNTH_DEPTH: u8 = 6; // nside 64

/// Working resolution for boundary determination.
const BOUNDARY_DEPTH: u8 = 9; // nside 512

/// Resolution the boundary map is brought to for buffer placement.
const BOUNDARY_OUT_DEPTH: u8 = 7; // nside 128

/// A HEALPix map of completeness values in [0, 1], NESTED ordering.
#[derive(Debug, Clone)]
pub struct SkyMask {
  depth: u8,
  values: Vec<f64>,
}

impl SkyMask {
  pub fn new(depth: u8, values: Vec<f64>) -> Self {
    debug_assert_eq!(values.len() as u64, healpix::n_hash(depth));
    Self { depth, values }
  }

  pub fn zero(depth: u8) -> Self {
    Self {
      depth,
      values: vec![0.0; healpix::n_hash(depth) as usize],
    }
  }

  pub fn depth(&self) -> u8 {
    self.depth
  }

  pub fn nside(&self) -> u32 {
    healpix::nside(self.depth)
  }

  pub fn n_pix(&self) -> usize {
    self.values.len()
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  /// Covered sky fraction: the mean completeness over all pixels.
  pub fn f_sky(&self) -> f64 {
    self.values.iter().sum::<f64>() / self.values.len() as f64
  }

  /// Pixel index under (RA, Dec) in degrees.
  pub fn pix_of(&self, ra_deg: f64, dec_deg: f64) -> usize {
    let lon = ra_deg.to_radians().rem_euclid(TWICE_PI);
    let lat = dec_deg.to_radians().clamp(-FRAC_PI_2, FRAC_PI_2);
    healpix::nested::get(self.depth).hash(lon, lat) as usize
  }

  /// Completeness under (RA, Dec) in degrees.
  pub fn value_at(&self, ra_deg: f64, dec_deg: f64) -> f64 {
    self.values[self.pix_of(ra_deg, dec_deg)]
  }

  /// Centre of a pixel as (RA, Dec) in degrees.
  pub fn pix_center(&self, pix: usize) -> (f64, f64) {
    let (lon, lat) = healpix::nested::get(self.depth).center(pix as u64);
    (lon.to_degrees(), lat.to_degrees())
  }

  /// Indices of pixels with completeness above `limit`.
  pub fn filled_pixels(&self, limit: f64) -> Vec<usize> {
    self
      .values
      .iter()
      .enumerate()
      .filter(|(_, &v)| v > limit)
      .map(|(i, _)| i)
      .collect()
  }

  /// Changes resolution: upgrading replicates parent values into children,
  /// downgrading averages the children of each parent.
  pub fn ud_grade(&self, new_depth: u8) -> SkyMask {
    if new_depth == self.depth {
      return self.clone();
    }
    if new_depth > self.depth {
      let dd = 2 * (new_depth - self.depth) as u32;
      let values = (0..healpix::n_hash(new_depth) as usize)
        .map(|child| self.values[child >> dd])
        .collect();
      SkyMask { depth: new_depth, values }
    } else {
      let dd = 2 * (self.depth - new_depth) as u32;
      let per_parent = 1usize << dd;
      let values = self
        .values
        .chunks(per_parent)
        .map(|children| children.iter().sum::<f64>() / per_parent as f64)
        .collect();
      SkyMask { depth: new_depth, values }
    }
  }

  /// Builds a crude binary mask from tracer sky positions: every pixel
  /// containing at least one tracer is fully complete, the rest empty.
  pub fn synthesize(ra_deg: &[f64], dec_deg: &[f64], depth: u8) -> SkyMask {
    let mut mask = SkyMask::zero(depth);
    for (&ra, &dec) in ra_deg.iter().zip(dec_deg) {
      let pix = mask.pix_of(ra, dec);
      mask.values[pix] = 1.0;
    }
    mask
  }

  /// Finds the collar of pixels outside the mask but within a few pixel
  /// rings of it, at nside 512. The first ring grown out of the mask is
  /// flagged with 2 and erased afterwards, so the returned collar stands
  /// off the mask by one pixel and never overlaps it.
  pub fn find_boundary(&self, completeness_limit: f64) -> SkyMask {
    let mask = self.ud_grade(BOUNDARY_DEPTH);
    let layer = healpix::nested::get(BOUNDARY_DEPTH);
    let nside = mask.nside();
    let mut boundary = SkyMask::zero(BOUNDARY_DEPTH);

    let n_iter = 2 + (nside / 128) as usize;
    for j in 0..n_iter {
      let seeds = if j == 0 {
        mask.filled_pixels(completeness_limit)
      } else {
        boundary.filled_pixels(0.0)
      };
      let flag = if j == 0 { 2.0 } else { 1.0 };
      for seed in seeds {
        for nb in layer.neighbours(seed as u64, false).values_vec() {
          let nb = nb as usize;
          if mask.values[nb] <= completeness_limit && boundary.values[nb] == 0.0 {
            boundary.values[nb] = flag;
          }
        }
      }
    }
    for v in boundary.values.iter_mut() {
      if *v == 2.0 {
        *v = 0.0;
      }
    }
    if nside < 128 {
      boundary = boundary.ud_grade(BOUNDARY_OUT_DEPTH);
    }
    boundary
  }

  pub fn from_fits(path: &Path) -> Result<SkyMask, PipelineError> {
    let (depth, values) = fits::read_map(path)?;
    info!(
      "read mask {} (nside {}, f_sky {:.4})",
      path.display(),
      healpix::nside(depth),
      values.iter().sum::<f64>() / values.len() as f64
    );
    Ok(SkyMask { depth, values })
  }

  pub fn write_fits(&self, path: &Path) -> Result<(), PipelineError> {
    fits::write_map(path, self.depth, &self.values)?;
    Ok(())
  }
}
