//! Synthesis of the buffer particles that close off the survey volume
//! before tessellation: high- and low-redshift caps, a collar along the
//! angular mask boundary, and a sparse guard grid filling the remainder of
//! the enclosing cube.
//!
//! Buffer angular positions are sampled at HEALPix pixel centres rather
//! than uniformly within pixels; buffers are geometric scaffolding, so
//! speed wins over uniformity here.

use kiddo::distance::squared_euclidean;
use kiddo::KdTree;
use log::info;
use rand::seq::index::sample;
use rand::Rng;
use rayon::prelude::*;

use crate::cosmo::Cosmology;
use crate::mask::SkyMask;
use crate::sky;
use crate::tracers::{TracerTable, BUFFER_REDSHIFT, GUARD_ANGLE};

/// Number of grid points per axis of the guard lattice.
const GUARD_GRID: usize = 20;

/// Inset of the guard lattice from the cube faces.
const GUARD_INSET: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct BufferParams {
  /// Buffer number density as a multiple of the tracer density (η ≥ 1).
  pub mock_dens_ratio: f64,
  /// Multiplier on the nominal guard drop threshold (L − 0.2)/20, exposed
  /// for sensitivity tests.
  pub guard_spacing: f64,
}

impl Default for BufferParams {
  fn default() -> Self {
    Self {
      mock_dens_ratio: 10.0,
      guard_spacing: 1.0,
    }
  }
}

#[derive(Debug)]
pub struct BufferOutcome {
  /// The synthesized buffer particles, in observer coordinates.
  pub buffers: TracerTable,
  /// Radius of the innermost cap buffer.
  pub r_near: f64,
  /// Radius of the outermost cap buffer.
  pub r_far: f64,
  /// Side of the minimal cube enclosing tracers and buffers.
  pub box_length: f64,
}

/// Draws `count` points in the radial shell [r_lo, r_hi) with angular
/// positions at the centres of distinct filled pixels of `map`. The map is
/// upgraded in place until it offers enough pixels. Returns the (min, max)
/// radius placed, or `None` when `count` is zero.
fn place_shell(
  map: &mut SkyMask,
  limit: f64,
  count: usize,
  r_lo: f64,
  r_hi: f64,
  rng: &mut impl Rng,
  out: &mut TracerTable,
) -> Option<(f64, f64)> {
  if count == 0 {
    return None;
  }
  let mut filled = map.filled_pixels(limit);
  while count > filled.len() {
    *map = map.ud_grade(map.depth() + 1);
    filled = map.filled_pixels(limit);
  }
  let mut r_min = f64::INFINITY;
  let mut r_max = f64::NEG_INFINITY;
  for idx in sample(rng, filled.len(), count).iter() {
    let u: f64 = rng.random();
    let r = (r_lo.powi(3) + u * (r_hi.powi(3) - r_lo.powi(3))).cbrt();
    r_min = r_min.min(r);
    r_max = r_max.max(r);
    let (ra, dec) = map.pix_center(filled[idx]);
    let pos = sky::equatorial_to_cartesian(ra, dec, r);
    out.push_sky_row(pos, ra, dec, BUFFER_REDSHIFT);
  }
  Some((r_min, r_max))
}

/// Generates all buffer classes around a survey sample.
///
/// `r_near`/`r_far` start as the comoving distances to the redshift limits
/// and are widened to the innermost/outermost cap radius actually placed.
#[allow(clippy::too_many_arguments)]
pub fn generate_buffers(
  tracers: &TracerTable,
  mask: &SkyMask,
  cosmo: &Cosmology,
  z_min: f64,
  z_max: f64,
  f_sky: f64,
  tracer_dens: f64,
  params: &BufferParams,
  rng: &mut impl Rng,
) -> BufferOutcome {
  info!(
    "generating buffer mocks around survey edges at {:.1}x the galaxy number density",
    params.mock_dens_ratio
  );
  let buffer_dens = params.mock_dens_ratio * tracer_dens;
  let mean_spacing = tracer_dens.powf(-1.0 / 3.0);
  let mut buffers = TracerTable::with_capacity(0, true);
  let mut r_near = cosmo.comoving_distance(z_min);
  let mut r_far = cosmo.comoving_distance(z_max);

  // working copy shared by both caps; upgrades persist between them
  let mut cap_mask = mask.clone();

  // high-redshift cap
  let z_high = tracers
    .redshift
    .iter()
    .fold(z_max, |acc, &z| acc.max(z));
  let r_lo = cosmo.comoving_distance(z_high) + mean_spacing * params.mock_dens_ratio.powf(-1.0 / 3.0);
  let r_hi = r_lo + mean_spacing;
  let cap_volume = f_sky * 4.0 * std::f64::consts::PI * (r_hi.powi(3) - r_lo.powi(3)) / 3.0;
  let n_high = (buffer_dens * cap_volume).ceil() as usize;
  if let Some((_, max_r)) = place_shell(&mut cap_mask, 0.0, n_high, r_lo, r_hi, rng, &mut buffers) {
    r_far = max_r;
  }
  info!("placed {} buffer mocks at high-redshift cap", n_high);

  // low-redshift cap, only when the sample does not reach the observer
  let z_low = tracers.redshift.iter().fold(z_min, |acc, &z| acc.min(z));
  if z_low > 0.0 {
    let mut r_hi = cosmo.comoving_distance(z_low) - mean_spacing * params.mock_dens_ratio.powf(-1.0 / 3.0);
    let mut r_lo = r_hi - mean_spacing;
    if r_hi < 0.0 {
      r_hi = cosmo.comoving_distance(z_low);
    }
    if r_lo < 0.0 {
      r_lo = 0.0;
    }
    let cap_volume = f_sky * 4.0 * std::f64::consts::PI * (r_hi.powi(3) - r_lo.powi(3)) / 3.0;
    let n_low = (buffer_dens * cap_volume).ceil() as usize;
    if let Some((min_r, _)) = place_shell(&mut cap_mask, 0.0, n_low, r_lo, r_hi, rng, &mut buffers) {
      r_near = min_r;
    }
    info!("placed {} buffer mocks at low-redshift cap", n_low);
  } else {
    info!("no buffer mocks required at low-redshift cap");
  }

  // collar along the angular mask boundary
  if f_sky < 1.0 {
    let mut boundary = mask.find_boundary(0.0);
    let f_sky_bound = boundary.filled_pixels(0.0).len() as f64 / boundary.n_pix() as f64;
    let boundary_volume =
      f_sky_bound * 4.0 * std::f64::consts::PI * (r_far.powi(3) - r_near.powi(3)) / 3.0;
    let n_bound = (buffer_dens * boundary_volume).ceil() as usize;
    place_shell(&mut boundary, 0.0, n_bound, r_near, r_far, rng, &mut buffers);
    info!("placed {} buffer mocks along the survey boundary edges", n_bound);
  } else {
    info!("data covers the full sky, no boundary buffer mocks required");
  }

  // minimal cube enclosing everything placed so far
  let max_abs = tracers
    .x
    .iter()
    .chain(&tracers.y)
    .chain(&tracers.z)
    .chain(&buffers.x)
    .chain(&buffers.y)
    .chain(&buffers.z)
    .fold(0.0f64, |acc, &v| acc.max(v.abs()));
  let box_length = 2.0 * max_abs + 1.0;
  info!("using box length {:.2}", box_length);

  // guard lattice over the rest of the cube
  let n_guards = add_guards(tracers, &mut buffers, box_length, params.guard_spacing);
  info!("added {} guards to stabilize the tessellation", n_guards);

  BufferOutcome {
    buffers,
    r_near,
    r_far,
    box_length,
  }
}

/// Nearest-neighbour distance under periodic wrap, as the minimum over the
/// 27 shifted images of the query point.
fn periodic_nn_distance(tree: &KdTree<f64, 3>, query: [f64; 3], period: f64) -> f64 {
  let mut best = f64::INFINITY;
  for ix in -1i8..=1 {
    for iy in -1i8..=1 {
      for iz in -1i8..=1 {
        let shifted = [
          query[0] + ix as f64 * period,
          query[1] + iy as f64 * period,
          query[2] + iz as f64 * period,
        ];
        let (d2, _) = tree.nearest_one(&shifted, &squared_euclidean);
        best = best.min(d2);
      }
    }
  }
  best.sqrt()
}

/// Lays a regular lattice of guard candidates over the cube and keeps
/// those farther from every existing point than the drop threshold.
/// Returns the number of guards appended.
fn add_guards(
  tracers: &TracerTable,
  buffers: &mut TracerTable,
  box_length: f64,
  guard_spacing: f64,
) -> usize {
  // all existing points, shifted from observer into box coordinates
  let half = 0.5 * box_length;
  let entries: Vec<[f64; 3]> = (0..tracers.len())
    .map(|i| tracers.position(i))
    .chain((0..buffers.len()).map(|i| buffers.position(i)))
    .map(|p| [p[0] + half, p[1] + half, p[2] + half])
    .collect();
  let tree: KdTree<f64, 3> = (&entries).into();

  let step = (box_length - 2.0 * GUARD_INSET) / (GUARD_GRID - 1) as f64;
  let threshold = guard_spacing * (box_length - 2.0 * GUARD_INSET) / GUARD_GRID as f64;
  let mut candidates = Vec::with_capacity(GUARD_GRID * GUARD_GRID * GUARD_GRID);
  for ix in 0..GUARD_GRID {
    for iy in 0..GUARD_GRID {
      for iz in 0..GUARD_GRID {
        candidates.push([
          GUARD_INSET + ix as f64 * step,
          GUARD_INSET + iy as f64 * step,
          GUARD_INSET + iz as f64 * step,
        ]);
      }
    }
  }
  let kept: Vec<[f64; 3]> = candidates
    .par_iter()
    .filter(|&&c| periodic_nn_distance(&tree, c, box_length) > threshold)
    .copied()
    .collect();
  for c in &kept {
    // back into observer coordinates
    buffers.push_sky_row(
      [c[0] - half, c[1] - half, c[2] - half],
      GUARD_ANGLE,
      GUARD_ANGLE,
      BUFFER_REDSHIFT,
    );
  }
  kept.len()
}

#[cfg(test)]
mod tests {
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  use super::*;
  use crate::tracers::TracerTable;

  fn full_sky_mask() -> SkyMask {
    SkyMask::new(4, vec![1.0; 12 * 16 * 16])
  }

  fn uniformish_sample(cosmo: &Cosmology, z_min: f64, z_max: f64, n: usize) -> TracerTable {
    // deterministic pseudo-uniform sky sample between the redshift limits
    let mut rows = Vec::with_capacity(n);
    let mut state = 0x9e3779b97f4a7c15u64;
    let mut next = move || {
      state ^= state << 13;
      state ^= state >> 7;
      state ^= state << 17;
      (state >> 11) as f64 / (1u64 << 53) as f64
    };
    for _ in 0..n {
      let ra = 360.0 * next();
      let dec = (1.0 - 2.0 * next()).asin().to_degrees();
      let z = z_min + (z_max - z_min) * next();
      rows.push([ra, dec, z]);
    }
    TracerTable::from_sky(&rows, cosmo)
  }

  #[test]
  fn high_cap_count_matches_target_density() {
    let cosmo = Cosmology::new(0.308);
    let (z_min, z_max) = (0.2, 0.3);
    let tracers = uniformish_sample(&cosmo, z_min, z_max, 2000);
    let r_near = cosmo.comoving_distance(z_min);
    let r_far = cosmo.comoving_distance(z_max);
    let volume = 4.0 * std::f64::consts::PI * (r_far.powi(3) - r_near.powi(3)) / 3.0;
    let tracer_dens = tracers.len() as f64 / volume;
    let params = BufferParams::default();
    let mut rng = StdRng::seed_from_u64(7);
    let out = generate_buffers(
      &tracers,
      &full_sky_mask(),
      &cosmo,
      z_min,
      z_max,
      1.0,
      tracer_dens,
      &params,
      &mut rng,
    );

    // expected high-cap count
    let spacing = tracer_dens.powf(-1.0 / 3.0);
    let r_lo = r_far + spacing * 10.0f64.powf(-1.0 / 3.0);
    let r_hi = r_lo + spacing;
    let cap_vol = 4.0 * std::f64::consts::PI * (r_hi.powi(3) - r_lo.powi(3)) / 3.0;
    let expected = (10.0 * tracer_dens * cap_vol).ceil() as usize;
    // full sky: no boundary buffers, so cap + low cap + guards
    assert!(out.buffers.len() >= expected);
    assert!(out.r_far >= r_far && out.r_far <= r_hi);
    assert!(out.r_near <= r_near);

    // enclosing cube: within one unit of twice the farthest coordinate
    let max_abs = out
      .buffers
      .x
      .iter()
      .chain(&out.buffers.y)
      .chain(&out.buffers.z)
      .fold(0.0f64, |acc, &v| acc.max(v.abs()));
    assert!(out.box_length >= 2.0 * max_abs);
    assert!(out.box_length <= 2.0 * max_abs + 1.0 + 1e-9);

    // every buffer carries the sentinel redshift
    assert!(out.buffers.redshift.iter().all(|&z| z == BUFFER_REDSHIFT));
  }

  #[test]
  fn guards_avoid_occupied_regions() {
    let mut buffers = TracerTable::with_capacity(0, true);
    // one existing point at the observer (box centre after the shift)
    let tracers = TracerTable::from_positions(&[[0.0, 0.0, 0.0]]);
    let n = add_guards(&tracers, &mut buffers, 20.0, 1.0);
    assert_eq!(n, buffers.len());
    assert!(n > 0);
    let threshold = (20.0 - 0.2) / 20.0;
    for i in 0..buffers.len() {
      let p = buffers.position(i);
      let d = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
      assert!(d > threshold, "guard at distance {} from existing point", d);
      assert_eq!(buffers.ra[i], GUARD_ANGLE);
    }
  }
}
