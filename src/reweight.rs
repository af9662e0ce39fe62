//! Rescaling of the raw Voronoi cell volumes of a survey sample: removal
//! of the buffer-particle contribution, then optional corrections for the
//! radial selection function and the angular completeness.
//!
//! Volumes come out in units of the mean volume per tracer, so that a
//! uniform sample has V = 1 everywhere.

use std::path::Path;

use log::info;
use rayon::prelude::*;

use crate::deser::vol::{read_volumes, write_volumes};
use crate::error::PipelineError;
use crate::mask::SkyMask;
use crate::numeric::{savgol_filter, LinearInterp};
use crate::selection::SelectionFunction;
use crate::tess::{EDGE_VOLUME_SENTINEL, ZOBOV_MAX_DENS};

/// Number of points the selection function is resampled on before
/// smoothing; window and order are part of the smoothing contract.
const RESAMPLE_POINTS: usize = 1000;
const SAVGOL_WINDOW: usize = 101;
const SAVGOL_ORDER: usize = 3;

/// Smooths the measured selection function and returns f(z) as a
/// piecewise-linear interpolation, ready to weight cell volumes.
pub fn smoothed_selection(selfn: &SelectionFunction, z_lo: f64, z_hi: f64) -> LinearInterp {
  let raw = LinearInterp::new(selfn.z_mean.clone(), selfn.f_z.clone());
  let step = (z_hi - z_lo) / (RESAMPLE_POINTS - 1) as f64;
  let xs: Vec<f64> = (0..RESAMPLE_POINTS).map(|i| z_lo + i as f64 * step).collect();
  let ys: Vec<f64> = xs.iter().map(|&z| raw.eval(z)).collect();
  let smoothed = savgol_filter(&ys, SAVGOL_WINDOW, SAVGOL_ORDER);
  LinearInterp::new(xs, smoothed)
}

/// Rescales `<handle>.vol` in place and writes the cluster sibling when
/// requested. Returns the number of non-edge tracers.
#[allow(clippy::too_many_arguments)]
pub fn reweight_survey_volumes(
  vol_path: &Path,
  n_tracers: usize,
  n_total: usize,
  tracer_dens: f64,
  box_length: f64,
  z_weights: Option<(&SelectionFunction, &[f64])>,
  ang_weights: Option<(&SkyMask, &[f64], &[f64])>,
  cluster_vol_path: Option<&Path>,
) -> Result<usize, PipelineError> {
  let mut vols = read_volumes(vol_path, Some(n_tracers))?;
  let edge: Vec<bool> = vols.iter().map(|&v| v == EDGE_VOLUME_SENTINEL).collect();

  // remove the buffer contribution: the mean non-edge cell volume becomes
  // one over the tracer density
  let scale = tracer_dens * box_length.powi(3) / n_total as f64;
  vols.par_iter_mut().zip(&edge).for_each(|(v, &is_edge)| {
    if !is_edge {
      *v *= scale;
    }
  });
  check_nonzero(&vols, &edge, "volume rescaling")?;

  if let Some((selfn, redshifts)) = z_weights {
    let z_lo = redshifts.iter().cloned().fold(f64::INFINITY, f64::min);
    let z_hi = redshifts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let f_of_z = smoothed_selection(selfn, z_lo, z_hi);
    vols.par_iter_mut().zip(redshifts).zip(&edge).for_each(|((v, &z), &is_edge)| {
      if !is_edge {
        *v *= f_of_z.eval(z);
      }
    });
    check_nonzero(&vols, &edge, "z-weighting")?;
  }

  if let Some((mask, ra, dec)) = ang_weights {
    vols.par_iter_mut().enumerate().for_each(|(i, v)| {
      if !edge[i] {
        *v *= mask.value_at(ra[i], dec[i]);
      }
    });
    check_nonzero(&vols, &edge, "angular weighting")?;
  }

  write_volumes(vol_path, &vols)?;

  if let Some(cluster_path) = cluster_vol_path {
    // the cluster finder expects edge cells tagged with the maximum
    // density itself, not its reciprocal
    let mut cvols = vols.clone();
    for (v, &is_edge) in cvols.iter_mut().zip(&edge) {
      if is_edge {
        *v = ZOBOV_MAX_DENS;
      }
    }
    write_volumes(cluster_path, &cvols)?;
  }

  let n_edge = edge.iter().filter(|&&e| e).count();
  info!("{} of {} tracers have edge-contaminated cells", n_edge, n_tracers);
  Ok(n_tracers - n_edge)
}

fn check_nonzero(vols: &[f64], edge: &[bool], stage: &'static str) -> Result<(), PipelineError> {
  if vols.iter().zip(edge).any(|(&v, &is_edge)| !is_edge && v == 0.0) {
    Err(PipelineError::ZeroVolumeCell { stage })
  } else {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::deser::vol;

  #[test]
  fn rescaling_restores_mean_density() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.vol");
    // raw volumes in units of the box mean volume: uniform cells plus one
    // edge-contaminated sentinel
    let raw = vec![1.0, 1.0, EDGE_VOLUME_SENTINEL, 1.0];
    vol::write_volumes(&path, &raw).unwrap();
    let (n_total, box_length) = (8usize, 100.0f64);
    let tracer_dens = 4.0 / box_length.powi(3);
    let n_non_edge =
      reweight_survey_volumes(&path, 4, n_total, tracer_dens, box_length, None, None, None).unwrap();
    assert_eq!(n_non_edge, 3);
    let vols = vol::read_volumes(&path, Some(4)).unwrap();
    // non-edge cells scale by tracer_dens * L^3 / n_total = 0.5
    assert_eq!(vols[0], 0.5);
    assert_eq!(vols[1], 0.5);
    assert_eq!(vols[3], 0.5);
    // sentinel untouched
    assert_eq!(vols[2], EDGE_VOLUME_SENTINEL);
    // sum over non-edge cells equals n_non_edge / n_total of the box in
    // mean-volume-per-tracer units
    let total: f64 = vols.iter().zip([false, false, true, false]).filter(|(_, e)| !e).map(|(v, _)| v).sum();
    assert!((total / tracer_dens - box_length.powi(3) * 3.0 / n_total as f64).abs() / total < 1e-12);
  }

  #[test]
  fn zero_volume_after_rescaling_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.vol");
    vol::write_volumes(&path, &[1.0, 0.0]).unwrap();
    let err = reweight_survey_volumes(&path, 2, 4, 1e-6, 100.0, None, None, None);
    assert!(matches!(err, Err(PipelineError::ZeroVolumeCell { .. })));
  }

  #[test]
  fn constant_selection_function_scales_uniformly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.vol");
    vol::write_volumes(&path, &[1.0, 2.0]).unwrap();
    let selfn = SelectionFunction {
      z_mean: vec![0.1, 0.2, 0.3],
      n_z: vec![1.0, 1.0, 1.0],
      f_z: vec![0.5, 0.5, 0.5],
    };
    let redshifts = vec![0.15, 0.25];
    let (n_total, box_length) = (4usize, 10.0f64);
    let tracer_dens = 2.0 / box_length.powi(3);
    reweight_survey_volumes(
      &path,
      2,
      n_total,
      tracer_dens,
      box_length,
      Some((&selfn, &redshifts)),
      None,
      None,
    )
    .unwrap();
    let vols = vol::read_volumes(&path, None).unwrap();
    let scale = tracer_dens * box_length.powi(3) / n_total as f64;
    assert!((vols[0] - 1.0 * scale * 0.5).abs() < 1e-9);
    assert!((vols[1] - 2.0 * scale * 0.5).abs() < 1e-9);
  }

  #[test]
  fn cluster_sibling_flips_edge_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.vol");
    let cpath = dir.path().join("t_c.vol");
    vol::write_volumes(&path, &[1.0, EDGE_VOLUME_SENTINEL]).unwrap();
    reweight_survey_volumes(&path, 2, 4, 2e-3, 10.0, None, None, Some(&cpath)).unwrap();
    let cvols = vol::read_volumes(&cpath, Some(2)).unwrap();
    assert_eq!(cvols[1], ZOBOV_MAX_DENS);
    assert!(cvols[0] > 0.0 && cvols[0] < 1e29);
  }
}
