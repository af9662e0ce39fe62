//! Radial selection function of a survey sample: the tracer number density
//! n(z) measured in equal-comoving-volume redshift bins, and its value
//! normalized by the overall sample density, f(z).

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::info;

use crate::cosmo::Cosmology;
use crate::error::PipelineError;

pub const DEFAULT_N_BINS: usize = 15;

#[derive(Debug, Clone)]
pub struct SelectionFunction {
  /// Mean redshift of the tracers in each bin.
  pub z_mean: Vec<f64>,
  /// Tracer number density per bin, (Mpc/h)^-3.
  pub n_z: Vec<f64>,
  /// n(z) normalized by the overall sample density.
  pub f_z: Vec<f64>,
}

impl SelectionFunction {
  /// Histograms tracer redshifts into `n_bins` equal-comoving-volume
  /// shells between `z_min` and `z_max`.
  pub fn measure(
    redshifts: &[f64],
    cosmo: &Cosmology,
    z_min: f64,
    z_max: f64,
    f_sky: f64,
    tracer_dens: f64,
    n_bins: usize,
  ) -> SelectionFunction {
    info!("determining survey redshift selection function");
    let r_near = cosmo.comoving_distance(z_min);
    let r_far = cosmo.comoving_distance(z_max);
    // radial bin edges with equal comoving shell volumes
    let r_edges: Vec<f64> = (0..=n_bins)
      .map(|i| {
        let frac = i as f64 / n_bins as f64;
        (r_near.powi(3) + frac * (r_far.powi(3) - r_near.powi(3))).cbrt()
      })
      .collect();
    let z_edges: Vec<f64> = r_edges.iter().map(|&r| cosmo.redshift(r)).collect();
    let shell_volume =
      f_sky * 4.0 * std::f64::consts::PI * (r_far.powi(3) - r_near.powi(3)) / (3.0 * n_bins as f64);

    let mut counts = vec![0u64; n_bins];
    let mut z_sums = vec![0.0; n_bins];
    for &z in redshifts {
      // the final bin includes its upper edge
      let bin = match z_edges[1..].iter().position(|&edge| z < edge) {
        Some(b) => b,
        None if z <= z_edges[n_bins] => n_bins - 1,
        None => continue,
      };
      if z < z_edges[0] {
        continue;
      }
      counts[bin] += 1;
      z_sums[bin] += z;
    }

    let mut z_mean = Vec::with_capacity(n_bins);
    let mut n_z = Vec::with_capacity(n_bins);
    let mut f_z = Vec::with_capacity(n_bins);
    for bin in 0..n_bins {
      if counts[bin] > 0 {
        z_mean.push(z_sums[bin] / counts[bin] as f64);
      } else {
        z_mean.push(0.5 * (z_edges[bin] + z_edges[bin + 1]));
      }
      let dens = counts[bin] as f64 / shell_volume;
      n_z.push(dens);
      f_z.push(dens / tracer_dens);
    }
    SelectionFunction { z_mean, n_z, f_z }
  }

  pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "# z n(z) f(z)")?;
    for i in 0..self.z_mean.len() {
      writeln!(writer, "{:.3} {:.4e} {:.4}", self.z_mean[i], self.n_z[i], self.f_z[i])?;
    }
    Ok(())
  }

  pub fn read(path: &Path) -> Result<SelectionFunction, PipelineError> {
    let reader = BufReader::new(File::open(path)?);
    let mut z_mean = Vec::new();
    let mut n_z = Vec::new();
    let mut f_z = Vec::new();
    for line in reader.lines() {
      let line = line?;
      let trimmed = line.trim();
      if trimmed.is_empty() || trimmed.starts_with('#') {
        continue;
      }
      let fields: Vec<&str> = trimmed.split_whitespace().collect();
      if fields.len() < 3 {
        return Err(PipelineError::malformed("selection function", path, format!("bad row '{}'", trimmed)));
      }
      let parse = |tok: &str| {
        tok
          .parse::<f64>()
          .map_err(|_| PipelineError::malformed("selection function", path, format!("bad number '{}'", tok)))
      };
      z_mean.push(parse(fields[0])?);
      n_z.push(parse(fields[1])?);
      f_z.push(parse(fields[2])?);
    }
    Ok(SelectionFunction { z_mean, n_z, f_z })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shell_volumes_are_equal() {
    let cosmo = Cosmology::new(0.308);
    let (z_min, z_max, n_bins) = (0.43, 0.70, 15);
    let r_near = cosmo.comoving_distance(z_min);
    let r_far = cosmo.comoving_distance(z_max);
    let r_edges: Vec<f64> = (0..=n_bins)
      .map(|i| {
        let frac = i as f64 / n_bins as f64;
        (r_near.powi(3) + frac * (r_far.powi(3) - r_near.powi(3))).cbrt()
      })
      .collect();
    let vols: Vec<f64> = r_edges
      .windows(2)
      .map(|w| w[1].powi(3) - w[0].powi(3))
      .collect();
    for v in &vols {
      assert!((v - vols[0]).abs() / vols[0] < 1e-9);
    }
  }

  #[test]
  fn counts_and_normalization() {
    let cosmo = Cosmology::new(0.308);
    let (z_min, z_max) = (0.1, 0.2);
    // three tracers per bin edge region
    let redshifts = vec![0.11, 0.12, 0.15, 0.16, 0.19, 0.199];
    let f_sky = 0.25;
    let r_near = cosmo.comoving_distance(z_min);
    let r_far = cosmo.comoving_distance(z_max);
    let volume = f_sky * 4.0 * std::f64::consts::PI * (r_far.powi(3) - r_near.powi(3)) / 3.0;
    let tracer_dens = redshifts.len() as f64 / volume;
    let sel = SelectionFunction::measure(&redshifts, &cosmo, z_min, z_max, f_sky, tracer_dens, 3);
    // every tracer lands in some bin
    let total: f64 = sel.n_z.iter().map(|n| n * volume / 3.0).sum();
    assert!((total - redshifts.len() as f64).abs() < 1e-6);
    // mean of f over bins weighted by counts is 1 by construction
    let mean_f: f64 = sel.f_z.iter().sum::<f64>() / 3.0;
    assert!((mean_f - 1.0).abs() < 1e-9);
  }

  #[test]
  fn file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("selFn.txt");
    let sel = SelectionFunction {
      z_mean: vec![0.45, 0.55],
      n_z: vec![1.25e-4, 9.5e-5],
      f_z: vec![1.05, 0.82],
    };
    sel.write(&path).unwrap();
    let back = SelectionFunction::read(&path).unwrap();
    assert_eq!(back.z_mean.len(), 2);
    assert!((back.z_mean[0] - 0.45).abs() < 1e-3);
    assert!((back.f_z[1] - 0.82).abs() < 1e-4);
  }
}
