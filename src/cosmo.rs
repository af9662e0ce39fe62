//! Flat ΛCDM background cosmology: the comoving distance–redshift relation
//! and its inverse, in Mpc/h units (H0 = 100 h km/s/Mpc).

use crate::numeric::LinearInterp;

const SPEED_OF_LIGHT: f64 = 299_792.458; // km/s
const HUBBLE_100: f64 = 100.0; // h km/s/Mpc

/// Highest redshift covered by the internal lookup table. Survey samples
/// for void-finding sit far below this.
const Z_TABLE_MAX: f64 = 5.0;
const N_TABLE: usize = 10_000;

/// Comoving distance r(z) and its inverse z(r), precomputed on a fine grid
/// at construction and evaluated by piecewise-linear interpolation.
#[derive(Debug, Clone)]
pub struct Cosmology {
  omega_m: f64,
  r_of_z: LinearInterp,
  z_of_r: LinearInterp,
}

impl Cosmology {
  pub fn new(omega_m: f64) -> Self {
    let omega_l = 1.0 - omega_m;
    let e_inv = |z: f64| 1.0 / (omega_m * (1.0 + z).powi(3) + omega_l).sqrt();
    let dz = Z_TABLE_MAX / (N_TABLE - 1) as f64;
    let hubble_dist = SPEED_OF_LIGHT / HUBBLE_100;
    let mut zs = Vec::with_capacity(N_TABLE);
    let mut rs = Vec::with_capacity(N_TABLE);
    let mut acc = 0.0;
    let mut prev = e_inv(0.0);
    zs.push(0.0);
    rs.push(0.0);
    for i in 1..N_TABLE {
      let z = i as f64 * dz;
      let cur = e_inv(z);
      acc += 0.5 * (prev + cur) * dz;
      prev = cur;
      zs.push(z);
      rs.push(hubble_dist * acc);
    }
    Self {
      omega_m,
      r_of_z: LinearInterp::new(zs.clone(), rs.clone()),
      z_of_r: LinearInterp::new(rs, zs),
    }
  }

  pub fn omega_m(&self) -> f64 {
    self.omega_m
  }

  /// Comoving distance to redshift `z`, in Mpc/h.
  pub fn comoving_distance(&self, z: f64) -> f64 {
    self.r_of_z.eval(z)
  }

  /// Redshift at comoving distance `r` (Mpc/h).
  pub fn redshift(&self, r: f64) -> f64 {
    self.z_of_r.eval(r)
  }
}
