//! Coordinate conversions between the sky frame (RA, Dec in degrees plus a
//! comoving radial distance) and Cartesian positions, and the periodic-box
//! wrapping helpers.
//!
//! Two Cartesian frames are used throughout the pipeline: the *observer*
//! frame with the observer at the origin (coordinates in [-L/2, L/2)), and
//! the *box* frame obtained by adding L/2 to every coordinate ([0, L)).

/// Converts (RA, Dec) in degrees and a radial distance to Cartesian
/// observer-frame coordinates.
pub fn equatorial_to_cartesian(ra_deg: f64, dec_deg: f64, r: f64) -> [f64; 3] {
  let phi = ra_deg.to_radians();
  let theta = std::f64::consts::FRAC_PI_2 - dec_deg.to_radians();
  [
    r * theta.sin() * phi.cos(),
    r * theta.sin() * phi.sin(),
    r * theta.cos(),
  ]
}

/// Inverse of [`equatorial_to_cartesian`]: returns `(r, ra_deg, dec_deg)`
/// with RA wrapped into [0, 360).
pub fn cartesian_to_equatorial(pos: [f64; 3]) -> (f64, f64, f64) {
  let r = (pos[0] * pos[0] + pos[1] * pos[1] + pos[2] * pos[2]).sqrt();
  if r == 0.0 {
    return (0.0, 0.0, 0.0);
  }
  let dec = 90.0 - (pos[2] / r).clamp(-1.0, 1.0).acos().to_degrees();
  let mut ra = pos[1].atan2(pos[0]).to_degrees();
  if ra < 0.0 {
    ra += 360.0;
  }
  (r, ra, dec)
}

/// Maps a coordinate into [0, L) by adding or subtracting L once.
pub fn wrap_coordinate(v: f64, box_length: f64) -> f64 {
  if v >= box_length {
    v - box_length
  } else if v < 0.0 {
    v + box_length
  } else {
    v
  }
}

/// Wraps a coordinate that may have leaked just outside [0, L] back in by
/// one box length, the form used for derived centre positions.
pub fn rewrap_centre(v: f64, box_length: f64) -> f64 {
  if v < 0.0 || v > box_length {
    v - box_length * v.signum()
  } else {
    v
  }
}

/// Minimum-image adjustment: shifts `v` by ±L so that it lands within L/2
/// of the reference coordinate.
pub fn nearest_image(v: f64, reference: f64, box_length: f64) -> f64 {
  if (reference - v).abs() > 0.5 * box_length {
    v + box_length * (reference - v).signum()
  } else {
    v
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equatorial_round_trip() {
    for &(ra, dec, r) in &[
      (0.0, 0.0, 100.0),
      (123.4, -45.6, 512.0),
      (359.9, 89.0, 50.0),
      (180.0, -89.5, 1.0),
    ] {
      let pos = equatorial_to_cartesian(ra, dec, r);
      let (r2, ra2, dec2) = cartesian_to_equatorial(pos);
      assert!((r - r2).abs() < 1e-9);
      assert!((ra - ra2).abs() < 1e-9, "ra {} vs {}", ra, ra2);
      assert!((dec - dec2).abs() < 1e-9);
    }
  }

  #[test]
  fn cardinal_directions() {
    let pos = equatorial_to_cartesian(0.0, 0.0, 1.0);
    assert!((pos[0] - 1.0).abs() < 1e-12);
    assert!(pos[1].abs() < 1e-12 && pos[2].abs() < 1e-12);
    let pos = equatorial_to_cartesian(90.0, 0.0, 1.0);
    assert!((pos[1] - 1.0).abs() < 1e-12);
    let pos = equatorial_to_cartesian(0.0, 90.0, 1.0);
    assert!((pos[2] - 1.0).abs() < 1e-12);
  }

  #[test]
  fn wrap_single_period() {
    assert_eq!(wrap_coordinate(-0.5, 10.0), 9.5);
    assert_eq!(wrap_coordinate(10.5, 10.0), 0.5);
    assert_eq!(wrap_coordinate(3.0, 10.0), 3.0);
    assert_eq!(wrap_coordinate(10.0, 10.0), 0.0);
  }

  #[test]
  fn nearest_image_shifts_across_boundary() {
    assert_eq!(nearest_image(9.5, 0.5, 10.0), -0.5);
    assert_eq!(nearest_image(0.5, 9.5, 10.0), 10.5);
    assert_eq!(nearest_image(4.0, 5.0, 10.0), 4.0);
  }
}
