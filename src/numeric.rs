//! Small dense numerics used by the centre extraction and the selection
//! function smoothing: a linear solver, piecewise-linear interpolation,
//! least-squares polynomial fits and a Savitzky–Golay filter.

/// Solves the `n x n` system `a * x = b` in place by Gaussian elimination
/// with partial pivoting. Returns `None` if the matrix is singular.
///
/// `a` is row-major, `a[i * n + j]`.
pub fn solve_linear(a: &mut [f64], b: &mut [f64]) -> Option<Vec<f64>> {
  let n = b.len();
  debug_assert_eq!(a.len(), n * n);
  let scale = a.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
  if scale == 0.0 {
    return None;
  }
  let tiny = scale * 1e-13;
  for col in 0..n {
    // pivot search
    let mut pivot = col;
    let mut pmax = a[col * n + col].abs();
    for row in col + 1..n {
      let v = a[row * n + col].abs();
      if v > pmax {
        pivot = row;
        pmax = v;
      }
    }
    if pmax < tiny {
      return None;
    }
    if pivot != col {
      for j in 0..n {
        a.swap(col * n + j, pivot * n + j);
      }
      b.swap(col, pivot);
    }
    let diag = a[col * n + col];
    for row in col + 1..n {
      let factor = a[row * n + col] / diag;
      if factor == 0.0 {
        continue;
      }
      for j in col..n {
        a[row * n + j] -= factor * a[col * n + j];
      }
      b[row] -= factor * b[col];
    }
  }
  let mut x = vec![0.0; n];
  for row in (0..n).rev() {
    let mut acc = b[row];
    for j in row + 1..n {
      acc -= a[row * n + j] * x[j];
    }
    x[row] = acc / a[row * n + row];
  }
  Some(x)
}

/// Piecewise-linear interpolation over a strictly increasing abscissa.
/// Evaluation outside the tabulated range extrapolates the end segments,
/// matching a degree-1 interpolating spline.
#[derive(Debug, Clone)]
pub struct LinearInterp {
  x: Vec<f64>,
  y: Vec<f64>,
}

impl LinearInterp {
  pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
    debug_assert_eq!(x.len(), y.len());
    debug_assert!(x.len() >= 2);
    debug_assert!(x.windows(2).all(|w| w[0] < w[1]));
    Self { x, y }
  }

  pub fn eval(&self, at: f64) -> f64 {
    let n = self.x.len();
    let seg = match self.x.partition_point(|&v| v < at) {
      0 => 0,
      p if p >= n => n - 2,
      p => p - 1,
    };
    let (x0, x1) = (self.x[seg], self.x[seg + 1]);
    let (y0, y1) = (self.y[seg], self.y[seg + 1]);
    y0 + (y1 - y0) * (at - x0) / (x1 - x0)
  }
}

/// Least-squares fit of a degree-`order` polynomial to the samples `y` on
/// centred indices t = i - (len - 1)/2, which keeps the normal equations
/// well conditioned. Returns the coefficients lowest order first.
fn polyfit_centred(y: &[f64], order: usize) -> Vec<f64> {
  let m = order + 1;
  let centre = (y.len() - 1) as f64 / 2.0;
  let mut ata = vec![0.0; m * m];
  let mut atb = vec![0.0; m];
  for (i, &yi) in y.iter().enumerate() {
    let t = i as f64 - centre;
    let mut powers = vec![1.0; m];
    for j in 1..m {
      powers[j] = powers[j - 1] * t;
    }
    for r in 0..m {
      for c in 0..m {
        ata[r * m + c] += powers[r] * powers[c];
      }
      atb[r] += powers[r] * yi;
    }
  }
  solve_linear(&mut ata, &mut atb).unwrap_or_else(|| vec![0.0; m])
}

fn polyval(coeffs: &[f64], at: f64) -> f64 {
  coeffs.iter().rev().fold(0.0, |acc, &c| acc * at + c)
}

/// Savitzky–Golay smoothing with a centred window and polynomial edge
/// handling (the first and last half-windows are replaced by a polynomial
/// fitted to the first/last full window, as scipy's `mode='interp'` does).
///
/// `window` must be odd; it is shrunk to the largest odd value not
/// exceeding the data length when the data is shorter.
pub fn savgol_filter(y: &[f64], window: usize, order: usize) -> Vec<f64> {
  let n = y.len();
  let mut window = window.min(n);
  if window % 2 == 0 {
    window -= 1;
  }
  if window <= order || n < window {
    return y.to_vec();
  }
  let half = window / 2;
  let m = order + 1;

  // Convolution coefficients for the window centre: the first row of
  // (A^T A)^-1 A^T with A the Vandermonde matrix on -half..=half.
  let mut ata = vec![0.0; m * m];
  for t in -(half as i64)..=half as i64 {
    let mut powers = vec![1.0; m];
    for j in 1..m {
      powers[j] = powers[j - 1] * t as f64;
    }
    for r in 0..m {
      for c in 0..m {
        ata[r * m + c] += powers[r] * powers[c];
      }
    }
  }
  let mut e0 = vec![0.0; m];
  e0[0] = 1.0;
  let g = solve_linear(&mut ata, &mut e0).expect("Savitzky-Golay normal equations are singular");
  let weights: Vec<f64> = (-(half as i64)..=half as i64)
    .map(|t| {
      let mut acc = 0.0;
      let mut p = 1.0;
      for &gj in &g {
        acc += gj * p;
        p *= t as f64;
      }
      acc
    })
    .collect();

  let mut out = vec![0.0; n];
  for i in half..n - half {
    let mut acc = 0.0;
    for (w, &v) in weights.iter().zip(&y[i - half..i + half + 1]) {
      acc += w * v;
    }
    out[i] = acc;
  }
  // Edge handling: polynomial fitted over the first/last full window,
  // evaluated on the same centred indices the fit used.
  let centre = (window - 1) as f64 / 2.0;
  let head = polyfit_centred(&y[..window], order);
  for i in 0..half {
    out[i] = polyval(&head, i as f64 - centre);
  }
  let tail = polyfit_centred(&y[n - window..], order);
  for i in 0..half {
    let k = n - half + i;
    out[k] = polyval(&tail, (k - (n - window)) as f64 - centre);
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn solve_identity() {
    let mut a = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    let mut b = vec![3.0, -1.0, 2.5];
    let x = solve_linear(&mut a, &mut b).unwrap();
    assert_eq!(x, vec![3.0, -1.0, 2.5]);
  }

  #[test]
  fn solve_requires_pivoting() {
    // leading zero forces a row swap
    let mut a = vec![0.0, 2.0, 4.0, 1.0];
    let mut b = vec![2.0, 3.0];
    let x = solve_linear(&mut a, &mut b).unwrap();
    assert!((x[0] - 0.5).abs() < 1e-12);
    assert!((x[1] - 1.0).abs() < 1e-12);
  }

  #[test]
  fn solve_singular_is_none() {
    let mut a = vec![1.0, 2.0, 2.0, 4.0];
    let mut b = vec![1.0, 2.0];
    assert!(solve_linear(&mut a, &mut b).is_none());
  }

  #[test]
  fn interp_hits_knots_and_extrapolates() {
    let f = LinearInterp::new(vec![0.0, 1.0, 3.0], vec![0.0, 2.0, 4.0]);
    assert!((f.eval(0.0) - 0.0).abs() < 1e-12);
    assert!((f.eval(1.0) - 2.0).abs() < 1e-12);
    assert!((f.eval(2.0) - 3.0).abs() < 1e-12);
    // linear continuation of the end segments
    assert!((f.eval(4.0) - 5.0).abs() < 1e-12);
    assert!((f.eval(-1.0) + 2.0).abs() < 1e-12);
  }

  #[test]
  fn savgol_preserves_cubic() {
    // an exact degree-3 polynomial is a fixed point of the order-3 filter
    let y: Vec<f64> = (0..50)
      .map(|i| {
        let t = i as f64 * 0.1;
        1.0 + 0.5 * t - 0.2 * t * t + 0.03 * t * t * t
      })
      .collect();
    let smoothed = savgol_filter(&y, 11, 3);
    for (a, b) in y.iter().zip(&smoothed) {
      assert!((a - b).abs() < 1e-8, "{} vs {}", a, b);
    }
  }

  #[test]
  fn savgol_constant_is_fixed_point() {
    let y = vec![2.5; 120];
    let smoothed = savgol_filter(&y, 101, 3);
    for v in &smoothed {
      assert!((v - 2.5).abs() < 1e-9);
    }
  }
}
