//! The in-memory tracer table and its on-disk forms.
//!
//! Positions are struct-of-arrays: one contiguous column per coordinate,
//! which is also the layout of the binary tessellation-input file (int32
//! count followed by the x, y and z columns as little-endian float64, with
//! RA, Dec and redshift columns appended in survey mode).

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{info, warn};

use crate::deser::gz;
use crate::error::PipelineError;
use crate::mask::SkyMask;
use crate::sky;

/// Sentinel redshift carried by synthetic buffer particles.
pub const BUFFER_REDSHIFT: f64 = -1.0;
/// Sentinel sky position carried by guard particles.
pub const GUARD_ANGLE: f64 = -60.0;

/// Ordered tracer table. Real tracers come first, buffer particles are
/// appended after them, and the ordering is frozen from then on: every
/// downstream file indexes tracers by their position here.
#[derive(Debug, Clone, Default)]
pub struct TracerTable {
  pub x: Vec<f64>,
  pub y: Vec<f64>,
  pub z: Vec<f64>,
  pub ra: Vec<f64>,
  pub dec: Vec<f64>,
  pub redshift: Vec<f64>,
}

impl TracerTable {
  pub fn len(&self) -> usize {
    self.x.len()
  }

  pub fn is_empty(&self) -> bool {
    self.x.is_empty()
  }

  /// Whether the table carries sky columns (survey mode).
  pub fn has_sky_columns(&self) -> bool {
    !self.ra.is_empty()
  }

  pub fn position(&self, i: usize) -> [f64; 3] {
    [self.x[i], self.y[i], self.z[i]]
  }

  pub fn with_capacity(n: usize, sky: bool) -> Self {
    Self {
      x: Vec::with_capacity(n),
      y: Vec::with_capacity(n),
      z: Vec::with_capacity(n),
      ra: Vec::with_capacity(if sky { n } else { 0 }),
      dec: Vec::with_capacity(if sky { n } else { 0 }),
      redshift: Vec::with_capacity(if sky { n } else { 0 }),
    }
  }

  /// Builds a box-mode table from raw position rows.
  pub fn from_positions(rows: &[[f64; 3]]) -> Self {
    let mut table = Self::with_capacity(rows.len(), false);
    for row in rows {
      table.x.push(row[0]);
      table.y.push(row[1]);
      table.z.push(row[2]);
    }
    table
  }

  /// Builds a survey-mode table from (RA, Dec, redshift) rows, converting
  /// to Cartesian observer-frame positions via the comoving distance.
  pub fn from_sky(rows: &[[f64; 3]], cosmo: &crate::cosmo::Cosmology) -> Self {
    let mut table = Self::with_capacity(rows.len(), true);
    for &[ra, dec, redshift] in rows {
      let r = cosmo.comoving_distance(redshift);
      let pos = sky::equatorial_to_cartesian(ra, dec, r);
      table.x.push(pos[0]);
      table.y.push(pos[1]);
      table.z.push(pos[2]);
      table.ra.push(ra);
      table.dec.push(dec);
      table.redshift.push(redshift);
    }
    table
  }

  pub fn push_sky_row(&mut self, pos: [f64; 3], ra: f64, dec: f64, redshift: f64) {
    self.x.push(pos[0]);
    self.y.push(pos[1]);
    self.z.push(pos[2]);
    self.ra.push(ra);
    self.dec.push(dec);
    self.redshift.push(redshift);
  }

  fn retain_rows(&mut self, keep: &[bool]) {
    let filter = |col: &mut Vec<f64>| {
      let mut i = 0;
      col.retain(|_| {
        let k = keep[i];
        i += 1;
        k
      });
    };
    let sky_cols = self.has_sky_columns();
    filter(&mut self.x);
    filter(&mut self.y);
    filter(&mut self.z);
    if sky_cols {
      filter(&mut self.ra);
      filter(&mut self.dec);
      filter(&mut self.redshift);
    }
  }

  /// Maps every coordinate into [0, L) by adding or subtracting one box
  /// length (box mode).
  pub fn wrap_periodic(&mut self, box_length: f64) {
    for col in [&mut self.x, &mut self.y, &mut self.z] {
      for v in col.iter_mut() {
        *v = sky::wrap_coordinate(*v, box_length);
      }
    }
  }

  /// Shifts all Cartesian positions by `delta` (observer ↔ box frames).
  pub fn shift_positions(&mut self, delta: f64) {
    for col in [&mut self.x, &mut self.y, &mut self.z] {
      for v in col.iter_mut() {
        *v += delta;
      }
    }
  }

  /// Drops tracers with redshift outside (z_min, z_max). Returns the
  /// number removed.
  pub fn cut_redshift_range(&mut self, z_min: f64, z_max: f64) -> usize {
    let keep: Vec<bool> = self.redshift.iter().map(|&z| z_min < z && z < z_max).collect();
    let dropped = keep.iter().filter(|&&k| !k).count();
    if dropped > 0 {
      self.retain_rows(&keep);
    }
    dropped
  }

  /// Drops tracers sitting on zero-completeness mask pixels. Returns the
  /// number removed.
  pub fn cut_masked(&mut self, mask: &SkyMask) -> usize {
    let keep: Vec<bool> = self
      .ra
      .iter()
      .zip(&self.dec)
      .map(|(&ra, &dec)| mask.value_at(ra, dec) != 0.0)
      .collect();
    let dropped = keep.iter().filter(|&&k| !k).count();
    if dropped > 0 {
      warn!("removing {} galaxies on mask = 0 pixels", dropped);
      self.retain_rows(&keep);
    }
    dropped
  }

  /// Removes rows identical on every stored column, keeping the first
  /// occurrence. Duplicate positions make the tessellation fail.
  pub fn dedupe_exact(&mut self) -> usize {
    let mut seen: HashSet<Vec<u64>> = HashSet::with_capacity(self.len());
    let sky_cols = self.has_sky_columns();
    let keep: Vec<bool> = (0..self.len())
      .map(|i| {
        let mut key = vec![self.x[i].to_bits(), self.y[i].to_bits(), self.z[i].to_bits()];
        if sky_cols {
          key.extend([self.ra[i].to_bits(), self.dec[i].to_bits(), self.redshift[i].to_bits()]);
        }
        seen.insert(key)
      })
      .collect();
    let dropped = keep.iter().filter(|&&k| !k).count();
    if dropped > 0 {
      warn!("removing {} galaxies with duplicate positions", dropped);
      self.retain_rows(&keep);
    }
    dropped
  }

  /// Appends another table, typically the synthesized buffers.
  pub fn append(&mut self, other: &TracerTable) {
    self.x.extend_from_slice(&other.x);
    self.y.extend_from_slice(&other.y);
    self.z.extend_from_slice(&other.z);
    if self.has_sky_columns() {
      self.ra.extend_from_slice(&other.ra);
      self.dec.extend_from_slice(&other.dec);
      self.redshift.extend_from_slice(&other.redshift);
    }
  }

  /// Writes the binary tessellation-input layout.
  pub fn write_binary(&self, path: &Path) -> Result<(), PipelineError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_i32::<LittleEndian>(self.len() as i32)?;
    let mut columns: Vec<&[f64]> = vec![&self.x, &self.y, &self.z];
    if self.has_sky_columns() {
      columns.extend([&self.ra[..], &self.dec[..], &self.redshift[..]]);
    }
    for col in columns {
      for &v in col {
        writer.write_f64::<LittleEndian>(v)?;
      }
    }
    Ok(())
  }

  /// Reads the layout written by [`write_binary`]. A count mismatch with
  /// `expected` is fatal.
  pub fn read_binary(path: &Path, expected: usize, sky: bool) -> Result<Self, PipelineError> {
    Self::read_binary_impl(path, Some(expected), sky)
  }

  /// Reads the layout written by [`write_binary`], trusting the count in
  /// the file header (used for reloading saved buffer mocks).
  pub fn read_binary_any(path: &Path, sky: bool) -> Result<Self, PipelineError> {
    Self::read_binary_impl(path, None, sky)
  }

  fn read_binary_impl(path: &Path, expected: Option<usize>, sky: bool) -> Result<Self, PipelineError> {
    let mut reader = BufReader::new(File::open(path)?);
    let n = reader.read_i32::<LittleEndian>()? as usize;
    if let Some(expected) = expected {
      if n != expected {
        return Err(PipelineError::CountMismatch {
          path: path.to_path_buf(),
          found: n,
          expected,
        });
      }
    }
    let mut table = Self::with_capacity(n, sky);
    let n_cols = if sky { 6 } else { 3 };
    for c in 0..n_cols {
      let mut col = vec![0.0; n];
      reader.read_f64_into::<LittleEndian>(&mut col)?;
      match c {
        0 => table.x = col,
        1 => table.y = col,
        2 => table.z = col,
        3 => table.ra = col,
        4 => table.dec = col,
        _ => table.redshift = col,
      }
    }
    Ok(table)
  }
}

/// Loads position rows from a binary tabular catalogue: the same int32
/// count + three little-endian float64 column layout the pipeline itself
/// writes.
pub fn load_binary_columns(path: &Path) -> Result<Vec<[f64; 3]>, PipelineError> {
  let table = TracerTable::read_binary_any(path, false)?;
  info!("{} tracers found in {}", table.len(), path.display());
  Ok((0..table.len()).map(|i| table.position(i)).collect())
}

/// Loads position columns from a whitespace-separated text catalogue,
/// transparently un-gzipping. `posn_cols` selects the three columns
/// holding (x, y, z), or (RA, Dec, z) in survey mode.
pub fn load_text_columns(path: &Path, posn_cols: [usize; 3]) -> Result<Vec<[f64; 3]>, PipelineError> {
  let max_col = posn_cols.iter().copied().max().unwrap_or(0);
  let reader = gz::open_text(path)?;
  let mut rows = Vec::new();
  for (line_no, line) in reader.lines().enumerate() {
    let line = line?;
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() <= max_col || fields.len() < 3 {
      return Err(PipelineError::NotEnoughColumns {
        path: path.to_path_buf(),
        found: fields.len(),
      });
    }
    let mut row = [0.0; 3];
    for (slot, &col) in posn_cols.iter().enumerate() {
      row[slot] = fields[col].parse().map_err(|_| {
        PipelineError::malformed(
          "tracer catalogue",
          path,
          format!("line {}: unreadable number '{}'", line_no + 1, fields[col]),
        )
      })?;
    }
    rows.push(row);
  }
  info!("{} tracers found in {}", rows.len(), path.display());
  Ok(rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_survey_table() -> TracerTable {
    let cosmo = crate::cosmo::Cosmology::new(0.308);
    TracerTable::from_sky(
      &[
        [150.0, 10.0, 0.50],
        [150.0, 10.0, 0.50], // exact duplicate
        [210.0, -5.0, 0.55],
        [30.0, 45.0, 0.90], // outside z range
      ],
      &cosmo,
    )
  }

  #[test]
  fn binary_round_trip_is_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pos.dat");
    let table = sample_survey_table();
    table.write_binary(&path).unwrap();
    let back = TracerTable::read_binary(&path, table.len(), true).unwrap();
    assert_eq!(back.x, table.x);
    assert_eq!(back.y, table.y);
    assert_eq!(back.z, table.z);
    assert_eq!(back.ra, table.ra);
    assert_eq!(back.dec, table.dec);
    assert_eq!(back.redshift, table.redshift);
  }

  #[test]
  fn binary_count_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pos.dat");
    sample_survey_table().write_binary(&path).unwrap();
    assert!(matches!(
      TracerTable::read_binary(&path, 7, true),
      Err(PipelineError::CountMismatch { .. })
    ));
  }

  #[test]
  fn wrap_periodic_bounds() {
    let mut table = TracerTable::from_positions(&[[-3.0, 501.0, 250.0], [500.0, 0.0, -0.001]]);
    table.wrap_periodic(500.0);
    for i in 0..table.len() {
      let p = table.position(i);
      for c in p {
        assert!((0.0..500.0).contains(&c), "coordinate {} out of range", c);
      }
    }
    assert_eq!(table.position(0), [497.0, 1.0, 250.0]);
  }

  #[test]
  fn dedupe_drops_second_occurrence() {
    let mut table = sample_survey_table();
    assert_eq!(table.dedupe_exact(), 1);
    assert_eq!(table.len(), 3);
    // first occurrence survives in place
    assert_eq!(table.ra[0], 150.0);
    assert_eq!(table.ra[1], 210.0);
  }

  #[test]
  fn redshift_cut_is_exclusive() {
    let mut table = sample_survey_table();
    let dropped = table.cut_redshift_range(0.43, 0.70);
    assert_eq!(dropped, 1);
    assert!(table.redshift.iter().all(|&z| z > 0.43 && z < 0.70));
  }

  #[test]
  fn text_loader_selects_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.txt");
    std::fs::write(&path, "# comment\n9 1.0 2.0 3.0\n9 4.0 5.0 6.0\n").unwrap();
    let rows = load_text_columns(&path, [1, 2, 3]).unwrap();
    assert_eq!(rows, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
  }

  #[test]
  fn text_loader_rejects_narrow_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.txt");
    std::fs::write(&path, "1.0 2.0\n").unwrap();
    assert!(matches!(
      load_text_columns(&path, [0, 1, 2]),
      Err(PipelineError::NotEnoughColumns { .. })
    ));
  }
}
