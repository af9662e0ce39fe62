//! The watershed candidate list (`.txt`) and the merged zone hierarchy
//! (`.void`) emitted by the external watershed program.
//!
//! Each hierarchy row describes one candidate seed zone followed by its
//! merge steps: `seed  n1 r1 z11 .. z1n1  n2 r2 z21 ..  0 r_stop`, where a
//! step with count `n_k` at density ratio `r_k` would absorb the listed
//! zones, and a zero count terminates the row.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::PipelineError;

/// One candidate row of the raw watershed list file.
#[derive(Debug, Clone)]
pub struct ZoneCandidate {
  pub zone_id: u32,
  pub edge_flag: i32,
  pub core_particle: u32,
  pub core_density: f64,
  pub zone_volume: f64,
  pub zone_num_parts: u64,
  /// Density ratio at the last merge recorded by the watershed program.
  pub density_ratio: f64,
}

/// Columns of the raw list file, 0-based. The trailing ratio sits at a
/// fixed position past intermediate columns this crate never consumes.
const COL_DENSITY_RATIO: usize = 9;

/// Reads the raw candidate list: two header lines, then one row per
/// candidate with at least ten whitespace-separated columns.
pub fn read_candidates(path: &Path) -> Result<Vec<ZoneCandidate>, PipelineError> {
  let reader = BufReader::new(File::open(path)?);
  let mut rows = Vec::new();
  for (idx, line) in reader.lines().enumerate() {
    let line = line?;
    if idx < 2 || line.trim().is_empty() {
      continue;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() <= COL_DENSITY_RATIO {
      return Err(PipelineError::malformed(
        "candidate list",
        path,
        format!("row {} has {} columns, expected at least {}", idx + 1, fields.len(), COL_DENSITY_RATIO + 1),
      ));
    }
    let parse_err =
      |what: &str| PipelineError::malformed("candidate list", path, format!("row {}: bad {}", idx + 1, what));
    rows.push(ZoneCandidate {
      zone_id: fields[0].parse().map_err(|_| parse_err("zone id"))?,
      edge_flag: fields[1].parse().map_err(|_| parse_err("edge flag"))?,
      core_particle: fields[2].parse().map_err(|_| parse_err("core particle"))?,
      core_density: fields[3].parse().map_err(|_| parse_err("core density"))?,
      zone_volume: fields[4].parse().map_err(|_| parse_err("zone volume"))?,
      zone_num_parts: fields[5].parse().map_err(|_| parse_err("zone particle count"))?,
      density_ratio: fields[COL_DENSITY_RATIO].parse().map_err(|_| parse_err("density ratio"))?,
    });
  }
  Ok(rows)
}

/// One merge step of a hierarchy row.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeStep {
  pub ratio: f64,
  pub zones: Vec<u32>,
}

/// One parsed hierarchy row.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyRow {
  pub seed: u32,
  pub steps: Vec<MergeStep>,
  /// The ratio following the terminating zero count.
  pub r_stop: f64,
}

impl HierarchyRow {
  /// The density ratio at which zone growth stops: the first merge step's
  /// ratio, or `r_stop` for a candidate with no recorded merges.
  pub fn first_ratio(&self) -> f64 {
    self.steps.first().map(|s| s.ratio).unwrap_or(self.r_stop)
  }

  /// Seed plus every zone named by any merge step.
  pub fn all_zones(&self) -> Vec<u32> {
    let mut zones = vec![self.seed];
    for step in &self.steps {
      zones.extend_from_slice(&step.zones);
    }
    zones
  }
}

fn parse_row(tokens: &[&str], path: &Path, row: usize) -> Result<HierarchyRow, PipelineError> {
  let bad = |msg: &str| PipelineError::malformed("hierarchy", path, format!("row {}: {}", row, msg));
  let mut it = tokens.iter();
  let mut next = || it.next().copied().ok_or_else(|| bad("truncated row"));
  let seed: u32 = next()?.parse().map_err(|_| bad("bad seed id"))?;
  let mut steps = Vec::new();
  loop {
    let count: usize = next()?.parse().map_err(|_| bad("bad zone count"))?;
    let ratio: f64 = next()?.parse().map_err(|_| bad("bad density ratio"))?;
    if count == 0 {
      return Ok(HierarchyRow { seed, steps, r_stop: ratio });
    }
    let mut zones = Vec::with_capacity(count);
    for _ in 0..count {
      zones.push(next()?.parse().map_err(|_| bad("bad zone id"))?);
    }
    steps.push(MergeStep { ratio, zones });
  }
}

/// Reads a hierarchy file. The first line carries the row count; a
/// mismatch with the actual number of rows is fatal.
pub fn read_hierarchy(path: &Path) -> Result<Vec<HierarchyRow>, PipelineError> {
  let reader = BufReader::new(File::open(path)?);
  let mut lines = reader.lines();
  let header = lines
    .next()
    .ok_or_else(|| PipelineError::malformed("hierarchy", path, "empty file"))??;
  let n: usize = header
    .trim()
    .parse()
    .map_err(|_| PipelineError::malformed("hierarchy", path, "unreadable count header"))?;
  let mut rows = Vec::with_capacity(n);
  for (idx, line) in lines.enumerate() {
    let line = line?;
    if line.trim().is_empty() {
      continue;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    rows.push(parse_row(&tokens, path, idx + 2)?);
  }
  if rows.len() != n {
    return Err(PipelineError::CountMismatch {
      path: path.to_path_buf(),
      found: rows.len(),
      expected: n,
    });
  }
  Ok(rows)
}

/// Formats a pruned single-zone row: the seed, a terminating zero count
/// and the ratio at which growth stopped.
pub fn format_pruned_row(seed: u32, r_stop: f64) -> String {
  format!("{}\t0\t{}", seed, r_stop)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn candidate_list_skips_headers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.txt");
    std::fs::write(
      &path,
      "2 zones\nid flag core dens vol np a b c ratio prob\n\
       0 0 4 0.25 4.0 4 1 4.0 4 2.5 0.1\n\
       1 1 7 2.00 3.0 3 1 3.0 3 1.5 0.2\n",
    )
    .unwrap();
    let rows = read_candidates(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].zone_id, 0);
    assert_eq!(rows[0].core_particle, 4);
    assert_eq!(rows[0].core_density, 0.25);
    assert_eq!(rows[0].zone_num_parts, 4);
    assert_eq!(rows[0].density_ratio, 2.5);
    assert_eq!(rows[1].edge_flag, 1);
  }

  #[test]
  fn hierarchy_nested_steps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.void");
    std::fs::write(
      &path,
      "2\n\
       0 2 1.5 3 4 1 2.8 7 0 9.9\n\
       5 0 1e30\n",
    )
    .unwrap();
    let rows = read_hierarchy(&path).unwrap();
    assert_eq!(rows[0].seed, 0);
    assert_eq!(
      rows[0].steps,
      vec![
        MergeStep { ratio: 1.5, zones: vec![3, 4] },
        MergeStep { ratio: 2.8, zones: vec![7] },
      ]
    );
    assert_eq!(rows[0].r_stop, 9.9);
    assert_eq!(rows[0].first_ratio(), 1.5);
    assert_eq!(rows[0].all_zones(), vec![0, 3, 4, 7]);
    assert_eq!(rows[1].seed, 5);
    assert!(rows[1].steps.is_empty());
    assert_eq!(rows[1].first_ratio(), 1e30);
  }

  #[test]
  fn hierarchy_count_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.void");
    std::fs::write(&path, "3\n0 0 1.0\n1 0 1.0\n").unwrap();
    assert!(matches!(
      read_hierarchy(&path),
      Err(PipelineError::CountMismatch { .. })
    ));
  }
}
