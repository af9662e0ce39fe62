//! Voronoi cell adjacency file (`.adj`).
//!
//! Layout, all little-endian: int32 N; int32 deg[N] (total degree of each
//! tracer); then for each tracer an int32 partner count followed by the
//! partner ids. Only one direction of each pair (i, j) with i < j is
//! stored, so the reader materializes the symmetric closure.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::PipelineError;

/// Tracer adjacency lists in CSR layout. Each row is sorted ascending.
#[derive(Debug, Clone)]
pub struct Adjacency {
  offsets: Vec<usize>,
  neighbours: Vec<u32>,
}

impl Adjacency {
  pub fn len(&self) -> usize {
    self.offsets.len() - 1
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn neighbours_of(&self, i: usize) -> &[u32] {
    &self.neighbours[self.offsets[i]..self.offsets[i + 1]]
  }

  /// Builds the symmetric closure of one-directional pair lists.
  pub fn from_pairs(n: usize, pair_lists: &[Vec<u32>]) -> Self {
    // first pass: degrees including the reverse direction
    let mut degrees = vec![0usize; n];
    for (i, partners) in pair_lists.iter().enumerate() {
      degrees[i] += partners.len();
      for &j in partners {
        degrees[j as usize] += 1;
      }
    }
    let mut offsets = Vec::with_capacity(n + 1);
    let mut acc = 0;
    offsets.push(0);
    for &d in &degrees {
      acc += d;
      offsets.push(acc);
    }
    // second pass: fill both directions
    let mut cursors = offsets[..n].to_vec();
    let mut neighbours = vec![0u32; acc];
    for (i, partners) in pair_lists.iter().enumerate() {
      for &j in partners {
        neighbours[cursors[i]] = j;
        cursors[i] += 1;
        neighbours[cursors[j as usize]] = i as u32;
        cursors[j as usize] += 1;
      }
    }
    for i in 0..n {
      neighbours[offsets[i]..offsets[i + 1]].sort_unstable();
    }
    Self { offsets, neighbours }
  }
}

/// Reads an adjacency file and returns the symmetric CSR closure.
pub fn read_adjacency(path: &Path, expected: Option<usize>) -> Result<Adjacency, PipelineError> {
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
  // the declared total-degree table adds nothing over the pair lists
  let mut skipped = vec![0i32; n];
  reader.read_i32_into::<LittleEndian>(&mut skipped)?;
  drop(skipped);

  let mut pair_lists = Vec::with_capacity(n);
  for i in 0..n {
    let k = reader.read_i32::<LittleEndian>()? as usize;
    let mut partners = vec![0i32; k];
    reader.read_i32_into::<LittleEndian>(&mut partners)?;
    for &j in &partners {
      if j < 0 || j as usize >= n {
        return Err(PipelineError::malformed(
          "adjacency",
          path,
          format!("tracer {} lists out-of-range partner {}", i, j),
        ));
      }
    }
    pair_lists.push(partners.into_iter().map(|j| j as u32).collect());
  }
  Ok(Adjacency::from_pairs(n, &pair_lists))
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use byteorder::WriteBytesExt;

  use super::*;

  fn write_adj(path: &Path, n: i32, degrees: &[i32], lists: &[&[i32]]) {
    let mut f = File::create(path).unwrap();
    f.write_i32::<LittleEndian>(n).unwrap();
    for &d in degrees {
      f.write_i32::<LittleEndian>(d).unwrap();
    }
    for list in lists {
      f.write_i32::<LittleEndian>(list.len() as i32).unwrap();
      for &j in *list {
        f.write_i32::<LittleEndian>(j).unwrap();
      }
    }
    f.flush().unwrap();
  }

  #[test]
  fn symmetric_closure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.adj");
    // pairs: (0,1), (0,2), (1,3), (2,3)
    write_adj(
      &path,
      4,
      &[2, 2, 2, 2],
      &[&[1, 2], &[3], &[3], &[]],
    );
    let adj = read_adjacency(&path, Some(4)).unwrap();
    assert_eq!(adj.neighbours_of(0), &[1, 2]);
    assert_eq!(adj.neighbours_of(1), &[0, 3]);
    assert_eq!(adj.neighbours_of(2), &[0, 3]);
    assert_eq!(adj.neighbours_of(3), &[1, 2]);
  }

  #[test]
  fn rejects_out_of_range_partner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.adj");
    write_adj(&path, 2, &[1, 1], &[&[7], &[]]);
    assert!(matches!(
      read_adjacency(&path, None),
      Err(PipelineError::Malformed { .. })
    ));
  }
}
