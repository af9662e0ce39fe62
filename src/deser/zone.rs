//! Tracer → zone membership file (`.zone`): text, first line is the tracer
//! count, then one row per tracer whose last field is the zone id.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::PipelineError;

pub fn read_zones(path: &Path, expected: Option<usize>) -> Result<Vec<u32>, PipelineError> {
  let reader = BufReader::new(File::open(path)?);
  let mut lines = reader.lines();
  let header = lines
    .next()
    .ok_or_else(|| PipelineError::malformed("zone", path, "empty file"))??;
  let n: usize = header
    .split_whitespace()
    .next()
    .and_then(|tok| tok.parse().ok())
    .ok_or_else(|| PipelineError::malformed("zone", path, "unreadable count header"))?;
  if let Some(expected) = expected {
    if n != expected {
      return Err(PipelineError::CountMismatch {
        path: path.to_path_buf(),
        found: n,
        expected,
      });
    }
  }
  let mut zones = Vec::with_capacity(n);
  for line in lines {
    let line = line?;
    if line.trim().is_empty() {
      continue;
    }
    let zone: u32 = line
      .split_whitespace()
      .last()
      .and_then(|tok| tok.parse().ok())
      .ok_or_else(|| {
        PipelineError::malformed("zone", path, format!("bad row '{}'", line.trim()))
      })?;
    zones.push(zone);
  }
  if zones.len() != n {
    return Err(PipelineError::CountMismatch {
      path: path.to_path_buf(),
      found: zones.len(),
      expected: n,
    });
  }
  Ok(zones)
}
