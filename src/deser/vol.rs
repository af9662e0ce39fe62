//! Per-tracer volume files (`.vol`, `.trvol`): little-endian int32 count
//! followed by float64 values, one per tracer in table order.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::PipelineError;

/// Reads a volume file, checking the header count against `expected` when
/// given.
pub fn read_volumes(path: &Path, expected: Option<usize>) -> Result<Vec<f64>, PipelineError> {
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
  let mut vols = vec![0.0; n];
  reader.read_f64_into::<LittleEndian>(&mut vols)?;
  Ok(vols)
}

pub fn write_volumes(path: &Path, vols: &[f64]) -> Result<(), PipelineError> {
  let mut writer = BufWriter::new(File::create(path)?);
  writer.write_i32::<LittleEndian>(vols.len() as i32)?;
  for &v in vols {
    writer.write_f64::<LittleEndian>(v)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.vol");
    let vols = vec![1.0, 0.25, 1e30, 0.5];
    write_volumes(&path, &vols).unwrap();
    assert_eq!(read_volumes(&path, Some(4)).unwrap(), vols);
  }

  #[test]
  fn count_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.vol");
    write_volumes(&path, &[1.0, 2.0]).unwrap();
    assert!(matches!(
      read_volumes(&path, Some(3)),
      Err(PipelineError::CountMismatch { .. })
    ));
  }
}
