//! Minimal FITS support: HEALPix completeness maps stored as single-column
//! BINTABLEs (the healpy convention) and survey catalogues stored as
//! BINTABLEs with RA/DEC/Z columns.
//!
//! Headers are processed as raw 2880-byte blocks of 36 80-byte keyword
//! records; table payloads are big-endian per the FITS standard.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use log::warn;
use thiserror::Error;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;

#[derive(Error, Debug)]
pub enum FitsError {
  #[error("unexpected keyword: expected '{expected}', found '{found}'")]
  UnexpectedKeyword { expected: String, found: String },
  #[error("wrong value for keyword '{keyword}': expected {expected}, found {found}")]
  UnexpectedValue {
    keyword: String,
    expected: String,
    found: String,
  },
  #[error("missing keyword '{0}'")]
  MissingKeyword(String),
  #[error("unsupported TFORM '{0}'")]
  UnsupportedTForm(String),
  #[error("not a HEALPix map: {0}")]
  NotHealpix(String),
  #[error("missing column(s): {0}")]
  MissingColumn(String),
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// All keyword records of one header, in file order.
struct Header {
  cards: Vec<(String, String)>,
}

impl Header {
  fn get(&self, key: &str) -> Option<&str> {
    self
      .cards
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  fn get_str(&self, key: &str) -> Result<&str, FitsError> {
    self.get(key).ok_or_else(|| FitsError::MissingKeyword(key.to_string()))
  }

  fn get_u64(&self, key: &str) -> Result<u64, FitsError> {
    let raw = self.get_str(key)?;
    raw.parse().map_err(|_| FitsError::UnexpectedValue {
      keyword: key.to_string(),
      expected: "an unsigned integer".to_string(),
      found: raw.to_string(),
    })
  }
}

/// Parses one 80-byte record into (keyword, value), stripping the comment
/// and any string quoting.
fn parse_card(card: &[u8]) -> Option<(String, String)> {
  let key = String::from_utf8_lossy(&card[0..8]).trim_end().to_string();
  if key.is_empty() || key == "COMMENT" || key == "HISTORY" {
    return None;
  }
  if &card[8..10] != b"= " {
    return Some((key, String::new()));
  }
  let raw = String::from_utf8_lossy(&card[10..]);
  let value = match raw.find('\'') {
    Some(start) => {
      // quoted string, closing quote wins over any '/' inside
      let rest = &raw[start + 1..];
      let end = rest.find('\'').unwrap_or(rest.len());
      rest[..end].trim_end().to_string()
    }
    None => {
      let unc = raw.split('/').next().unwrap_or("");
      unc.trim().to_string()
    }
  };
  Some((key, value))
}

/// Reads header blocks up to and including the END record.
fn read_header<R: Read>(reader: &mut R) -> Result<Header, FitsError> {
  let mut cards = Vec::new();
  let mut block = [0u8; BLOCK_SIZE];
  loop {
    reader.read_exact(&mut block)?;
    for card in block.chunks(CARD_SIZE) {
      if &card[0..4] == b"END " || &card[0..8] == b"END     " {
        return Ok(Header { cards });
      }
      if let Some(kv) = parse_card(card) {
        cards.push(kv);
      }
    }
  }
}

/// Skips the data section of an HDU given its header geometry.
fn skip_data<R: Read>(reader: &mut R, header: &Header) -> Result<(), FitsError> {
  let bitpix = header.get("BITPIX").and_then(|v| v.parse::<i64>().ok()).unwrap_or(8);
  let naxis = header.get("NAXIS").and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
  let mut n_elems: u64 = if naxis == 0 { 0 } else { 1 };
  for i in 1..=naxis {
    n_elems *= header.get_u64(&format!("NAXIS{}", i))?;
  }
  let n_bytes = n_elems * (bitpix.unsigned_abs() / 8);
  let padded = n_bytes.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64;
  std::io::copy(&mut reader.take(padded), &mut std::io::sink())?;
  Ok(())
}

/// Field type of a scalar BINTABLE column.
#[derive(Debug, Clone, Copy)]
struct ColumnForm {
  repeat: usize,
  elem_bytes: usize,
  is_float: bool,
  is_f64: bool,
}

fn parse_tform(tform: &str) -> Result<ColumnForm, FitsError> {
  let tform = tform.trim();
  let split = tform.find(|c: char| c.is_ascii_alphabetic()).ok_or_else(|| {
    FitsError::UnsupportedTForm(tform.to_string())
  })?;
  let repeat: usize = if split == 0 { 1 } else { tform[..split].parse().unwrap_or(1) };
  let (elem_bytes, is_float, is_f64) = match &tform[split..split + 1] {
    "L" | "B" | "A" | "X" => (1, false, false),
    "I" => (2, false, false),
    "J" | "E" => (4, matches!(&tform[split..split + 1], "E"), false),
    "K" | "D" => (8, matches!(&tform[split..split + 1], "D"), true),
    _ => return Err(FitsError::UnsupportedTForm(tform.to_string())),
  };
  Ok(ColumnForm { repeat, elem_bytes, is_float, is_f64 })
}

fn read_float(buf: &[u8], form: ColumnForm) -> f64 {
  if form.is_f64 {
    f64::from_be_bytes(buf[..8].try_into().unwrap())
  } else {
    f32::from_be_bytes(buf[..4].try_into().unwrap()) as f64
  }
}

/// Reads a HEALPix map from a healpy-style BINTABLE extension. Returns the
/// depth (log2 nside) and the pixel values in NESTED order; RING-ordered
/// maps are reordered on the fly.
pub fn read_map(path: &Path) -> Result<(u8, Vec<f64>), FitsError> {
  let mut reader = BufReader::new(File::open(path)?);
  let primary = read_header(&mut reader)?;
  skip_data(&mut reader, &primary)?;
  let header = read_header(&mut reader)?;

  let xtension = header.get_str("XTENSION")?;
  if xtension != "BINTABLE" {
    return Err(FitsError::UnexpectedValue {
      keyword: "XTENSION".to_string(),
      expected: "BINTABLE".to_string(),
      found: xtension.to_string(),
    });
  }
  let n_bytes_per_row = header.get_u64("NAXIS1")? as usize;
  let n_rows = header.get_u64("NAXIS2")? as usize;
  let form = parse_tform(header.get_str("TFORM1")?)?;
  if !form.is_float {
    return Err(FitsError::UnsupportedTForm(header.get_str("TFORM1")?.to_string()));
  }
  let ordering = header.get("ORDERING").unwrap_or("RING");
  let n_pix = n_rows * form.repeat;
  let nside = ((n_pix / 12) as f64).sqrt() as u32;
  if !nside.is_power_of_two() || 12 * (nside as usize) * (nside as usize) != n_pix {
    return Err(FitsError::NotHealpix(format!("{} pixels is not 12*nside^2", n_pix)));
  }
  if let Some(declared) = header.get("NSIDE") {
    if declared.parse::<u32>() != Ok(nside) {
      warn!(
        "mask {}: NSIDE keyword '{}' disagrees with {} data rows, trusting the data",
        path.display(),
        declared,
        n_rows
      );
    }
  }
  let depth = healpix::depth(nside);

  let col_bytes = form.repeat * form.elem_bytes;
  let n_skip = n_bytes_per_row - col_bytes;
  let mut values = Vec::with_capacity(n_pix);
  let mut elem = vec![0u8; form.elem_bytes];
  let mut sink = vec![0u8; n_skip];
  for _ in 0..n_rows {
    for _ in 0..form.repeat {
      reader.read_exact(&mut elem)?;
      values.push(read_float(&elem, form));
    }
    reader.read_exact(&mut sink)?;
  }

  let values = match ordering {
    "NESTED" => values,
    "RING" => {
      let layer = healpix::nested::get(depth);
      let mut nested = vec![0.0; n_pix];
      for (ring_idx, &v) in values.iter().enumerate() {
        nested[layer.from_ring(ring_idx as u64) as usize] = v;
      }
      nested
    }
    other => {
      return Err(FitsError::UnexpectedValue {
        keyword: "ORDERING".to_string(),
        expected: "RING or NESTED".to_string(),
        found: other.to_string(),
      })
    }
  };
  Ok((depth, values))
}

fn push_card(block: &mut Vec<u8>, key: &str, value: &str) {
  let mut card = format!("{:<8}= {:>20}", key, value);
  card.truncate(CARD_SIZE);
  let mut bytes = card.into_bytes();
  bytes.resize(CARD_SIZE, b' ');
  block.extend_from_slice(&bytes);
}

fn push_str_card(block: &mut Vec<u8>, key: &str, value: &str) {
  push_card(block, key, &format!("'{:<8}'", value));
}

fn push_end(block: &mut Vec<u8>) {
  let mut card = b"END".to_vec();
  card.resize(CARD_SIZE, b' ');
  block.extend_from_slice(&card);
  let pad = block.len().next_multiple_of(BLOCK_SIZE) - block.len();
  block.extend(std::iter::repeat(b' ').take(pad));
}

/// Writes a HEALPix map as a single-column f64 BINTABLE in NESTED order.
pub fn write_map(path: &Path, depth: u8, values: &[f64]) -> Result<(), FitsError> {
  let nside = healpix::nside(depth);
  let n_pix = values.len();

  let mut header = Vec::with_capacity(2 * BLOCK_SIZE);
  push_card(&mut header, "SIMPLE", "T");
  push_card(&mut header, "BITPIX", "8");
  push_card(&mut header, "NAXIS", "0");
  push_card(&mut header, "EXTEND", "T");
  push_end(&mut header);

  push_str_card(&mut header, "XTENSION", "BINTABLE");
  push_card(&mut header, "BITPIX", "8");
  push_card(&mut header, "NAXIS", "2");
  push_card(&mut header, "NAXIS1", "8");
  push_card(&mut header, "NAXIS2", &n_pix.to_string());
  push_card(&mut header, "PCOUNT", "0");
  push_card(&mut header, "GCOUNT", "1");
  push_card(&mut header, "TFIELDS", "1");
  push_str_card(&mut header, "TTYPE1", "COMPLETENESS");
  push_str_card(&mut header, "TFORM1", "D");
  push_str_card(&mut header, "PIXTYPE", "HEALPIX");
  push_str_card(&mut header, "ORDERING", "NESTED");
  push_str_card(&mut header, "COORDSYS", "C");
  push_str_card(&mut header, "INDXSCHM", "IMPLICIT");
  push_card(&mut header, "NSIDE", &nside.to_string());
  push_card(&mut header, "FIRSTPIX", "0");
  push_card(&mut header, "LASTPIX", &(n_pix.saturating_sub(1)).to_string());
  push_end(&mut header);

  let mut writer = BufWriter::new(File::create(path)?);
  writer.write_all(&header)?;
  for &v in values {
    writer.write_f64::<BigEndian>(v)?;
  }
  let data_bytes = 8 * n_pix;
  let pad = data_bytes.next_multiple_of(BLOCK_SIZE) - data_bytes;
  writer.write_all(&vec![0u8; pad])?;
  Ok(())
}

/// Reads RA, DEC and Z columns (degrees, degrees, redshift) from the first
/// BINTABLE extension of a survey catalogue.
pub fn read_survey_catalogue(path: &Path) -> Result<Vec<[f64; 3]>, FitsError> {
  let mut reader = BufReader::new(File::open(path)?);
  let primary = read_header(&mut reader)?;
  skip_data(&mut reader, &primary)?;
  let header = read_header(&mut reader)?;

  let n_bytes_per_row = header.get_u64("NAXIS1")? as usize;
  let n_rows = header.get_u64("NAXIS2")? as usize;
  let n_fields = header.get_u64("TFIELDS")? as usize;

  // byte offset and form of every column, in declaration order
  let mut offset = 0usize;
  let mut wanted: [Option<(usize, ColumnForm)>; 3] = [None, None, None];
  for i in 1..=n_fields {
    let form = parse_tform(header.get_str(&format!("TFORM{}", i))?)?;
    let name = header.get(&format!("TTYPE{}", i)).unwrap_or("").trim().to_uppercase();
    let slot = match name.as_str() {
      "RA" => Some(0),
      "DEC" => Some(1),
      "Z" | "REDSHIFT" => Some(2),
      _ => None,
    };
    if let Some(slot) = slot {
      if !form.is_float || form.repeat != 1 {
        return Err(FitsError::UnsupportedTForm(format!(
          "column {} must be a scalar float",
          name
        )));
      }
      wanted[slot] = Some((offset, form));
    }
    offset += form.repeat * form.elem_bytes;
  }
  if offset > n_bytes_per_row {
    return Err(FitsError::UnexpectedValue {
      keyword: "NAXIS1".to_string(),
      expected: format!("at least {}", offset),
      found: n_bytes_per_row.to_string(),
    });
  }
  let missing: Vec<&str> = ["RA", "DEC", "Z"]
    .iter()
    .zip(&wanted)
    .filter(|(_, w)| w.is_none())
    .map(|(name, _)| *name)
    .collect();
  if !missing.is_empty() {
    return Err(FitsError::MissingColumn(missing.join(", ")));
  }

  let mut rows = Vec::with_capacity(n_rows);
  let mut buf = vec![0u8; n_bytes_per_row];
  for _ in 0..n_rows {
    reader.read_exact(&mut buf)?;
    let mut row = [0.0; 3];
    for (slot, w) in wanted.iter().enumerate() {
      let (off, form) = w.unwrap();
      row[slot] = read_float(&buf[off..], form);
    }
    rows.push(row);
  }
  Ok(rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn map_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mask.fits");
    let depth = 2; // nside 4, 192 pixels
    let values: Vec<f64> = (0..192).map(|i| (i % 5) as f64 / 4.0).collect();
    write_map(&path, depth, &values).unwrap();
    let (depth2, values2) = read_map(&path).unwrap();
    assert_eq!(depth2, depth);
    assert_eq!(values2, values);
  }

  #[test]
  fn ring_map_is_reordered() {
    let dir = tempfile::tempdir().unwrap();
    let nested_path = dir.path().join("nested.fits");
    let ring_path = dir.path().join("ring.fits");
    let depth = 1; // nside 2, 48 pixels
    let layer = healpix::nested::get(depth);
    let nested: Vec<f64> = (0..48).map(|i| i as f64).collect();
    let mut ring = vec![0.0; 48];
    for (h, &v) in nested.iter().enumerate() {
      ring[layer.to_ring(h as u64) as usize] = v;
    }
    write_map(&nested_path, depth, &nested).unwrap();
    // forge a RING-ordered file by rewriting the ORDERING card
    let mut bytes = std::fs::read(&nested_path).unwrap();
    let pos = bytes
      .windows(8)
      .position(|w| w == b"'NESTED " )
      .unwrap();
    bytes[pos..pos + 8].copy_from_slice(b"'RING   ");
    // swap in ring-ordered payload
    let data_start = bytes.len() - (48usize * 8).next_multiple_of(2880);
    for (i, v) in ring.iter().enumerate() {
      bytes[data_start + 8 * i..data_start + 8 * i + 8].copy_from_slice(&v.to_be_bytes());
    }
    std::fs::write(&ring_path, &bytes).unwrap();

    let (_, from_ring) = read_map(&ring_path).unwrap();
    assert_eq!(from_ring, nested);
  }

  #[test]
  fn survey_catalogue_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.fits");
    // hand-build a catalogue with one extra column to skip
    let mut header = Vec::new();
    push_card(&mut header, "SIMPLE", "T");
    push_card(&mut header, "BITPIX", "8");
    push_card(&mut header, "NAXIS", "0");
    push_end(&mut header);
    push_str_card(&mut header, "XTENSION", "BINTABLE");
    push_card(&mut header, "BITPIX", "8");
    push_card(&mut header, "NAXIS", "2");
    push_card(&mut header, "NAXIS1", "28");
    push_card(&mut header, "NAXIS2", "2");
    push_card(&mut header, "PCOUNT", "0");
    push_card(&mut header, "GCOUNT", "1");
    push_card(&mut header, "TFIELDS", "4");
    push_str_card(&mut header, "TTYPE1", "RA");
    push_str_card(&mut header, "TFORM1", "D");
    push_str_card(&mut header, "TTYPE2", "DEC");
    push_str_card(&mut header, "TFORM2", "D");
    push_str_card(&mut header, "TTYPE3", "WEIGHT");
    push_str_card(&mut header, "TFORM3", "E");
    push_str_card(&mut header, "TTYPE4", "Z");
    push_str_card(&mut header, "TFORM4", "D");
    push_end(&mut header);
    let mut bytes = header;
    for row in [[150.0f64, 2.0, 9.0, 0.5], [210.0, -5.0, 9.0, 0.6]] {
      bytes.extend_from_slice(&row[0].to_be_bytes());
      bytes.extend_from_slice(&row[1].to_be_bytes());
      bytes.extend_from_slice(&(row[2] as f32).to_be_bytes());
      bytes.extend_from_slice(&row[3].to_be_bytes());
    }
    let pad = bytes.len().next_multiple_of(2880) - bytes.len();
    bytes.extend(std::iter::repeat(0u8).take(pad));
    std::fs::write(&path, &bytes).unwrap();

    let rows = read_survey_catalogue(&path).unwrap();
    assert_eq!(rows, vec![[150.0, 2.0, 0.5], [210.0, -5.0, 0.6]]);
  }
}
