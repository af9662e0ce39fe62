use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::Path;

use flate2::read::GzDecoder;

const GZ_MAGIC_NUM: [u8; 2] = [0x1F, 0x8B];

/// Opens a text file for reading, decompressing on the fly when the gzip
/// magic number is present.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>, std::io::Error> {
  let mut reader = BufReader::new(File::open(path)?);
  let mut magic = [0u8; 2];
  let is_gz = match reader.read_exact(&mut magic) {
    Ok(()) => magic == GZ_MAGIC_NUM,
    Err(_) => false, // shorter than two bytes, certainly not gzip
  };
  reader.rewind()?;
  if is_gz {
    Ok(Box::new(BufReader::new(GzDecoder::new(reader))))
  } else {
    Ok(Box::new(reader))
  }
}
