//! Gzip-compressed NumPy `.npy` arrays of `(N, 2)` little-endian doubles.
//!
//! Written as format version 1.0 with the header padded to a 64-byte
//! boundary. Reading accepts version 1.x and 2.x headers, C or Fortran order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Result, SimError};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGN: usize = 64;

/// Serialize rows as an uncompressed `.npy` v1.0 byte buffer.
pub fn encode(rows: &[[f64; 2]]) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, 2), }}",
        rows.len()
    );
    // magic + version + u16 length + dict + trailing newline
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let pad = (ALIGN - unpadded % ALIGN) % ALIGN;
    let header_len = dict.len() + pad + 1;

    let mut out = Vec::with_capacity(unpadded + pad + rows.len() * 16);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.resize(out.len() + pad, b' ');
    out.push(b'\n');
    for row in rows {
        out.extend_from_slice(&row[0].to_le_bytes());
        out.extend_from_slice(&row[1].to_le_bytes());
    }
    out
}

/// Parse an uncompressed `.npy` buffer holding an `(N, 2)` `<f8` array.
pub fn decode(bytes: &[u8]) -> Result<Vec<[f64; 2]>> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(decode_err("missing .npy magic"));
    }
    let (header_start, header_len) = match bytes[6] {
        1 => (10, u16::from_le_bytes([bytes[8], bytes[9]]) as usize),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(decode_err("truncated header"));
            }
            (
                12,
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            )
        }
        v => return Err(decode_err(format!("unsupported .npy version {v}"))),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(decode_err("truncated header"));
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| decode_err("header is not text"))?;

    let descr = quoted_value(header, "descr").ok_or_else(|| decode_err("missing descr"))?;
    if descr != "<f8" {
        return Err(decode_err(format!("unsupported dtype {descr}")));
    }
    let fortran = match bare_value(header, "fortran_order") {
        Some(v) if v.starts_with("False") => false,
        Some(v) if v.starts_with("True") => true,
        _ => return Err(decode_err("missing fortran_order")),
    };
    let shape = shape_value(header).ok_or_else(|| decode_err("missing shape"))?;
    let rows = match shape.as_slice() {
        [n, 2] => *n,
        [0] => 0,
        other => return Err(decode_err(format!("expected shape (N, 2), got {other:?}"))),
    };

    let data = &bytes[data_start..];
    let expected = rows
        .checked_mul(16)
        .ok_or_else(|| decode_err("shape overflows"))?;
    if data.len() != expected {
        return Err(decode_err(format!(
            "expected {expected} data bytes, found {}",
            data.len()
        )));
    }

    let value = |i: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&data[i * 8..i * 8 + 8]);
        f64::from_le_bytes(b)
    };
    Ok((0..rows)
        .map(|r| {
            if fortran {
                [value(r), value(rows + r)]
            } else {
                [value(2 * r), value(2 * r + 1)]
            }
        })
        .collect())
}

/// Write rows to a gzip-compressed `.npy` file.
pub fn write_npy_gz(path: &Path, rows: &[[f64; 2]]) -> Result<()> {
    let file = File::create(path).map_err(|e| SimError::from_io(e, path))?;
    let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
    gz.write_all(&encode(rows))?;
    gz.finish()?.flush()?;
    Ok(())
}

/// Read rows from a gzip-compressed `.npy` file.
pub fn read_npy_gz(path: &Path) -> Result<Vec<[f64; 2]>> {
    let file = File::open(path).map_err(|e| SimError::from_io(e, path))?;
    let mut bytes = Vec::new();
    GzDecoder::new(BufReader::new(file))
        .read_to_end(&mut bytes)
        .map_err(|e| decode_err(format!("{}: {e}", path.display())))?;
    decode(&bytes).map_err(|e| match e {
        SimError::Decode(msg) => decode_err(format!("{}: {msg}", path.display())),
        other => other,
    })
}

fn decode_err(msg: impl Into<String>) -> SimError {
    SimError::Decode(msg.into())
}

/// Text following `'key':` with leading whitespace removed.
fn bare_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{key}':");
    let start = header.find(&pattern)? + pattern.len();
    Some(header[start..].trim_start())
}

fn quoted_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let rest = bare_value(header, key)?;
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let rest = &rest[1..];
    rest.find(quote).map(|end| &rest[..end])
}

fn shape_value(header: &str) -> Option<Vec<usize>> {
    let rest = bare_value(header, "shape")?.strip_prefix('(')?;
    let inner = &rest[..rest.find(')')?];
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('L').parse().ok())
        .collect()
}
