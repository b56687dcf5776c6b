//! On-disk framing of a segment file.
//!
//! ```text
//! 0               data_size (u64 LE)
//! 8               meta_size (u64 LE)
//! 16              data blob (data_size bytes)
//! 16 + data_size  metadata  (meta_size bytes)
//! ```
//!
//! Offsets recorded in the metadata are relative to the start of the data blob.

use crate::codec::{read_u64, write_u64};
use crate::error::DbError;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub data_size: u64,
    pub meta_size: u64,
}

impl SegmentHeader {
    /// Absolute byte range of the data blob.
    pub fn data_range(&self) -> Result<Range<usize>, DbError> {
        let end = usize::try_from(self.data_size)
            .ok()
            .and_then(|len| len.checked_add(HEADER_LEN))
            .ok_or_else(|| DbError::corruption("data_size exceeds address space"))?;
        Ok(HEADER_LEN..end)
    }

    /// Absolute byte range of the metadata.
    pub fn meta_range(&self) -> Result<Range<usize>, DbError> {
        let start = self.data_range()?.end;
        let len = usize::try_from(self.meta_size)
            .map_err(|_| DbError::corruption("meta_size exceeds address space"))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| DbError::corruption("segment size overflows"))?;
        Ok(start..end)
    }
}

/// Reads the two length prefixes and checks that both regions fit in `bytes`.
pub fn read_header(bytes: &[u8]) -> Result<SegmentHeader, DbError> {
    if bytes.len() < HEADER_LEN {
        return Err(DbError::corruption(format!(
            "Segment of {} bytes is shorter than its {}-byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }
    let mut cur = &bytes[..HEADER_LEN];
    let data_size = read_u64(&mut cur)?;
    let meta_size = read_u64(&mut cur)?;

    let header = SegmentHeader {
        data_size,
        meta_size,
    };
    let meta = header.meta_range()?;
    if meta.end > bytes.len() {
        return Err(DbError::corruption(format!(
            "Segment truncated: header declares {} bytes, found {}",
            meta.end,
            bytes.len()
        )));
    }
    Ok(header)
}

/// Frames `data` and `meta` into one contiguous segment image.
pub fn encode_segment(meta: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + data.len() + meta.len());
    write_u64(&mut out, data.len() as u64);
    write_u64(&mut out, meta.len() as u64);
    out.extend_from_slice(data);
    out.extend_from_slice(meta);
    out
}

/// Writes a segment file atomically: temp file, fsync, rename, fsync of the parent directory.
pub fn write_segment_file(path: &Path, meta: &[u8], data: &[u8]) -> Result<(), DbError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| DbError::Internal(format!("not a file path: {}", path.display())))?;
    let mut tmp_name = std::ffi::OsString::from(".tmp_");
    tmp_name.push(file_name);
    let tmp_path = path.with_file_name(tmp_name);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    let mut w = BufWriter::new(file);
    w.write_all(&(data.len() as u64).to_le_bytes())?;
    w.write_all(&(meta.len() as u64).to_le_bytes())?;
    w.write_all(data)?;
    w.write_all(meta)?;
    w.flush()?;
    w.get_ref().sync_data()?;
    drop(w);

    fs::rename(&tmp_path, path)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        sync_dir(dir)?;
    }
    Ok(())
}

fn sync_dir(dir: &Path) -> Result<(), DbError> {
    let d = File::open(dir).map_err(DbError::Io)?;
    d.sync_data().map_err(DbError::Io)?;
    Ok(())
}
