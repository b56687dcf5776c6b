//! Per-series point codec and the block container wrapped around it on disk.
//!
//! The codec is a streaming bit-packed chunk: delta-of-delta timestamps written as bit-level
//! varints, and Gorilla-style XOR + leading/trailing-zero packing for values. Appends encode
//! immediately, so the in-memory store and the persisted bytes are the same representation.

use crate::error::DbError;
use crate::types::{Point, Timestamp};

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Read;

/// Per-block compression. Serde: table with a lowercase `type` and, for zstd, a `level`
/// (e.g. `type = "zstd"`, `level = 3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "level", rename_all = "lowercase")]
pub enum BlockCompression {
    #[default]
    None,
    Lz4,
    /// zstd at the given level.
    Zstd(i32),
}

const COMPRESS_NONE: u8 = 0;
const COMPRESS_LZ4: u8 = 1;
const COMPRESS_ZSTD: u8 = 2;

// compression(1) + param(4) + uncompressed_len(4) + crc32(4)
const BLOCK_HEADER_LEN: usize = 13;
const MAX_BLOCK_LEN: usize = 512 * 1024 * 1024;

/// Streaming encode/iterate codec consumed by the series store.
pub trait PointCodec: Default + Send + std::fmt::Debug {
    type Iter<'a>: Iterator<Item = Result<Point, DbError>>
    where
        Self: 'a;

    /// Appends a point. Callers guarantee non-decreasing timestamps.
    fn append(&mut self, point: Point);

    /// Restartable, finite iteration over every appended point in append order.
    fn iter(&self) -> Self::Iter<'_>;

    /// Self-describing encoded bytes, decodable with [`decode_chunk`].
    fn bytes(&self) -> Vec<u8>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn last_ts(&self) -> Option<Timestamp>;
}

/// Gorilla-style chunk.
#[derive(Debug, Default)]
pub struct XorChunk {
    bits: BitWriter,
    count: u32,
    t_last: i64,
    t_delta: i64,
    v_last: u64,
    leading: u8,
    trailing: u8,
    sigbits: u8,
}

impl PointCodec for XorChunk {
    type Iter<'a> = XorIter<'a>;

    fn append(&mut self, point: Point) {
        let v = point.value.to_bits();
        if self.count == 0 {
            self.bits.push_bits(point.ts as u64, 64);
            self.bits.push_bits(v, 64);
            self.t_last = point.ts;
            self.v_last = v;
            self.count = 1;
            return;
        }

        let delta = point.ts.wrapping_sub(self.t_last);
        let dod = delta.wrapping_sub(self.t_delta);
        if dod == 0 {
            self.bits.push_bit(false);
        } else {
            self.bits.push_bit(true);
            self.bits.push_var(zigzag(dod));
        }
        self.t_delta = delta;
        self.t_last = point.ts;

        let x = self.v_last ^ v;
        if x == 0 {
            self.bits.push_bit(false);
        } else {
            self.bits.push_bit(true);
            let leading = x.leading_zeros() as u8;
            let trailing = x.trailing_zeros() as u8;
            if self.sigbits != 0 && leading >= self.leading && trailing >= self.trailing {
                self.bits.push_bit(false);
                self.bits.push_bits(x >> self.trailing, self.sigbits);
            } else {
                let sigbits = 64 - leading - trailing;
                self.bits.push_bit(true);
                self.bits.push_bits(leading as u64, 6);
                self.bits.push_bits((sigbits - 1) as u64, 6);
                self.bits.push_bits(x >> trailing, sigbits);
                self.leading = leading;
                self.trailing = trailing;
                self.sigbits = sigbits;
            }
        }
        self.v_last = v;
        self.count += 1;
    }

    fn iter(&self) -> Self::Iter<'_> {
        XorIter::new(&self.bits.buf, self.count as usize)
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.bits.buf.len());
        write_var_u32(&mut out, self.count);
        out.extend_from_slice(&self.bits.buf);
        out
    }

    fn len(&self) -> usize {
        self.count as usize
    }

    fn last_ts(&self) -> Option<Timestamp> {
        (self.count > 0).then_some(self.t_last)
    }
}

/// Iterates a chunk produced by [`PointCodec::bytes`].
pub fn decode_chunk(bytes: &[u8]) -> Result<XorIter<'_>, DbError> {
    let mut cur = std::io::Cursor::new(bytes);
    let count = read_var_u32(&mut cur).map_err(DbError::corruption)? as usize;
    let start = cur.position() as usize;
    Ok(XorIter::new(&bytes[start..], count))
}

pub struct XorIter<'a> {
    br: BitReader<'a>,
    remaining: usize,
    first: bool,
    t_last: i64,
    t_delta: i64,
    v_last: u64,
    leading: u8,
    trailing: u8,
    sigbits: u8,
}

impl<'a> XorIter<'a> {
    fn new(data: &'a [u8], count: usize) -> Self {
        Self {
            br: BitReader::new(data),
            remaining: count,
            first: true,
            t_last: 0,
            t_delta: 0,
            v_last: 0,
            leading: 0,
            trailing: 0,
            sigbits: 0,
        }
    }

    fn read_next(&mut self) -> Result<Point, DbError> {
        if self.first {
            self.first = false;
            self.t_last = self.br.read_bits(64)? as i64;
            self.v_last = self.br.read_bits(64)?;
            return Ok(Point::new(self.t_last, f64::from_bits(self.v_last)));
        }

        let dod = if self.br.read_bit()? {
            unzigzag(self.br.read_var()?)
        } else {
            0
        };
        self.t_delta = self.t_delta.wrapping_add(dod);
        self.t_last = self.t_last.wrapping_add(self.t_delta);

        if self.br.read_bit()? {
            if self.br.read_bit()? {
                let leading = self.br.read_bits(6)? as u8;
                let sigbits = self.br.read_bits(6)? as u8 + 1;
                if leading as u32 + sigbits as u32 > 64 {
                    return Err(DbError::corruption("Invalid Gorilla bit widths"));
                }
                self.leading = leading;
                self.sigbits = sigbits;
                self.trailing = 64 - leading - sigbits;
            } else if self.sigbits == 0 {
                return Err(DbError::corruption(
                    "Gorilla reuse window before initialization",
                ));
            }
            let significant = self.br.read_bits(self.sigbits)?;
            self.v_last ^= significant << self.trailing;
        }
        Ok(Point::new(self.t_last, f64::from_bits(self.v_last)))
    }
}

impl Iterator for XorIter<'_> {
    type Item = Result<Point, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.read_next() {
            Ok(p) => {
                self.remaining -= 1;
                Some(Ok(p))
            }
            Err(e) => {
                // Stop after the first decode error.
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

// --- Block container ---

/// Wraps chunk bytes in the persisted block container, compressing the payload if configured.
pub fn encode_block(chunk: &[u8], compression: BlockCompression) -> Result<Vec<u8>, DbError> {
    let uncompressed_len: u32 = chunk
        .len()
        .try_into()
        .map_err(|_| DbError::Internal("Series block payload too large".to_string()))?;
    let crc = crc32(chunk);

    let (codec, param, stored): (u8, u32, Cow<'_, [u8]>) = match compression {
        BlockCompression::None => (COMPRESS_NONE, 0, Cow::Borrowed(chunk)),
        BlockCompression::Lz4 => (
            COMPRESS_LZ4,
            0,
            Cow::Owned(lz4_flex::compress_prepend_size(chunk)),
        ),
        BlockCompression::Zstd(level) => {
            let compressed = zstd::bulk::compress(chunk, level)
                .map_err(|e| DbError::Internal(format!("Zstd compress failed: {}", e)))?;
            (
                COMPRESS_ZSTD,
                u32::from_le_bytes(level.to_le_bytes()),
                Cow::Owned(compressed),
            )
        }
    };

    let mut buf = Vec::with_capacity(BLOCK_HEADER_LEN + stored.len());
    buf.push(codec);
    write_u32(&mut buf, param);
    write_u32(&mut buf, uncompressed_len);
    write_u32(&mut buf, crc);
    buf.extend_from_slice(&stored);
    Ok(buf)
}

/// Unwraps a block container, returning the verified chunk bytes.
pub fn decode_block(block: &[u8]) -> Result<Cow<'_, [u8]>, DbError> {
    if block.len() < BLOCK_HEADER_LEN {
        return Err(DbError::corruption("Truncated series block header"));
    }
    let mut cur = std::io::Cursor::new(block);
    let mut codec = [0u8; 1];
    cur.read_exact(&mut codec)?;
    let _param = read_u32(&mut cur)?;
    let uncompressed_len = read_u32(&mut cur)? as usize;
    let expected_crc = read_u32(&mut cur)?;
    if uncompressed_len > MAX_BLOCK_LEN {
        return Err(DbError::corruption(
            "Refusing to allocate oversized series block",
        ));
    }
    let stored = &block[BLOCK_HEADER_LEN..];

    let payload: Cow<'_, [u8]> = match codec[0] {
        COMPRESS_NONE => Cow::Borrowed(stored),
        COMPRESS_LZ4 => {
            // The lz4 payload carries its own size prefix; it must agree with the container.
            let (prefix, body) = stored
                .split_first_chunk::<4>()
                .ok_or_else(|| DbError::corruption("LZ4 payload missing its size prefix"))?;
            let declared = u32::from_le_bytes(*prefix) as usize;
            if declared != uncompressed_len {
                return Err(DbError::corruption(format!(
                    "LZ4 size prefix {} disagrees with block length {}",
                    declared, uncompressed_len
                )));
            }
            Cow::Owned(
                lz4_flex::decompress(body, uncompressed_len).map_err(|e| {
                    DbError::corruption(format!("LZ4 decompress failed: {}", e))
                })?,
            )
        }
        COMPRESS_ZSTD => Cow::Owned(zstd::bulk::decompress(stored, uncompressed_len).map_err(
            |e| DbError::corruption(format!("Zstd decompress failed: {}", e)),
        )?),
        other => {
            return Err(DbError::corruption(format!(
                "Unknown compression codec {}",
                other
            )))
        }
    };

    if payload.len() != uncompressed_len {
        return Err(DbError::corruption(
            "Series block decompressed length mismatch",
        ));
    }
    if crc32(&payload) != expected_crc {
        return Err(DbError::corruption("Series block payload CRC mismatch"));
    }
    Ok(payload)
}

// --- Helpers (binary, varint, bits) ---

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32, DbError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}
pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, DbError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

fn write_var_u32(buf: &mut Vec<u8>, mut v: u32) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn read_var_u32<R: Read>(r: &mut R) -> Result<u32, String> {
    let mut out: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..5 {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)
            .map_err(|e| format!("Truncated varint: {}", e))?;
        out |= ((b[0] & 0x7F) as u64) << shift;
        if (b[0] & 0x80) == 0 {
            return u32::try_from(out).map_err(|_| "Varint does not fit in u32".to_string());
        }
        shift += 7;
    }
    Err("Varint too long".to_string())
}

#[inline]
fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[derive(Debug, Default)]
struct BitWriter {
    buf: Vec<u8>,
    // Unused low bits in the last byte of `buf`.
    free: u8,
}

impl BitWriter {
    fn push_bit(&mut self, bit: bool) {
        if self.free == 0 {
            self.buf.push(0);
            self.free = 8;
        }
        self.free -= 1;
        if bit {
            if let Some(last) = self.buf.last_mut() {
                *last |= 1 << self.free;
            }
        }
    }

    fn push_bits(&mut self, mut v: u64, count: u8) {
        if count == 0 {
            return;
        }
        if count < 64 {
            v &= (1u64 << count) - 1;
        }
        for i in (0..count).rev() {
            self.push_bit(((v >> i) & 1) == 1);
        }
    }

    /// 7-bit groups, least significant first, each followed by a continuation bit.
    fn push_var(&mut self, mut v: u64) {
        loop {
            self.push_bits(v & 0x7F, 7);
            v >>= 7;
            self.push_bit(v != 0);
            if v == 0 {
                break;
            }
        }
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<bool, DbError> {
        let byte = self
            .data
            .get(self.pos / 8)
            .ok_or_else(|| DbError::corruption("Truncated point stream"))?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, count: u8) -> Result<u64, DbError> {
        let mut out = 0u64;
        for _ in 0..count {
            out <<= 1;
            out |= if self.read_bit()? { 1 } else { 0 };
        }
        Ok(out)
    }

    fn read_var(&mut self) -> Result<u64, DbError> {
        let mut out = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= 64 {
                return Err(DbError::corruption("Bit varint too long"));
            }
            out |= self.read_bits(7)? << shift;
            shift += 7;
            if !self.read_bit()? {
                return Ok(out);
            }
        }
    }
}
