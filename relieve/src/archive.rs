//! Archive bundle decompression and member extraction.
//!
//! Tiles ship inside gzip-compressed block containers: a sequence of 512-byte
//! header blocks, each followed by the member's data padded to the next block
//! boundary. The container is parsed here directly; only the gzip layer is
//! delegated to `flate2`.
//!
//! # Header layout
//!
//! | bytes   | field                                   |
//! |---------|-----------------------------------------|
//! | 0–99    | member name, NUL-terminated or padded   |
//! | 124–135 | data size, ASCII octal                  |
//! | 156     | type flag                               |
//! | 257–262 | `ustar\0` magic (POSIX headers only)    |
//! | 345–499 | name prefix (POSIX headers only)        |
//!
//! A header whose first byte is zero ends the archive. The header checksum is
//! not verified. Extended-header and long-name records (type flags `x`, `g`,
//! `L`, `K`) describe the member that follows them and are skipped.

use std::borrow::Cow;
use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;

use crate::error::{Result, TerrainError};

/// Size of a header block and of the data padding unit.
pub const BLOCK_SIZE: usize = 512;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const NAME: std::ops::Range<usize> = 0..100;
const SIZE: std::ops::Range<usize> = 124..136;
const TYPEFLAG: usize = 156;
const MAGIC: std::ops::Range<usize> = 257..263;
const PREFIX: std::ops::Range<usize> = 345..500;

/// One member of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct Member<'a> {
    /// Full member name, including any directory path.
    pub name: Cow<'a, str>,
    /// Offset of the member's data from the start of the container.
    pub offset: usize,
    /// The member's data.
    pub data: &'a [u8],
}

impl Member<'_> {
    /// Whether this member answers to `wanted`, exactly or by file name.
    pub fn matches(&self, wanted: &str) -> bool {
        self.name == wanted || basename(&self.name) == wanted
    }
}

fn basename(name: &str) -> &str {
    name.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(name)
}

/// Iterator over the members of a decompressed container.
///
/// Stops at the first zero header or when fewer than a block of bytes
/// remain. Yields an error and then stops on a broken header.
#[derive(Debug, Clone)]
pub struct Members<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

/// Iterate over the members of `data`.
pub fn members(data: &[u8]) -> Members<'_> {
    Members {
        data,
        pos: 0,
        done: false,
    }
}

impl<'a> Iterator for Members<'a> {
    type Item = Result<Member<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let data = self.data;
            let header = match data.get(self.pos..self.pos + BLOCK_SIZE) {
                Some(block) if block[0] != 0 => block,
                _ => {
                    self.done = true;
                    return None;
                }
            };

            let result = self.read_member(header);
            if result.is_err() {
                self.done = true;
            } else if is_metadata_record(header) {
                continue;
            }
            return Some(result);
        }
    }
}

/// pax extended headers (`x`, `g`) and GNU long-name/long-link records (`L`, `K`).
fn is_metadata_record(header: &[u8]) -> bool {
    matches!(header[TYPEFLAG], b'x' | b'g' | b'L' | b'K')
}

impl<'a> Members<'a> {
    fn read_member(&mut self, header: &'a [u8]) -> Result<Member<'a>> {
        let data = self.data;
        let size = parse_octal(&header[SIZE]).ok_or_else(|| {
            TerrainError::MalformedArchive(format!(
                "unreadable size field in header at offset {}",
                self.pos
            ))
        })?;
        let size = usize::try_from(size)
            .map_err(|_| TerrainError::MalformedArchive(format!("member size {} too large", size)))?;

        let start = self.pos + BLOCK_SIZE;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                TerrainError::MalformedArchive(format!(
                    "member at offset {} declares {} bytes but only {} remain",
                    self.pos,
                    size,
                    data.len().saturating_sub(start)
                ))
            })?;

        self.pos = start + size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

        Ok(Member {
            name: member_name(header),
            offset: start,
            data: &data[start..end],
        })
    }
}

/// Text of a NUL-terminated, NUL-padded field.
fn field_str(field: &[u8]) -> Cow<'_, str> {
    let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..len])
}

fn member_name(header: &[u8]) -> Cow<'_, str> {
    let name = field_str(&header[NAME]);
    if &header[MAGIC] != b"ustar\0" {
        return name;
    }
    let prefix = field_str(&header[PREFIX]);
    if prefix.is_empty() {
        name
    } else {
        Cow::Owned(format!("{}/{}", prefix, name))
    }
}

/// Parse an ASCII octal field padded with spaces or NULs.
///
/// An empty field reads as zero; any other non-octal byte is an error.
fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits = field
        .iter()
        .skip_while(|b| **b == b' ')
        .take_while(|b| **b != 0 && **b != b' ');

    let mut value: u64 = 0;
    for &b in digits {
        if !(b'0'..=b'7').contains(&b) {
            return None;
        }
        value = value.checked_mul(8)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(value)
}

/// Whether `data` looks like an uncompressed container.
///
/// True when the first block is all zeros (an empty archive) or when the
/// first member's header parses and its data fits in `data`.
pub fn is_container(data: &[u8]) -> bool {
    match data.get(..BLOCK_SIZE) {
        Some(first) if first.iter().all(|b| *b == 0) => true,
        Some(_) => matches!(members(data).next(), Some(Ok(_))),
        None => false,
    }
}

/// Find a member by name and return its data as a borrowed slice.
///
/// Returns `Ok(None)` when the archive ends without a match.
///
/// # Errors
///
/// Returns [`TerrainError::MalformedArchive`] if a header preceding the match
/// is broken.
pub fn find_member<'a>(data: &'a [u8], name: &str) -> Result<Option<&'a [u8]>> {
    for member in members(data) {
        let member = member?;
        if member.matches(name) {
            return Ok(Some(member.data));
        }
    }
    Ok(None)
}

/// Extract a member's data from a decompressed container without copying.
pub fn extract_member(data: &Bytes, name: &str) -> Result<Option<Bytes>> {
    Ok(find_member(data, name)?.map(|slice| data.slice_ref(slice)))
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4));
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Decompress a fetched archive bundle.
///
/// The bundle is expected to be one gzip stream wrapping a container. If it
/// does not decompress, the same bytes are accepted when they already look
/// like an uncompressed container.
///
/// # Errors
///
/// Returns [`TerrainError::Decompression`] when neither interpretation holds.
pub fn decompress_archive(path: &str, data: Bytes) -> Result<Bytes> {
    let gzip_error = match gunzip(&data) {
        Ok(out) => return Ok(Bytes::from(out)),
        Err(e) => e,
    };

    if is_container(&data) {
        tracing::debug!(archive = %path, "Archive is not gzip, using it as an uncompressed container");
        return Ok(data);
    }

    Err(TerrainError::Decompression {
        path: path.to_string(),
        reason: gzip_error.to_string(),
    })
}

/// Prepare a standalone raster payload: gunzip it if it carries the gzip magic.
pub fn decompress_payload(path: &str, data: Bytes) -> Result<Bytes> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(data);
    }
    gunzip(&data)
        .map(Bytes::from)
        .map_err(|e| TerrainError::Decompression {
            path: path.to_string(),
            reason: e.to_string(),
        })
}
