//! Index file format
//!
//! File layout:
//! ```text
//! VOXIDX 1\n
//! {"key":{...},"locator":"<fingerprint>-<stamp>.pcm","size":..,...}\n
//! {...}\n
//! ```
//!
//! One JSON record per line. Lines are split with nom and each record is
//! decoded on its own, so a damaged or truncated line only costs that entry.

use nom::{
    bytes::complete::{tag, take_until},
    character::complete::{char, u32 as decimal_u32},
    sequence::{delimited, terminated},
    IResult,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Magic prefix of the index header line
pub const INDEX_MAGIC: &[u8] = b"VOXIDX ";

/// Current index format version
pub const INDEX_VERSION: u32 = 1;

/// One persisted index entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Entry identity
    pub key: CacheKey,
    /// Payload file name inside the cache directory
    pub locator: String,
    /// Payload length in bytes
    pub size: u64,
    /// Creation stamp (µs since UNIX epoch)
    pub created_at: u64,
    /// Last access stamp (µs since UNIX epoch)
    pub last_used_at: u64,
    /// Number of hits served
    pub hit_count: u64,
}

/// Result of decoding an index file
#[derive(Debug, Default)]
pub struct DecodedIndex {
    /// Format version from the header
    pub version: u32,
    /// Records that parsed cleanly
    pub records: Vec<IndexRecord>,
    /// Lines that were dropped as unreadable
    pub skipped: usize,
}

/// Parse the header line, returning the format version
pub fn parse_header(input: &[u8]) -> IResult<&[u8], u32> {
    delimited(tag(INDEX_MAGIC), decimal_u32, char('\n'))(input)
}

/// Create the header line for the current version
pub fn create_header() -> Vec<u8> {
    let mut header = INDEX_MAGIC.to_vec();
    header.extend_from_slice(INDEX_VERSION.to_string().as_bytes());
    header.push(b'\n');
    header
}

/// Parse a single `\n`-terminated line, returned without the newline
pub fn parse_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(take_until("\n"), char('\n'))(input)
}

/// Serialize one record as a `\n`-terminated line, ready to append
pub fn encode_record(record: &IndexRecord) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

/// Serialize records into a complete index file image
pub fn encode_index<'a, I>(records: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a IndexRecord>,
{
    let mut out = create_header();
    for record in records {
        out.extend_from_slice(&encode_record(record)?);
    }
    Ok(out)
}

/// Decode an index file image.
///
/// Fails only if the header is unreadable or from a newer version; bad
/// records are counted in [`DecodedIndex::skipped`] and logged.
pub fn decode_index(input: &[u8]) -> Result<DecodedIndex> {
    let (mut rest, version) = parse_header(input)?;
    if version > INDEX_VERSION {
        return Err(Error::Parse(format!(
            "Unsupported index version {} (newest known {})",
            version, INDEX_VERSION
        )));
    }

    let mut decoded = DecodedIndex {
        version,
        ..DecodedIndex::default()
    };

    let mut line_no = 1;
    while !rest.is_empty() {
        line_no += 1;
        let (next, line) = match parse_line(rest) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(line = line_no, bytes = rest.len(), "dropping truncated index record");
                decoded.skipped += 1;
                break;
            }
        };
        rest = next;

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<IndexRecord>(line) {
            Ok(record) => decoded.records.push(record),
            Err(e) => {
                warn!(line = line_no, error = %e, "dropping unparseable index record");
                decoded.skipped += 1;
            }
        }
    }

    Ok(decoded)
}
