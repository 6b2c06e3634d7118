//! Streaming SHA-256 digest primitives.
//!
//! Every hash in the locker is a lowercase 64-character hex SHA-256. Readers
//! are consumed through a fixed-size buffer so arbitrarily large originals
//! are hashed in constant memory.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Read buffer size for streaming digests.
const DIGEST_BUF_SIZE: usize = 64 * 1024;

/// Digest of one byte stream: content hash plus observed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,

    /// Number of bytes consumed.
    pub size_bytes: u64,
}

/// Compute the SHA-256 of in-memory bytes.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Stream a reader to completion, returning its digest and length.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; DIGEST_BUF_SIZE];
    let mut size_bytes = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        size_bytes += n as u64;
    }

    Ok(ContentDigest {
        sha256: hex::encode(hasher.finalize()),
        size_bytes,
    })
}

/// Stream a file from disk, returning its digest and length.
pub fn digest_file(path: &Path) -> io::Result<ContentDigest> {
    let file = File::open(path)?;
    digest_reader(BufReader::new(file))
}

/// Copy a reader into a writer, digesting the bytes as they pass through.
///
/// The writer is flushed before returning, so on `Ok` the digest describes
/// exactly what was written.
pub fn digest_copy<R: Read, W: io::Write>(mut reader: R, mut writer: W) -> io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; DIGEST_BUF_SIZE];
    let mut size_bytes = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
        size_bytes += n as u64;
    }
    writer.flush()?;

    Ok(ContentDigest {
        sha256: hex::encode(hasher.finalize()),
        size_bytes,
    })
}

/// Check whether a string looks like a hex SHA-256 digest.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == SHA256_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
