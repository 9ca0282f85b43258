pub mod strong;
pub mod xxhash;

use std::fmt;
use std::io::{self, Write};

pub use strong::StrongHasher;
pub use xxhash::LegacyHasher;

/// Hex length of a BLAKE3 digest.
pub const STRONG_HEX_LEN: usize = 64;
/// Hex length of an XxHash64 digest, as written by older catalogs.
pub const LEGACY_HEX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Strong,
    Legacy,
    Unknown,
}

/// Lowercase hex checksum as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ChecksumKind {
        match self.0.len() {
            STRONG_HEX_LEN => ChecksumKind::Strong,
            LEGACY_HEX_LEN => ChecksumKind::Legacy,
            _ => ChecksumKind::Unknown,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.kind() == ChecksumKind::Legacy
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of pushing a stream through a [`DigestWriter`] or [`HashingWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub checksum: Checksum,
    pub legacy: Option<Checksum>,
    pub length: u64,
}

/// Discarding sink that hashes and counts everything written to it.
///
/// The legacy hash is only computed when requested, for rows still carrying it.
pub struct DigestWriter {
    strong: StrongHasher,
    legacy: Option<LegacyHasher>,
    length: u64,
}

impl DigestWriter {
    pub fn new() -> Self {
        Self {
            strong: StrongHasher::new(),
            legacy: None,
            length: 0,
        }
    }

    pub fn with_legacy() -> Self {
        Self {
            legacy: Some(LegacyHasher::new()),
            ..Self::new()
        }
    }

    pub fn finalize(self) -> Digest {
        Digest {
            checksum: self.strong.finalize(),
            legacy: self.legacy.map(|h| h.finalize()),
            length: self.length,
        }
    }
}

impl Default for DigestWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.strong.update(buf);
        if let Some(legacy) = self.legacy.as_mut() {
            legacy.update(buf);
        }
        self.length += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Tee writer: hashes and counts bytes, then forwards them to `inner`.
pub struct HashingWriter<W> {
    inner: W,
    digest: DigestWriter,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: DigestWriter::new(),
        }
    }

    pub fn into_parts(self) -> (W, Digest) {
        (self.inner, self.digest.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.write_all(&buf[..n])?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hash a whole reader with the strong hash.
pub fn digest_reader<R: io::Read>(reader: &mut R) -> io::Result<Digest> {
    let mut sink = DigestWriter::new();
    io::copy(reader, &mut sink)?;
    Ok(sink.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_kind_by_length() {
        assert_eq!(Checksum::new("a".repeat(64)).kind(), ChecksumKind::Strong);
        assert_eq!(Checksum::new("b".repeat(16)).kind(), ChecksumKind::Legacy);
        assert_eq!(Checksum::new("c".repeat(40)).kind(), ChecksumKind::Unknown);
    }

    #[test]
    fn test_hashing_writer_matches_digest_writer() {
        let data = b"some content that gets stored";
        let mut tee = HashingWriter::new(Vec::new());
        tee.write_all(data).unwrap();
        let (copied, digest) = tee.into_parts();
        assert_eq!(copied, data);

        let direct = digest_reader(&mut &data[..]).unwrap();
        assert_eq!(digest, direct);
        assert_eq!(digest.length, data.len() as u64);
        assert!(digest.legacy.is_none());
    }

    #[test]
    fn test_legacy_hash_only_when_requested() {
        let mut sink = DigestWriter::with_legacy();
        sink.write_all(b"legacy").unwrap();
        let digest = sink.finalize();
        assert_eq!(digest.legacy.unwrap().kind(), ChecksumKind::Legacy);
        assert_eq!(digest.checksum.kind(), ChecksumKind::Strong);
    }
}
