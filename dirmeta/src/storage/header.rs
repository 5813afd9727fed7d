//! Directory header structure and serialization.
//!
//! The header sits right after the opaque stat block and holds the roots of
//! everything else in the file: the B-tree root, the gc list, and the tree-walk
//! list.

use crate::entry::Collation;
use crate::storage::page::PageOffset;

/// Magic number identifying a directory metadata header: "HDIR"
pub const MAGIC: [u8; 4] = *b"HDIR";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the serialized header in bytes.
pub const HEADER_LEN: usize = 64;

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 4;
    pub const TOTAL_CHILDREN: usize = 8;
    pub const ROOT: usize = 16;
    pub const GC_HEAD: usize = 24;
    pub const WALK_HEAD: usize = 32;
    pub const DIRTY_FLAGS: usize = 40;
    pub const COLLATION: usize = 44;
    // 45-47: reserved
    pub const GENERATION: usize = 48;
    pub const CHECKSUM: usize = 56;
    // 60-63: reserved
}

/// Per-directory header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirHeader {
    /// Entries in the directory, not counting "." and "..".
    pub total_children: u64,
    /// Root page of the B-tree.
    pub root: Option<PageOffset>,
    /// Head of the gc (free page) list.
    pub gc_head: Option<PageOffset>,
    /// Head of the tree-walk list.
    pub walk_head: Option<PageOffset>,
    /// Opaque flags owned by the caller.
    pub dirty_flags: u32,
    /// Name ordering used by every page of this directory.
    pub collation: Collation,
    /// Bumped once per committed mutation.
    pub generation: u64,
}

impl DirHeader {
    /// Create a header for a directory that has no pages yet.
    #[must_use]
    pub const fn new(collation: Collation) -> Self {
        Self {
            total_children: 0,
            root: None,
            gc_head: None,
            walk_head: None,
            dirty_flags: 0,
            collation,
            generation: 0,
        }
    }

    /// Serialize the header, including its checksum.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        put(&mut buf, offsets::MAGIC, &MAGIC);
        put(&mut buf, offsets::FORMAT_VERSION, &FORMAT_VERSION.to_le_bytes());
        put(&mut buf, offsets::TOTAL_CHILDREN, &self.total_children.to_le_bytes());
        put(&mut buf, offsets::ROOT, &PageOffset::to_raw(self.root).to_le_bytes());
        put(&mut buf, offsets::GC_HEAD, &PageOffset::to_raw(self.gc_head).to_le_bytes());
        put(&mut buf, offsets::WALK_HEAD, &PageOffset::to_raw(self.walk_head).to_le_bytes());
        put(&mut buf, offsets::DIRTY_FLAGS, &self.dirty_flags.to_le_bytes());
        buf[offsets::COLLATION] = self.collation as u8;
        put(&mut buf, offsets::GENERATION, &self.generation.to_le_bytes());

        let checksum = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        put(&mut buf, offsets::CHECKSUM, &checksum.to_le_bytes());
        buf
    }

    /// Deserialize a header, validating magic, version, and checksum.
    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[offsets::MAGIC..offsets::MAGIC + 4]);
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        let format_version = read_u32(buf, offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(format_version));
        }

        let expected = read_u32(buf, offsets::CHECKSUM);
        let actual = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        if expected != actual {
            return Err(HeaderError::ChecksumMismatch { expected, actual });
        }

        let collation = Collation::try_from(buf[offsets::COLLATION])
            .map_err(HeaderError::InvalidCollation)?;

        Ok(Self {
            total_children: read_u64(buf, offsets::TOTAL_CHILDREN),
            root: PageOffset::new(read_u64(buf, offsets::ROOT)),
            gc_head: PageOffset::new(read_u64(buf, offsets::GC_HEAD)),
            walk_head: PageOffset::new(read_u64(buf, offsets::WALK_HEAD)),
            dirty_flags: read_u32(buf, offsets::DIRTY_FLAGS),
            collation,
            generation: read_u64(buf, offsets::GENERATION),
        })
    }
}

fn put(buf: &mut [u8; HEADER_LEN], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn read_u32(buf: &[u8; HEADER_LEN], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_u64(buf: &[u8; HEADER_LEN], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Errors that can occur when reading a directory header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Invalid magic number.
    InvalidMagic([u8; 4]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unknown collation tag.
    InvalidCollation(u8),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "header checksum mismatch: expected {expected}, got {actual}")
            }
            Self::InvalidCollation(tag) => write!(f, "invalid collation tag: {tag}"),
        }
    }
}

impl std::error::Error for HeaderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = DirHeader::new(Collation::CaseInsensitive);
        header.total_children = 30_000;
        header.root = PageOffset::new(192);
        header.gc_head = PageOffset::new(27_976);
        header.walk_head = PageOffset::new(192);
        header.dirty_flags = 0b101;
        header.generation = 7;

        let restored = DirHeader::from_bytes(&header.to_bytes()).expect("should parse");
        assert_eq!(restored, header);
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut bytes = DirHeader::new(Collation::Binary).to_bytes();
        bytes[0..4].copy_from_slice(b"NOPE");

        let result = DirHeader::from_bytes(&bytes);
        assert!(matches!(result, Err(HeaderError::InvalidMagic(_))));
    }

    #[test]
    fn test_header_detects_bit_flip() {
        let mut header = DirHeader::new(Collation::Binary);
        header.root = PageOffset::new(192);
        let mut bytes = header.to_bytes();
        bytes[offsets::ROOT] ^= 0x40;

        let result = DirHeader::from_bytes(&bytes);
        assert!(matches!(result, Err(HeaderError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_header_unsupported_version() {
        let mut bytes = DirHeader::new(Collation::Binary).to_bytes();
        bytes[offsets::FORMAT_VERSION] = 9;

        let result = DirHeader::from_bytes(&bytes);
        assert_eq!(result, Err(HeaderError::UnsupportedVersion(9)));
    }
}
