//! Page buffers and the common page header.
//!
//! Every directory page occupies one fixed `PAGE_LEN` slot in the metadata
//! file. A slot is addressed by its absolute byte offset, which doubles as the
//! page's identity.

use std::num::NonZeroU64;

/// Page length in bytes.
///
/// Page header (8) + node fields (48) + 100 child offsets + 99 entries of 272 bytes.
pub const PAGE_LEN: usize = 27_784;

/// Page length as u64 for offset calculations.
pub const PAGE_LEN_U64: u64 = PAGE_LEN as u64;

/// Byte positions of the fields shared by node pages and free pages.
pub(crate) mod offsets {
    pub const COUNT: usize = 8;
    pub const SELF_OFFSET: usize = 16;
    pub const PARENT: usize = 24;
    pub const GC_NEXT: usize = 32;
    pub const WALK_PREV: usize = 40;
    pub const WALK_NEXT: usize = 48;
    pub const CHILDREN: usize = 56;
    pub const ENTRIES: usize = 856;
}

/// Absolute byte offset of a page slot inside a metadata file.
///
/// Offset 0 always lies inside the stat block, so it is free to encode "none"
/// on disk. In memory that is `Option<PageOffset>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageOffset(NonZeroU64);

impl PageOffset {
    /// Wrap a raw on-disk value. Returns `None` for 0.
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Encode an optional offset the way it is stored on disk.
    #[must_use]
    pub const fn to_raw(offset: Option<Self>) -> u64 {
        match offset {
            Some(offset) => offset.get(),
            None => 0,
        }
    }
}

impl From<PageOffset> for u64 {
    fn from(offset: PageOffset) -> Self {
        offset.get()
    }
}

impl std::fmt::Display for PageOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Live directory B-tree node
    Node = 0x01,
    /// Page parked on the gc list
    Free = 0x02,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Node),
            0x02 => Ok(Self::Free),
            _ => Err(value),
        }
    }
}

/// Common page header present at the start of every page.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `reserved`: 2 bytes
///
/// Total: 8 bytes
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 8;

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize a header from bytes.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, PageError> {
        let page_type = PageType::try_from(bytes[0]).map_err(PageError::InvalidPageType)?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

        Ok(Self {
            page_type,
            flags,
            checksum,
        })
    }
}

/// A raw page buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8; PAGE_LEN]>,
}

impl Page {
    /// Create a new zeroed page.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_LEN]),
        }
    }

    /// Create a zeroed page carrying a header of the given type.
    #[must_use]
    pub fn with_type(page_type: PageType) -> Self {
        let mut page = Self::new();
        page.write_u8(0, page_type as u8);
        page
    }

    /// Get the raw page data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAGE_LEN] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_LEN] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u32 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a u32 (little-endian) at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
            self.data[offset + 4],
            self.data[offset + 5],
            self.data[offset + 6],
            self.data[offset + 7],
        ])
    }

    /// Write a u64 (little-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Read an optional page offset (0 = none).
    #[must_use]
    pub fn read_offset(&self, offset: usize) -> Option<PageOffset> {
        PageOffset::new(self.read_u64(offset))
    }

    /// Write an optional page offset (none = 0).
    pub fn write_offset(&mut self, offset: usize, value: Option<PageOffset>) {
        self.write_u64(offset, PageOffset::to_raw(value));
    }

    /// Parse the page header.
    pub fn header(&self) -> Result<PageHeader, PageError> {
        let mut bytes = [0u8; PageHeader::SIZE];
        bytes.copy_from_slice(self.read_bytes(0, PageHeader::SIZE));
        PageHeader::from_bytes(bytes)
    }

    /// Compute CRC32 checksum of the page data (excluding the checksum field itself).
    /// Assumes checksum is stored at bytes 2-5 of the header.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[0..2]); // page_type + flags
        hasher.update(&[0u8; 4]); // zero out checksum field
        hasher.update(&self.data[6..]);
        hasher.finalize()
    }

    /// Stamp the checksum into the header. Call after the last field write.
    pub fn seal(&mut self) {
        let checksum = self.compute_checksum();
        self.write_u32(2, checksum);
    }

    /// Verify the stored checksum and return the parsed header.
    pub fn verify(&self) -> Result<PageHeader, PageError> {
        let header = self.header()?;
        let actual = self.compute_checksum();
        if header.checksum != actual {
            return Err(PageError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok(header)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("first_16_bytes", &&self.data[..16])
            .finish_non_exhaustive()
    }
}

/// Errors raised while decoding a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
    /// Page has the right framing but the wrong type for this read.
    UnexpectedPageType(PageType),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Entry count larger than a page can hold.
    CountOutOfRange(u32),
    /// Stored self offset does not match the slot the page was read from.
    OffsetMismatch { stored: u64 },
    /// Unknown entry kind tag in an entry slot.
    InvalidEntryKind { slot: usize, tag: u8 },
    /// Entry name is empty or not NUL terminated.
    InvalidName { slot: usize },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::UnexpectedPageType(t) => write!(f, "unexpected page type: {t:?}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::CountOutOfRange(count) => write!(f, "entry count {count} out of range"),
            Self::OffsetMismatch { stored } => {
                write!(f, "page records self offset {stored}")
            }
            Self::InvalidEntryKind { slot, tag } => {
                write!(f, "entry {slot} has invalid kind tag {tag}")
            }
            Self::InvalidName { slot } => write!(f, "entry {slot} has an invalid name"),
        }
    }
}

impl std::error::Error for PageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_header_roundtrip() {
        let header = PageHeader {
            page_type: PageType::Free,
            flags: 0x42,
            checksum: 0xDEAD_BEEF,
        };

        let parsed = PageHeader::from_bytes(header.to_bytes()).expect("header should parse");
        assert_eq!(parsed.page_type, PageType::Free);
        assert_eq!(parsed.flags, 0x42);
        assert_eq!(parsed.checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn test_invalid_page_type() {
        let mut bytes = [0u8; PageHeader::SIZE];
        bytes[0] = 0x7F;
        assert_eq!(
            PageHeader::from_bytes(bytes).unwrap_err(),
            PageError::InvalidPageType(0x7F)
        );
    }

    #[test]
    fn test_layout_fits_page() {
        assert_eq!(offsets::ENTRIES, offsets::CHILDREN + 100 * 8);
        assert_eq!(PAGE_LEN, offsets::ENTRIES + 99 * 272);
    }

    #[test]
    fn test_seal_and_verify() {
        let mut page = Page::with_type(PageType::Node);
        page.write_u64(offsets::SELF_OFFSET, 4096);
        page.seal();
        assert!(page.verify().is_ok());

        page.as_bytes_mut()[PAGE_LEN - 1] ^= 0x01;
        assert!(matches!(
            page.verify(),
            Err(PageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_offset_encoding() {
        assert_eq!(PageOffset::new(0), None);
        let offset = PageOffset::new(192).expect("nonzero");
        assert_eq!(offset.get(), 192);
        assert_eq!(PageOffset::to_raw(Some(offset)), 192);
        assert_eq!(PageOffset::to_raw(None), 0);

        let mut page = Page::new();
        page.write_offset(offsets::WALK_NEXT, Some(offset));
        assert_eq!(page.read_offset(offsets::WALK_NEXT), Some(offset));
        page.write_offset(offsets::WALK_NEXT, None);
        assert_eq!(page.read_offset(offsets::WALK_NEXT), None);
    }
}
