//! Page store abstraction.
//!
//! The B-tree engine touches bytes only through the `PageStore` trait. The
//! file-backed `MetaFile` is used in production and the in-memory
//! `MemoryStore` in tests, where it can inject faults.
//!
//! # File layout
//!
//! ```text
//! [0 .. stat_len)                      opaque stat block
//! [stat_len .. stat_len + HEADER_LEN)  directory header
//! [stat_len + HEADER_LEN .. )          page slots of PAGE_LEN bytes
//! ```

use std::path::PathBuf;

use crate::storage::header::{DirHeader, HEADER_LEN, HeaderError};
use crate::storage::page::{PAGE_LEN_U64, Page, PageOffset};

/// Byte geometry of a metadata file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaLayout {
    stat_len: u64,
}

impl MetaLayout {
    #[must_use]
    pub const fn new(stat_len: u64) -> Self {
        Self { stat_len }
    }

    #[must_use]
    pub const fn stat_len(&self) -> u64 {
        self.stat_len
    }

    /// Absolute position of the directory header.
    #[must_use]
    pub const fn header_offset(&self) -> u64 {
        self.stat_len
    }

    /// Absolute position of the first page slot.
    #[must_use]
    pub const fn first_page_offset(&self) -> u64 {
        self.stat_len + HEADER_LEN as u64
    }

    /// Validate that `offset` names a whole page slot below `end`.
    pub fn check_slot(&self, offset: PageOffset, end: u64) -> Result<(), StoreError> {
        let raw = offset.get();
        let first = self.first_page_offset();
        if raw < first || (raw - first) % PAGE_LEN_U64 != 0 {
            return Err(StoreError::corrupt(raw, "offset is not a page slot"));
        }
        if raw.checked_add(PAGE_LEN_U64).is_none_or(|slot_end| slot_end > end) {
            return Err(StoreError::corrupt(
                raw,
                format!("page slot lies beyond end of store ({end})"),
            ));
        }
        Ok(())
    }

    /// Number of whole page slots below `end`.
    #[must_use]
    pub const fn slot_count(&self, end: u64) -> u64 {
        end.saturating_sub(self.first_page_offset()) / PAGE_LEN_U64
    }
}

/// Errors that can occur during page store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// On-disk structure is inconsistent.
    Corrupt { offset: u64, reason: String },
    /// Header failed validation.
    Header(HeaderError),
    /// Injected fault for testing.
    InjectedFault(String),
    /// Refused to create over an existing file.
    AlreadyExists(PathBuf),
}

impl StoreError {
    pub fn corrupt(offset: u64, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            offset,
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corrupt { offset, reason } => {
                write!(f, "corruption at offset {offset}: {reason}")
            }
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::AlreadyExists(path) => {
                write!(f, "file already exists: {}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<HeaderError> for StoreError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

/// Abstraction over the page slots and header of one directory metadata file.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_page` returns the last content written to that slot
/// - `read_page` and `write_page` reject offsets that are not whole slots
/// - `append_page` extends the store by exactly one zeroed slot
/// - `flush` makes all previous writes durable
///
/// There is no caching; every call goes through to the backing bytes.
pub trait PageStore {
    /// Geometry of the backing file.
    fn layout(&self) -> MetaLayout;

    /// Offset one past the last page slot.
    fn end_offset(&self) -> u64;

    /// Read a whole page slot.
    fn read_page(&mut self, offset: PageOffset) -> Result<Page, StoreError>;

    /// Overwrite a whole page slot.
    fn write_page(&mut self, offset: PageOffset, page: &Page) -> Result<(), StoreError>;

    /// Grow the store by one slot and return its offset.
    fn append_page(&mut self) -> Result<PageOffset, StoreError>;

    /// Read and validate the directory header.
    fn read_header(&mut self) -> Result<DirHeader, StoreError>;

    /// Overwrite the directory header.
    fn write_header(&mut self, header: &DirHeader) -> Result<(), StoreError>;

    /// Make previous writes durable.
    fn flush(&mut self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let e = StoreError::corrupt(4096, "offset is not a page slot");
        assert!(e.to_string().contains("offset 4096"));
        assert!(e.to_string().contains("not a page slot"));

        let e = StoreError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));
    }

    #[test]
    fn test_layout_offsets() {
        let layout = MetaLayout::new(128);
        assert_eq!(layout.header_offset(), 128);
        assert_eq!(layout.first_page_offset(), 192);
        assert_eq!(layout.slot_count(192), 0);
        assert_eq!(layout.slot_count(192 + 3 * PAGE_LEN_U64), 3);
    }

    #[test]
    fn test_check_slot() {
        let layout = MetaLayout::new(128);
        let end = 192 + 2 * PAGE_LEN_U64;
        let first = PageOffset::new(192).expect("nonzero");
        let second = PageOffset::new(192 + PAGE_LEN_U64).expect("nonzero");
        let third = PageOffset::new(192 + 2 * PAGE_LEN_U64).expect("nonzero");
        let misaligned = PageOffset::new(200).expect("nonzero");
        let in_header = PageOffset::new(128).expect("nonzero");

        assert!(layout.check_slot(first, end).is_ok());
        assert!(layout.check_slot(second, end).is_ok());
        assert!(matches!(
            layout.check_slot(third, end),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(layout.check_slot(misaligned, end).is_err());
        assert!(layout.check_slot(in_header, end).is_err());
    }

    #[test]
    fn test_check_slot_near_u64_max() {
        let layout = MetaLayout::new(128);
        let first = layout.first_page_offset();
        let last_aligned = first + (u64::MAX - first) / PAGE_LEN_U64 * PAGE_LEN_U64;
        let end = first + 4 * PAGE_LEN_U64;

        for raw in [last_aligned, last_aligned - PAGE_LEN_U64] {
            let offset = PageOffset::new(raw).expect("nonzero");
            assert!(matches!(
                layout.check_slot(offset, end),
                Err(StoreError::Corrupt { .. })
            ));
        }
    }
}
