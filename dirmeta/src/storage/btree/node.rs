//! Directory B-tree pages and their serialization.
//!
//! Page layout (after the 8-byte page header):
//! - `count`: u32 + 4 reserved bytes
//! - `self_offset`, `parent`, `gc_next`, `walk_prev`, `walk_next`: u64 each
//! - `children`: `MAX_ENTRIES + 1` u64 offsets (0 = none)
//! - `entries`: `MAX_ENTRIES` slots of `ENTRY_LEN` bytes
//!
//! Entry slot layout:
//! - `inode`: u64
//! - `name`: 256 bytes, NUL padded
//! - `kind`: u8
//! - padding: 7 bytes

#![allow(clippy::cast_possible_truncation)]

use crate::entry::{Collation, DirEntry, EntryKind, EntryName, MAX_NAME_LEN};
use crate::storage::{PAGE_LEN, Page, PageError, PageOffset, PageType, offsets};

/// Maximum number of entries in one page.
pub const MAX_ENTRIES: usize = 99;

/// Minimum number of entries in a non-root page.
///
/// A child at or below this count is rebalanced before a delete descends into
/// it. Must stay below `MAX_ENTRIES / 2` so a merged page never overflows.
pub const MIN_ENTRIES: usize = 30;

/// Size of one serialized entry.
pub const ENTRY_LEN: usize = 272;

const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;

mod entry_offsets {
    pub const INODE: usize = 0;
    pub const NAME: usize = 8;
    pub const KIND: usize = 264;
}

const _: () = assert!(offsets::ENTRIES + MAX_ENTRIES * ENTRY_LEN == PAGE_LEN);
const _: () = assert!(MIN_ENTRIES < MAX_ENTRIES / 2);

/// A decoded directory page.
///
/// `children` always holds `entries.len() + 1` slots. A leaf has every child
/// slot set to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirPage {
    pub offset: PageOffset,
    pub parent: Option<PageOffset>,
    pub entries: Vec<DirEntry>,
    pub children: Vec<Option<PageOffset>>,
    pub gc_next: Option<PageOffset>,
    pub walk_prev: Option<PageOffset>,
    pub walk_next: Option<PageOffset>,
}

impl DirPage {
    /// Create an empty leaf page at `offset`.
    #[must_use]
    pub fn new(offset: PageOffset, parent: Option<PageOffset>) -> Self {
        Self {
            offset,
            parent,
            entries: Vec::new(),
            children: vec![None],
            gc_next: None,
            walk_prev: None,
            walk_next: None,
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Child offset at `index`, or `None` for a leaf slot or out-of-range index.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<PageOffset> {
        self.children.get(index).copied().flatten()
    }

    /// Binary search for `name` among this page's entries.
    ///
    /// Returns `Ok(index)` on an exact match. Otherwise returns `Err(index)` of
    /// the first entry greater than `name`, which is both the insertion point
    /// and the child slot whose subtree must contain `name`.
    pub fn search(&self, name: &EntryName, collation: Collation) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| collation.compare(entry.name.as_bytes(), name.as_bytes()))
    }

    /// Decode a page read from slot `offset`.
    pub fn from_page(offset: PageOffset, page: &Page) -> Result<Self, PageError> {
        let header = page.verify()?;
        if header.page_type != PageType::Node {
            return Err(PageError::UnexpectedPageType(header.page_type));
        }

        let stored = page.read_u64(offsets::SELF_OFFSET);
        if stored != offset.get() {
            return Err(PageError::OffsetMismatch { stored });
        }

        let count = page.read_u32(offsets::COUNT);
        if count as usize > MAX_ENTRIES {
            return Err(PageError::CountOutOfRange(count));
        }
        let count = count as usize;

        let children = (0..=count)
            .map(|i| page.read_offset(offsets::CHILDREN + i * 8))
            .collect();
        let entries = (0..count)
            .map(|slot| read_entry(page, slot))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            offset,
            parent: page.read_offset(offsets::PARENT),
            entries,
            children,
            gc_next: page.read_offset(offsets::GC_NEXT),
            walk_prev: page.read_offset(offsets::WALK_PREV),
            walk_next: page.read_offset(offsets::WALK_NEXT),
        })
    }

    /// Encode this page, checksum included.
    ///
    /// Unused entry and child slots are written as zeroes.
    #[must_use]
    pub fn to_page(&self) -> Page {
        debug_assert!(self.entries.len() <= MAX_ENTRIES);
        debug_assert_eq!(self.children.len(), self.entries.len() + 1);

        let mut page = Page::with_type(PageType::Node);
        page.write_u32(offsets::COUNT, self.entries.len() as u32);
        page.write_offset(offsets::SELF_OFFSET, Some(self.offset));
        page.write_offset(offsets::PARENT, self.parent);
        page.write_offset(offsets::GC_NEXT, self.gc_next);
        page.write_offset(offsets::WALK_PREV, self.walk_prev);
        page.write_offset(offsets::WALK_NEXT, self.walk_next);

        for (i, child) in self.children.iter().enumerate() {
            page.write_offset(offsets::CHILDREN + i * 8, *child);
        }
        for (slot, entry) in self.entries.iter().enumerate() {
            write_entry(&mut page, slot, entry);
        }

        page.seal();
        page
    }
}

fn read_entry(page: &Page, slot: usize) -> Result<DirEntry, PageError> {
    let base = offsets::ENTRIES + slot * ENTRY_LEN;

    let field = page.read_bytes(base + entry_offsets::NAME, NAME_FIELD_LEN);
    let len = field
        .iter()
        .position(|&b| b == 0)
        .ok_or(PageError::InvalidName { slot })?;
    let name = EntryName::new(&field[..len]).map_err(|_| PageError::InvalidName { slot })?;

    let tag = page.read_u8(base + entry_offsets::KIND);
    let kind = EntryKind::try_from(tag).map_err(|tag| PageError::InvalidEntryKind { slot, tag })?;

    Ok(DirEntry {
        inode: page.read_u64(base + entry_offsets::INODE),
        name,
        kind,
    })
}

fn write_entry(page: &mut Page, slot: usize, entry: &DirEntry) {
    let base = offsets::ENTRIES + slot * ENTRY_LEN;
    page.write_u64(base + entry_offsets::INODE, entry.inode);
    page.write_bytes(base + entry_offsets::NAME, entry.name.as_bytes());
    page.write_u8(base + entry_offsets::KIND, entry.kind as u8);
}
