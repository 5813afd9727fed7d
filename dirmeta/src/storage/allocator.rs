//! Page allocation over the gc list.
//!
//! Freed pages form a singly linked list threaded through their `gc_next`
//! field, headed by `DirHeader::gc_head`. Allocation pops that list before
//! growing the store. Both operations only update the header copy they are
//! given; persisting it is the caller's job.

use crate::storage::header::DirHeader;
use crate::storage::io::{PageStore, StoreError};
use crate::storage::page::{Page, PageOffset, PageType, offsets};

/// Allocate a page slot, reusing the head of the gc list when there is one.
///
/// The slot's old bytes are left as they are; the caller overwrites the whole
/// page before it is reachable.
pub fn allocate_page<S: PageStore>(
    store: &mut S,
    header: &mut DirHeader,
) -> Result<PageOffset, StoreError> {
    match header.gc_head {
        Some(offset) => {
            let next = read_free_page(store, offset)?;
            header.gc_head = next;
            tracing::trace!("reusing free page {offset}");
            Ok(offset)
        }
        None => store.append_page(),
    }
}

/// Push a page slot onto the gc list.
pub fn free_page<S: PageStore>(
    store: &mut S,
    header: &mut DirHeader,
    offset: PageOffset,
) -> Result<(), StoreError> {
    let mut page = Page::with_type(PageType::Free);
    page.write_offset(offsets::SELF_OFFSET, Some(offset));
    page.write_offset(offsets::GC_NEXT, header.gc_head);
    page.seal();
    store.write_page(offset, &page)?;

    header.gc_head = Some(offset);
    tracing::trace!("freed page {offset}");
    Ok(())
}

/// Read a page that is expected to sit on the gc list and return its
/// `gc_next` link.
pub fn read_free_page<S: PageStore>(
    store: &mut S,
    offset: PageOffset,
) -> Result<Option<PageOffset>, StoreError> {
    let page = store.read_page(offset)?;
    let header = page
        .verify()
        .map_err(|e| StoreError::corrupt(offset.get(), e))?;
    if header.page_type != PageType::Free {
        return Err(StoreError::corrupt(
            offset.get(),
            format!("gc list entry has page type {:?}", header.page_type),
        ));
    }
    let stored = page.read_u64(offsets::SELF_OFFSET);
    if stored != offset.get() {
        return Err(StoreError::corrupt(
            offset.get(),
            format!("free page records self offset {stored}"),
        ));
    }
    Ok(page.read_offset(offsets::GC_NEXT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Collation;
    use crate::storage::{MemoryStore, MetaLayout};

    #[test]
    fn test_allocate_appends_when_gc_list_empty() {
        let mut store = MemoryStore::new(MetaLayout::new(128));
        let mut header = DirHeader::new(Collation::Binary);

        let first = allocate_page(&mut store, &mut header).expect("allocate");
        let second = allocate_page(&mut store, &mut header).expect("allocate");
        assert_eq!(first.get(), 192);
        assert!(second > first);
        assert_eq!(header.gc_head, None);
    }

    #[test]
    fn test_free_then_allocate_is_lifo() {
        let mut store = MemoryStore::new(MetaLayout::new(128));
        let mut header = DirHeader::new(Collation::Binary);

        let a = allocate_page(&mut store, &mut header).expect("allocate");
        let b = allocate_page(&mut store, &mut header).expect("allocate");
        free_page(&mut store, &mut header, a).expect("free");
        free_page(&mut store, &mut header, b).expect("free");
        assert_eq!(header.gc_head, Some(b));
        assert_eq!(read_free_page(&mut store, b).expect("read"), Some(a));

        let end = store.end_offset();
        assert_eq!(allocate_page(&mut store, &mut header).expect("allocate"), b);
        assert_eq!(allocate_page(&mut store, &mut header).expect("allocate"), a);
        assert_eq!(header.gc_head, None);
        assert_eq!(store.end_offset(), end, "reuse must not grow the store");
    }

    #[test]
    fn test_gc_head_pointing_at_live_page_is_corrupt() {
        let mut store = MemoryStore::new(MetaLayout::new(128));
        let mut header = DirHeader::new(Collation::Binary);
        let offset = allocate_page(&mut store, &mut header).expect("allocate");
        let mut page = Page::with_type(PageType::Node);
        page.write_offset(offsets::SELF_OFFSET, Some(offset));
        page.seal();
        store.write_page(offset, &page).expect("write");

        header.gc_head = Some(offset);
        let result = allocate_page(&mut store, &mut header);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
        assert_eq!(header.gc_head, Some(offset));
    }
}
