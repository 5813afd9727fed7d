//! Whole-directory consistency check.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::entry::EntryName;
use crate::storage::btree::node::{MAX_ENTRIES, MIN_ENTRIES};
use crate::storage::btree::tree::{Directory, TreeError, read_dir_page, root_of};
use crate::storage::{PageOffset, PageStore, read_free_page};

/// Shape of a directory that passed `Directory::check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Number of page levels; 1 for a root-only directory.
    pub depth: usize,
    pub live_pages: u64,
    pub free_pages: u64,
    /// All entries, "." and ".." included.
    pub entries: u64,
}

/// A page still to visit, with the separator keys bounding its names.
struct Frame {
    offset: PageOffset,
    parent: Option<PageOffset>,
    depth: usize,
    lower: Option<EntryName>,
    upper: Option<EntryName>,
}

impl<S: PageStore> Directory<S> {
    /// Verify every structural invariant of the directory.
    ///
    /// Checks, in order: tree shape (sorted pages, fill factor, separator
    /// bounds, parent links, uniform leaf depth), the tree-walk list against
    /// the reachable pages, the gc list, that no slot is orphaned, and the
    /// child counter. The first violation is returned as `Corrupt`.
    pub fn check(&mut self) -> Result<TreeStats, TreeError> {
        let collation = self.header.collation;
        let root = root_of(&self.header)?;

        let mut stats = TreeStats::default();
        let mut reachable = HashSet::new();
        let mut leaf_depth = None;
        let mut children = 0u64;

        let mut stack = vec![Frame {
            offset: root,
            parent: None,
            depth: 1,
            lower: None,
            upper: None,
        }];
        while let Some(frame) = stack.pop() {
            if !reachable.insert(frame.offset) {
                return Err(TreeError::corrupt(frame.offset, "page reachable twice"));
            }
            let page = read_dir_page(&mut self.store, frame.offset)?;
            let corrupt = |reason: &str| TreeError::corrupt(frame.offset, reason);

            if page.parent != frame.parent {
                return Err(corrupt("parent link does not match the tree"));
            }
            if frame.offset != root && !(MIN_ENTRIES..=MAX_ENTRIES).contains(&page.len()) {
                return Err(TreeError::corrupt(
                    frame.offset,
                    format!("non-root page holds {} entries", page.len()),
                ));
            }
            let sorted = page.entries.windows(2).all(|pair| {
                collation.compare(pair[0].name.as_bytes(), pair[1].name.as_bytes())
                    == Ordering::Less
            });
            if !sorted {
                return Err(corrupt("entries out of order"));
            }
            let below = match (&frame.lower, page.entries.first()) {
                (Some(lower), Some(first)) => {
                    collation.compare(lower.as_bytes(), first.name.as_bytes()) != Ordering::Less
                }
                _ => false,
            };
            let above = match (&frame.upper, page.entries.last()) {
                (Some(upper), Some(last)) => {
                    collation.compare(last.name.as_bytes(), upper.as_bytes()) != Ordering::Less
                }
                _ => false,
            };
            if below || above {
                return Err(corrupt("entry outside its separator bounds"));
            }

            stats.entries += page.len() as u64;
            children += page
                .entries
                .iter()
                .filter(|entry| !entry.name.is_dot_entry())
                .count() as u64;

            if page.is_leaf() {
                match leaf_depth {
                    None => leaf_depth = Some(frame.depth),
                    Some(depth) if depth != frame.depth => {
                        return Err(corrupt("leaves at different depths"));
                    }
                    Some(_) => {}
                }
                continue;
            }
            if page.children.iter().any(Option::is_none) {
                return Err(corrupt("internal page with an empty child slot"));
            }
            for (i, child) in page.children.iter().enumerate() {
                if let Some(child) = child {
                    stack.push(Frame {
                        offset: *child,
                        parent: Some(frame.offset),
                        depth: frame.depth + 1,
                        lower: i.checked_sub(1).map(|j| page.entries[j].name.clone()),
                        upper: page.entries.get(i).map(|entry| entry.name.clone()),
                    });
                }
            }
        }
        stats.depth = leaf_depth.unwrap_or(1);
        stats.live_pages = reachable.len() as u64;

        self.check_walk_list(&reachable)?;
        stats.free_pages = self.check_gc_list(&reachable)?;

        let slots = self.store.layout().slot_count(self.store.end_offset());
        if stats.live_pages + stats.free_pages != slots {
            return Err(TreeError::corrupt(
                self.store.end_offset(),
                format!(
                    "{} live and {} free pages but {slots} slots",
                    stats.live_pages, stats.free_pages
                ),
            ));
        }

        if children != self.header.total_children {
            return Err(TreeError::corrupt(
                self.store.layout().header_offset(),
                format!(
                    "header counts {} children, tree holds {children}",
                    self.header.total_children
                ),
            ));
        }
        Ok(stats)
    }

    fn check_walk_list(&mut self, reachable: &HashSet<PageOffset>) -> Result<(), TreeError> {
        let mut walked = HashSet::new();
        let mut prev = None;
        for page in self.walk_pages() {
            let page = page?;
            if page.walk_prev != prev {
                return Err(TreeError::corrupt(page.offset, "walk_prev does not match list order"));
            }
            if !reachable.contains(&page.offset) {
                return Err(TreeError::corrupt(page.offset, "walk list holds an unreachable page"));
            }
            walked.insert(page.offset);
            prev = Some(page.offset);
        }
        if walked.len() != reachable.len() {
            let missing = reachable.difference(&walked).next().copied();
            return Err(TreeError::corrupt(
                missing.map_or(0, PageOffset::get),
                "live page missing from the walk list",
            ));
        }
        Ok(())
    }

    fn check_gc_list(&mut self, reachable: &HashSet<PageOffset>) -> Result<u64, TreeError> {
        let mut seen = HashSet::new();
        let mut next = self.header.gc_head;
        while let Some(offset) = next {
            if !seen.insert(offset) {
                return Err(TreeError::corrupt(offset, "gc list revisits a page"));
            }
            if reachable.contains(&offset) {
                return Err(TreeError::corrupt(offset, "gc list holds a live page"));
            }
            next = read_free_page(&mut self.store, offset)?;
        }
        Ok(seen.len() as u64)
    }
}
