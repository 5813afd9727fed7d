//! Iteration over the tree-walk list.
//!
//! The walk list threads every live page regardless of tree shape, so a full
//! scan never recurses. Iteration stops at the first error; a revisited page is
//! reported as corruption instead of looping forever.

use std::collections::HashSet;

use crate::entry::DirEntry;
use crate::storage::btree::node::DirPage;
use crate::storage::btree::tree::{TreeError, read_dir_page};
use crate::storage::{PageOffset, PageStore};

/// Iterator over every live page, in walk-list order.
pub struct WalkPages<'a, S: PageStore> {
    store: &'a mut S,
    next: Option<PageOffset>,
    visited: HashSet<PageOffset>,
    done: bool,
}

impl<'a, S: PageStore> WalkPages<'a, S> {
    pub(crate) fn new(store: &'a mut S, head: Option<PageOffset>) -> Self {
        Self {
            store,
            next: head,
            visited: HashSet::new(),
            done: false,
        }
    }
}

impl<S: PageStore> Iterator for WalkPages<'_, S> {
    type Item = Result<DirPage, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.next?;
        if !self.visited.insert(offset) {
            self.done = true;
            return Some(Err(TreeError::corrupt(offset, "tree-walk list revisits a page")));
        }

        match read_dir_page(self.store, offset) {
            Ok(page) => {
                self.next = page.walk_next;
                Some(Ok(page))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over every entry in the directory, page by page in walk-list order.
///
/// Entries come out sorted within a page but not across pages. "." and ".."
/// are included.
pub struct WalkEntries<'a, S: PageStore> {
    pages: WalkPages<'a, S>,
    pending: std::vec::IntoIter<DirEntry>,
}

impl<'a, S: PageStore> WalkEntries<'a, S> {
    pub(crate) fn new(pages: WalkPages<'a, S>) -> Self {
        Self {
            pages,
            pending: Vec::new().into_iter(),
        }
    }
}

impl<S: PageStore> Iterator for WalkEntries<'_, S> {
    type Item = Result<DirEntry, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.next() {
                return Some(Ok(entry));
            }
            match self.pages.next()? {
                Ok(page) => self.pending = page.entries.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
