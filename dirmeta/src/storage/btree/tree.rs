//! Per-directory B-tree mapping entry names to inodes.
//!
//! Pages are addressed by byte offset and read/written whole through a
//! `PageStore`; nothing is cached between calls. Every public mutation works on
//! a copy of the directory header, writes it once after all page writes have
//! succeeded, and only then makes it current.
//!
//! Deletion rebalances a child before descending into it, so a leaf can always
//! give up an entry without underflowing.

use crate::entry::{Collation, DirEntry, EntryKind, EntryName, InodeId};
use crate::storage::btree::node::{DirPage, MAX_ENTRIES, MIN_ENTRIES};
use crate::storage::btree::walk::{WalkEntries, WalkPages};
use crate::storage::{
    DirHeader, PageOffset, PageStore, StoreError, allocate_page, free_page,
};

/// Depth no valid directory can reach. Descending further means a cycle.
const MAX_DEPTH: usize = 32;

/// Bound on loop iterations for delete and extraction. Each level may be
/// revisited after a rebalance, so this allows a few passes per level.
const MAX_STEPS: usize = MAX_DEPTH * 4;

/// A directory's B-tree and the store holding it.
pub struct Directory<S: PageStore> {
    pub(super) store: S,
    pub(super) header: DirHeader,
}

impl<S: PageStore> Directory<S> {
    /// Initialise a fresh store with a root page holding "." and "..".
    pub fn create(
        mut store: S,
        self_inode: InodeId,
        parent_inode: InodeId,
        collation: Collation,
    ) -> Result<Self, TreeError> {
        let mut header = DirHeader::new(collation);
        let root = allocate_page(&mut store, &mut header)?;

        let mut page = DirPage::new(root, None);
        page.entries = vec![
            DirEntry::new(self_inode, EntryName::dot(), EntryKind::Dir),
            DirEntry::new(parent_inode, EntryName::dot_dot(), EntryKind::Dir),
        ];
        page.children = vec![None; 3];
        store.write_page(root, &page.to_page())?;

        header.root = Some(root);
        header.walk_head = Some(root);
        store.write_header(&header)?;
        store.flush()?;

        tracing::debug!("created directory root page {root}");
        Ok(Self { store, header })
    }

    /// Open a directory from a store that already holds a header.
    pub fn open(mut store: S) -> Result<Self, TreeError> {
        let header = store.read_header()?;
        let root = root_of(&header)?;
        read_dir_page(&mut store, root)?;
        Ok(Self { store, header })
    }

    #[must_use]
    pub const fn header(&self) -> &DirHeader {
        &self.header
    }

    #[must_use]
    pub const fn collation(&self) -> Collation {
        self.header.collation
    }

    /// Entries in the directory, not counting "." and "..".
    #[must_use]
    pub const fn total_children(&self) -> u64 {
        self.header.total_children
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Direct access to the store. Writes made through it bypass the tree.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Find `name` and the page holding it.
    pub fn search(
        &mut self,
        name: &EntryName,
    ) -> Result<Option<(DirEntry, PageOffset)>, TreeError> {
        let found = find_entry(&mut self.store, &self.header, name)?;
        Ok(found.map(|(mut page, index)| (page.entries.swap_remove(index), page.offset)))
    }

    /// Find `name`.
    pub fn lookup(&mut self, name: &EntryName) -> Result<Option<DirEntry>, TreeError> {
        Ok(self.search(name)?.map(|(entry, _)| entry))
    }

    /// Insert a new entry. Fails with `AlreadyExists` without touching any
    /// page if the name is present.
    pub fn insert(&mut self, entry: DirEntry) -> Result<(), TreeError> {
        let counted = !entry.name.is_dot_entry();
        self.commit(|op| {
            op.insert(entry)?;
            if counted {
                op.header.total_children += 1;
            }
            Ok(())
        })
    }

    /// Remove `name` and return the entry that held it.
    pub fn delete(&mut self, name: &EntryName) -> Result<DirEntry, TreeError> {
        self.commit(|op| {
            let removed = op.delete(name)?;
            if !removed.name.is_dot_entry() {
                op.header.total_children = op.header.total_children.saturating_sub(1);
            }
            Ok(removed)
        })
    }

    /// Point an existing entry at a different inode and kind, in place.
    ///
    /// Returns the previous entry.
    pub fn update(
        &mut self,
        name: &EntryName,
        inode: InodeId,
        kind: EntryKind,
    ) -> Result<DirEntry, TreeError> {
        self.commit(|op| op.update(name, inode, kind))
    }

    /// Replace the caller-owned dirty flags in the header.
    pub fn set_dirty_flags(&mut self, flags: u32) -> Result<(), TreeError> {
        self.commit(|op| {
            op.header.dirty_flags = flags;
            Ok(())
        })
    }

    /// Every live page, following the tree-walk list.
    pub fn walk_pages(&mut self) -> WalkPages<'_, S> {
        WalkPages::new(&mut self.store, self.header.walk_head)
    }

    /// Every entry, "." and ".." included, following the tree-walk list.
    pub fn walk_all(&mut self) -> WalkEntries<'_, S> {
        WalkEntries::new(self.walk_pages())
    }

    /// Count children by walking every page, and repair the header if its
    /// counter has drifted.
    pub fn recount_children(&mut self) -> Result<u64, TreeError> {
        let mut count = 0u64;
        for entry in self.walk_all() {
            if !entry?.name.is_dot_entry() {
                count += 1;
            }
        }

        if count != self.header.total_children {
            tracing::warn!(
                "repairing total_children: header has {}, walk found {count}",
                self.header.total_children
            );
            self.commit(|op| {
                op.header.total_children = count;
                Ok(())
            })?;
        }
        Ok(count)
    }

    /// Number of child directories, for link counts.
    pub fn subdir_count(&mut self) -> Result<u64, TreeError> {
        let mut count = 0u64;
        for entry in self.walk_all() {
            let entry = entry?;
            if entry.kind == EntryKind::Dir && !entry.name.is_dot_entry() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn commit<T>(
        &mut self,
        op: impl FnOnce(&mut TreeOp<'_, S>) -> Result<T, TreeError>,
    ) -> Result<T, TreeError> {
        let mut header = self.header.clone();
        let value = op(&mut TreeOp {
            store: &mut self.store,
            header: &mut header,
        })?;

        header.generation = header.generation.wrapping_add(1);
        self.store.write_header(&header)?;
        self.store.flush()?;
        self.header = header;
        Ok(value)
    }
}

impl<S: PageStore + std::fmt::Debug> std::fmt::Debug for Directory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Outcome of rebalancing one child before descending into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rebalance {
    /// Child already had more than `MIN_ENTRIES`; nothing was written.
    Unchanged,
    /// Parent, child, and sibling were rewritten. Parent is current in memory.
    Changed,
    /// Parent was the root and emptied by a merge; the header root moved.
    RootReplaced,
}

/// Overflow carried one level up after a split.
struct Split {
    median: DirEntry,
    right: PageOffset,
}

/// One mutation in progress against a header copy.
struct TreeOp<'a, S> {
    store: &'a mut S,
    header: &'a mut DirHeader,
}

impl<S: PageStore> TreeOp<'_, S> {
    fn load(&mut self, offset: PageOffset) -> Result<DirPage, TreeError> {
        read_dir_page(self.store, offset)
    }

    fn save(&mut self, page: &DirPage) -> Result<(), TreeError> {
        self.store.write_page(page.offset, &page.to_page())?;
        Ok(())
    }

    fn allocate(&mut self) -> Result<PageOffset, TreeError> {
        Ok(allocate_page(self.store, self.header)?)
    }

    fn release(&mut self, offset: PageOffset) -> Result<(), TreeError> {
        Ok(free_page(self.store, self.header, offset)?)
    }

    fn insert(&mut self, entry: DirEntry) -> Result<(), TreeError> {
        let root = root_of(self.header)?;
        if let Some(split) = self.insert_into(root, entry, 0)? {
            self.grow_root(root, split)?;
        }
        Ok(())
    }

    fn insert_into(
        &mut self,
        offset: PageOffset,
        entry: DirEntry,
        depth: usize,
    ) -> Result<Option<Split>, TreeError> {
        if depth > MAX_DEPTH {
            return Err(too_deep(offset));
        }

        let mut page = self.load(offset)?;
        let slot = match page.search(&entry.name, self.header.collation) {
            Ok(_) => return Err(TreeError::AlreadyExists(entry.name)),
            Err(slot) => slot,
        };

        let (entry, right) = match page.child(slot) {
            None => (entry, None),
            Some(child) => match self.insert_into(child, entry, depth + 1)? {
                None => return Ok(None),
                Some(split) => {
                    // The child split may have relinked this page in the walk list.
                    page = self.load(offset)?;
                    (split.median, Some(split.right))
                }
            },
        };

        page.entries.insert(slot, entry);
        page.children.insert(slot + 1, right);
        if page.len() <= MAX_ENTRIES {
            self.save(&page)?;
            return Ok(None);
        }
        self.split(page).map(Some)
    }

    /// Split an overfull page in two around its median entry.
    fn split(&mut self, mut page: DirPage) -> Result<Split, TreeError> {
        let mid = page.len() / 2;
        let right_offset = self.allocate()?;

        let mut right = DirPage::new(right_offset, page.parent);
        let mut upper = page.entries.split_off(mid);
        let median = upper.remove(0);
        right.entries = upper;
        right.children = page.children.split_off(mid + 1);

        self.link_after(&mut page, &mut right)?;
        for child in right.children.iter().flatten() {
            self.set_parent(*child, Some(right_offset))?;
        }
        self.save(&page)?;
        self.save(&right)?;

        tracing::debug!(
            "split page {} ({} entries) off {} ({} entries)",
            right_offset,
            right.len(),
            page.offset,
            page.len()
        );
        Ok(Split {
            median,
            right: right_offset,
        })
    }

    fn grow_root(&mut self, old_root: PageOffset, split: Split) -> Result<(), TreeError> {
        let new_root = self.allocate()?;
        let mut old = self.load(old_root)?;

        let mut root = DirPage::new(new_root, None);
        root.entries = vec![split.median];
        root.children = vec![Some(old_root), Some(split.right)];
        old.parent = Some(new_root);

        self.link_after(&mut old, &mut root)?;
        self.set_parent(split.right, Some(new_root))?;
        self.save(&old)?;
        self.save(&root)?;

        self.header.root = Some(new_root);
        tracing::debug!("new root page {new_root} above {old_root}");
        Ok(())
    }

    fn delete(&mut self, name: &EntryName) -> Result<DirEntry, TreeError> {
        let collation = self.header.collation;
        let root = root_of(self.header)?;
        let mut page = self.load(root)?;

        for _ in 0..MAX_STEPS {
            match page.search(name, collation) {
                Ok(index) if page.is_leaf() => {
                    let removed = page.entries.remove(index);
                    page.children.remove(index + 1);
                    self.save(&page)?;
                    return Ok(removed);
                }
                Ok(index) => match self.rebalance(&mut page, index)? {
                    Rebalance::Unchanged => {
                        let child = page
                            .child(index)
                            .ok_or_else(|| missing_child(&page, index))?;
                        let predecessor = self.extract_largest(child)?;

                        let mut page = self.load(page.offset)?;
                        let offset = page.offset;
                        let slot = page.entries.get_mut(index).ok_or_else(|| {
                            TreeError::corrupt(offset, "entry vanished during extraction")
                        })?;
                        let removed = std::mem::replace(slot, predecessor);
                        self.save(&page)?;
                        return Ok(removed);
                    }
                    Rebalance::Changed => {}
                    Rebalance::RootReplaced => {
                        let root = root_of(self.header)?;
                        page = self.load(root)?;
                    }
                },
                Err(slot) => {
                    let Some(child) = page.child(slot) else {
                        return Err(TreeError::NotFound(name.clone()));
                    };
                    match self.rebalance(&mut page, slot)? {
                        Rebalance::Unchanged => page = self.load(child)?,
                        Rebalance::Changed => {}
                        Rebalance::RootReplaced => {
                            let root = root_of(self.header)?;
                            page = self.load(root)?;
                        }
                    }
                }
            }
        }
        Err(too_deep(page.offset))
    }

    /// Remove and return the largest entry under `subtree`.
    fn extract_largest(&mut self, subtree: PageOffset) -> Result<DirEntry, TreeError> {
        let mut page = self.load(subtree)?;
        for _ in 0..MAX_STEPS {
            if page.is_leaf() {
                let offset = page.offset;
                let largest = page
                    .entries
                    .pop()
                    .ok_or_else(|| TreeError::corrupt(offset, "empty leaf below an entry"))?;
                page.children.pop();
                self.save(&page)?;
                return Ok(largest);
            }

            let last = page.len();
            match self.rebalance(&mut page, last)? {
                Rebalance::Unchanged => {
                    let child = page.child(last).ok_or_else(|| missing_child(&page, last))?;
                    page = self.load(child)?;
                }
                Rebalance::Changed => {}
                Rebalance::RootReplaced => {
                    return Err(TreeError::corrupt(
                        subtree,
                        "root replaced while extracting from a subtree",
                    ));
                }
            }
        }
        Err(too_deep(page.offset))
    }

    /// Make sure child `index` of `parent` has more than `MIN_ENTRIES`.
    ///
    /// The sibling is the right neighbour, or the left one for the last child.
    /// A sibling with at most half a page is merged; otherwise the two pages
    /// and their separator are split evenly.
    fn rebalance(&mut self, parent: &mut DirPage, index: usize) -> Result<Rebalance, TreeError> {
        let count = parent.len();
        if count == 0 || index > count {
            return Err(TreeError::corrupt(
                parent.offset,
                format!("cannot rebalance child {index} of a page with {count} entries"),
            ));
        }

        let child_offset = parent
            .child(index)
            .ok_or_else(|| missing_child(parent, index))?;
        let child = self.load(child_offset)?;
        if child.len() > MIN_ENTRIES {
            return Ok(Rebalance::Unchanged);
        }

        let (left_index, sibling_index) = if index == count {
            (index - 1, index - 1)
        } else {
            (index, index + 1)
        };
        let sibling_offset = parent
            .child(sibling_index)
            .ok_or_else(|| missing_child(parent, sibling_index))?;
        let sibling = self.load(sibling_offset)?;
        let merge = sibling.len() <= MAX_ENTRIES / 2;

        let (left, right) = if index == count {
            (sibling, child)
        } else {
            (child, sibling)
        };
        if merge {
            self.merge(parent, left_index, left, right)
        } else {
            self.redistribute(parent, left_index, left, right)
        }
    }

    fn merge(
        &mut self,
        parent: &mut DirPage,
        left_index: usize,
        mut left: DirPage,
        right: DirPage,
    ) -> Result<Rebalance, TreeError> {
        self.unlink(&right, &mut [&mut *parent, &mut left])?;

        let separator = parent.entries.remove(left_index);
        parent.children.remove(left_index + 1);
        left.entries.push(separator);
        left.entries.extend(right.entries);
        for child in right.children.iter().flatten() {
            self.set_parent(*child, Some(left.offset))?;
        }
        left.children.extend(right.children);
        self.release(right.offset)?;

        if parent.is_empty() {
            if self.header.root != Some(parent.offset) {
                return Err(TreeError::corrupt(
                    parent.offset,
                    "merge emptied a page that is not the root",
                ));
            }
            self.unlink(parent, &mut [&mut left])?;
            left.parent = None;
            self.release(parent.offset)?;
            self.save(&left)?;
            self.header.root = Some(left.offset);

            tracing::debug!("root page {} collapsed into {}", parent.offset, left.offset);
            return Ok(Rebalance::RootReplaced);
        }

        self.save(parent)?;
        self.save(&left)?;
        tracing::debug!(
            "merged page {} into {} ({} entries)",
            right.offset,
            left.offset,
            left.len()
        );
        Ok(Rebalance::Changed)
    }

    fn redistribute(
        &mut self,
        parent: &mut DirPage,
        left_index: usize,
        mut left: DirPage,
        mut right: DirPage,
    ) -> Result<Rebalance, TreeError> {
        let boundary = left.children.len();

        let mut entries = std::mem::take(&mut left.entries);
        entries.push(parent.entries.remove(left_index));
        entries.append(&mut right.entries);
        let mut children = std::mem::take(&mut left.children);
        children.append(&mut right.children);

        let median = entries.len() / 2;
        let mut upper = entries.split_off(median);
        parent.entries.insert(left_index, upper.remove(0));
        left.entries = entries;
        right.entries = upper;
        right.children = children.split_off(median + 1);
        left.children = children;

        // Children that crossed between the two pages need new parent links.
        let new_boundary = left.children.len();
        if new_boundary > boundary {
            for child in left.children[boundary..].iter().flatten() {
                self.set_parent(*child, Some(left.offset))?;
            }
        } else {
            for child in right.children[..boundary - new_boundary].iter().flatten() {
                self.set_parent(*child, Some(right.offset))?;
            }
        }

        self.save(parent)?;
        self.save(&left)?;
        self.save(&right)?;
        tracing::debug!(
            "redistributed pages {} and {} to {}/{} entries",
            left.offset,
            right.offset,
            left.len(),
            right.len()
        );
        Ok(Rebalance::Changed)
    }

    fn update(
        &mut self,
        name: &EntryName,
        inode: InodeId,
        kind: EntryKind,
    ) -> Result<DirEntry, TreeError> {
        let Some((mut page, index)) = find_entry(self.store, self.header, name)? else {
            return Err(TreeError::NotFound(name.clone()));
        };

        let entry = &mut page.entries[index];
        let previous = entry.clone();
        entry.inode = inode;
        entry.kind = kind;
        self.save(&page)?;
        Ok(previous)
    }

    /// Link `page` into the walk list right after `anchor`.
    fn link_after(&mut self, anchor: &mut DirPage, page: &mut DirPage) -> Result<(), TreeError> {
        let offset = page.offset;
        page.walk_prev = Some(anchor.offset);
        page.walk_next = anchor.walk_next;
        if let Some(next) = anchor.walk_next {
            self.patch(next, &mut [], |neighbour| neighbour.walk_prev = Some(offset))?;
        }
        anchor.walk_next = Some(offset);
        Ok(())
    }

    /// Remove `victim` from the walk list. Neighbours found in `held` are
    /// patched in memory; the caller writes them.
    fn unlink(&mut self, victim: &DirPage, held: &mut [&mut DirPage]) -> Result<(), TreeError> {
        let (prev, next) = (victim.walk_prev, victim.walk_next);
        match prev {
            Some(prev) => self.patch(prev, held, |neighbour| neighbour.walk_next = next)?,
            None => self.header.walk_head = next,
        }
        if let Some(next) = next {
            self.patch(next, held, |neighbour| neighbour.walk_prev = prev)?;
        }
        Ok(())
    }

    fn set_parent(
        &mut self,
        child: PageOffset,
        parent: Option<PageOffset>,
    ) -> Result<(), TreeError> {
        self.patch(child, &mut [], |page| page.parent = parent)
    }

    /// Apply `update` to the page at `offset`: in memory if it is held,
    /// otherwise with a read-modify-write.
    fn patch(
        &mut self,
        offset: PageOffset,
        held: &mut [&mut DirPage],
        update: impl FnOnce(&mut DirPage),
    ) -> Result<(), TreeError> {
        if let Some(page) = held.iter_mut().find(|page| page.offset == offset) {
            update(&mut **page);
            return Ok(());
        }
        let mut page = self.load(offset)?;
        update(&mut page);
        self.save(&page)
    }
}

/// Read and decode the page at `offset`.
pub(crate) fn read_dir_page<S: PageStore>(
    store: &mut S,
    offset: PageOffset,
) -> Result<DirPage, TreeError> {
    let page = store.read_page(offset)?;
    DirPage::from_page(offset, &page).map_err(|e| TreeError::corrupt(offset, e))
}

pub(crate) fn root_of(header: &DirHeader) -> Result<PageOffset, TreeError> {
    header
        .root
        .ok_or_else(|| TreeError::corrupt(0u64, "directory header has no root page"))
}

/// Descend from the root to the page holding `name`.
fn find_entry<S: PageStore>(
    store: &mut S,
    header: &DirHeader,
    name: &EntryName,
) -> Result<Option<(DirPage, usize)>, TreeError> {
    let mut offset = root_of(header)?;
    for _ in 0..=MAX_DEPTH {
        let page = read_dir_page(store, offset)?;
        match page.search(name, header.collation) {
            Ok(index) => return Ok(Some((page, index))),
            Err(slot) => match page.child(slot) {
                Some(child) => offset = child,
                None => return Ok(None),
            },
        }
    }
    Err(too_deep(offset))
}

fn too_deep(offset: PageOffset) -> TreeError {
    TreeError::corrupt(offset, "tree too deep, child links loop")
}

fn missing_child(page: &DirPage, index: usize) -> TreeError {
    TreeError::corrupt(page.offset, format!("internal page has no child {index}"))
}

/// Errors returned by directory operations.
#[derive(Debug)]
pub enum TreeError {
    /// Insert of a name that is already present.
    AlreadyExists(EntryName),
    /// Lookup, delete, or update of an absent name.
    NotFound(EntryName),
    /// On-disk structure violates an invariant.
    Corrupt { offset: u64, reason: String },
    /// Page store failure, including I/O errors.
    Store(StoreError),
}

impl TreeError {
    pub fn corrupt(offset: impl Into<u64>, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            offset: offset.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::Store(StoreError::Header(_)))
    }
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(name) => write!(f, "entry '{name}' already exists"),
            Self::NotFound(name) => write!(f, "entry '{name}' not found"),
            Self::Corrupt { offset, reason } => {
                write!(f, "corrupt directory at offset {offset}: {reason}")
            }
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TreeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { offset, reason } => Self::Corrupt { offset, reason },
            other => Self::Store(other),
        }
    }
}
