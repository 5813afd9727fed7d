//! Per-directory B-tree of entries.
//!
//! # Structure
//!
//! Every page holds up to `MAX_ENTRIES` entries sorted by name under the
//! directory's collation, plus one more child offset than entries. Besides the
//! tree links, each page sits on two intrusive lists anchored in the header:
//! - the tree-walk list, threading every live page for flat scans
//! - the gc list, threading freed pages for reuse
//!
//! # Usage
//!
//! ```
//! use dirmeta::entry::{Collation, DirEntry, EntryKind};
//! use dirmeta::storage::btree::Directory;
//! use dirmeta::storage::{MemoryStore, MetaLayout};
//!
//! let store = MemoryStore::new(MetaLayout::new(128));
//! let mut dir = Directory::create(store, 2, 1, Collation::Binary).unwrap();
//! dir.insert(DirEntry::new(10, "notes.txt".parse().unwrap(), EntryKind::File))
//!     .unwrap();
//!
//! let found = dir.lookup(&"notes.txt".parse().unwrap()).unwrap();
//! assert_eq!(found.map(|entry| entry.inode), Some(10));
//! assert_eq!(dir.total_children(), 1);
//! ```

mod node;
mod tree;
mod verify;
mod walk;

pub use node::{DirPage, ENTRY_LEN, MAX_ENTRIES, MIN_ENTRIES};
pub use tree::{Directory, TreeError};
pub use verify::TreeStats;
pub use walk::{WalkEntries, WalkPages};
