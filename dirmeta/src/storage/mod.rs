//! Page storage for directory metadata files.
//!
//! # File Format
//!
//! Each directory has its own metadata file:
//!
//! - Bytes `0..stat_len`: opaque stat block owned by the caller
//! - Next 64 bytes: directory header (root, gc list, tree-walk list, counters)
//! - Remaining bytes: fixed-size page slots addressed by absolute byte offset
//!
//! # Usage
//!
//! ```ignore
//! use dirmeta::storage::{MetaFile, PageStore};
//!
//! let mut file = MetaFile::create(path, &EngineConfig::default())?;
//! let offset = file.append_page()?;
//! file.write_page(offset, &page)?;
//! file.flush()?;
//! ```

mod allocator;
pub mod btree;
mod file;
mod header;
mod io;
mod memory;
mod page;

pub use allocator::{allocate_page, free_page, read_free_page};
pub use file::MetaFile;
pub use header::{DirHeader, FORMAT_VERSION, HEADER_LEN, HeaderError, MAGIC};
pub use io::{MetaLayout, PageStore, StoreError};
pub use memory::{FaultConfig, MemoryStore, MemoryStoreStats};
pub use page::{PAGE_LEN, PAGE_LEN_U64, Page, PageError, PageHeader, PageOffset, PageType};
pub(crate) use page::offsets;
