//! Directory metadata engine.
//!
//! Each directory owns one metadata file: an opaque stat block, a small header,
//! and fixed-size pages forming a B-tree of entries keyed by name. Layers:
//! - `entry`: names, kinds, and collation
//! - `storage`: page codec, header, page stores, page allocation
//! - `storage::btree`: the directory tree, its walk list, and consistency check
//! - `cli`: the `dirmeta` command-line tool

#![cfg_attr(test, allow(clippy::disallowed_methods, clippy::expect_used, clippy::unwrap_used))]

pub mod cli;
pub mod config;
pub mod entry;
pub mod storage;

pub use config::EngineConfig;
pub use entry::{Collation, DirEntry, EntryKind, EntryName, InodeId};
pub use storage::btree::{Directory, TreeError, TreeStats};
