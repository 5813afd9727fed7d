//! Metadata file I/O operations.
//!
//! This module reads and writes whole page slots and the directory header of a
//! single directory metadata file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::config::EngineConfig;
use crate::storage::header::{DirHeader, HEADER_LEN};
use crate::storage::io::{MetaLayout, PageStore, StoreError};
use crate::storage::page::{PAGE_LEN_U64, Page, PageOffset};

/// A directory metadata file with whole-page I/O.
#[derive(Debug)]
pub struct MetaFile {
    file: File,
    layout: MetaLayout,
    /// Current file length, always `first_page_offset + n * PAGE_LEN`.
    len: u64,
    sync: bool,
}

impl MetaFile {
    /// Create a new metadata file at the given path.
    ///
    /// Returns an error if the file already exists. The stat block and header
    /// region are zero-filled; the header is written when the directory root
    /// is created.
    pub fn create(path: &Path, config: &EngineConfig) -> Result<Self, StoreError> {
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let layout = config.layout();
        let len = layout.first_page_offset();
        file.set_len(len)?;

        Ok(Self {
            file,
            layout,
            len,
            sync: config.sync,
        })
    }

    /// Open an existing metadata file.
    pub fn open(path: &Path, config: &EngineConfig) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let layout = config.layout();
        let len = file.metadata()?.len();
        let first = layout.first_page_offset();
        if len < first {
            return Err(StoreError::corrupt(
                len,
                format!("file shorter than stat block and header ({first} bytes)"),
            ));
        }
        if (len - first) % PAGE_LEN_U64 != 0 {
            return Err(StoreError::corrupt(len, "file ends inside a page slot"));
        }

        Ok(Self {
            file,
            layout,
            len,
            sync: config.sync,
        })
    }

    /// Read the opaque stat block.
    pub fn read_stat(&mut self) -> Result<Vec<u8>, StoreError> {
        let len = usize::try_from(self.layout.stat_len())
            .map_err(|_| StoreError::corrupt(0, "stat block too large for memory"))?;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl PageStore for MetaFile {
    fn layout(&self) -> MetaLayout {
        self.layout
    }

    fn end_offset(&self) -> u64 {
        self.len
    }

    fn read_page(&mut self, offset: PageOffset) -> Result<Page, StoreError> {
        self.layout.check_slot(offset, self.len)?;

        let mut page = Page::new();
        self.file.seek(SeekFrom::Start(offset.get()))?;
        self.file.read_exact(page.as_bytes_mut())?;

        Ok(page)
    }

    fn write_page(&mut self, offset: PageOffset, page: &Page) -> Result<(), StoreError> {
        self.layout.check_slot(offset, self.len)?;

        self.file.seek(SeekFrom::Start(offset.get()))?;
        self.file.write_all(page.as_bytes())?;

        Ok(())
    }

    fn append_page(&mut self) -> Result<PageOffset, StoreError> {
        let offset = PageOffset::new(self.len)
            .ok_or_else(|| StoreError::corrupt(0, "page slot at offset 0"))?;
        let new_len = self.len + PAGE_LEN_U64;
        self.file.set_len(new_len)?;
        self.len = new_len;
        Ok(offset)
    }

    fn read_header(&mut self) -> Result<DirHeader, StoreError> {
        let mut buf = [0u8; HEADER_LEN];
        self.file
            .seek(SeekFrom::Start(self.layout.header_offset()))?;
        self.file.read_exact(&mut buf)?;
        Ok(DirHeader::from_bytes(&buf)?)
    }

    fn write_header(&mut self, header: &DirHeader) -> Result<(), StoreError> {
        self.file
            .seek(SeekFrom::Start(self.layout.header_offset()))?;
        self.file.write_all(&header.to_bytes())?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }
}
