//! In-memory page store for deterministic testing.
//!
//! `MemoryStore` keeps the whole metadata file as one byte vector, laid out
//! exactly like `MetaFile`, with fault injection:
//! - Failing every write after a budget is used up
//! - Random read errors
//! - Random bit flips on read

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::header::{DirHeader, HEADER_LEN};
use crate::storage::io::{MetaLayout, PageStore, StoreError};
use crate::storage::page::{PAGE_LEN, PAGE_LEN_U64, Page, PageOffset};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Number of writes (pages or header) allowed before every write fails.
    pub fail_writes_after: Option<u64>,
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of page corruption on read (0.0 - 1.0).
    pub corruption_rate: f64,
}

/// Statistics about store operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreStats {
    pub reads: u64,
    pub writes: u64,
    pub appends: u64,
    pub injected_faults: u64,
    pub corrupted_reads: u64,
}

/// An in-memory metadata file.
#[derive(Debug)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    layout: MetaLayout,
    faults: FaultConfig,
    rng: StdRng,
    stats: MemoryStoreStats,
}

impl MemoryStore {
    /// Create an empty store with no faults.
    #[must_use]
    pub fn new(layout: MetaLayout) -> Self {
        Self::with_faults(layout, 0, FaultConfig::default())
    }

    /// Create an empty store with the given fault configuration.
    ///
    /// The seed makes random faults reproducible.
    #[must_use]
    pub fn with_faults(layout: MetaLayout, seed: u64, faults: FaultConfig) -> Self {
        let len = usize::try_from(layout.first_page_offset()).unwrap_or(usize::MAX);
        Self {
            bytes: vec![0u8; len],
            layout,
            faults,
            rng: StdRng::seed_from_u64(seed),
            stats: MemoryStoreStats::default(),
        }
    }

    /// Replace the fault configuration. Resets the write budget counter.
    pub fn set_faults(&mut self, faults: FaultConfig) {
        self.faults = faults;
        self.stats.writes = 0;
    }

    #[must_use]
    pub const fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    /// The full backing bytes, for byte-for-byte comparisons.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Flip one bit directly in the backing bytes.
    pub fn flip_bit(&mut self, position: u64, bit: u8) {
        let byte = usize::try_from(position)
            .ok()
            .and_then(|index| self.bytes.get_mut(index));
        if let Some(byte) = byte {
            *byte ^= 1 << (bit % 8);
        }
    }

    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    fn check_write_budget(&mut self) -> Result<(), StoreError> {
        self.stats.writes += 1;
        let over_budget = self
            .faults
            .fail_writes_after
            .is_some_and(|budget| self.stats.writes > budget);
        if over_budget {
            self.stats.injected_faults += 1;
            return Err(StoreError::InjectedFault(format!(
                "write {} exceeds write budget",
                self.stats.writes
            )));
        }
        Ok(())
    }

    fn corrupt_page(&mut self, page: &mut Page) {
        let num_flips = self.rng.random_range(1..=8);
        for _ in 0..num_flips {
            let byte_offset = self.rng.random_range(0..PAGE_LEN);
            let bit = self.rng.random_range(0..8u8);
            page.as_bytes_mut()[byte_offset] ^= 1 << bit;
        }
    }

    fn slot_range(&self, offset: PageOffset) -> Result<std::ops::Range<usize>, StoreError> {
        self.layout.check_slot(offset, self.end_offset())?;
        let start = usize::try_from(offset.get())
            .map_err(|_| StoreError::corrupt(offset.get(), "offset exceeds address space"))?;
        Ok(start..start + PAGE_LEN)
    }

    fn header_range(&self) -> Result<std::ops::Range<usize>, StoreError> {
        let start = usize::try_from(self.layout.header_offset())
            .map_err(|_| StoreError::corrupt(0, "header offset exceeds address space"))?;
        Ok(start..start + HEADER_LEN)
    }
}

impl PageStore for MemoryStore {
    fn layout(&self) -> MetaLayout {
        self.layout
    }

    fn end_offset(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_page(&mut self, offset: PageOffset) -> Result<Page, StoreError> {
        self.stats.reads += 1;
        let range = self.slot_range(offset)?;

        if self.should_inject_fault(self.faults.read_error_rate) {
            self.stats.injected_faults += 1;
            return Err(StoreError::InjectedFault(
                "simulated read error".to_string(),
            ));
        }

        let mut page = Page::new();
        page.as_bytes_mut().copy_from_slice(&self.bytes[range]);

        if self.should_inject_fault(self.faults.corruption_rate) {
            self.stats.corrupted_reads += 1;
            self.corrupt_page(&mut page);
        }

        Ok(page)
    }

    fn write_page(&mut self, offset: PageOffset, page: &Page) -> Result<(), StoreError> {
        let range = self.slot_range(offset)?;
        self.check_write_budget()?;
        self.bytes[range].copy_from_slice(page.as_bytes());
        Ok(())
    }

    fn append_page(&mut self) -> Result<PageOffset, StoreError> {
        let end = self.end_offset();
        let offset =
            PageOffset::new(end).ok_or_else(|| StoreError::corrupt(0, "page slot at offset 0"))?;
        self.stats.appends += 1;
        self.bytes.resize(self.bytes.len() + PAGE_LEN, 0);
        debug_assert_eq!(self.end_offset(), end + PAGE_LEN_U64);
        Ok(offset)
    }

    fn read_header(&mut self) -> Result<DirHeader, StoreError> {
        let range = self.header_range()?;
        let mut buf = [0u8; HEADER_LEN];
        buf.copy_from_slice(&self.bytes[range]);
        Ok(DirHeader::from_bytes(&buf)?)
    }

    fn write_header(&mut self, header: &DirHeader) -> Result<(), StoreError> {
        let range = self.header_range()?;
        self.check_write_budget()?;
        self.bytes[range].copy_from_slice(&header.to_bytes());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Collation;

    fn layout() -> MetaLayout {
        MetaLayout::new(128)
    }

    #[test]
    fn test_memory_store_basic() {
        let mut store = MemoryStore::new(layout());
        let offset = store.append_page().expect("append");
        assert_eq!(offset.get(), 192);

        let mut page = Page::new();
        page.write_bytes(10, b"hello");
        store.write_page(offset, &page).expect("write");
        let read = store.read_page(offset).expect("read");
        assert_eq!(read.read_bytes(10, 5), b"hello");

        let header = DirHeader::new(Collation::Binary);
        store.write_header(&header).expect("write header");
        assert_eq!(store.read_header().expect("read header"), header);
    }

    #[test]
    fn test_write_budget() {
        let faults = FaultConfig {
            fail_writes_after: Some(1),
            ..FaultConfig::default()
        };
        let mut store = MemoryStore::with_faults(layout(), 1, faults);
        let offset = store.append_page().expect("append");

        store.write_page(offset, &Page::new()).expect("first write");
        let result = store.write_page(offset, &Page::new());
        assert!(matches!(result, Err(StoreError::InjectedFault(_))));
        assert_eq!(store.stats().injected_faults, 1);
    }

    #[test]
    fn test_read_faults_are_deterministic() {
        let faults = FaultConfig {
            read_error_rate: 0.5,
            ..FaultConfig::default()
        };

        let run = |seed| {
            let mut store = MemoryStore::with_faults(layout(), seed, faults.clone());
            let offset = store.append_page().expect("append");
            (0..20)
                .map(|_| store.read_page(offset).is_ok())
                .collect::<Vec<_>>()
        };

        assert_eq!(run(12345), run(12345), "same seed, same fault pattern");
    }

    #[test]
    fn test_corruption_flips_bits() {
        let faults = FaultConfig {
            corruption_rate: 1.0,
            ..FaultConfig::default()
        };
        let mut store = MemoryStore::with_faults(layout(), 7, faults);
        let offset = store.append_page().expect("append");
        let mut page = Page::with_type(crate::storage::PageType::Node);
        page.seal();
        store.write_page(offset, &page).expect("write");

        let read = store.read_page(offset).expect("read");
        assert_ne!(read, page);
        assert!(read.verify().is_err());
        assert_eq!(store.stats().corrupted_reads, 1);
    }
}
