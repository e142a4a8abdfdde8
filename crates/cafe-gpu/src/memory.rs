//! Guest memory access
//!
//! The command processor reads indirect buffers and shader microcode out of
//! guest memory. Address translation belongs to the memory subsystem, so it
//! is reached through the `GuestMemory` trait.

use std::collections::BTreeMap;

/// Read-only view of guest physical memory
pub trait GuestMemory: Send {
    /// Read `count` words starting at the guest byte address `addr`.
    ///
    /// Returns `None` if any part of the range is unmapped.
    fn read_words(&self, addr: u32, count: usize) -> Option<Vec<u32>>;
}

/// Guest memory made of separately mapped word regions
#[derive(Debug, Default, Clone)]
pub struct SparseMemory {
    regions: BTreeMap<u32, Vec<u32>>,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `words` at guest address `addr`, replacing any region starting there
    pub fn map(&mut self, addr: u32, words: Vec<u32>) {
        debug_assert!(addr % 4 == 0);
        self.regions.insert(addr, words);
    }

    pub fn with_region(mut self, addr: u32, words: Vec<u32>) -> Self {
        self.map(addr, words);
        self
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

impl GuestMemory for SparseMemory {
    fn read_words(&self, addr: u32, count: usize) -> Option<Vec<u32>> {
        let (&base, region) = self.regions.range(..=addr).next_back()?;
        let delta = addr - base;
        if delta % 4 != 0 {
            return None;
        }
        let start = (delta / 4) as usize;
        let end = start.checked_add(count)?;
        region.get(start..end).map(|words| words.to_vec())
    }
}

/// Memory with nothing mapped
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemory;

impl GuestMemory for NoMemory {
    fn read_words(&self, _addr: u32, count: usize) -> Option<Vec<u32>> {
        if count == 0 {
            Some(Vec::new())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_memory_reads_within_region() {
        let memory = SparseMemory::new().with_region(0x1000, vec![1, 2, 3, 4]);
        assert_eq!(memory.read_words(0x1000, 2), Some(vec![1, 2]));
        assert_eq!(memory.read_words(0x1008, 2), Some(vec![3, 4]));
        assert_eq!(memory.read_words(0x1008, 3), None);
        assert_eq!(memory.read_words(0x0FFC, 1), None);
        assert_eq!(memory.read_words(0x1002, 1), None);
    }

    #[test]
    fn test_sparse_memory_multiple_regions() {
        let memory = SparseMemory::new()
            .with_region(0x1000, vec![1])
            .with_region(0x2000, vec![9, 8]);
        assert_eq!(memory.region_count(), 2);
        assert_eq!(memory.read_words(0x2004, 1), Some(vec![8]));
        assert_eq!(memory.read_words(0x1004, 1), None);
    }

    #[test]
    fn test_no_memory() {
        assert!(NoMemory.read_words(0, 1).is_none());
        assert_eq!(NoMemory.read_words(0, 0), Some(vec![]));
    }
}
