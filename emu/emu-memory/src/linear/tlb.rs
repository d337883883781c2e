//! Software TLB.
//!
//! Four page-indexed caches, one per `[access][privilege]` pair. Each cache
//! is a 1024-entry directory of lazily allocated 1024-slot leaves, so an
//! empty cache costs one small array and flushing drops leaves wholesale.
//!
//! Alongside the caches:
//!
//! - the set of page indices cached from non-global entries since the last
//!   flush, which is all a partial flush has to clear;
//! - one bit per page index recording whether the cached translation came
//!   from a 4 MiB page, so a single-page invalidate knows how much to drop.

use crate::block::BlockRef;
use crate::page_fault::{AccessType, Privilege};
use crate::snapshot::{
    SnapshotError, SnapshotReader, SnapshotWriter, read_guarded, read_len, write_guarded, write_len,
};
use crate::BLOCK_COUNT;
use log::trace;
use std::collections::HashSet;

const LEAF_BITS: u32 = 10;
const LEAF_LEN: usize = 1 << LEAF_BITS;
const LEAF_MASK: u32 = (1 << LEAF_BITS) - 1;

/// Page indices covered by one 4 MiB page.
pub(super) const LARGE_PAGE_SLOTS: u32 = 1 << LEAF_BITS;

type Leaf = Box<[Option<BlockRef>]>;

fn empty<T>() -> Box<[Option<T>]> {
    (0..LEAF_LEN).map(|_| None).collect()
}

struct CacheTable {
    leaves: Box<[Option<Leaf>]>,
}

impl CacheTable {
    fn new() -> Self {
        Self { leaves: empty() }
    }

    #[inline(always)]
    fn get(&self, index: u32) -> Option<&BlockRef> {
        self.leaves[(index >> LEAF_BITS) as usize].as_ref()?[(index & LEAF_MASK) as usize].as_ref()
    }

    fn set(&mut self, index: u32, block: BlockRef) {
        let leaf = self.leaves[(index >> LEAF_BITS) as usize].get_or_insert_with(empty);
        leaf[(index & LEAF_MASK) as usize] = Some(block);
    }

    fn remove(&mut self, index: u32) {
        if let Some(leaf) = &mut self.leaves[(index >> LEAF_BITS) as usize] {
            leaf[(index & LEAF_MASK) as usize] = None;
        }
    }

    fn clear(&mut self) {
        self.leaves.fill_with(|| None);
    }

    fn save(&self, out: &mut dyn SnapshotWriter) -> Result<(), SnapshotError> {
        write_guarded(out, self.leaves.iter().map(Option::as_ref), |out, leaf| {
            write_guarded(out, leaf.iter().map(Option::as_ref), |out, block| out.write_block(block))
        })
    }

    fn load(input: &mut dyn SnapshotReader) -> Result<Self, SnapshotError> {
        let leaves = read_guarded(input, "cache directory length", LEAF_LEN, |input| {
            read_guarded(input, "cache leaf length", LEAF_LEN, |input| input.read_block())
                .map(Vec::into_boxed_slice)
        })?;
        Ok(Self {
            leaves: leaves.into_boxed_slice(),
        })
    }
}

pub(super) struct SoftTlb {
    /// Indexed `[access][privilege]`.
    tables: [[CacheTable; 2]; 2],
    non_global: HashSet<u32>,
    large_pages: Box<[u64]>,
}

impl SoftTlb {
    pub fn new() -> Self {
        Self {
            tables: [
                [CacheTable::new(), CacheTable::new()],
                [CacheTable::new(), CacheTable::new()],
            ],
            non_global: HashSet::new(),
            large_pages: vec![0; BLOCK_COUNT / 64].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn get(&self, access: AccessType, privilege: Privilege, index: u32) -> Option<&BlockRef> {
        self.tables[access.index()][privilege.index()].get(index)
    }

    pub fn insert(
        &mut self,
        access: AccessType,
        privilege: Privilege,
        index: u32,
        block: BlockRef,
        global: bool,
        large: bool,
    ) {
        self.tables[access.index()][privilege.index()].set(index, block);
        if !global {
            self.non_global.insert(index);
        }

        // Cleared only by invalidating the run or a full flush.
        if large {
            let (word, bit) = Self::large_bit(index);
            self.large_pages[word] |= bit;
        }
    }

    #[inline]
    const fn large_bit(index: u32) -> (usize, u64) {
        ((index / 64) as usize, 1 << (index % 64))
    }

    pub fn is_large(&self, index: u32) -> bool {
        let (word, bit) = Self::large_bit(index);
        self.large_pages[word] & bit != 0
    }

    /// Drop every cached translation.
    pub fn flush(&mut self) {
        trace!("Flushing software TLB");
        for table in self.tables.iter_mut().flatten() {
            table.clear();
        }
        self.non_global.clear();
        self.large_pages.fill(0);
    }

    /// Drop translations cached from non-global entries.
    pub fn flush_non_global(&mut self) {
        trace!("Flushing {} non-global software TLB entries", self.non_global.len());
        for index in self.non_global.drain() {
            for table in self.tables.iter_mut().flatten() {
                table.remove(index);
            }
        }
    }

    /// Drop the page containing `index`: one slot, or the whole aligned run
    /// if it was cached from a 4 MiB page.
    pub fn invalidate(&mut self, index: u32) {
        let slots = if self.is_large(index) {
            let first = index & !LEAF_MASK;
            first..first + LARGE_PAGE_SLOTS
        } else {
            index..index + 1
        };
        trace!("Invalidating software TLB slots {:#07x}..{:#07x}", slots.start, slots.end);

        for index in slots {
            for table in self.tables.iter_mut().flatten() {
                table.remove(index);
            }
            self.non_global.remove(&index);
            let (word, bit) = Self::large_bit(index);
            self.large_pages[word] &= !bit;
        }
    }

    /// Drop one `[access][privilege]` cache, keeping the others.
    pub fn clear_table(&mut self, access: AccessType, privilege: Privilege) {
        trace!("Clearing {privilege} {access} software TLB");
        self.tables[access.index()][privilege.index()].clear();
    }

    #[cfg(test)]
    pub fn is_tracked(&self, index: u32) -> bool {
        self.non_global.contains(&index)
    }

    pub fn save(&self, out: &mut dyn SnapshotWriter) -> Result<(), SnapshotError> {
        for table in self.tables.iter().flatten() {
            table.save(out)?;
        }

        let mut non_global: Vec<u32> = self.non_global.iter().copied().collect();
        non_global.sort_unstable();
        write_len(out, non_global.len())?;
        for index in non_global {
            out.write_u32(index)?;
        }

        write_len(out, self.large_pages.len())?;
        for &word in &self.large_pages {
            #[allow(clippy::cast_possible_truncation)]
            {
                out.write_u32(word as u32)?;
                out.write_u32((word >> 32) as u32)?;
            }
        }
        Ok(())
    }

    pub fn load(input: &mut dyn SnapshotReader) -> Result<Self, SnapshotError> {
        let tables = [
            [CacheTable::load(input)?, CacheTable::load(input)?],
            [CacheTable::load(input)?, CacheTable::load(input)?],
        ];

        let count = input.read_u32()? as usize;
        if count > BLOCK_COUNT {
            return Err(SnapshotError::Corrupt("non-global set larger than the address space"));
        }
        let mut non_global = HashSet::with_capacity(count);
        for _ in 0..count {
            let index = input.read_u32()?;
            if index as usize >= BLOCK_COUNT {
                return Err(SnapshotError::Corrupt("non-global page index out of range"));
            }
            non_global.insert(index);
        }

        read_len(input, "page size table length", BLOCK_COUNT / 64)?;
        let mut large_pages = Vec::with_capacity(BLOCK_COUNT / 64);
        for _ in 0..BLOCK_COUNT / 64 {
            let low = u64::from(input.read_u32()?);
            let high = u64::from(input.read_u32()?);
            large_pages.push(low | (high << 32));
        }

        Ok(Self {
            tables,
            non_global,
            large_pages: large_pages.into_boxed_slice(),
        })
    }
}
