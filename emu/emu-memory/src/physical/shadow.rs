//! One view of the physical block index.
//!
//! Blocks below the RAM size live in a flat `quick` array. Everything above
//! goes into a two-level table of 1024 × 1024 slots whose leaves are only
//! allocated when something is mapped there.

use crate::block::{BlockRef, same_block};
use crate::snapshot::{SnapshotError, SnapshotReader, SnapshotWriter, read_guarded, write_guarded};

const LEAF_BITS: u32 = 10;
const LEAF_LEN: usize = 1 << LEAF_BITS;
const LEAF_MASK: u32 = (1 << LEAF_BITS) - 1;

type Leaf = Box<[BlockRef]>;

pub(super) struct ShadowIndex {
    quick: Box<[BlockRef]>,
    sparse: Box<[Option<Leaf>]>,
    unconnected: BlockRef,
}

impl ShadowIndex {
    pub fn new(quick_len: usize, unconnected: &BlockRef) -> Self {
        Self {
            quick: vec![unconnected.clone(); quick_len].into_boxed_slice(),
            sparse: (0..LEAF_LEN).map(|_| None).collect(),
            unconnected: unconnected.clone(),
        }
    }

    #[inline(always)]
    pub fn get(&self, index: u32) -> &BlockRef {
        let i = index as usize;
        if i < self.quick.len() {
            return &self.quick[i];
        }
        match &self.sparse[(index >> LEAF_BITS) as usize] {
            Some(leaf) => &leaf[(index & LEAF_MASK) as usize],
            None => &self.unconnected,
        }
    }

    pub fn set(&mut self, index: u32, block: BlockRef) {
        let i = index as usize;
        if i < self.quick.len() {
            self.quick[i] = block;
            return;
        }

        let slot = &mut self.sparse[(index >> LEAF_BITS) as usize];
        if slot.is_none() && same_block(&block, &self.unconnected) {
            return;
        }
        let unconnected = &self.unconnected;
        let leaf = slot.get_or_insert_with(|| vec![unconnected.clone(); LEAF_LEN].into_boxed_slice());
        leaf[(index & LEAF_MASK) as usize] = block;
    }

    /// Every slot that holds something other than the unconnected sentinel.
    pub fn mapped(&self) -> impl Iterator<Item = &BlockRef> {
        self.quick
            .iter()
            .chain(self.sparse.iter().flatten().flat_map(|leaf| leaf.iter()))
            .filter(|block| !same_block(block, &self.unconnected))
    }

    /// Number of allocated sparse leaves.
    #[cfg(test)]
    pub fn leaves(&self) -> usize {
        self.sparse.iter().flatten().count()
    }

    fn present<'a>(&'a self, slots: &'a [BlockRef]) -> impl ExactSizeIterator<Item = Option<&'a BlockRef>> + Clone {
        slots
            .iter()
            .map(|block| (!same_block(block, &self.unconnected)).then_some(block))
    }

    pub fn save(&self, out: &mut dyn SnapshotWriter) -> Result<(), SnapshotError> {
        write_guarded(out, self.present(&self.quick), |out, block| out.write_block(block))?;
        write_guarded(out, self.sparse.iter().map(Option::as_ref), |out, leaf| {
            write_guarded(out, self.present(leaf), |out, block| out.write_block(block))
        })
    }

    pub fn load(&mut self, input: &mut dyn SnapshotReader) -> Result<(), SnapshotError> {
        let quick = read_guarded(input, "quick index length", self.quick.len(), |input| input.read_block())?;
        let sparse = read_guarded(input, "sparse index length", LEAF_LEN, |input| {
            read_guarded(input, "sparse leaf length", LEAF_LEN, |input| input.read_block())
        })?;

        let unconnected = &self.unconnected;
        let fill = |slots: Vec<Option<BlockRef>>| -> Box<[BlockRef]> {
            slots
                .into_iter()
                .map(|slot| slot.unwrap_or_else(|| unconnected.clone()))
                .collect()
        };
        let quick = fill(quick);
        let sparse = sparse.into_iter().map(|leaf| leaf.map(fill)).collect();

        self.quick = quick;
        self.sparse = sparse;
        Ok(())
    }
}
