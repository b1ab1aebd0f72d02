use bytes::Bytes;
use std::collections::HashMap;

/// A bounded set of cached blocks with first-in-first-out replacement.
///
/// The `slots` vector is a circular list of cached blocks and `hand` is the index of the oldest
/// one. Once all `capacity` slots are occupied, inserting a new block overwrites the slot under
/// the hand and advances it, so blocks are always evicted in the order they were inserted,
/// regardless of how often they were read in between.
pub(super) struct Fifo {
    /// Maps each cached block index to its slot in `slots`.
    ///
    /// # Invariants
    ///
    /// Each `index` entry maps to exactly one slot, and that slot always holds the same block.
    index: HashMap<u64, usize>,

    /// The cached blocks.
    slots: Vec<Slot>,

    /// Index into `slots` of the oldest block once `slots` is full (0 until then).
    hand: usize,

    /// The maximum number of blocks that will be cached.
    capacity: usize,
}

struct Slot {
    /// The block index.
    block: u64,

    /// The block contents (never mutated once stored).
    data: Bytes,
}

impl Fifo {
    /// Return an empty cache that holds at most `capacity` blocks. A capacity of 0 caches
    /// nothing.
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            hand: 0,
            capacity,
        }
    }

    /// Return the contents of `block`, if cached.
    pub(super) fn get(&self, block: u64) -> Option<&Bytes> {
        let slot = &self.slots[*self.index.get(&block)?];
        debug_assert_eq!(slot.block, block);
        Some(&slot.data)
    }

    pub(super) fn contains(&self, block: u64) -> bool {
        self.index.contains_key(&block)
    }

    pub(super) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cache `data` as the contents of `block`, returning the block that was evicted (if any).
    ///
    /// If `block` is already cached, the existing contents are kept and nothing is evicted. With
    /// a capacity of 0, `block` itself is returned as evicted.
    pub(super) fn insert(&mut self, block: u64, data: Bytes) -> Option<u64> {
        if self.contains(block) {
            return None;
        }
        if self.capacity == 0 {
            return Some(block);
        }

        if self.slots.len() < self.capacity {
            self.index.insert(block, self.slots.len());
            self.slots.push(Slot { block, data });
            return None;
        }

        // Cache is full, replace the oldest block.
        let slot = &mut self.slots[self.hand];
        let evicted = slot.block;
        assert!(self.index.remove(&evicted).is_some());
        self.index.insert(block, self.hand);
        slot.block = block;
        slot.data = data;

        // Move the hand to the next oldest block.
        self.hand = (self.hand + 1) % self.slots.len();
        Some(evicted)
    }

    /// Iterate over cached block indices from oldest to newest.
    pub(super) fn blocks(&self) -> impl Iterator<Item = u64> + '_ {
        let (newer, older) = self.slots.split_at(self.hand);
        older.iter().chain(newer).map(|slot| slot.block)
    }
}
