//! Memoization tables
//!
//! Direct-mapped, lossy caches for the recursive operations: a slot holds
//! the most recent `(key, result)` whose hash landed there, a colliding
//! insert simply overwrites. Entries are non-owning hints keyed on node ids
//! and weight identities, so every garbage sweep clears every table.
//!
//! Addition is memoized on *value-carrying* keys ([`VCached`]/[`MCached`]:
//! node id plus weight value), because its recursion runs on scratch
//! weights whose handles are recycled; multiplication, Kronecker and the
//! unary ops key on interned edges directly.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::complex::ComplexValue;
use crate::node::{MNodeId, VNodeId};

/// A vector node paired with a weight *value* — the key/result form used
/// where scratch weights make handle identity unusable.
#[derive(Copy, Clone, Debug)]
pub(crate) struct VCached {
    pub node: VNodeId,
    pub w: ComplexValue,
}

/// Matrix counterpart of [`VCached`].
#[derive(Copy, Clone, Debug)]
pub(crate) struct MCached {
    pub node: MNodeId,
    pub w: ComplexValue,
}

macro_rules! cached_identity {
    ($t:ty) => {
        impl PartialEq for $t {
            fn eq(&self, o: &Self) -> bool {
                self.node == o.node
                    && self.w.re.to_bits() == o.w.re.to_bits()
                    && self.w.im.to_bits() == o.w.im.to_bits()
            }
        }
        impl Eq for $t {}
        impl Hash for $t {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.node.hash(state);
                self.w.re.to_bits().hash(state);
                self.w.im.to_bits().hash(state);
            }
        }
    };
}

cached_identity!(VCached);
cached_identity!(MCached);

/// Direct-mapped memoization of a binary operation.
#[derive(Debug)]
pub(crate) struct ComputeTable<L, R, T> {
    entries: Box<[Option<(L, R, T)>]>,
    mask: u64,
    lookups: u64,
    hits: u64,
}

impl<L: Copy + Eq + Hash, R: Copy + Eq + Hash, T: Copy> ComputeTable<L, R, T> {
    pub(crate) fn new(slots: usize) -> Self {
        let slots = slots.next_power_of_two();
        Self {
            entries: (0..slots).map(|_| None).collect(),
            mask: (slots - 1) as u64,
            lookups: 0,
            hits: 0,
        }
    }

    #[inline]
    fn slot(&self, l: &L, r: &R) -> usize {
        let mut h = FxHasher::default();
        l.hash(&mut h);
        r.hash(&mut h);
        (h.finish() & self.mask) as usize
    }

    pub(crate) fn lookup(&mut self, l: L, r: R) -> Option<T> {
        self.lookups += 1;
        let s = self.slot(&l, &r);
        match &self.entries[s] {
            Some((kl, kr, t)) if *kl == l && *kr == r => {
                self.hits += 1;
                Some(*t)
            }
            _ => None,
        }
    }

    pub(crate) fn insert(&mut self, l: L, r: R, t: T) {
        let s = self.slot(&l, &r);
        self.entries[s] = Some((l, r, t));
    }

    pub(crate) fn clear(&mut self) {
        for e in self.entries.iter_mut() {
            *e = None;
        }
    }

    #[allow(dead_code)]
    pub(crate) fn hit_ratio(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

/// Direct-mapped memoization of a unary operation.
#[derive(Debug)]
pub(crate) struct UnaryComputeTable<K, T> {
    entries: Box<[Option<(K, T)>]>,
    mask: u64,
    lookups: u64,
    hits: u64,
}

impl<K: Copy + Eq + Hash, T: Copy> UnaryComputeTable<K, T> {
    pub(crate) fn new(slots: usize) -> Self {
        let slots = slots.next_power_of_two();
        Self {
            entries: (0..slots).map(|_| None).collect(),
            mask: (slots - 1) as u64,
            lookups: 0,
            hits: 0,
        }
    }

    #[inline]
    fn slot(&self, k: &K) -> usize {
        let mut h = FxHasher::default();
        k.hash(&mut h);
        (h.finish() & self.mask) as usize
    }

    pub(crate) fn lookup(&mut self, k: K) -> Option<T> {
        self.lookups += 1;
        let s = self.slot(&k);
        match &self.entries[s] {
            Some((kk, t)) if *kk == k => {
                self.hits += 1;
                Some(*t)
            }
            _ => None,
        }
    }

    pub(crate) fn insert(&mut self, k: K, t: T) {
        let s = self.slot(&k);
        self.entries[s] = Some((k, t));
    }

    pub(crate) fn clear(&mut self) {
        for e in self.entries.iter_mut() {
            *e = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_after_insert() {
        let mut t: ComputeTable<u32, u32, u64> = ComputeTable::new(64);
        assert_eq!(t.lookup(1, 2), None);
        t.insert(1, 2, 42);
        assert_eq!(t.lookup(1, 2), Some(42));
        // operand order is part of the key
        assert_eq!(t.lookup(2, 1), None);
    }

    #[test]
    fn colliding_insert_overwrites() {
        let mut t: ComputeTable<u32, u32, u64> = ComputeTable::new(1);
        t.insert(1, 1, 10);
        t.insert(2, 2, 20);
        assert_eq!(t.lookup(1, 1), None);
        assert_eq!(t.lookup(2, 2), Some(20));
    }

    #[test]
    fn clear_drops_everything() {
        let mut t: UnaryComputeTable<u32, u64> = UnaryComputeTable::new(64);
        t.insert(7, 70);
        assert_eq!(t.lookup(7), Some(70));
        t.clear();
        assert_eq!(t.lookup(7), None);
    }

    #[test]
    fn cached_keys_compare_by_value_bits() {
        let a = VCached { node: VNodeId(3), w: ComplexValue::new(0.5, -0.0) };
        let b = VCached { node: VNodeId(3), w: ComplexValue::new(0.5, -0.0) };
        let c = VCached { node: VNodeId(3), w: ComplexValue::new(0.5, 0.0) };
        assert_eq!(a, b);
        // -0.0 and +0.0 are distinct keys on purpose: bit identity, no
        // float-comparison edge cases
        assert_ne!(a, c);
        let mut t: ComputeTable<VCached, VCached, u32> = ComputeTable::new(64);
        t.insert(a, b, 5);
        assert_eq!(t.lookup(b, a), None);
        assert_eq!(t.lookup(a, b), Some(5));
    }
}
