//! The complex-number unit
//!
//! [`ComplexNumbers`] owns the interning table and the scratch cache and is
//! the only way to resolve a [`CtRef`] to its value. Arithmetic reads
//! operand values (from either store), computes in plain doubles, and lands
//! results in fresh cache slots (`*_cached`); interning back into the table
//! happens through [`lookup`](ComplexNumbers::lookup) /
//! [`lookup_complex`](ComplexNumbers::lookup_complex) at operation
//! boundaries. Conjugation never allocates: it flips the sign tag of the
//! imaginary handle.

use crate::complex::{Complex, ComplexValue, CtRef};
use crate::ctable::{ComplexCache, ComplexTable};
use crate::Fp;

/// Arithmetic unit over table- and cache-resident complex numbers.
#[derive(Debug)]
pub struct ComplexNumbers {
    pub(crate) table: ComplexTable,
    pub(crate) cache: ComplexCache,
}

impl ComplexNumbers {
    pub(crate) fn new(buckets: usize, tolerance: Fp, gc_limit: usize) -> Self {
        Self {
            table: ComplexTable::new(buckets, tolerance, gc_limit),
            cache: ComplexCache::new(),
        }
    }

    /// The active interning tolerance τ.
    #[inline]
    pub fn tolerance(&self) -> Fp {
        self.table.tolerance()
    }

    /// Resolve a handle: strip the tags, read the owning store, apply the
    /// sign.
    #[inline]
    pub fn val(&self, r: CtRef) -> Fp {
        let raw = if r.is_cache() {
            self.cache.value_of(r.slot())
        } else {
            self.table.value_of(r.slot())
        };
        if r.is_negative() {
            -raw
        } else {
            raw
        }
    }

    /// Resolve both components of a complex handle pair.
    #[inline]
    pub fn val_c(&self, c: Complex) -> ComplexValue {
        ComplexValue::new(self.val(c.re), self.val(c.im))
    }

    /// Intern a value pair, snapping within τ of 0 and ±1.
    #[inline]
    pub fn lookup(&mut self, re: Fp, im: Fp) -> Complex {
        Complex { re: self.table.lookup(re), im: self.table.lookup(im) }
    }

    /// Intern a [`ComplexValue`].
    #[inline]
    pub fn lookup_value(&mut self, v: ComplexValue) -> Complex {
        self.lookup(v.re, v.im)
    }

    /// Normalize a (possibly cached) complex into table-interned form.
    #[inline]
    pub fn lookup_complex(&mut self, c: Complex) -> Complex {
        let v = self.val_c(c);
        self.lookup_value(v)
    }

    /// A scratch complex holding `v`, never interned.
    #[inline]
    pub fn temporary(&mut self, v: ComplexValue) -> Complex {
        Complex { re: self.cache.alloc(v.re), im: self.cache.alloc(v.im) }
    }

    /// Release a scratch complex back to the cache. Idempotent on interned
    /// handles (including `ZERO` and `ONE`), which are simply ignored.
    pub fn release(&mut self, c: Complex) {
        if c.re.is_cache() {
            self.cache.release_slot(c.re.slot());
        }
        if c.im.is_cache() {
            self.cache.release_slot(c.im.slot());
        }
    }

    /// Product into a fresh scratch complex.
    #[inline]
    pub fn mul_cached(&mut self, a: Complex, b: Complex) -> Complex {
        let v = self.val_c(a).mul(self.val_c(b));
        self.temporary(v)
    }

    /// Sum into a fresh scratch complex.
    #[inline]
    pub fn add_cached(&mut self, a: Complex, b: Complex) -> Complex {
        let v = self.val_c(a).add(self.val_c(b));
        self.temporary(v)
    }

    /// Difference into a fresh scratch complex.
    #[inline]
    pub fn sub_cached(&mut self, a: Complex, b: Complex) -> Complex {
        let v = self.val_c(a).sub(self.val_c(b));
        self.temporary(v)
    }

    /// Quotient into a fresh scratch complex.
    #[inline]
    pub fn div_cached(&mut self, a: Complex, b: Complex) -> Complex {
        let v = self.val_c(a).div(self.val_c(b));
        self.temporary(v)
    }

    /// Squared magnitude of a handle pair.
    #[inline]
    pub fn mag2(&self, c: Complex) -> Fp {
        self.val_c(c).mag2()
    }

    /// Conjugate by sign-tag flip; no allocation, zero-safe.
    #[inline]
    pub fn conj(&self, c: Complex) -> Complex {
        Complex { re: c.re, im: c.im.negate() }
    }

    /// Both components within τ of zero.
    #[inline]
    pub fn approx_zero(&self, c: Complex) -> bool {
        self.val_c(c).approx_zero(self.tolerance())
    }

    /// Within τ of one.
    #[inline]
    pub fn approx_one(&self, c: Complex) -> bool {
        self.val_c(c).approx_one(self.tolerance())
    }

    /// Bump table usage counts for both components.
    #[inline]
    pub(crate) fn inc_ref(&mut self, c: Complex) {
        self.table.inc_ref(c.re.abs());
        self.table.inc_ref(c.im.abs());
    }

    /// Drop table usage counts for both components.
    #[inline]
    pub(crate) fn dec_ref(&mut self, c: Complex) {
        self.table.dec_ref(c.re.abs());
        self.table.dec_ref(c.im.abs());
    }
}
