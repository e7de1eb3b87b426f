//! Complex values and interned complex handles
//!
//! Two representations coexist. [`ComplexValue`] is a plain `(re, im)` pair
//! of doubles used for gate-matrix literals, memoized results and extraction
//! output. [`Complex`] is a pair of [`CtRef`] handles into the interning
//! table (or the scratch cache), and is what edges carry: equality of two
//! `Complex` values is equality of their handles, so after interning,
//! "equals" implies "byte-identical".
//!
//! A `CtRef` packs a sign tag into its low bit so that `-x` and `+x` share
//! one table entry; bit 1 distinguishes scratch-cache slots from table slots.
//! Resolving a handle to its value goes through
//! [`ComplexNumbers::val`](crate::cnum::ComplexNumbers::val).

use std::fmt;

use crate::Fp;

// ---------------------------------------------------------------------------
// Plain values
// ---------------------------------------------------------------------------

/// A complex number as a plain value pair. IEEE-754 double semantics
/// throughout; no interning, no identity.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct ComplexValue {
    /// Real part.
    pub re: Fp,
    /// Imaginary part.
    pub im: Fp,
}

impl ComplexValue {
    /// The additive identity.
    pub const ZERO: ComplexValue = ComplexValue { re: 0.0, im: 0.0 };
    /// The multiplicative identity.
    pub const ONE: ComplexValue = ComplexValue { re: 1.0, im: 0.0 };

    /// Construct from parts.
    #[inline]
    pub const fn new(re: Fp, im: Fp) -> Self {
        Self { re, im }
    }

    /// Squared magnitude `re² + im²`.
    #[inline]
    pub fn mag2(self) -> Fp {
        self.re * self.re + self.im * self.im
    }

    /// Complex conjugate.
    #[inline]
    pub fn conj(self) -> Self {
        Self { re: self.re, im: -self.im }
    }

    /// Complex product.
    #[inline]
    pub fn mul(self, o: Self) -> Self {
        Self {
            re: self.re * o.re - self.im * o.im,
            im: self.re * o.im + self.im * o.re,
        }
    }

    /// Complex sum.
    #[inline]
    pub fn add(self, o: Self) -> Self {
        Self { re: self.re + o.re, im: self.im + o.im }
    }

    /// Complex difference.
    #[inline]
    pub fn sub(self, o: Self) -> Self {
        Self { re: self.re - o.re, im: self.im - o.im }
    }

    /// Complex quotient.
    #[inline]
    pub fn div(self, o: Self) -> Self {
        let d = o.mag2();
        Self {
            re: (self.re * o.re + self.im * o.im) / d,
            im: (self.im * o.re - self.re * o.im) / d,
        }
    }

    /// Both components within `tol` of zero.
    #[inline]
    pub fn approx_zero(self, tol: Fp) -> bool {
        self.re.abs() <= tol && self.im.abs() <= tol
    }

    /// Within `tol` of the multiplicative identity.
    #[inline]
    pub fn approx_one(self, tol: Fp) -> bool {
        (self.re - 1.0).abs() <= tol && self.im.abs() <= tol
    }

    /// Component-wise comparison within `tol`.
    #[inline]
    pub fn approx_eq(self, o: Self, tol: Fp) -> bool {
        (self.re - o.re).abs() <= tol && (self.im - o.im).abs() <= tol
    }

    /// Both components finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

impl fmt::Display for ComplexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.im == 0.0 {
            write!(f, "{}", self.re)
        } else if self.im < 0.0 {
            write!(f, "{}{}i", self.re, self.im)
        } else {
            write!(f, "{}+{}i", self.re, self.im)
        }
    }
}

// ---------------------------------------------------------------------------
// Tagged handles
// ---------------------------------------------------------------------------

/// A tagged reference to a real coefficient.
///
/// Layout: bit 0 is the sign tag, bit 1 marks scratch-cache slots, the
/// remaining bits are the slot index. Table slots 0 and 1 are the immortal
/// `0.0` and `1.0` entries; [`CtRef::ZERO`] and [`CtRef::ONE`] address them
/// untagged.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CtRef(u32);

impl CtRef {
    const SIGN: u32 = 0b01;
    const CACHE: u32 = 0b10;

    /// Handle to the immortal `0.0` table entry.
    pub const ZERO: CtRef = CtRef(0);
    /// Handle to the immortal `1.0` table entry.
    pub const ONE: CtRef = CtRef(1 << 2);

    /// Untagged handle to table slot `slot`.
    #[inline]
    pub(crate) const fn table(slot: u32) -> CtRef {
        CtRef(slot << 2)
    }

    /// Untagged handle to cache slot `slot`.
    #[inline]
    pub(crate) const fn cache(slot: u32) -> CtRef {
        CtRef((slot << 2) | CtRef::CACHE)
    }

    /// Slot index with tags stripped.
    #[inline]
    pub(crate) fn slot(self) -> u32 {
        self.0 >> 2
    }

    /// Whether this handle addresses the scratch cache.
    #[inline]
    pub(crate) fn is_cache(self) -> bool {
        self.0 & CtRef::CACHE != 0
    }

    /// Whether the sign tag is set.
    #[inline]
    pub(crate) fn is_negative(self) -> bool {
        self.0 & CtRef::SIGN != 0
    }

    /// The sign-tag-flipped handle, `-x` for `x`. Zero is its own negation.
    #[inline]
    #[must_use]
    pub fn negate(self) -> CtRef {
        if self == CtRef::ZERO {
            self
        } else {
            CtRef(self.0 ^ CtRef::SIGN)
        }
    }

    /// The handle with the sign tag cleared.
    #[inline]
    pub(crate) fn abs(self) -> CtRef {
        CtRef(self.0 & !CtRef::SIGN)
    }
}

// ---------------------------------------------------------------------------
// Handle pairs
// ---------------------------------------------------------------------------

/// A complex number as a pair of coefficient handles.
///
/// Equality is handle equality on both components; for interned handles this
/// is the canonical-identity comparison the whole package is built on.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Complex {
    /// Real component handle.
    pub re: CtRef,
    /// Imaginary component handle.
    pub im: CtRef,
}

impl Complex {
    /// The interned zero, `(ZERO, ZERO)`.
    pub const ZERO: Complex = Complex { re: CtRef::ZERO, im: CtRef::ZERO };
    /// The interned one, `(ONE, ZERO)`.
    pub const ONE: Complex = Complex { re: CtRef::ONE, im: CtRef::ZERO };

    /// Exactly the interned zero (handle identity, not value comparison).
    #[inline]
    pub fn is_exact_zero(self) -> bool {
        self == Complex::ZERO
    }

    /// Exactly the interned one (handle identity, not value comparison).
    #[inline]
    pub fn is_exact_one(self) -> bool {
        self == Complex::ONE
    }

    /// Whether either component lives in the scratch cache.
    #[inline]
    pub(crate) fn is_cached(self) -> bool {
        self.re.is_cache() || self.im.is_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_arithmetic() {
        let a = ComplexValue::new(1.0, 2.0);
        let b = ComplexValue::new(3.0, -1.0);
        assert_eq!(a.mul(b), ComplexValue::new(5.0, 5.0));
        assert_eq!(a.add(b), ComplexValue::new(4.0, 1.0));
        assert_eq!(a.sub(b), ComplexValue::new(-2.0, 3.0));
        assert_eq!(a.conj(), ComplexValue::new(1.0, -2.0));
        assert_eq!(a.mag2(), 5.0);
        let q = a.mul(b).div(b);
        assert!(q.approx_eq(a, 1e-12));
    }

    #[test]
    fn division_by_unit_magnitude() {
        let w = ComplexValue::new(0.6, 0.8);
        let q = ComplexValue::ONE.div(w);
        assert!(q.approx_eq(w.conj(), 1e-12));
    }

    #[test]
    fn sign_tagging() {
        let x = CtRef::table(7);
        assert!(!x.is_negative());
        assert!(x.negate().is_negative());
        assert_eq!(x.negate().negate(), x);
        assert_eq!(x.negate().abs(), x);
        assert_eq!(x.negate().slot(), x.slot());
        // zero is its own negation
        assert_eq!(CtRef::ZERO.negate(), CtRef::ZERO);
        // minus one is a distinct handle sharing the ONE slot
        let m1 = CtRef::ONE.negate();
        assert_ne!(m1, CtRef::ONE);
        assert_eq!(m1.slot(), CtRef::ONE.slot());
    }

    #[test]
    fn cache_tagging() {
        let c = CtRef::cache(3);
        assert!(c.is_cache());
        assert_eq!(c.slot(), 3);
        assert!(!CtRef::table(3).is_cache());
        assert_ne!(c, CtRef::table(3));
    }

    #[test]
    fn exactness_is_identity_not_value() {
        // a handle to some other slot is not "exact one" even if the slot
        // were to hold 1.0; exactness is handle identity
        assert!(Complex::ONE.is_exact_one());
        assert!(!Complex { re: CtRef::table(5), im: CtRef::ZERO }.is_exact_one());
        assert!(Complex::ZERO.is_exact_zero());
    }

    #[test]
    fn display_forms() {
        assert_eq!(ComplexValue::new(0.5, 0.0).to_string(), "0.5");
        assert_eq!(ComplexValue::new(0.5, 0.25).to_string(), "0.5+0.25i");
        assert_eq!(ComplexValue::new(0.5, -0.25).to_string(), "0.5-0.25i");
    }
}
