//! Scalar, vector and matrix extraction
//!
//! Read-only views of a diagram: single amplitudes addressed by mixed-radix
//! digit vectors, dense materialization of the full state vector or
//! row-major operator matrix, node counting, and the binary weight dump.
//!
//! Digit vectors are indexed by register (register 0 first, least
//! significant); for matrices, either separate row/column digit vectors or
//! a combined row-major digit `row·r + col` per level. The dense traversal
//! divides each index range evenly among a node's children, which is the
//! general-radix (non-binary) contract.

use std::io::{self, Write};

use rustc_hash::FxHashSet;

use crate::complex::ComplexValue;
use crate::node::{MEdge, VEdge};
use crate::package::MddPackage;
use crate::PackageError;

impl MddPackage {
    /// Amplitude of the basis state addressed by `digits` (one digit per
    /// register, least significant first).
    pub fn value_by_path(&self, e: VEdge, digits: &[usize]) -> Result<ComplexValue, PackageError> {
        if e.is_terminal() {
            return Ok(self.cn.val_c(e.w));
        }
        let levels = self.v_var(e) as usize + 1;
        if digits.len() < levels {
            return Err(PackageError::PathTooShort { got: digits.len(), want: levels });
        }
        let mut acc = ComplexValue::ONE;
        let mut cur = e;
        while !cur.is_terminal() {
            acc = acc.mul(self.cn.val_c(cur.w));
            let var = self.v_var(cur);
            let r = self.radix(var);
            let d = digits[var as usize];
            if d >= r {
                return Err(PackageError::DigitOutOfRange {
                    digit: d,
                    register: var as usize,
                    radix: r,
                });
            }
            cur = self.v_node(cur.node).edges[d];
        }
        Ok(acc.mul(self.cn.val_c(cur.w)))
    }

    /// Matrix entry addressed by separate row and column digit vectors.
    pub fn matrix_value_by_path(
        &self,
        e: MEdge,
        rows: &[usize],
        cols: &[usize],
    ) -> Result<ComplexValue, PackageError> {
        if e.is_terminal() {
            return Ok(self.cn.val_c(e.w));
        }
        let levels = self.m_var(e) as usize + 1;
        if rows.len() < levels || cols.len() < levels {
            return Err(PackageError::PathTooShort {
                got: rows.len().min(cols.len()),
                want: levels,
            });
        }
        let mut acc = ComplexValue::ONE;
        let mut cur = e;
        while !cur.is_terminal() {
            acc = acc.mul(self.cn.val_c(cur.w));
            let var = self.m_var(cur);
            let r = self.radix(var);
            let (row, col) = (rows[var as usize], cols[var as usize]);
            if row >= r {
                return Err(PackageError::DigitOutOfRange {
                    digit: row,
                    register: var as usize,
                    radix: r,
                });
            }
            if col >= r {
                return Err(PackageError::DigitOutOfRange {
                    digit: col,
                    register: var as usize,
                    radix: r,
                });
            }
            cur = self.m_node(cur.node).edges[row * r + col];
        }
        Ok(acc.mul(self.cn.val_c(cur.w)))
    }

    /// Matrix entry addressed by combined row-major digits, `row·r + col`
    /// per level.
    pub fn matrix_value_by_flat_path(
        &self,
        e: MEdge,
        digits: &[usize],
    ) -> Result<ComplexValue, PackageError> {
        if e.is_terminal() {
            return Ok(self.cn.val_c(e.w));
        }
        let levels = self.m_var(e) as usize + 1;
        if digits.len() < levels {
            return Err(PackageError::PathTooShort { got: digits.len(), want: levels });
        }
        let mut acc = ComplexValue::ONE;
        let mut cur = e;
        while !cur.is_terminal() {
            acc = acc.mul(self.cn.val_c(cur.w));
            let var = self.m_var(cur);
            let r = self.radix(var);
            let d = digits[var as usize];
            if d >= r * r {
                return Err(PackageError::DigitOutOfRange {
                    digit: d,
                    register: var as usize,
                    radix: r * r,
                });
            }
            cur = self.m_node(cur.node).edges[d];
        }
        Ok(acc.mul(self.cn.val_c(cur.w)))
    }

    /// Materialize the full state vector, dimension `∏ radices` over the
    /// diagram's levels. Child `k` of a node owns the `k`-th equal part of
    /// its parent's index range.
    pub fn dense_vector(&self, e: VEdge) -> Vec<ComplexValue> {
        if e.is_terminal() {
            return vec![self.cn.val_c(e.w)];
        }
        let levels = self.v_var(e) as usize + 1;
        let dim: usize = self.radices()[..levels].iter().product();
        let mut out = vec![ComplexValue::ZERO; dim];
        self.fill_vector(e, ComplexValue::ONE, 0, dim, &mut out);
        out
    }

    fn fill_vector(
        &self,
        e: VEdge,
        amp: ComplexValue,
        lo: usize,
        hi: usize,
        out: &mut [ComplexValue],
    ) {
        let a = amp.mul(self.cn.val_c(e.w));
        if e.is_terminal() {
            for cell in &mut out[lo..hi] {
                *cell = a;
            }
            return;
        }
        let n = self.v_node(e.node);
        let offset = (hi - lo) / n.edges.len();
        for (k, c) in n.edges.iter().enumerate() {
            if !self.cn.val_c(c.w).approx_zero(self.tolerance()) {
                self.fill_vector(*c, a, lo + k * offset, lo + (k + 1) * offset, out);
            }
        }
    }

    /// Materialize the operator as a row-major `dim × dim` matrix.
    pub fn dense_matrix(&self, e: MEdge) -> Vec<ComplexValue> {
        if e.is_terminal() {
            return vec![self.cn.val_c(e.w)];
        }
        let levels = self.m_var(e) as usize + 1;
        let dim: usize = self.radices()[..levels].iter().product();
        let mut out = vec![ComplexValue::ZERO; dim * dim];
        self.fill_matrix(e, ComplexValue::ONE, 0, 0, dim, dim, &mut out);
        out
    }

    fn fill_matrix(
        &self,
        e: MEdge,
        amp: ComplexValue,
        row: usize,
        col: usize,
        span: usize,
        dim: usize,
        out: &mut [ComplexValue],
    ) {
        let a = amp.mul(self.cn.val_c(e.w));
        if e.is_terminal() {
            for rr in 0..span {
                for cc in 0..span {
                    out[(row + rr) * dim + col + cc] = a;
                }
            }
            return;
        }
        let n = self.m_node(e.node);
        let r = self.radix(n.var);
        let sub = span / r;
        for i in 0..r {
            for j in 0..r {
                let c = n.edges[i * r + j];
                if !self.cn.val_c(c.w).approx_zero(self.tolerance()) {
                    self.fill_matrix(c, a, row + i * sub, col + j * sub, sub, dim, out);
                }
            }
        }
    }

    /// Decode a linear index into per-register digits, least significant
    /// register first.
    pub fn index_digits(&self, index: usize, levels: usize) -> Vec<usize> {
        let mut digits = Vec::with_capacity(levels);
        let mut q = index;
        for level in 0..levels {
            let r = self.radices()[level];
            digits.push(q % r);
            q /= r;
        }
        digits
    }

    /// Distinct nodes reachable from `e`, the terminal included.
    pub fn node_count(&self, e: VEdge) -> usize {
        let mut seen = FxHashSet::default();
        let mut stack = vec![e.node];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) || id.is_terminal() {
                continue;
            }
            for c in self.v_node(id).edges.iter() {
                stack.push(c.node);
            }
        }
        seen.len()
    }

    /// Distinct matrix nodes reachable from `e`, the terminal included.
    pub fn matrix_node_count(&self, e: MEdge) -> usize {
        let mut seen = FxHashSet::default();
        let mut stack = vec![e.node];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) || id.is_terminal() {
                continue;
            }
            for c in self.m_node(id).edges.iter() {
                stack.push(c.node);
            }
        }
        seen.len()
    }

    /// Emit one `(real, imag)` pair of little-endian doubles per distinct
    /// weight reachable from `e`, no header. Returns the number of pairs
    /// written.
    pub fn write_binary<W: Write>(&self, e: VEdge, sink: &mut W) -> io::Result<usize> {
        let mut seen_nodes = FxHashSet::default();
        let mut seen_weights = FxHashSet::default();
        let mut written = 0usize;
        let mut stack = vec![e];
        while let Some(cur) = stack.pop() {
            if seen_weights.insert(cur.w) {
                let v = self.cn.val_c(cur.w);
                sink.write_all(&v.re.to_le_bytes())?;
                sink.write_all(&v.im.to_le_bytes())?;
                written += 1;
            }
            if !cur.is_terminal() && seen_nodes.insert(cur.node) {
                for c in self.v_node(cur.node).edges.iter() {
                    stack.push(*c);
                }
            }
        }
        Ok(written)
    }

    /// Matrix counterpart of [`write_binary`](Self::write_binary).
    pub fn write_binary_matrix<W: Write>(&self, e: MEdge, sink: &mut W) -> io::Result<usize> {
        let mut seen_nodes = FxHashSet::default();
        let mut seen_weights = FxHashSet::default();
        let mut written = 0usize;
        let mut stack = vec![e];
        while let Some(cur) = stack.pop() {
            if seen_weights.insert(cur.w) {
                let v = self.cn.val_c(cur.w);
                sink.write_all(&v.re.to_le_bytes())?;
                sink.write_all(&v.im.to_le_bytes())?;
                written += 1;
            }
            if !cur.is_terminal() && seen_nodes.insert(cur.node) {
                for c in self.m_node(cur.node).edges.iter() {
                    stack.push(*c);
                }
            }
        }
        Ok(written)
    }

    /// Human-readable amplitude listing, one line per basis state with the
    /// digits printed most significant first.
    pub fn dump_vector<W: Write>(&self, e: VEdge, out: &mut W) -> io::Result<()> {
        if e.is_terminal() {
            return writeln!(out, "{}", self.cn.val_c(e.w));
        }
        let levels = self.v_var(e) as usize + 1;
        let dim: usize = self.radices()[..levels].iter().product();
        for i in 0..dim {
            let digits = self.index_digits(i, levels);
            let amp = self.value_by_path(e, &digits).unwrap_or_default();
            for d in digits.iter().rev() {
                write!(out, "{d}")?;
            }
            writeln!(out, ": {amp}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::{h3, SQRT3_3, X3};
    use crate::MddPackage;

    #[test]
    fn mixed_basis_path_values() {
        let mut dd = MddPackage::new(&[2, 3]).unwrap();
        let b = dd.make_basis_state(&[1, 2], 0).unwrap();
        let hit = dd.value_by_path(b, &[1, 2]).unwrap();
        assert!(hit.approx_eq(ComplexValue::ONE, 1e-12));
        for d0 in 0..2 {
            for d1 in 0..3 {
                if (d0, d1) == (1, 2) {
                    continue;
                }
                let miss = dd.value_by_path(b, &[d0, d1]).unwrap();
                assert!(miss.approx_eq(ComplexValue::ZERO, 1e-12), "({d0},{d1})");
            }
        }
    }

    #[test]
    fn path_validation() {
        let mut dd = MddPackage::new(&[2, 3]).unwrap();
        let b = dd.make_basis_state(&[0, 0], 0).unwrap();
        assert!(matches!(
            dd.value_by_path(b, &[1]),
            Err(PackageError::PathTooShort { got: 1, want: 2 })
        ));
        assert!(matches!(
            dd.value_by_path(b, &[2, 0]),
            Err(PackageError::DigitOutOfRange { digit: 2, register: 0, radix: 2 })
        ));
    }

    #[test]
    fn hadamard_path_values() {
        // H₃ on register 0 of a {3, 2} system; register 1 is wrapped as a
        // diagonal identity
        let mut dd = MddPackage::new(&[3, 2]).unwrap();
        let g = dd.make_gate(&h3(), 0).unwrap();

        let v00 = dd.matrix_value_by_flat_path(g, &[0, 0]).unwrap();
        assert!(v00.approx_eq(ComplexValue::new(SQRT3_3, 0.0), 1e-12));

        // digit 4 = row 1, col 1 on the qutrit: ω/√3
        let v40 = dd.matrix_value_by_flat_path(g, &[4, 0]).unwrap();
        let third = 2.0 * std::f64::consts::PI / 3.0;
        assert!(v40.approx_eq(
            ComplexValue::new(SQRT3_3 * third.cos(), SQRT3_3 * third.sin()),
            1e-12
        ));

        // off-diagonal on register 1 is zero everywhere
        for d0 in 0..9 {
            for d1 in [1, 2] {
                let v = dd.matrix_value_by_flat_path(g, &[d0, d1]).unwrap();
                assert!(v.approx_eq(ComplexValue::ZERO, 1e-12), "({d0},{d1})");
            }
        }

        // row/column addressing agrees with the flat form
        let v = dd.matrix_value_by_path(g, &[1, 0], &[1, 0]).unwrap();
        assert!(v.approx_eq(v40, 1e-12));
    }

    #[test]
    fn dense_vector_of_a_superposition() {
        let mut dd = MddPackage::new(&[3]).unwrap();
        let z = dd.make_zero_state(1, 0).unwrap();
        let h = dd.make_gate(&h3(), 0).unwrap();
        let psi = dd.multiply(h, z).unwrap();
        let v = dd.dense_vector(psi);
        assert_eq!(v.len(), 3);
        for a in v {
            assert!(a.approx_eq(ComplexValue::new(SQRT3_3, 0.0), 1e-6));
        }
    }

    #[test]
    fn dense_matrix_of_a_permutation() {
        let mut dd = MddPackage::new(&[3]).unwrap();
        let x = dd.make_gate(&X3, 0).unwrap();
        let m = dd.dense_matrix(x);
        assert_eq!(m.len(), 9);
        for i in 0..3 {
            for j in 0..3 {
                let want = if i == (j + 1) % 3 { ComplexValue::ONE } else { ComplexValue::ZERO };
                assert!(m[i * 3 + j].approx_eq(want, 1e-12), "({i},{j})");
            }
        }
    }

    #[test]
    fn dense_vector_strides_respect_mixed_radices() {
        let mut dd = MddPackage::new(&[2, 3]).unwrap();
        let b = dd.make_basis_state(&[1, 2], 0).unwrap();
        let v = dd.dense_vector(b);
        assert_eq!(v.len(), 6);
        // index = d0 + 2·d1 = 1 + 4 = 5
        for (i, a) in v.iter().enumerate() {
            let want = if i == 5 { ComplexValue::ONE } else { ComplexValue::ZERO };
            assert!(a.approx_eq(want, 1e-12), "index {i}");
        }
        assert_eq!(dd.index_digits(5, 2), vec![1, 2]);
    }

    #[test]
    fn node_counts() {
        let mut dd = MddPackage::new(&[3, 3, 3]).unwrap();
        let z = dd.make_zero_state(3, 0).unwrap();
        // one node per level plus the terminal
        assert_eq!(dd.node_count(z), 4);
        let id = dd.make_ident(3).unwrap();
        assert_eq!(dd.matrix_node_count(id), 4);
    }

    #[test]
    fn binary_dump_is_one_pair_per_distinct_weight() {
        let mut dd = MddPackage::new(&[3]).unwrap();
        let z = dd.make_zero_state(1, 0).unwrap();
        let h = dd.make_gate(&h3(), 0).unwrap();
        let psi = dd.multiply(h, z).unwrap();
        let mut buf = Vec::new();
        let pairs = dd.write_binary(psi, &mut buf).unwrap();
        // root carries ONE, all three children share one interned weight
        assert_eq!(pairs, 2);
        assert_eq!(buf.len(), 2 * 16);
        // first pair is the root weight, little-endian doubles
        let re = f64::from_le_bytes(buf[0..8].try_into().unwrap());
        let im = f64::from_le_bytes(buf[8..16].try_into().unwrap());
        assert_eq!((re, im), (1.0, 0.0));
    }

    #[test]
    fn dump_vector_lists_most_significant_first() {
        let mut dd = MddPackage::new(&[2, 3]).unwrap();
        let b = dd.make_basis_state(&[1, 0], 0).unwrap();
        let mut buf = Vec::new();
        dd.dump_vector(b, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "00: 0");
        assert_eq!(lines[1], "01: 1");
        assert_eq!(lines[2], "10: 0");
    }
}
