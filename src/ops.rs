//! Recursive algebra over canonical diagrams
//!
//! Every operation takes normalized edges and returns a normalized edge
//! holding one reference share. The recursions run in *cached* mode: child
//! results carry scratch weights, assembly goes through the cached
//! `make_dd_node_*`, and the boundary wrapper interns the final weight.
//!
//! Memoization discipline:
//! - addition keys on `(node, weight value)` pairs, canonically ordered
//!   (the op is commutative and its recursion runs on scratch weights);
//! - multiplication and the inner product strip the top weights, key on the
//!   weight-one edge pair, and fold `x.w · y.w` back into the result;
//! - Kronecker and the unary transpositions key on the interned edges
//!   directly.
//!
//! A failed operation resets the scratch cache; interned state is
//! unaffected.

use crate::complex::{Complex, ComplexValue};
use crate::compute::{MCached, VCached};
use crate::control::single;
use crate::gates;
use crate::node::{MEdge, VEdge};
use crate::package::MddPackage;
use crate::{Fp, PackageError, Register, RegisterCount};

#[inline]
fn v_key_le(a: &VCached, b: &VCached) -> bool {
    let ka = (a.node.0, a.w.re.to_bits(), a.w.im.to_bits());
    let kb = (b.node.0, b.w.re.to_bits(), b.w.im.to_bits());
    ka <= kb
}

#[inline]
fn m_key_le(a: &MCached, b: &MCached) -> bool {
    let ka = (a.node.0, a.w.re.to_bits(), a.w.im.to_bits());
    let kb = (b.node.0, b.w.re.to_bits(), b.w.im.to_bits());
    ka <= kb
}

impl MddPackage {
    // -----------------------------------------------------------------------
    // Boundary helpers
    // -----------------------------------------------------------------------

    /// Intern a cached result weight; scratch is returned to the cache.
    fn intern_v(&mut self, e: VEdge) -> VEdge {
        if !e.w.is_cached() {
            return e;
        }
        let v = self.cn.val_c(e.w);
        self.cn.release(e.w);
        let w = self.cn.lookup_value(v);
        if w.is_exact_zero() {
            VEdge::ZERO
        } else {
            VEdge { node: e.node, w }
        }
    }

    fn intern_m(&mut self, e: MEdge) -> MEdge {
        if !e.w.is_cached() {
            return e;
        }
        let v = self.cn.val_c(e.w);
        self.cn.release(e.w);
        let w = self.cn.lookup_value(v);
        if w.is_exact_zero() {
            MEdge::ZERO
        } else {
            MEdge { node: e.node, w }
        }
    }

    // -----------------------------------------------------------------------
    // Addition
    // -----------------------------------------------------------------------

    /// Vector sum. Commutative; `add(a, ZERO)` returns `a` itself.
    pub fn add(&mut self, x: VEdge, y: VEdge) -> Result<VEdge, PackageError> {
        self.maybe_collect();
        match self.add2_v(x, y) {
            Ok(r) => {
                let e = self.intern_v(r);
                self.inc_ref(e);
                Ok(e)
            }
            Err(err) => {
                self.reset_cache();
                Err(err)
            }
        }
    }

    /// Matrix sum.
    pub fn add_matrices(&mut self, x: MEdge, y: MEdge) -> Result<MEdge, PackageError> {
        self.maybe_collect();
        match self.add2_m(x, y) {
            Ok(r) => {
                let e = self.intern_m(r);
                self.inc_ref_matrix(e);
                Ok(e)
            }
            Err(err) => {
                self.reset_cache();
                Err(err)
            }
        }
    }

    /// One operand slot of the addition recursion: descend and fold the
    /// parent weight in, or pass a terminal operand through unchanged. The
    /// flag reports scratch ownership.
    fn slot_v(&mut self, op: VEdge, var: u16, i: usize) -> (VEdge, bool) {
        if !op.is_terminal() && self.v_var(op) == var {
            let c = self.v_node(op.node).edges[i];
            if c.w.is_exact_zero() {
                (VEdge::ZERO, false)
            } else {
                let v = self.cn.val_c(c.w).mul(self.cn.val_c(op.w));
                (VEdge { node: c.node, w: self.cn.temporary(v) }, true)
            }
        } else {
            (op, false)
        }
    }

    fn slot_m(&mut self, op: MEdge, var: u16, i: usize) -> (MEdge, bool) {
        if !op.is_terminal() && self.m_var(op) == var {
            let c = self.m_node(op.node).edges[i];
            if c.w.is_exact_zero() {
                (MEdge::ZERO, false)
            } else {
                let v = self.cn.val_c(c.w).mul(self.cn.val_c(op.w));
                (MEdge { node: c.node, w: self.cn.temporary(v) }, true)
            }
        } else {
            (op, false)
        }
    }

    fn add2_v(&mut self, x: VEdge, y: VEdge) -> Result<VEdge, PackageError> {
        if x.w.is_exact_zero() {
            if y.w.is_exact_zero() {
                return Ok(y);
            }
            let v = self.cn.val_c(y.w);
            return Ok(VEdge { node: y.node, w: self.cn.temporary(v) });
        }
        if y.w.is_exact_zero() {
            let v = self.cn.val_c(x.w);
            return Ok(VEdge { node: x.node, w: self.cn.temporary(v) });
        }
        if x.node == y.node {
            let v = self.cn.val_c(x.w).add(self.cn.val_c(y.w));
            if v.approx_zero(self.cn.tolerance()) {
                return Ok(VEdge::ZERO);
            }
            return Ok(VEdge { node: y.node, w: self.cn.temporary(v) });
        }

        let kx = VCached { node: x.node, w: self.cn.val_c(x.w) };
        let ky = VCached { node: y.node, w: self.cn.val_c(y.w) };
        let (ka, kb, a, b) = if v_key_le(&kx, &ky) { (kx, ky, x, y) } else { (ky, kx, y, x) };
        if let Some(hit) = self.vector_add.lookup(ka, kb) {
            if hit.node.is_terminal() && hit.w.approx_zero(self.cn.tolerance()) {
                return Ok(VEdge::ZERO);
            }
            return Ok(VEdge { node: hit.node, w: self.cn.temporary(hit.w) });
        }

        let mut var = 0u16;
        if !a.is_terminal() {
            var = self.v_var(a);
        }
        if !b.is_terminal() {
            var = var.max(self.v_var(b));
        }
        let r = self.radix(var);
        let mut edges = Vec::with_capacity(r);
        for i in 0..r {
            let (e1, own1) = self.slot_v(a, var, i);
            let (e2, own2) = self.slot_v(b, var, i);
            let s = self.add2_v(e1, e2);
            if own1 {
                self.cn.release(e1.w);
            }
            if own2 {
                self.cn.release(e2.w);
            }
            edges.push(s?);
        }
        let res = self.make_dd_node_v(var, edges, true)?;
        let out = VCached { node: res.node, w: self.cn.val_c(res.w) };
        self.vector_add.insert(ka, kb, out);
        Ok(res)
    }

    fn add2_m(&mut self, x: MEdge, y: MEdge) -> Result<MEdge, PackageError> {
        if x.w.is_exact_zero() {
            if y.w.is_exact_zero() {
                return Ok(y);
            }
            let v = self.cn.val_c(y.w);
            return Ok(MEdge { node: y.node, w: self.cn.temporary(v) });
        }
        if y.w.is_exact_zero() {
            let v = self.cn.val_c(x.w);
            return Ok(MEdge { node: x.node, w: self.cn.temporary(v) });
        }
        if x.node == y.node {
            let v = self.cn.val_c(x.w).add(self.cn.val_c(y.w));
            if v.approx_zero(self.cn.tolerance()) {
                return Ok(MEdge::ZERO);
            }
            return Ok(MEdge { node: y.node, w: self.cn.temporary(v) });
        }

        let kx = MCached { node: x.node, w: self.cn.val_c(x.w) };
        let ky = MCached { node: y.node, w: self.cn.val_c(y.w) };
        let (ka, kb, a, b) = if m_key_le(&kx, &ky) { (kx, ky, x, y) } else { (ky, kx, y, x) };
        if let Some(hit) = self.matrix_add.lookup(ka, kb) {
            if hit.node.is_terminal() && hit.w.approx_zero(self.cn.tolerance()) {
                return Ok(MEdge::ZERO);
            }
            return Ok(MEdge { node: hit.node, w: self.cn.temporary(hit.w) });
        }

        let mut var = 0u16;
        if !a.is_terminal() {
            var = self.m_var(a);
        }
        if !b.is_terminal() {
            var = var.max(self.m_var(b));
        }
        let r = self.radix(var);
        let mut edges = Vec::with_capacity(r * r);
        for i in 0..r * r {
            let (e1, own1) = self.slot_m(a, var, i);
            let (e2, own2) = self.slot_m(b, var, i);
            let s = self.add2_m(e1, e2);
            if own1 {
                self.cn.release(e1.w);
            }
            if own2 {
                self.cn.release(e2.w);
            }
            edges.push(s?);
        }
        let res = self.make_dd_node_m(var, edges, true)?;
        let out = MCached { node: res.node, w: self.cn.val_c(res.w) };
        self.matrix_add.insert(ka, kb, out);
        Ok(res)
    }

    // -----------------------------------------------------------------------
    // Multiplication
    // -----------------------------------------------------------------------

    /// Apply an operator to a state, `x · y`.
    pub fn multiply(&mut self, x: MEdge, y: VEdge) -> Result<VEdge, PackageError> {
        self.maybe_collect();
        let mut var: i32 = -1;
        if !x.is_terminal() {
            var = self.m_var(x) as i32;
        }
        if !y.is_terminal() {
            var = var.max(self.v_var(y) as i32);
        }
        match self.multiply2_mv(x, y, var) {
            Ok(r) => {
                let e = self.intern_v(r);
                self.inc_ref(e);
                Ok(e)
            }
            Err(err) => {
                self.reset_cache();
                Err(err)
            }
        }
    }

    /// Operator composition, `x · y`.
    pub fn multiply_matrices(&mut self, x: MEdge, y: MEdge) -> Result<MEdge, PackageError> {
        self.maybe_collect();
        let mut var: i32 = -1;
        if !x.is_terminal() {
            var = self.m_var(x) as i32;
        }
        if !y.is_terminal() {
            var = var.max(self.m_var(y) as i32);
        }
        match self.multiply2_mm(x, y, var) {
            Ok(r) => {
                let e = self.intern_m(r);
                self.inc_ref_matrix(e);
                Ok(e)
            }
            Err(err) => {
                self.reset_cache();
                Err(err)
            }
        }
    }

    fn accumulate_v(&mut self, acc: VEdge, term: VEdge) -> Result<VEdge, PackageError> {
        if term.is_exact_zero() {
            return Ok(acc);
        }
        if acc.is_exact_zero() {
            return Ok(term);
        }
        let s = self.add2_v(acc, term)?;
        self.cn.release(acc.w);
        self.cn.release(term.w);
        Ok(s)
    }

    fn accumulate_m(&mut self, acc: MEdge, term: MEdge) -> Result<MEdge, PackageError> {
        if term.is_exact_zero() {
            return Ok(acc);
        }
        if acc.is_exact_zero() {
            return Ok(term);
        }
        let s = self.add2_m(acc, term)?;
        self.cn.release(acc.w);
        self.cn.release(term.w);
        Ok(s)
    }

    fn multiply2_mv(&mut self, x: MEdge, y: VEdge, var: i32) -> Result<VEdge, PackageError> {
        if x.w.is_exact_zero() || y.w.is_exact_zero() {
            return Ok(VEdge::ZERO);
        }
        if var < 0 {
            let v = self.cn.val_c(x.w).mul(self.cn.val_c(y.w));
            return Ok(VEdge::terminal(self.cn.temporary(v)));
        }
        let tol = self.cn.tolerance();

        // memoize on the weight-one pair; the stripped weights fold back in
        let xc = MEdge { node: x.node, w: Complex::ONE };
        let yc = VEdge { node: y.node, w: Complex::ONE };
        if let Some(hit) = self.mat_vec_mult.lookup(xc, yc) {
            let v = hit.w.mul(self.cn.val_c(x.w)).mul(self.cn.val_c(y.w));
            if v.approx_zero(tol) {
                return Ok(VEdge::ZERO);
            }
            return Ok(VEdge { node: hit.node, w: self.cn.temporary(v) });
        }

        let var_u = var as u16;
        let r = self.radix(var_u);
        let mut rows = Vec::with_capacity(r);
        for i in 0..r {
            let mut acc = VEdge::ZERO;
            for j in 0..r {
                let e1 = if !x.is_terminal() && self.m_var(x) == var_u {
                    self.m_node(x.node).edges[i * r + j]
                } else {
                    xc
                };
                let e2 = if !y.is_terminal() && self.v_var(y) == var_u {
                    self.v_node(y.node).edges[j]
                } else {
                    yc
                };
                let term = self.multiply2_mv(e1, e2, var - 1)?;
                acc = self.accumulate_v(acc, term)?;
            }
            rows.push(acc);
        }
        let res = self.make_dd_node_v(var_u, rows, true)?;
        let res_val = self.cn.val_c(res.w);
        self.mat_vec_mult.insert(xc, yc, VCached { node: res.node, w: res_val });

        let v = res_val.mul(self.cn.val_c(x.w)).mul(self.cn.val_c(y.w));
        self.cn.release(res.w);
        if v.approx_zero(tol) {
            return Ok(VEdge::ZERO);
        }
        Ok(VEdge { node: res.node, w: self.cn.temporary(v) })
    }

    fn multiply2_mm(&mut self, x: MEdge, y: MEdge, var: i32) -> Result<MEdge, PackageError> {
        if x.w.is_exact_zero() || y.w.is_exact_zero() {
            return Ok(MEdge::ZERO);
        }
        if var < 0 {
            let v = self.cn.val_c(x.w).mul(self.cn.val_c(y.w));
            return Ok(MEdge::terminal(self.cn.temporary(v)));
        }
        let tol = self.cn.tolerance();

        let xc = MEdge { node: x.node, w: Complex::ONE };
        let yc = MEdge { node: y.node, w: Complex::ONE };
        if let Some(hit) = self.mat_mat_mult.lookup(xc, yc) {
            let v = hit.w.mul(self.cn.val_c(x.w)).mul(self.cn.val_c(y.w));
            if v.approx_zero(tol) {
                return Ok(MEdge::ZERO);
            }
            return Ok(MEdge { node: hit.node, w: self.cn.temporary(v) });
        }

        let var_u = var as u16;
        let r = self.radix(var_u);
        let mut edges = vec![MEdge::ZERO; r * r];
        for i in 0..r {
            for k in 0..r {
                let mut acc = MEdge::ZERO;
                for j in 0..r {
                    let e1 = if !x.is_terminal() && self.m_var(x) == var_u {
                        self.m_node(x.node).edges[i * r + j]
                    } else {
                        xc
                    };
                    let e2 = if !y.is_terminal() && self.m_var(y) == var_u {
                        self.m_node(y.node).edges[j * r + k]
                    } else {
                        yc
                    };
                    let term = self.multiply2_mm(e1, e2, var - 1)?;
                    acc = self.accumulate_m(acc, term)?;
                }
                edges[i * r + k] = acc;
            }
        }
        let res = self.make_dd_node_m(var_u, edges, true)?;
        let res_val = self.cn.val_c(res.w);
        self.mat_mat_mult.insert(xc, yc, MCached { node: res.node, w: res_val });

        let v = res_val.mul(self.cn.val_c(x.w)).mul(self.cn.val_c(y.w));
        self.cn.release(res.w);
        if v.approx_zero(tol) {
            return Ok(MEdge::ZERO);
        }
        Ok(MEdge { node: res.node, w: self.cn.temporary(v) })
    }

    // -----------------------------------------------------------------------
    // Kronecker product
    // -----------------------------------------------------------------------

    /// Kronecker product of states: `x` becomes the upper factor, its
    /// levels shifted by the height of `y`. The shifted levels must agree
    /// with the package's radix vector.
    pub fn kronecker(&mut self, x: VEdge, y: VEdge) -> Result<VEdge, PackageError> {
        self.maybe_collect();
        match self.kron2_v(x, y) {
            Ok(r) => {
                let e = self.intern_v(r);
                self.inc_ref(e);
                Ok(e)
            }
            Err(err) => {
                self.reset_cache();
                Err(err)
            }
        }
    }

    /// Kronecker product of operators.
    pub fn kronecker_matrices(&mut self, x: MEdge, y: MEdge) -> Result<MEdge, PackageError> {
        self.maybe_collect();
        match self.kron2_m(x, y) {
            Ok(r) => {
                let e = self.intern_m(r);
                self.inc_ref_matrix(e);
                Ok(e)
            }
            Err(err) => {
                self.reset_cache();
                Err(err)
            }
        }
    }

    fn kron2_v(&mut self, x: VEdge, y: VEdge) -> Result<VEdge, PackageError> {
        let tol = self.cn.tolerance();
        if self.cn.val_c(x.w).approx_zero(tol) || self.cn.val_c(y.w).approx_zero(tol) {
            return Ok(VEdge::ZERO);
        }
        if x.is_terminal() {
            let v = self.cn.val_c(x.w).mul(self.cn.val_c(y.w));
            return Ok(VEdge { node: y.node, w: self.cn.temporary(v) });
        }
        if let Some(hit) = self.vector_kron.lookup(x, y) {
            if hit.w.approx_zero(tol) {
                return Ok(VEdge::ZERO);
            }
            return Ok(VEdge { node: hit.node, w: self.cn.temporary(hit.w) });
        }

        let shift = if y.is_terminal() { 0 } else { self.v_var(y) + 1 };
        let var = self.v_var(x) + shift;
        if var as usize >= self.register_count() {
            return Err(PackageError::RegisterOutOfRange {
                register: var as usize,
                count: self.register_count(),
            });
        }
        let children: Vec<VEdge> = self.v_node(x.node).edges.to_vec();
        let mut edges = Vec::with_capacity(children.len());
        for c in children {
            edges.push(self.kron2_v(c, y)?);
        }
        let res = self.make_dd_node_v(var, edges, true)?;
        let v = self.cn.val_c(res.w).mul(self.cn.val_c(x.w));
        self.cn.release(res.w);
        if v.approx_zero(tol) {
            self.vector_kron.insert(x, y, VCached { node: crate::node::VNodeId::TERMINAL, w: ComplexValue::ZERO });
            return Ok(VEdge::ZERO);
        }
        self.vector_kron.insert(x, y, VCached { node: res.node, w: v });
        Ok(VEdge { node: res.node, w: self.cn.temporary(v) })
    }

    fn kron2_m(&mut self, x: MEdge, y: MEdge) -> Result<MEdge, PackageError> {
        let tol = self.cn.tolerance();
        if self.cn.val_c(x.w).approx_zero(tol) || self.cn.val_c(y.w).approx_zero(tol) {
            return Ok(MEdge::ZERO);
        }
        if x.is_terminal() {
            let v = self.cn.val_c(x.w).mul(self.cn.val_c(y.w));
            return Ok(MEdge { node: y.node, w: self.cn.temporary(v) });
        }
        if let Some(hit) = self.matrix_kron.lookup(x, y) {
            if hit.w.approx_zero(tol) {
                return Ok(MEdge::ZERO);
            }
            return Ok(MEdge { node: hit.node, w: self.cn.temporary(hit.w) });
        }

        let shift = if y.is_terminal() { 0 } else { self.m_var(y) + 1 };
        let var = self.m_var(x) + shift;
        if var as usize >= self.register_count() {
            return Err(PackageError::RegisterOutOfRange {
                register: var as usize,
                count: self.register_count(),
            });
        }
        let children: Vec<MEdge> = self.m_node(x.node).edges.to_vec();
        let mut edges = Vec::with_capacity(children.len());
        for c in children {
            edges.push(self.kron2_m(c, y)?);
        }
        let res = self.make_dd_node_m(var, edges, true)?;
        let v = self.cn.val_c(res.w).mul(self.cn.val_c(x.w));
        self.cn.release(res.w);
        if v.approx_zero(tol) {
            self.matrix_kron.insert(x, y, MCached { node: crate::node::MNodeId::TERMINAL, w: ComplexValue::ZERO });
            return Ok(MEdge::ZERO);
        }
        self.matrix_kron.insert(x, y, MCached { node: res.node, w: v });
        Ok(MEdge { node: res.node, w: self.cn.temporary(v) })
    }

    // -----------------------------------------------------------------------
    // Transposition
    // -----------------------------------------------------------------------

    /// Matrix transpose. Symmetric nodes short-circuit.
    pub fn transpose(&mut self, e: MEdge) -> Result<MEdge, PackageError> {
        self.maybe_collect();
        let r = self.transpose_rec(e)?;
        self.inc_ref_matrix(r);
        Ok(r)
    }

    pub(crate) fn transpose_rec(&mut self, e: MEdge) -> Result<MEdge, PackageError> {
        if e.is_terminal() || self.m_symmetric(e.node) {
            return Ok(e);
        }
        if let Some(hit) = self.transpose_table.lookup(e) {
            return Ok(hit);
        }
        let var = self.m_var(e);
        let r = self.radix(var);
        let kids: Vec<MEdge> = self.m_node(e.node).edges.to_vec();
        let mut edges = vec![MEdge::ZERO; r * r];
        for i in 0..r {
            for j in 0..r {
                edges[i * r + j] = self.transpose_rec(kids[j * r + i])?;
            }
        }
        let res = self.make_dd_node_m(var, edges, false)?;
        let v = self.cn.val_c(res.w).mul(self.cn.val_c(e.w));
        let res = MEdge { node: res.node, w: self.cn.lookup_value(v) };
        self.transpose_table.insert(e, res);
        Ok(res)
    }

    /// Conjugate transpose (adjoint).
    pub fn conjugate_transpose(&mut self, e: MEdge) -> Result<MEdge, PackageError> {
        self.maybe_collect();
        let r = self.conj_transpose_rec(e)?;
        self.inc_ref_matrix(r);
        Ok(r)
    }

    fn conj_transpose_rec(&mut self, e: MEdge) -> Result<MEdge, PackageError> {
        if e.is_terminal() {
            return Ok(MEdge { node: e.node, w: self.cn.conj(e.w) });
        }
        if let Some(hit) = self.conj_transpose_table.lookup(e) {
            return Ok(hit);
        }
        let var = self.m_var(e);
        let r = self.radix(var);
        let kids: Vec<MEdge> = self.m_node(e.node).edges.to_vec();
        let mut edges = vec![MEdge::ZERO; r * r];
        for i in 0..r {
            for j in 0..r {
                edges[i * r + j] = self.conj_transpose_rec(kids[j * r + i])?;
            }
        }
        let res = self.make_dd_node_m(var, edges, false)?;
        let v = self.cn.val_c(res.w).mul(self.cn.val_c(e.w).conj());
        let res = MEdge { node: res.node, w: self.cn.lookup_value(v) };
        self.conj_transpose_table.insert(e, res);
        Ok(res)
    }

    // -----------------------------------------------------------------------
    // Inner products
    // -----------------------------------------------------------------------

    /// `⟨x|y⟩`, conjugating the left argument.
    pub fn inner_product(&mut self, x: VEdge, y: VEdge) -> Result<ComplexValue, PackageError> {
        self.maybe_collect();
        let mut var: i32 = -1;
        if !x.is_terminal() {
            var = self.v_var(x) as i32;
        }
        if !y.is_terminal() {
            var = var.max(self.v_var(y) as i32);
        }
        Ok(self.inner_product2(x, y, var))
    }

    fn inner_product2(&mut self, x: VEdge, y: VEdge, var: i32) -> ComplexValue {
        if x.w.is_exact_zero() || y.w.is_exact_zero() {
            return ComplexValue::ZERO;
        }
        let xv = self.cn.val_c(x.w).conj();
        let yv = self.cn.val_c(y.w);
        if var < 0 {
            return xv.mul(yv);
        }

        let xc = VEdge { node: x.node, w: Complex::ONE };
        let yc = VEdge { node: y.node, w: Complex::ONE };
        if let Some(hit) = self.inner_prod.lookup(xc, yc) {
            return xv.mul(yv).mul(hit);
        }

        let var_u = var as u16;
        let r = self.radix(var_u);
        let mut sum = ComplexValue::ZERO;
        for i in 0..r {
            let e1 = if !x.is_terminal() && self.v_var(x) == var_u {
                self.v_node(x.node).edges[i]
            } else {
                xc
            };
            let e2 = if !y.is_terminal() && self.v_var(y) == var_u {
                self.v_node(y.node).edges[i]
            } else {
                yc
            };
            sum = sum.add(self.inner_product2(e1, e2, var - 1));
        }
        self.inner_prod.insert(xc, yc, sum);
        xv.mul(yv).mul(sum)
    }

    /// `|⟨x|y⟩|²`.
    pub fn fidelity(&mut self, x: VEdge, y: VEdge) -> Result<Fp, PackageError> {
        let ip = self.inner_product(x, y)?;
        Ok(ip.mag2())
    }

    // -----------------------------------------------------------------------
    // Excitation spreading
    // -----------------------------------------------------------------------

    /// Distribute a single `|1⟩` excitation held by `group[0]` uniformly
    /// over the group: a ladder of controlled Givens rotations
    /// (`sin²θⱼ = (d−j)/(d−j+1)`) peels amplitude down the chain, each
    /// followed by a controlled `0↔1` exchange that moves the excitation
    /// marker. Registers may have different radices; only levels 0 and 1
    /// participate.
    pub fn spread(
        &mut self,
        n: RegisterCount,
        group: &[Register],
        state: VEdge,
    ) -> Result<VEdge, PackageError> {
        if group.is_empty() {
            return Err(PackageError::EmptyGroup);
        }
        for &g in group {
            if g as usize >= self.register_count() {
                return Err(PackageError::RegisterOutOfRange {
                    register: g as usize,
                    count: self.register_count(),
                });
            }
        }
        let d = group.len();
        let mut evolution = state;
        self.inc_ref(evolution);
        for j in 1..d {
            let keep = 1.0 / (d - j + 1) as Fp;
            let theta = keep.sqrt().acos();

            let rot = gates::embedded_givens(self.radix(group[j]), 0, 1, theta, 0.0);
            let g1 = self.make_gate_dd(&rot, n, &single(group[j - 1], 1), group[j], 0)?;
            let next = self.multiply(g1, evolution)?;
            self.dec_ref(evolution);
            self.dec_ref_matrix(g1);
            evolution = next;

            let ex = gates::embedded_exchange(self.radix(group[j - 1]), 0, 1);
            let g2 = self.make_gate_dd(&ex, n, &single(group[j], 1), group[j - 1], 0)?;
            let next = self.multiply(g2, evolution)?;
            self.dec_ref(evolution);
            self.dec_ref_matrix(g2);
            evolution = next;
        }
        Ok(evolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Controls;
    use crate::control::Control;
    use crate::gates::{h3, X3, X3_DAG};
    use crate::MddPackage;

    const EPS: Fp = 1e-9;

    #[test]
    fn identity_fold() {
        let mut dd = MddPackage::new(&[2, 2, 3]).unwrap();
        let id = dd.make_ident(3).unwrap();
        let z = dd.make_zero_state(3, 0).unwrap();
        let applied = dd.multiply(id, z).unwrap();
        assert_eq!(applied, z);
        // identity absorbs under composition, both sides
        let h = dd.make_gate(&crate::gates::H2, 0).unwrap();
        let left = dd.multiply_matrices(id, h).unwrap();
        let right = dd.multiply_matrices(h, id).unwrap();
        assert_eq!(left, h);
        assert_eq!(right, h);
    }

    #[test]
    fn add_is_commutative_with_zero_identity() {
        let mut dd = MddPackage::new(&[3]).unwrap();
        let z = dd.make_zero_state(1, 0).unwrap();
        let h = dd.make_gate(&h3(), 0).unwrap();
        let plus = dd.multiply(h, z).unwrap();
        let ab = dd.add(plus, z).unwrap();
        let ba = dd.add(z, plus).unwrap();
        assert_eq!(ab, ba);
        let a0 = dd.add(plus, crate::VEdge::ZERO).unwrap();
        assert_eq!(a0, plus);
    }

    #[test]
    fn double_transpose_is_identity() {
        let mut dd = MddPackage::new(&[3, 3]).unwrap();
        let g = dd.make_controlled_gate(&X3, &single(0, 1), 1).unwrap();
        let t = dd.transpose(g).unwrap();
        let tt = dd.transpose(t).unwrap();
        assert_eq!(tt, g);
        let ct = dd.conjugate_transpose(g).unwrap();
        let ctct = dd.conjugate_transpose(ct).unwrap();
        assert_eq!(ctct, g);
    }

    #[test]
    fn adjoint_of_shift_inverts_it() {
        let mut dd = MddPackage::new(&[3]).unwrap();
        let x = dd.make_gate(&X3, 0).unwrap();
        let xdag = dd.make_gate(&X3_DAG, 0).unwrap();
        let adj = dd.conjugate_transpose(x).unwrap();
        assert_eq!(adj, xdag);
        // X · X† is the identity
        let prod = dd.multiply_matrices(x, xdag).unwrap();
        let id = dd.make_ident(1).unwrap();
        assert_eq!(prod, id);
    }

    #[test]
    fn two_qutrit_bell_state() {
        let mut dd = MddPackage::new(&[3, 3]).unwrap();
        let h = dd.make_gate(&h3(), 0).unwrap();
        let cx1 = dd.make_controlled_gate(&X3, &single(0, 1), 1).unwrap();
        let cx2 = dd.make_controlled_gate(&X3_DAG, &single(0, 2), 1).unwrap();

        let mut psi = dd.make_zero_state(2, 0).unwrap();
        for gate in [h, cx1, cx2] {
            let next = dd.multiply(gate, psi).unwrap();
            dd.dec_ref(psi);
            psi = next;
        }

        for digits in [[0, 0], [1, 1], [2, 2]] {
            let basis = dd.make_basis_state(&digits, 0).unwrap();
            let f = dd.fidelity(basis, psi).unwrap();
            assert!((f - 1.0 / 3.0).abs() < 1e-6, "fidelity {f} at {digits:?}");
        }
        for digits in [[0, 1], [1, 0], [2, 1], [1, 2], [0, 2], [2, 0]] {
            let basis = dd.make_basis_state(&digits, 0).unwrap();
            let f = dd.fidelity(basis, psi).unwrap();
            assert!(f < 1e-9, "fidelity {f} at {digits:?}");
        }
        let own = dd.fidelity(psi, psi).unwrap();
        assert!((own - 1.0).abs() < 1e-6);
    }

    #[test]
    fn inner_product_conjugates_the_left_side() {
        let mut dd = MddPackage::new(&[2]).unwrap();
        // |ψ⟩ = (|0⟩ + i|1⟩)/√2 via RX(π/2) up to phase; build from raw node
        let i_half = dd.cn.lookup(0.0, std::f64::consts::FRAC_1_SQRT_2);
        let half = dd.cn.lookup(std::f64::consts::FRAC_1_SQRT_2, 0.0);
        let edges = vec![
            crate::VEdge::terminal(half),
            crate::VEdge::terminal(i_half),
        ];
        let psi = dd.make_dd_node_v(0, edges, false).unwrap();
        let one = dd.make_basis_state(&[1], 0).unwrap();
        let ip = dd.inner_product(psi, one).unwrap();
        // ⟨ψ|1⟩ = conj(i/√2) = -i/√2
        assert!((ip.re - 0.0).abs() < EPS);
        assert!((ip.im + std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn kronecker_stacks_states_and_identities() {
        let mut dd = MddPackage::new(&[3, 3]).unwrap();
        let z1 = dd.make_zero_state(1, 0).unwrap();
        let z2 = dd.make_zero_state(2, 0).unwrap();
        let k = dd.kronecker(z1, z1).unwrap();
        assert_eq!(k, z2);

        let id1 = dd.make_ident(1).unwrap();
        let id2 = dd.make_ident(2).unwrap();
        let kid = dd.kronecker_matrices(id1, id1).unwrap();
        assert_eq!(kid, id2);
    }

    #[test]
    fn kronecker_puts_the_second_factor_on_the_low_levels() {
        let mut dd = MddPackage::new(&[3, 3]).unwrap();
        // distinct factors pin the ordering: the first operand is the high
        // factor, so |2⟩ ⊗ |1⟩ carries digit 1 on register 0 and digit 2
        // on register 1
        let two = dd.make_basis_state(&[2], 0).unwrap();
        let one = dd.make_basis_state(&[1], 0).unwrap();
        let k = dd.kronecker(two, one).unwrap();
        let expect = dd.make_basis_state(&[1, 2], 0).unwrap();
        assert_eq!(k, expect);
        let flipped = dd.make_basis_state(&[2, 1], 0).unwrap();
        assert_ne!(k, flipped);

        // matrix factors order the same way: X₃ lands on register 1, H₃
        // on register 0, matching the composed full-span gates
        let x_local = dd.make_gate_dd(&X3, 1, &Controls::new(), 0, 0).unwrap();
        let h_local = dd.make_gate_dd(&h3(), 1, &Controls::new(), 0, 0).unwrap();
        let km = dd.kronecker_matrices(x_local, h_local).unwrap();
        let x_high = dd.make_gate(&X3, 1).unwrap();
        let h_low = dd.make_gate(&h3(), 0).unwrap();
        let expect = dd.multiply_matrices(x_high, h_low).unwrap();
        assert_eq!(km, expect);
    }

    #[test]
    fn ghz_scaling() {
        for n in [5usize, 10, 30] {
            let radices = vec![3usize; n];
            let mut dd = MddPackage::new(&radices).unwrap();
            let h = dd.make_gate(&h3(), 0).unwrap();
            let mut psi = dd.make_zero_state(n as RegisterCount, 0).unwrap();
            let next = dd.multiply(h, psi).unwrap();
            dd.dec_ref(psi);
            psi = next;

            for target in 1..n as Register {
                let mut c1 = Controls::new();
                let mut c2 = Controls::new();
                for control in 0..target {
                    c1.insert(Control::new(control, 1));
                    c2.insert(Control::new(control, 2));
                }
                let g1 = dd.make_controlled_gate(&X3, &c1, target).unwrap();
                let g2 = dd.make_controlled_gate(&X3_DAG, &c2, target).unwrap();
                for g in [g1, g2] {
                    let next = dd.multiply(g, psi).unwrap();
                    dd.dec_ref(psi);
                    dd.dec_ref_matrix(g);
                    psi = next;
                }
            }

            for digit in 0..3usize {
                let basis = dd.make_basis_state(&vec![digit; n], 0).unwrap();
                let f = dd.fidelity(basis, psi).unwrap();
                assert!((f - 1.0 / 3.0).abs() < 1e-4, "n={n} digit={digit} fidelity={f}");
            }
        }
    }

    #[test]
    fn spread_splits_two_registers_evenly() {
        let mut dd = MddPackage::new(&[2, 2]).unwrap();
        let init = dd.make_basis_state(&[1, 0], 0).unwrap();
        let w = dd.spread(2, &[0, 1], init).unwrap();
        let e10 = dd.make_basis_state(&[1, 0], 0).unwrap();
        let e01 = dd.make_basis_state(&[0, 1], 0).unwrap();
        let f10 = dd.fidelity(e10, w).unwrap();
        let f01 = dd.fidelity(e01, w).unwrap();
        assert!((f10 - 0.5).abs() < 1e-6);
        assert!((f01 - 0.5).abs() < 1e-6);
        let e11 = dd.make_basis_state(&[1, 1], 0).unwrap();
        assert!(dd.fidelity(e11, w).unwrap() < 1e-9);
    }

    #[test]
    fn w_state_by_spreading() {
        // three layer-0 qutrits, each spread over a group of five: fifteen
        // registers, radices {3,3,3,5,…,5}
        let mut radices = vec![3usize; 3];
        radices.extend(std::iter::repeat(5).take(12));
        let mut dd = MddPackage::new(&radices).unwrap();
        let n = radices.len() as RegisterCount;

        let mut digits = vec![0usize; radices.len()];
        digits[0] = 1;
        let init = dd.make_basis_state(&digits, 0).unwrap();

        let mut state = dd.spread(n, &[0, 1, 2], init).unwrap();
        let groups: [[Register; 5]; 3] =
            [[0, 3, 4, 5, 6], [1, 7, 8, 9, 10], [2, 11, 12, 13, 14]];
        for group in groups {
            let next = dd.spread(n, &group, state).unwrap();
            dd.dec_ref(state);
            state = next;
        }

        for hot in 0..radices.len() {
            let mut digits = vec![0usize; radices.len()];
            digits[hot] = 1;
            let basis = dd.make_basis_state(&digits, 0).unwrap();
            let f = dd.fidelity(basis, state).unwrap();
            assert!((f - 1.0 / 15.0).abs() < 1e-4, "register {hot}: fidelity {f}");
        }
        let own = dd.fidelity(state, state).unwrap();
        assert!((own - 1.0).abs() < 1e-4);
    }

    #[test]
    fn results_survive_a_forced_collection() {
        let mut dd = MddPackage::new(&[3, 3]).unwrap();
        let h = dd.make_gate(&h3(), 0).unwrap();
        let z = dd.make_zero_state(2, 0).unwrap();
        let a = dd.multiply(h, z).unwrap();
        assert!(dd.garbage_collect(true));
        // memo tables were cleared; recomputation lands on the same edge
        let b = dd.multiply(h, z).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn operations_balance_the_scratch_cache() {
        let mut dd = MddPackage::new(&[3, 3]).unwrap();
        let z = dd.make_zero_state(2, 0).unwrap();
        let h = dd.make_gate(&h3(), 0).unwrap();
        let psi = dd.multiply(h, z).unwrap();
        let _ = dd.add(psi, z).unwrap();
        let _ = dd.inner_product(psi, z).unwrap();
        assert_eq!(dd.stats().cache_in_use, 0);
    }
}
