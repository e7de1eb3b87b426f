//! The MDD package
//!
//! [`MddPackage`] owns every table: the complex-number unit, the two unique
//! tables, the memoization tables and the identity cache. It implements the
//! two normalization rules, the node constructors (`make_dd_node_*`, zero
//! and basis states, gate diagrams, identities), the lazy-recursive
//! reference counting, and garbage-collection orchestration.
//!
//! ## Normalization
//!
//! Vector nodes pull the L2 norm of their outgoing weights onto the
//! incoming edge, so a state's total amplitude sits entirely on its root.
//! Matrix nodes pull the first largest-magnitude outgoing weight instead,
//! pinning the L∞ entry of every block to exactly one. The two rules are
//! not interchangeable; the node flavor decides.
//!
//! Weights within tolerance of zero snap to exact zero edges, quotients
//! within tolerance of one snap to the interned `ONE` handle. A non-finite
//! common factor aborts the installation with
//! [`PackageError::NonFiniteFactor`].
//!
//! ## Reference counting and collection
//!
//! `inc_ref`/`dec_ref` are lazy-recursive: children are touched only when a
//! node's count crosses the 0↔1 boundary. Sweeps run at public operation
//! boundaries only, clear every compute table first (their entries are
//! non-owning hints over possibly-freed ids), and then reclaim zero-ref
//! nodes and coefficients.

use tracing::debug;

use crate::cnum::ComplexNumbers;
use crate::complex::{Complex, ComplexValue};
use crate::compute::{ComputeTable, MCached, UnaryComputeTable, VCached};
use crate::control::Controls;
use crate::node::{MEdge, MNode, MNodeId, VEdge, VNode, VNodeId};
use crate::unique::UniqueTable;
use crate::{Fp, PackageError, Register, RegisterCount, DEFAULT_TOLERANCE, MAX_REGISTERS};

/// Tuning knobs, applied at construction.
///
/// The defaults are sufficient for circuits of a few hundred interacting
/// registers at moderate radix.
#[derive(Copy, Clone, Debug)]
pub struct PackageOptions {
    /// Interning tolerance τ. Frozen once a non-trivial value is interned.
    pub tolerance: Fp,
    /// Bucket count of the complex table (rounded to a power of two).
    pub ct_buckets: usize,
    /// Bucket count per level of each unique table.
    pub unique_buckets: usize,
    /// Slot count of each binary compute table.
    pub compute_slots: usize,
    /// Slot count of each unary compute table.
    pub unary_compute_slots: usize,
    /// Live-node pressure that triggers a sweep.
    pub gc_node_limit: usize,
    /// Live-coefficient pressure that triggers a sweep.
    pub gc_complex_limit: usize,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            ct_buckets: 1 << 16,
            unique_buckets: 1 << 13,
            compute_slots: 1 << 14,
            unary_compute_slots: 1 << 12,
            gc_node_limit: 200_000,
            gc_complex_limit: 500_000,
        }
    }
}

/// Live/peak counters across the package's tables.
#[derive(Copy, Clone, Debug, Default)]
pub struct PackageStats {
    /// Live vector nodes.
    pub vector_nodes: usize,
    /// Peak live vector nodes.
    pub vector_nodes_peak: usize,
    /// Live matrix nodes.
    pub matrix_nodes: usize,
    /// Peak live matrix nodes.
    pub matrix_nodes_peak: usize,
    /// Live interned coefficients.
    pub coefficients: usize,
    /// Peak live interned coefficients.
    pub coefficients_peak: usize,
    /// Outstanding scratch slots.
    pub cache_in_use: usize,
    /// Garbage passes performed.
    pub garbage_passes: usize,
}

/// A mixed-radix decision diagram package over a fixed radix vector.
#[derive(Debug)]
pub struct MddPackage {
    radices: Vec<usize>,
    pub(crate) cn: ComplexNumbers,
    pub(crate) v_unique: UniqueTable<VNode>,
    pub(crate) m_unique: UniqueTable<MNode>,
    id_table: Vec<Option<MEdge>>,

    pub(crate) vector_add: ComputeTable<VCached, VCached, VCached>,
    pub(crate) matrix_add: ComputeTable<MCached, MCached, MCached>,
    pub(crate) mat_vec_mult: ComputeTable<MEdge, VEdge, VCached>,
    pub(crate) mat_mat_mult: ComputeTable<MEdge, MEdge, MCached>,
    pub(crate) vector_kron: ComputeTable<VEdge, VEdge, VCached>,
    pub(crate) matrix_kron: ComputeTable<MEdge, MEdge, MCached>,
    pub(crate) inner_prod: ComputeTable<VEdge, VEdge, ComplexValue>,
    pub(crate) transpose_table: UnaryComputeTable<MEdge, MEdge>,
    pub(crate) conj_transpose_table: UnaryComputeTable<MEdge, MEdge>,

    gc_runs: usize,
}

impl MddPackage {
    /// A package over `radices`, with default options.
    pub fn new(radices: &[usize]) -> Result<Self, PackageError> {
        Self::with_options(radices, PackageOptions::default())
    }

    /// A package over `radices` with explicit tuning options.
    pub fn with_options(radices: &[usize], opts: PackageOptions) -> Result<Self, PackageError> {
        if radices.len() > MAX_REGISTERS {
            return Err(PackageError::TooManyRegisters {
                requested: radices.len(),
                limit: MAX_REGISTERS,
            });
        }
        for (register, &radix) in radices.iter().enumerate() {
            if radix < 2 {
                return Err(PackageError::RadixTooSmall { register, radix });
            }
        }
        debug!(registers = radices.len(), "package construction");
        Ok(Self {
            radices: radices.to_vec(),
            cn: ComplexNumbers::new(opts.ct_buckets, opts.tolerance, opts.gc_complex_limit),
            v_unique: UniqueTable::new(radices.len(), opts.unique_buckets, opts.gc_node_limit),
            m_unique: UniqueTable::new(radices.len(), opts.unique_buckets, opts.gc_node_limit),
            id_table: vec![None; radices.len()],
            vector_add: ComputeTable::new(opts.compute_slots),
            matrix_add: ComputeTable::new(opts.compute_slots),
            mat_vec_mult: ComputeTable::new(opts.compute_slots),
            mat_mat_mult: ComputeTable::new(opts.compute_slots),
            vector_kron: ComputeTable::new(opts.unary_compute_slots),
            matrix_kron: ComputeTable::new(opts.unary_compute_slots),
            inner_prod: ComputeTable::new(opts.unary_compute_slots),
            transpose_table: UnaryComputeTable::new(opts.unary_compute_slots),
            conj_transpose_table: UnaryComputeTable::new(opts.unary_compute_slots),
            gc_runs: 0,
        })
    }

    /// Number of registers.
    #[inline]
    pub fn register_count(&self) -> usize {
        self.radices.len()
    }

    /// The radix vector, register 0 first.
    #[inline]
    pub fn radices(&self) -> &[usize] {
        &self.radices
    }

    /// Radix of one register.
    #[inline]
    pub fn radix(&self, register: Register) -> usize {
        self.radices[register as usize]
    }

    /// Append registers. Existing edges stay valid; the package never
    /// shrinks.
    pub fn resize(&mut self, extra: &[usize]) -> Result<(), PackageError> {
        let total = self.radices.len() + extra.len();
        if total > MAX_REGISTERS {
            return Err(PackageError::TooManyRegisters { requested: total, limit: MAX_REGISTERS });
        }
        for (i, &radix) in extra.iter().enumerate() {
            if radix < 2 {
                return Err(PackageError::RadixTooSmall { register: self.radices.len() + i, radix });
            }
        }
        self.radices.extend_from_slice(extra);
        self.v_unique.add_levels(extra.len());
        self.m_unique.add_levels(extra.len());
        self.id_table.resize(self.radices.len(), None);
        Ok(())
    }

    /// The active interning tolerance.
    #[inline]
    pub fn tolerance(&self) -> Fp {
        self.cn.tolerance()
    }

    /// Change the tolerance. Allowed only before the first non-trivial
    /// intern.
    pub fn set_tolerance(&mut self, tolerance: Fp) -> Result<(), PackageError> {
        self.cn.table.set_tolerance(tolerance)
    }

    // -----------------------------------------------------------------------
    // Internal accessors
    // -----------------------------------------------------------------------

    #[inline]
    pub(crate) fn v_node(&self, id: VNodeId) -> &VNode {
        self.v_unique.node(id.0)
    }

    #[inline]
    pub(crate) fn m_node(&self, id: MNodeId) -> &MNode {
        self.m_unique.node(id.0)
    }

    /// Level of a non-terminal vector edge.
    #[inline]
    pub(crate) fn v_var(&self, e: VEdge) -> u16 {
        self.v_node(e.node).var
    }

    /// Level of a non-terminal matrix edge.
    #[inline]
    pub(crate) fn m_var(&self, e: MEdge) -> u16 {
        self.m_node(e.node).var
    }

    /// Symmetry flag, treating the terminal as symmetric.
    #[inline]
    pub(crate) fn m_symmetric(&self, id: MNodeId) -> bool {
        id.is_terminal() || self.m_node(id).symmetric
    }

    /// Identity flag, treating the terminal as identity.
    #[inline]
    pub(crate) fn m_identity(&self, id: MNodeId) -> bool {
        id.is_terminal() || self.m_node(id).identity
    }

    fn check_span(&self, n: RegisterCount, start: Register) -> Result<(), PackageError> {
        let end = n as usize + start as usize;
        if end > self.register_count() {
            return Err(PackageError::TooManyRegisters {
                requested: end,
                limit: self.register_count(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Normalization
    // -----------------------------------------------------------------------

    /// Vector rule: pull `√(Σ|wᵢ|²)` onto the incoming edge.
    ///
    /// Returns `None` when every outgoing weight is (approximately) zero; the
    /// caller then hands out the canonical zero edge. In cached mode the
    /// outgoing scratch weights are consumed and the returned top weight is
    /// scratch; otherwise everything is interned.
    fn normalize_v(
        &mut self,
        var: u16,
        edges: &mut [VEdge],
        cached: bool,
    ) -> Result<Option<Complex>, PackageError> {
        let tol = self.cn.tolerance();

        let mut nonzero = 0usize;
        let mut last = 0usize;
        for (i, e) in edges.iter_mut().enumerate() {
            if !e.w.is_exact_zero() && self.cn.val_c(e.w).approx_zero(tol) {
                self.cn.release(e.w);
                *e = VEdge::ZERO;
            }
            if !e.w.is_exact_zero() {
                nonzero += 1;
                last = i;
            }
        }
        if nonzero == 0 {
            return Ok(None);
        }

        if nonzero == 1 {
            let wj = edges[last].w;
            let top = if cached && wj.is_cached() {
                wj
            } else {
                let v = self.cn.val_c(wj);
                self.cn.lookup_value(v)
            };
            edges[last].w = Complex::ONE;
            return Ok(Some(top));
        }

        let mut sum = 0.0;
        for e in edges.iter() {
            sum += self.cn.mag2(e.w);
        }
        let factor = sum.sqrt();
        if !factor.is_finite() || factor <= 0.0 {
            return Err(PackageError::NonFiniteFactor { level: var as usize });
        }

        for e in edges.iter_mut() {
            if e.w.is_exact_zero() {
                continue;
            }
            let v = self.cn.val_c(e.w);
            let q = ComplexValue::new(v.re / factor, v.im / factor);
            self.cn.release(e.w);
            if q.approx_zero(tol) {
                *e = VEdge::ZERO;
            } else {
                e.w = self.cn.lookup_value(q);
            }
        }

        let top_val = ComplexValue::new(factor, 0.0);
        let top = if cached {
            self.cn.temporary(top_val)
        } else {
            self.cn.lookup_value(top_val)
        };
        Ok(Some(top))
    }

    /// Matrix rule: pull the first strictly-largest-magnitude weight onto
    /// the incoming edge; that position becomes exactly `ONE`.
    fn normalize_m(
        &mut self,
        var: u16,
        edges: &mut [MEdge],
        cached: bool,
    ) -> Result<Option<Complex>, PackageError> {
        let tol = self.cn.tolerance();

        for e in edges.iter_mut() {
            if !e.w.is_exact_zero() && self.cn.val_c(e.w).approx_zero(tol) {
                self.cn.release(e.w);
                *e = MEdge::ZERO;
            }
        }

        let mut argmax: Option<usize> = None;
        let mut max_mag = 0.0;
        for (i, e) in edges.iter().enumerate() {
            if e.w.is_exact_zero() {
                continue;
            }
            let mag = self.cn.mag2(e.w);
            match argmax {
                None => {
                    argmax = Some(i);
                    max_mag = mag;
                }
                Some(_) if mag - max_mag > tol => {
                    argmax = Some(i);
                    max_mag = mag;
                }
                Some(_) => {}
            }
        }
        let argmax = match argmax {
            None => return Ok(None),
            Some(i) => i,
        };

        let max_w = edges[argmax].w;
        let max_val = self.cn.val_c(max_w);
        if !max_val.is_finite() {
            return Err(PackageError::NonFiniteFactor { level: var as usize });
        }

        let top = if cached && max_w.is_cached() {
            max_w
        } else {
            self.cn.lookup_value(max_val)
        };
        edges[argmax].w = Complex::ONE;

        for (i, e) in edges.iter_mut().enumerate() {
            if i == argmax || e.w.is_exact_zero() {
                continue;
            }
            let q = self.cn.val_c(e.w).div(max_val);
            self.cn.release(e.w);
            if q.approx_zero(tol) {
                *e = MEdge::ZERO;
            } else {
                e.w = self.cn.lookup_value(q);
            }
        }
        Ok(Some(top))
    }

    // -----------------------------------------------------------------------
    // Node constructors
    // -----------------------------------------------------------------------

    /// Assemble, normalize and intern a vector node. With `cached` the
    /// supplied weights are scratch owned by the call, and the returned top
    /// weight is scratch as well.
    pub(crate) fn make_dd_node_v(
        &mut self,
        var: u16,
        edges: Vec<VEdge>,
        cached: bool,
    ) -> Result<VEdge, PackageError> {
        let want = self.radix(var);
        if edges.len() != want {
            return Err(PackageError::LevelMismatch {
                level: var as usize,
                want,
                got: edges.len(),
            });
        }
        debug_assert!(edges
            .iter()
            .all(|e| e.is_terminal() || self.v_var(*e) + 1 == var));

        let mut edges = edges.into_boxed_slice();
        match self.normalize_v(var, &mut edges, cached)? {
            None => Ok(VEdge::ZERO),
            Some(top) => {
                let (id, _inserted) = self.v_unique.lookup_or_insert(var, edges);
                Ok(VEdge { node: VNodeId(id), w: top })
            }
        }
    }

    /// Matrix counterpart of [`make_dd_node_v`]; recomputes the
    /// `symmetric`/`identity` flags for freshly installed nodes.
    pub(crate) fn make_dd_node_m(
        &mut self,
        var: u16,
        edges: Vec<MEdge>,
        cached: bool,
    ) -> Result<MEdge, PackageError> {
        let r = self.radix(var);
        let want = r * r;
        if edges.len() != want {
            return Err(PackageError::LevelMismatch {
                level: var as usize,
                want,
                got: edges.len(),
            });
        }
        debug_assert!(edges
            .iter()
            .all(|e| e.is_terminal() || self.m_var(*e) + 1 == var));

        let mut edges = edges.into_boxed_slice();
        match self.normalize_m(var, &mut edges, cached)? {
            None => Ok(MEdge::ZERO),
            Some(top) => {
                let (id, inserted) = self.m_unique.lookup_or_insert(var, edges);
                if inserted {
                    self.update_matrix_flags(MNodeId(id));
                }
                Ok(MEdge { node: MNodeId(id), w: top })
            }
        }
    }

    /// Recompute the `symmetric`/`identity` flags of a freshly installed
    /// matrix node, by edge identity against the memoized transpose.
    fn update_matrix_flags(&mut self, id: MNodeId) {
        let node = self.m_node(id);
        let var = node.var;
        let edges: Vec<MEdge> = node.edges.to_vec();
        let r = self.radix(var);

        let mut symmetric = edges
            .iter()
            .step_by(r + 1)
            .all(|d| self.m_symmetric(d.node));
        if symmetric {
            'outer: for i in 0..r {
                for j in (i + 1)..r {
                    match self.transpose_rec(edges[i * r + j]) {
                        Ok(t) if t == edges[j * r + i] => {}
                        _ => {
                            symmetric = false;
                            break 'outer;
                        }
                    }
                }
            }
        }

        let mut identity = symmetric;
        if identity {
            for i in 0..r {
                for j in 0..r {
                    let e = edges[i * r + j];
                    if i == j {
                        if !self.m_identity(e.node) || !e.w.is_exact_one() {
                            identity = false;
                        }
                    } else if !e.is_exact_zero() {
                        identity = false;
                    }
                }
            }
        }

        let n = self.m_unique.node_mut(id.0);
        n.symmetric = symmetric;
        n.identity = identity;
    }

    /// The all-zeros basis state `|0…0⟩` over registers
    /// `[start, start + n)`.
    pub fn make_zero_state(
        &mut self,
        n: RegisterCount,
        start: Register,
    ) -> Result<VEdge, PackageError> {
        self.check_span(n, start)?;
        self.maybe_collect();
        let mut e = VEdge::ONE;
        for level in start..start + n {
            let r = self.radix(level);
            let mut edges = vec![VEdge::ZERO; r];
            edges[0] = e;
            e = self.make_dd_node_v(level, edges, false)?;
        }
        self.inc_ref(e);
        Ok(e)
    }

    /// The computational basis state selected by `digits`, one digit per
    /// register starting at `start` (least significant first).
    pub fn make_basis_state(
        &mut self,
        digits: &[usize],
        start: Register,
    ) -> Result<VEdge, PackageError> {
        self.check_span(digits.len() as RegisterCount, start)?;
        self.maybe_collect();
        let mut e = VEdge::ONE;
        for (i, &digit) in digits.iter().enumerate() {
            let level = start + i as Register;
            let r = self.radix(level);
            if digit >= r {
                return Err(PackageError::DigitOutOfRange {
                    digit,
                    register: level as usize,
                    radix: r,
                });
            }
            let mut edges = vec![VEdge::ZERO; r];
            edges[digit] = e;
            e = self.make_dd_node_v(level, edges, false)?;
        }
        self.inc_ref(e);
        Ok(e)
    }

    /// Operator diagram for the local matrix `mat` (row-major,
    /// `radix(target)²` entries) applied to `target`, spanning registers
    /// `[start, start + n)` and honoring `controls`.
    pub fn make_gate_dd(
        &mut self,
        mat: &[ComplexValue],
        n: RegisterCount,
        controls: &Controls,
        target: Register,
        start: Register,
    ) -> Result<MEdge, PackageError> {
        self.check_span(n, start)?;
        if target < start || (target as usize) >= start as usize + n as usize {
            return Err(PackageError::RegisterOutOfRange {
                register: target as usize,
                count: self.register_count(),
            });
        }
        let rt = self.radix(target);
        if mat.len() != rt * rt {
            return Err(PackageError::MatrixShape { got: mat.len(), want: rt * rt, radix: rt });
        }

        let mut control_at = rustc_hash::FxHashMap::default();
        for c in controls {
            if c.register == target {
                return Err(PackageError::ControlOnTarget { register: c.register as usize });
            }
            if c.register < start || (c.register as usize) >= start as usize + n as usize {
                return Err(PackageError::RegisterOutOfRange {
                    register: c.register as usize,
                    count: self.register_count(),
                });
            }
            let radix = self.radix(c.register);
            if c.level as usize >= radix {
                return Err(PackageError::ControlLevelOutOfRange {
                    register: c.register as usize,
                    level: c.level as usize,
                    radix,
                });
            }
            if control_at.insert(c.register, c.level as usize).is_some() {
                return Err(PackageError::DuplicateControl { register: c.register as usize });
            }
        }

        self.maybe_collect();
        let tol = self.cn.tolerance();
        let mut em: Vec<MEdge> = Vec::with_capacity(rt * rt);
        for &v in mat {
            if v.approx_zero(tol) {
                em.push(MEdge::ZERO);
            } else {
                let w = self.cn.lookup_value(v);
                em.push(MEdge::terminal(w));
            }
        }

        // wrap the levels below the target; controls act blockwise: the
        // activating digit carries the gate entry, the other diagonal
        // digits carry identity for diagonal entries and zero otherwise
        for level in start..target {
            let rz = self.radix(level);
            let ctrl = control_at.get(&level).copied();
            for i in 0..rt {
                for j in 0..rt {
                    let idx = i * rt + j;
                    let mut w = vec![MEdge::ZERO; rz * rz];
                    match ctrl {
                        Some(t) => {
                            for d in 0..rz {
                                if d == t {
                                    w[d * rz + d] = em[idx];
                                } else if i == j {
                                    w[d * rz + d] = if level == start {
                                        MEdge::ONE
                                    } else {
                                        self.ident_span(start, level - 1)?
                                    };
                                }
                            }
                        }
                        None => {
                            for d in 0..rz {
                                w[d * rz + d] = em[idx];
                            }
                        }
                    }
                    em[idx] = self.make_dd_node_m(level, w, false)?;
                }
            }
        }

        let mut e = self.make_dd_node_m(target, em, false)?;

        for level in target + 1..start + n {
            let rz = self.radix(level);
            let ctrl = control_at.get(&level).copied();
            let mut w = vec![MEdge::ZERO; rz * rz];
            match ctrl {
                Some(t) => {
                    for d in 0..rz {
                        w[d * rz + d] =
                            if d == t { e } else { self.ident_span(start, level - 1)? };
                    }
                }
                None => {
                    for d in 0..rz {
                        w[d * rz + d] = e;
                    }
                }
            }
            e = self.make_dd_node_m(level, w, false)?;
        }

        self.inc_ref_matrix(e);
        Ok(e)
    }

    /// Uncontrolled gate over the whole package.
    pub fn make_gate(
        &mut self,
        mat: &[ComplexValue],
        target: Register,
    ) -> Result<MEdge, PackageError> {
        self.make_gate_dd(mat, self.register_count() as RegisterCount, &Controls::new(), target, 0)
    }

    /// Controlled gate over the whole package.
    pub fn make_controlled_gate(
        &mut self,
        mat: &[ComplexValue],
        controls: &Controls,
        target: Register,
    ) -> Result<MEdge, PackageError> {
        self.make_gate_dd(mat, self.register_count() as RegisterCount, controls, target, 0)
    }

    /// The identity on registers `[0, n)`. `make_ident(0)` is the scalar
    /// one.
    pub fn make_ident(&mut self, n: RegisterCount) -> Result<MEdge, PackageError> {
        if n == 0 {
            return Ok(MEdge::ONE);
        }
        let e = self.ident_span(0, n - 1)?;
        self.inc_ref_matrix(e);
        Ok(e)
    }

    /// The identity on the inclusive register span `[lo, hi]`.
    pub fn make_ident_span(&mut self, lo: Register, hi: Register) -> Result<MEdge, PackageError> {
        let e = self.ident_span(lo, hi)?;
        self.inc_ref_matrix(e);
        Ok(e)
    }

    /// Identity construction backing the public wrappers; spans starting at
    /// register 0 are cached in `id_table` (one reference share is parked
    /// there so sweeps keep the chain).
    pub(crate) fn ident_span(&mut self, lo: Register, hi: Register) -> Result<MEdge, PackageError> {
        if hi < lo {
            return Ok(MEdge::ONE);
        }
        if hi as usize >= self.register_count() {
            return Err(PackageError::RegisterOutOfRange {
                register: hi as usize,
                count: self.register_count(),
            });
        }
        if lo == 0 {
            // resume from the highest cached level and fill the table up to
            // `hi`, so repeated queries stay O(1) after warmup
            let mut e = MEdge::ONE;
            let mut from = 0u16;
            for level in (0..=hi).rev() {
                if let Some(cached) = self.id_table[level as usize] {
                    e = cached;
                    from = level + 1;
                    break;
                }
            }
            for level in from..=hi {
                e = self.wrap_diag(level, e)?;
                self.inc_ref_matrix(e);
                self.id_table[level as usize] = Some(e);
            }
            return Ok(e);
        }

        let mut e = MEdge::ONE;
        for level in lo..=hi {
            e = self.wrap_diag(level, e)?;
        }
        Ok(e)
    }

    /// One diagonal level on top of `inner`.
    fn wrap_diag(&mut self, level: u16, inner: MEdge) -> Result<MEdge, PackageError> {
        let r = self.radix(level);
        let mut edges = vec![MEdge::ZERO; r * r];
        for d in 0..r {
            edges[d * r + d] = inner;
        }
        self.make_dd_node_m(level, edges, false)
    }

    // -----------------------------------------------------------------------
    // Reference counting
    // -----------------------------------------------------------------------

    /// Acquire one share of a vector edge.
    pub fn inc_ref(&mut self, e: VEdge) {
        self.cn.inc_ref(e.w);
        if e.is_terminal() {
            return;
        }
        let rc = self.v_node(e.node).ref_count;
        if rc == u32::MAX {
            return;
        }
        self.v_unique.node_mut(e.node.0).ref_count = rc + 1;
        if rc == 0 {
            let children: Vec<VEdge> = self.v_node(e.node).edges.to_vec();
            for c in children {
                self.inc_ref(c);
            }
        }
    }

    /// Release one share of a vector edge.
    pub fn dec_ref(&mut self, e: VEdge) {
        self.cn.dec_ref(e.w);
        if e.is_terminal() {
            return;
        }
        let rc = self.v_node(e.node).ref_count;
        if rc == u32::MAX {
            return;
        }
        debug_assert!(rc > 0, "unbalanced vector dec_ref");
        self.v_unique.node_mut(e.node.0).ref_count = rc - 1;
        if rc == 1 {
            let children: Vec<VEdge> = self.v_node(e.node).edges.to_vec();
            for c in children {
                self.dec_ref(c);
            }
        }
    }

    /// Acquire one share of a matrix edge.
    pub fn inc_ref_matrix(&mut self, e: MEdge) {
        self.cn.inc_ref(e.w);
        if e.is_terminal() {
            return;
        }
        let rc = self.m_node(e.node).ref_count;
        if rc == u32::MAX {
            return;
        }
        self.m_unique.node_mut(e.node.0).ref_count = rc + 1;
        if rc == 0 {
            let children: Vec<MEdge> = self.m_node(e.node).edges.to_vec();
            for c in children {
                self.inc_ref_matrix(c);
            }
        }
    }

    /// Release one share of a matrix edge.
    pub fn dec_ref_matrix(&mut self, e: MEdge) {
        self.cn.dec_ref(e.w);
        if e.is_terminal() {
            return;
        }
        let rc = self.m_node(e.node).ref_count;
        if rc == u32::MAX {
            return;
        }
        debug_assert!(rc > 0, "unbalanced matrix dec_ref");
        self.m_unique.node_mut(e.node.0).ref_count = rc - 1;
        if rc == 1 {
            let children: Vec<MEdge> = self.m_node(e.node).edges.to_vec();
            for c in children {
                self.dec_ref_matrix(c);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    /// Sweep every table if pressure demands it (or unconditionally with
    /// `force`). Compute tables are cleared first: their entries are
    /// non-owning hints over ids the sweep may recycle.
    pub fn garbage_collect(&mut self, force: bool) -> bool {
        let need = force
            || self.cn.table.possibly_needs_collection()
            || self.v_unique.possibly_needs_collection()
            || self.m_unique.possibly_needs_collection();
        if !need {
            return false;
        }
        self.clear_compute_tables();
        let vector_nodes = self.v_unique.garbage_collect();
        let matrix_nodes = self.m_unique.garbage_collect();
        let coefficients = self.cn.table.garbage_collect();
        self.gc_runs += 1;
        debug!(vector_nodes, matrix_nodes, coefficients, "garbage pass");
        true
    }

    /// Boundary check run at the start of every public operation.
    pub(crate) fn maybe_collect(&mut self) {
        if self.cn.table.possibly_needs_collection()
            || self.v_unique.possibly_needs_collection()
            || self.m_unique.possibly_needs_collection()
        {
            self.garbage_collect(true);
        }
    }

    pub(crate) fn clear_compute_tables(&mut self) {
        self.vector_add.clear();
        self.matrix_add.clear();
        self.mat_vec_mult.clear();
        self.mat_mat_mult.clear();
        self.vector_kron.clear();
        self.matrix_kron.clear();
        self.inner_prod.clear();
        self.transpose_table.clear();
        self.conj_transpose_table.clear();
    }

    /// Reclaim scratch leaked by a failed operation.
    pub(crate) fn reset_cache(&mut self) {
        self.cn.cache.reset();
    }

    /// Live/peak counters.
    pub fn stats(&self) -> PackageStats {
        PackageStats {
            vector_nodes: self.v_unique.live_count(),
            vector_nodes_peak: self.v_unique.peak_count(),
            matrix_nodes: self.m_unique.live_count(),
            matrix_nodes_peak: self.m_unique.peak_count(),
            coefficients: self.cn.table.count(),
            coefficients_peak: self.cn.table.peak_count(),
            cache_in_use: self.cn.cache.in_use(),
            garbage_passes: self.gc_runs,
        }
    }
}
