//! Gate matrices
//!
//! Local operator matrices in row-major flattening, sized `radix²`. Fixed
//! arrays cover the common qubit/qutrit gates; the parametric builders
//! produce generalized Fourier ("Hadamard") transforms, cyclic shifts,
//! two-level exchanges and embedded Givens rotations for any radix, which
//! is what mixed-radix circuits are usually written in.

#![allow(missing_docs)]

use crate::complex::ComplexValue;
use crate::Fp;

/// Row-major 2×2 matrix.
pub type GateMatrix = [ComplexValue; 4];
/// Row-major 3×3 matrix.
pub type TritMatrix = [ComplexValue; 9];
/// Row-major 4×4 matrix.
pub type QuartMatrix = [ComplexValue; 16];
/// Row-major 5×5 matrix.
pub type QuintMatrix = [ComplexValue; 25];

pub const SQRT2_2: Fp = std::f64::consts::FRAC_1_SQRT_2;
/// `1/√3 = 0.57735026918962576…`
pub const SQRT3_3: Fp = 0.577_350_269_189_625_8;

const C0: ComplexValue = ComplexValue::ZERO;
const C1: ComplexValue = ComplexValue::ONE;
const CM1: ComplexValue = ComplexValue::new(-1.0, 0.0);

/// Qubit Hadamard.
pub const H2: GateMatrix = [
    ComplexValue::new(SQRT2_2, 0.0),
    ComplexValue::new(SQRT2_2, 0.0),
    ComplexValue::new(SQRT2_2, 0.0),
    ComplexValue::new(-SQRT2_2, 0.0),
];

/// Qubit NOT.
pub const X2: GateMatrix = [C0, C1, C1, C0];

/// Qubit phase flip.
pub const Z2: GateMatrix = [C1, C0, C0, CM1];

/// Qutrit cyclic increment, `X₃|k⟩ = |k+1 mod 3⟩`.
pub const X3: TritMatrix = [
    C0, C0, C1, //
    C1, C0, C0, //
    C0, C1, C0,
];

/// Qutrit cyclic decrement, the adjoint of [`X3`].
pub const X3_DAG: TritMatrix = [
    C0, C1, C0, //
    C0, C0, C1, //
    C1, C0, C0,
];

/// Qutrit exchange of levels 0 and 1.
pub const X01: TritMatrix = [
    C0, C1, C0, //
    C1, C0, C0, //
    C0, C0, C1,
];

/// Qutrit phase flip on level 1.
pub const Z01: TritMatrix = [
    C1, C0, C0, //
    C0, CM1, C0, //
    C0, C0, C1,
];

/// Generalized Fourier transform on `d` levels:
/// `F[j,k] = ω^{jk}/√d` with `ω = e^{2πi/d}`. `fourier(2)` is the Hadamard,
/// `fourier(3)` the qutrit `H₃` with entries `√3/3 · ω^{jk}`.
pub fn fourier(d: usize) -> Vec<ComplexValue> {
    let scale = 1.0 / (d as Fp).sqrt();
    let step = 2.0 * std::f64::consts::PI / d as Fp;
    let mut m = Vec::with_capacity(d * d);
    for j in 0..d {
        for k in 0..d {
            let a = step * ((j * k) % d) as Fp;
            m.push(ComplexValue::new(a.cos() * scale, a.sin() * scale));
        }
    }
    m
}

/// Qutrit Fourier transform as a fixed array.
pub fn h3() -> TritMatrix {
    let v = fourier(3);
    std::array::from_fn(|i| v[i])
}

/// Ququart Fourier transform as a fixed array.
pub fn h4() -> QuartMatrix {
    let v = fourier(4);
    std::array::from_fn(|i| v[i])
}

/// Ququint Fourier transform as a fixed array.
pub fn h5() -> QuintMatrix {
    let v = fourier(5);
    std::array::from_fn(|i| v[i])
}

/// Cyclic increment on `d` levels, `X|k⟩ = |k+1 mod d⟩`.
pub fn cyclic_shift(d: usize) -> Vec<ComplexValue> {
    let mut m = vec![C0; d * d];
    for j in 0..d {
        m[((j + 1) % d) * d + j] = C1;
    }
    m
}

/// Cyclic decrement on `d` levels, the adjoint of [`cyclic_shift`].
pub fn cyclic_shift_dag(d: usize) -> Vec<ComplexValue> {
    let mut m = vec![C0; d * d];
    for j in 0..d {
        m[j * d + (j + 1) % d] = C1;
    }
    m
}

/// Exchange of levels `a` and `b`, identity elsewhere.
pub fn embedded_exchange(d: usize, a: usize, b: usize) -> Vec<ComplexValue> {
    debug_assert!(a < d && b < d && a != b);
    let mut m = vec![C0; d * d];
    for k in 0..d {
        m[k * d + k] = C1;
    }
    m[a * d + a] = C0;
    m[b * d + b] = C0;
    m[a * d + b] = C1;
    m[b * d + a] = C1;
    m
}

/// Givens rotation in the `(a, b)` plane, identity elsewhere:
/// `|a⟩ ↦ cosθ|a⟩ + e^{iφ} sinθ|b⟩`, `|b⟩ ↦ -e^{-iφ} sinθ|a⟩ + cosθ|b⟩`.
pub fn embedded_givens(d: usize, a: usize, b: usize, theta: Fp, phi: Fp) -> Vec<ComplexValue> {
    debug_assert!(a < d && b < d && a != b);
    let (s, c) = theta.sin_cos();
    let mut m = vec![C0; d * d];
    for k in 0..d {
        m[k * d + k] = C1;
    }
    m[a * d + a] = ComplexValue::new(c, 0.0);
    m[b * d + b] = ComplexValue::new(c, 0.0);
    m[a * d + b] = ComplexValue::new(-phi.cos() * s, phi.sin() * s);
    m[b * d + a] = ComplexValue::new(phi.cos() * s, phi.sin() * s);
    m
}

/// Qubit phase gate, `diag(1, e^{iλ})`.
pub fn phase(lambda: Fp) -> GateMatrix {
    [C1, C0, C0, ComplexValue::new(lambda.cos(), lambda.sin())]
}

/// Qubit rotation about X.
pub fn rx(lambda: Fp) -> GateMatrix {
    let (s, c) = (lambda / 2.0).sin_cos();
    [
        ComplexValue::new(c, 0.0),
        ComplexValue::new(0.0, -s),
        ComplexValue::new(0.0, -s),
        ComplexValue::new(c, 0.0),
    ]
}

/// Qubit rotation about Y.
pub fn ry(lambda: Fp) -> GateMatrix {
    let (s, c) = (lambda / 2.0).sin_cos();
    [
        ComplexValue::new(c, 0.0),
        ComplexValue::new(-s, 0.0),
        ComplexValue::new(s, 0.0),
        ComplexValue::new(c, 0.0),
    ]
}

/// Qubit rotation about Z.
pub fn rz(lambda: Fp) -> GateMatrix {
    let (s, c) = (lambda / 2.0).sin_cos();
    [
        ComplexValue::new(c, -s),
        C0,
        C0,
        ComplexValue::new(c, s),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `m · m†` for a row-major `d×d` matrix.
    fn gram(m: &[ComplexValue], d: usize) -> Vec<ComplexValue> {
        let mut out = vec![ComplexValue::ZERO; d * d];
        for i in 0..d {
            for j in 0..d {
                let mut acc = ComplexValue::ZERO;
                for k in 0..d {
                    acc = acc.add(m[i * d + k].mul(m[j * d + k].conj()));
                }
                out[i * d + j] = acc;
            }
        }
        out
    }

    fn assert_unitary(m: &[ComplexValue], d: usize) {
        let g = gram(m, d);
        for i in 0..d {
            for j in 0..d {
                let want = if i == j { ComplexValue::ONE } else { ComplexValue::ZERO };
                assert!(
                    g[i * d + j].approx_eq(want, 1e-12),
                    "gram[{i}][{j}] = {} for d={d}",
                    g[i * d + j]
                );
            }
        }
    }

    #[test]
    fn fourier_matrices_are_unitary() {
        for d in 2..=5 {
            assert_unitary(&fourier(d), d);
        }
        assert_unitary(&H2, 2);
    }

    #[test]
    fn fourier_2_is_hadamard_and_3_matches_h3_constants() {
        let f2 = fourier(2);
        for (a, b) in f2.iter().zip(H2.iter()) {
            assert!(a.approx_eq(*b, 1e-12));
        }
        let f3 = h3();
        assert!(f3[0].approx_eq(ComplexValue::new(SQRT3_3, 0.0), 1e-12));
        // ω/√3 at [1][1]
        assert!(f3[4].approx_eq(ComplexValue::new(-SQRT3_3 / 2.0, 0.5), 1e-12));
        // ω²/√3 at [1][2]
        assert!(f3[5].approx_eq(ComplexValue::new(-SQRT3_3 / 2.0, -0.5), 1e-12));
    }

    #[test]
    fn shifts_permute_cyclically() {
        let x = cyclic_shift(3);
        for (a, b) in x.iter().zip(X3.iter()) {
            assert!(a.approx_eq(*b, 0.0));
        }
        let xd = cyclic_shift_dag(3);
        for (a, b) in xd.iter().zip(X3_DAG.iter()) {
            assert!(a.approx_eq(*b, 0.0));
        }
        // X · X† = 1
        let mut prod = vec![ComplexValue::ZERO; 9];
        for i in 0..3 {
            for j in 0..3 {
                let mut acc = ComplexValue::ZERO;
                for k in 0..3 {
                    acc = acc.add(x[i * 3 + k].mul(xd[k * 3 + j]));
                }
                prod[i * 3 + j] = acc;
            }
        }
        for i in 0..3 {
            for j in 0..3 {
                let want = if i == j { ComplexValue::ONE } else { ComplexValue::ZERO };
                assert!(prod[i * 3 + j].approx_eq(want, 1e-12));
            }
        }
    }

    #[test]
    fn embedded_rotations_are_unitary() {
        assert_unitary(&embedded_exchange(5, 0, 3), 5);
        assert_unitary(&embedded_givens(4, 1, 3, 0.7, 1.2), 4);
        assert_unitary(&ry(0.9), 2);
        assert_unitary(&rx(0.9), 2);
        assert_unitary(&rz(0.9), 2);
        assert_unitary(&phase(2.1), 2);
    }

    #[test]
    fn givens_moves_amplitude_between_the_two_levels() {
        let theta = (1.0f64 / 3.0).sqrt().acos();
        let g = embedded_givens(3, 0, 1, theta, 0.0);
        // column 0: |0> -> cosθ|0> + sinθ|1>
        assert!(g[0].approx_eq(ComplexValue::new(theta.cos(), 0.0), 1e-12));
        assert!(g[3].approx_eq(ComplexValue::new(theta.sin(), 0.0), 1e-12));
        assert!(g[6].approx_eq(ComplexValue::ZERO, 1e-12));
        // level 2 untouched
        assert!(g[8].approx_eq(ComplexValue::ONE, 1e-12));
    }
}
