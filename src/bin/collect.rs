//! Benchmark collection driver
//!
//! Runs the three scenario families — layered mixed-radix W states, scaled
//! qutrit GHZ states, and seeded random circuits — and prints one CSV row
//! per run to stdout:
//!
//! ```text
//! bench,lines,radices,ops,nodes,cplx_peak,seconds
//! ```
//!
//! Diagnostics go to stderr through `tracing` (`RUST_LOG=debug` to see
//! garbage passes). `--depth N` controls the random-circuit depth,
//! `--skip-random` / `--skip-ghz` / `--skip-w` trim the run.

#![forbid(unsafe_code)]

use std::env;
use std::time::Instant;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use mixdd::control::{Control, Controls};
use mixdd::gates;
use mixdd::{MddPackage, Register, RegisterCount, VEdge};

const RANDOM_SEED: u64 = 1_592_645_427;

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn radices_label(radices: &[usize]) -> String {
    radices.iter().map(|r| r.to_string()).collect()
}

fn csv_row(bench: &str, radices: &[usize], ops: usize, nodes: usize, peak: usize, secs: f64) {
    println!(
        "{bench},{},{},{ops},{nodes},{peak},{secs:.6}",
        radices.len(),
        radices_label(radices)
    );
}

/// Apply a gate, dropping the consumed shares.
fn apply(dd: &mut MddPackage, gate: mixdd::MEdge, state: VEdge) -> anyhow::Result<VEdge> {
    let next = dd.multiply(gate, state)?;
    dd.dec_ref(state);
    dd.dec_ref_matrix(gate);
    Ok(next)
}

// ---------------------------------------------------------------------------
// Layered W states
// ---------------------------------------------------------------------------

struct Layered {
    radices: Vec<usize>,
    /// Spread groups per layer, in application order.
    layers: Vec<Vec<Vec<Register>>>,
}

/// Expand a layer-order list like `{3, 5}` into registers and spread
/// groups: the first layer opens `d` registers of radix `d` in one group;
/// every later layer turns each existing register into a group leader and
/// appends `d − 1` fresh radix-`d` members to its group.
fn expand_layers(orders: &[usize]) -> Layered {
    let mut radices: Vec<usize> = Vec::new();
    let mut layers = Vec::new();
    let mut frontier: Vec<Register> = Vec::new();
    for (li, &d) in orders.iter().enumerate() {
        if li == 0 {
            let group: Vec<Register> = (0..d as Register).collect();
            radices.extend(std::iter::repeat(d).take(d));
            frontier = group.clone();
            layers.push(vec![group]);
        } else {
            let mut groups = Vec::new();
            let mut next_frontier = Vec::new();
            for &leader in &frontier {
                let mut group = vec![leader];
                for _ in 1..d {
                    group.push(radices.len() as Register);
                    radices.push(d);
                }
                next_frontier.extend(group.iter().copied());
                groups.push(group);
            }
            frontier = next_frontier;
            layers.push(groups);
        }
    }
    Layered { radices, layers }
}

fn full_mix_w(orders: &[usize]) -> anyhow::Result<()> {
    let lay = expand_layers(orders);
    let mut dd = MddPackage::new(&lay.radices)?;
    let n = lay.radices.len() as RegisterCount;

    let mut digits = vec![0usize; lay.radices.len()];
    digits[0] = 1;

    let begin = Instant::now();
    let mut state = dd.make_basis_state(&digits, 0)?;
    let mut ops = 0usize;
    for groups in &lay.layers {
        for group in groups {
            let next = dd.spread(n, group, state)?;
            dd.dec_ref(state);
            state = next;
            ops += 2 * (group.len() - 1);
        }
    }
    let secs = begin.elapsed().as_secs_f64();

    let nodes = dd.node_count(state);
    let peak = dd.stats().coefficients_peak;
    csv_row("FullMix", &lay.radices, ops, nodes, peak, secs);
    Ok(())
}

// ---------------------------------------------------------------------------
// GHZ scaling
// ---------------------------------------------------------------------------

fn ghz_qutrits(n: usize) -> anyhow::Result<()> {
    let radices = vec![3usize; n];
    let mut dd = MddPackage::new(&radices)?;

    let begin = Instant::now();
    let mut state = dd.make_zero_state(n as RegisterCount, 0)?;
    let h = dd.make_gate(&gates::h3(), 0)?;
    state = apply(&mut dd, h, state)?;

    let mut ops = 1usize;
    for target in 1..n as Register {
        let mut up = Controls::new();
        let mut down = Controls::new();
        for control in 0..target {
            up.insert(Control::new(control, 1));
            down.insert(Control::new(control, 2));
        }
        let g1 = dd.make_controlled_gate(&gates::X3, &up, target)?;
        state = apply(&mut dd, g1, state)?;
        let g2 = dd.make_controlled_gate(&gates::X3_DAG, &down, target)?;
        state = apply(&mut dd, g2, state)?;
        ops += 2;
    }
    let secs = begin.elapsed().as_secs_f64();

    let nodes = dd.node_count(state);
    let peak = dd.stats().coefficients_peak;
    csv_row("GHZ", &radices, ops, nodes, peak, secs);
    Ok(())
}

// ---------------------------------------------------------------------------
// Random circuits
// ---------------------------------------------------------------------------

fn random_circuit(width: usize, depth: usize, rng: &mut StdRng) -> anyhow::Result<()> {
    let radices: Vec<usize> = (0..width).map(|_| rng.gen_range(2..=5)).collect();
    let mut dd = MddPackage::new(&radices)?;

    let begin = Instant::now();
    let mut state = dd.make_zero_state(width as RegisterCount, 0)?;
    let mut ops = 0usize;

    for _ in 0..depth {
        for line in 0..width {
            let d = radices[line];
            let target = line as Register;
            let entangling = rng.gen_bool(0.5);

            let mat = if rng.gen_bool(0.5) {
                gates::fourier(d)
            } else {
                let a = rng.gen_range(0..d);
                let b = (a + 1) % d;
                let (a, b) = (a.min(b), a.max(b));
                let theta = rng.gen_range(0.0..2.0 * std::f64::consts::PI);
                let phi = rng.gen_range(0.0..2.0 * std::f64::consts::PI);
                gates::embedded_givens(d, a, b, theta, phi)
            };

            let gate = if entangling && width > 1 {
                let mut others: Vec<Register> =
                    (0..width as Register).filter(|&r| r != target).collect();
                others.shuffle(rng);
                let picked = rng.gen_range(1..width);
                let mut controls = Controls::new();
                for &c in others.iter().take(picked) {
                    let level = rng.gen_range(0..radices[c as usize]) as u8;
                    controls.insert(Control::new(c, level));
                }
                dd.make_controlled_gate(&mat, &controls, target)?
            } else {
                dd.make_gate(&mat, target)?
            };
            state = apply(&mut dd, gate, state)?;
            ops += 1;
        }
    }
    let secs = begin.elapsed().as_secs_f64();

    let nodes = dd.node_count(state);
    let peak = dd.stats().coefficients_peak;
    csv_row("Random", &radices, ops, nodes, peak, secs);
    Ok(())
}

// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let depth: usize = parse_flag(&args, "--depth")
        .map(|s| s.parse().context("--depth must be a positive integer"))
        .transpose()?
        .unwrap_or(64);

    println!("bench,lines,radices,ops,nodes,cplx_peak,seconds");

    if !has_flag(&args, "--skip-w") {
        for orders in [
            vec![2, 3],
            vec![3, 5],
            vec![3, 5, 2],
            vec![2, 3, 2, 3],
            vec![2, 5, 3],
            vec![5, 5, 2],
        ] {
            full_mix_w(&orders)?;
        }
    }

    if !has_flag(&args, "--skip-ghz") {
        for n in [5, 10, 30, 60, 120] {
            ghz_qutrits(n)?;
        }
    }

    if !has_flag(&args, "--skip-random") {
        let mut rng = StdRng::seed_from_u64(RANDOM_SEED);
        for width in 3..=7 {
            random_circuit(width, depth, &mut rng)?;
        }
    }

    Ok(())
}
