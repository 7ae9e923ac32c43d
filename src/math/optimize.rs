//! Derivative-free minimisation (Nelder–Mead downhill simplex).
//!
//! The objective may return `+inf` (or NaN, treated as `+inf`) to reject a point,
//! which is how bounded problems are expressed: the simplex simply never accepts
//! a vertex outside the feasible region.

use std::cell::Cell;

#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    /// Absolute spread of the simplex vertices at convergence.
    pub xatol: f64,
    /// Absolute spread of the objective values at convergence.
    pub fatol: f64,
    /// Iteration cap (`None` = `200 * n`).
    pub max_iter: Option<usize>,
    /// Function evaluation cap (`None` = `200 * n`).
    pub max_fev: Option<usize>,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            xatol: 1e-4,
            fatol: 1e-4,
            max_iter: None,
            max_fev: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub fun: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;
const NONZDELT: f64 = 0.05;
const ZDELT: f64 = 0.00025;

/// Minimise `f` starting from `x0`.
///
/// The initial simplex perturbs each coordinate of `x0` by 5% (or by `0.00025`
/// when the coordinate is zero).
pub fn nelder_mead<F>(mut f: F, x0: &[f64], opts: NelderMeadOptions) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    let max_iter = opts.max_iter.unwrap_or(200 * n.max(1));
    let max_fev = opts.max_fev.unwrap_or(200 * n.max(1));

    let evaluations = Cell::new(0usize);
    let mut eval = |x: &[f64]| -> f64 {
        evaluations.set(evaluations.get() + 1);
        let v = f(x);
        if v.is_nan() { f64::INFINITY } else { v }
    };

    if n == 0 {
        let fun = eval(x0);
        return Minimum {
            x: Vec::new(),
            fun,
            iterations: 0,
            evaluations: 1,
            converged: true,
        };
    }

    let mut sim: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    sim.push(x0.to_vec());
    for k in 0..n {
        let mut y = x0.to_vec();
        y[k] = if y[k] != 0.0 { (1.0 + NONZDELT) * y[k] } else { ZDELT };
        sim.push(y);
    }
    let mut fsim: Vec<f64> = sim.iter().map(|x| eval(x)).collect();
    sort_simplex(&mut sim, &mut fsim);

    let mut iterations = 0usize;
    let mut converged = false;

    while iterations < max_iter && evaluations.get() < max_fev {
        if simplex_converged(&sim, &fsim, opts) {
            converged = true;
            break;
        }

        let worst = sim[n].clone();
        let xbar: Vec<f64> = (0..n)
            .map(|j| sim[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();
        let along = |coef: f64| -> Vec<f64> {
            xbar.iter()
                .zip(worst.iter())
                .map(|(b, w)| (1.0 + coef) * b - coef * w)
                .collect()
        };

        let xr = along(RHO);
        let fxr = eval(&xr);
        let mut shrink = false;

        if fxr < fsim[0] {
            let xe = along(RHO * CHI);
            let fxe = eval(&xe);
            if fxe < fxr {
                sim[n] = xe;
                fsim[n] = fxe;
            } else {
                sim[n] = xr;
                fsim[n] = fxr;
            }
        } else if fxr < fsim[n - 1] {
            sim[n] = xr;
            fsim[n] = fxr;
        } else if fxr < fsim[n] {
            let xc = along(PSI * RHO);
            let fxc = eval(&xc);
            if fxc <= fxr {
                sim[n] = xc;
                fsim[n] = fxc;
            } else {
                shrink = true;
            }
        } else {
            let xcc = along(-PSI);
            let fxcc = eval(&xcc);
            if fxcc < fsim[n] {
                sim[n] = xcc;
                fsim[n] = fxcc;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = sim[0].clone();
            for j in 1..=n {
                for (v, b) in sim[j].iter_mut().zip(best.iter()) {
                    *v = b + SIGMA * (*v - b);
                }
                fsim[j] = eval(&sim[j]);
            }
        }

        sort_simplex(&mut sim, &mut fsim);
        iterations += 1;
    }

    if !converged {
        converged = simplex_converged(&sim, &fsim, opts);
    }

    Minimum {
        x: sim[0].clone(),
        fun: fsim[0],
        iterations,
        evaluations: evaluations.get(),
        converged,
    }
}

fn sort_simplex(sim: &mut Vec<Vec<f64>>, fsim: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..fsim.len()).collect();
    order.sort_by(|&a, &b| fsim[a].total_cmp(&fsim[b]).then(a.cmp(&b)));
    *sim = order.iter().map(|&i| sim[i].clone()).collect();
    *fsim = order.iter().map(|&i| fsim[i]).collect();
}

fn simplex_converged(sim: &[Vec<f64>], fsim: &[f64], opts: NelderMeadOptions) -> bool {
    let x_spread = sim[1..]
        .iter()
        .flat_map(|v| v.iter().zip(sim[0].iter()).map(|(a, b)| (a - b).abs()))
        .fold(0.0_f64, f64::max);
    let f_spread = fsim[1..]
        .iter()
        .map(|v| (v - fsim[0]).abs())
        .fold(0.0_f64, |acc, d| if d.is_nan() { f64::INFINITY } else { acc.max(d) });
    x_spread <= opts.xatol && f_spread <= opts.fatol
}
