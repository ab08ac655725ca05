use std::collections::VecDeque;
use std::io::Write;

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solvers::linesearch::{fallback_step, search_along, Settings};
use crate::solvers::{cap_row_length, flatten, unflatten, vdot, Optimizable, Optimizer, OptimizerFactory};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsParams {
    /// Number of (s, y) pairs kept.
    pub memory: usize,
    /// Multiplies the step when no line search is used.
    pub damping: f64,
    /// Initial Hessian guess is `alpha * I` (eV/Å²).
    pub alpha: f64,
    /// Longest allowed displacement of any single row (Å).
    pub maxstep: f64,
    pub use_line_search: bool,
    pub c1: f64,
    pub c2: f64,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            memory: 100,
            damping: 1.0,
            alpha: 70.0,
            maxstep: 0.2,
            use_line_search: false,
            c1: 0.23,
            c2: 0.46,
        }
    }
}

impl LbfgsParams {
    /// Same direction, step length chosen by a strong-Wolfe line search.
    pub fn line_search() -> Self {
        Self { use_line_search: true, ..Self::default() }
    }
}

impl OptimizerFactory for LbfgsParams {
    fn build(&self) -> Box<dyn Optimizer> {
        Box::new(Lbfgs::new(self.clone()))
    }
}

#[derive(Debug, Clone)]
struct Pair {
    s: DVector<f64>,
    y: DVector<f64>,
    rho: f64,
}

/// Limited-memory BFGS (Nocedal 1980), two-loop recursion.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    params: LbfgsParams,
    history: VecDeque<Pair>,
    last: Option<(DVector<f64>, DVector<f64>)>,
}

impl Lbfgs {
    pub fn new(params: LbfgsParams) -> Self {
        Self { params, history: VecDeque::new(), last: None }
    }

    fn remember(&mut self, pos: &DVector<f64>, forces: &DVector<f64>) {
        let Some((pos0, forces0)) = &self.last else { return };
        if pos0.len() != pos.len() {
            self.history.clear();
            return;
        }
        let s = pos - pos0;
        let y = forces0 - forces;
        let ys = y.dot(&s);
        if ys == 0.0 || !ys.is_finite() {
            return;
        }
        self.history.push_back(Pair { s, y, rho: 1.0 / ys });
        while self.history.len() > self.params.memory {
            self.history.pop_front();
        }
    }

    /// Approximates `-H⁻¹ g`, i.e. the Newton step along the forces.
    fn direction(&self, forces: &DVector<f64>) -> DVector<f64> {
        let mut q = -forces;
        let mut a = Vec::with_capacity(self.history.len());
        for pair in self.history.iter().rev() {
            let ai = pair.rho * pair.s.dot(&q);
            q.axpy(-ai, &pair.y, 1.0);
            a.push(ai);
        }
        let mut z = q / self.params.alpha;
        for (pair, ai) in self.history.iter().zip(a.iter().rev()) {
            let b = pair.rho * pair.y.dot(&z);
            z.axpy(ai - b, &pair.s, 1.0);
        }
        -z
    }
}

impl Optimizer for Lbfgs {
    fn name(&self) -> &str {
        match self.params.use_line_search {
            true => "LBFGSLineSearch",
            false => "LBFGS",
        }
    }

    fn step(&mut self, target: &mut dyn Optimizable, forces: &[Vector3<f64>], log: &mut dyn Write) -> Result<()> {
        let start = target.positions();
        let pos = flatten(&start);
        let f = flatten(forces);

        self.remember(&pos, &f);
        let mut p = unflatten(&self.direction(&f));
        if vdot(forces, &p) <= 0.0 {
            let _ = writeln!(log, "{}: uphill direction, resetting history", self.name());
            self.history.clear();
            p = forces.iter().map(|fi| fi / self.params.alpha).collect();
        }

        if self.params.use_line_search {
            let settings = Settings { c1: self.params.c1, c2: self.params.c2, ..Settings::default() };
            let found = search_along(&settings, target, &start, forces, &p, 1.0, self.params.maxstep)?;
            if found.is_none() {
                let _ = writeln!(log, "{}: line search failed, taking a steepest-descent step", self.name());
                self.history.clear();
                fallback_step(target, &start, forces, self.params.maxstep)?;
            }
        } else {
            cap_row_length(&mut p, self.params.maxstep);
            let damping = self.params.damping;
            let positions: Vec<_> = start.iter().zip(&p).map(|(r, d)| r + damping * d).collect();
            target.set_positions(&positions)?;
        }

        self.last = Some((pos, f));
        Ok(())
    }
}
