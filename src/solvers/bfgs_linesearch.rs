use std::io::Write;

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solvers::linesearch::{fallback_step, search_along, Settings};
use crate::solvers::{flatten, unflatten, vdot, Optimizable, Optimizer, OptimizerFactory};

/// Settings for the inverse-Hessian BFGS family. Two presets are registered:
/// `default()` ("BFGSLineSearch") and `fmin()` ("SciPyFminBFGS").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverseBfgsParams {
    /// Name reported in logs.
    pub label: String,
    /// Initial inverse Hessian is `I / alpha`.
    pub alpha: f64,
    pub c1: f64,
    pub c2: f64,
    /// Longest allowed displacement of any single row (Å).
    pub maxstep: f64,
}

impl Default for InverseBfgsParams {
    fn default() -> Self {
        Self {
            label: "BFGSLineSearch".to_string(),
            alpha: 70.0,
            c1: 0.23,
            c2: 0.46,
            maxstep: 0.2,
        }
    }
}

impl InverseBfgsParams {
    /// Textbook quasi-Newton: unit initial inverse Hessian, standard Wolfe constants.
    pub fn fmin() -> Self {
        Self {
            label: "SciPyFminBFGS".to_string(),
            alpha: 1.0,
            c1: 1e-4,
            c2: 0.9,
            maxstep: 0.5,
        }
    }
}

impl OptimizerFactory for InverseBfgsParams {
    fn build(&self) -> Box<dyn Optimizer> {
        Box::new(InverseBfgs::new(self.clone()))
    }
}

/// BFGS on the inverse Hessian with a strong-Wolfe line search along `B f`.
#[derive(Debug, Clone)]
pub struct InverseBfgs {
    params: InverseBfgsParams,
    inverse: Option<DMatrix<f64>>,
    last: Option<(DVector<f64>, DVector<f64>)>,
}

impl InverseBfgs {
    pub fn new(params: InverseBfgsParams) -> Self {
        Self { params, inverse: None, last: None }
    }

    fn reset(&mut self, n: usize) {
        self.inverse = Some(DMatrix::identity(n, n) / self.params.alpha);
        self.last = None;
    }

    fn update(&mut self, pos: &DVector<f64>, forces: &DVector<f64>) {
        let n = pos.len();
        if self.inverse.as_ref().map_or(true, |b| b.nrows() != n) {
            self.reset(n);
            return;
        }
        let (Some(inverse), Some((pos0, forces0))) = (self.inverse.as_mut(), self.last.as_ref()) else {
            return;
        };

        let s = pos - pos0;
        let y = forces0 - forces;
        let ys = y.dot(&s);
        if ys == 0.0 || !ys.is_finite() {
            return;
        }
        let rho = 1.0 / ys;
        let identity = DMatrix::<f64>::identity(n, n);
        let left = &identity - &s * y.transpose() * rho;
        let right = &identity - &y * s.transpose() * rho;
        *inverse = &left * &*inverse * &right + &s * s.transpose() * rho;
    }
}

impl Optimizer for InverseBfgs {
    fn name(&self) -> &str {
        &self.params.label
    }

    fn step(&mut self, target: &mut dyn Optimizable, forces: &[Vector3<f64>], log: &mut dyn Write) -> Result<()> {
        let start = target.positions();
        let pos = flatten(&start);
        let f = flatten(forces);

        self.update(&pos, &f);
        let mut p = match &self.inverse {
            Some(b) => unflatten(&(b * &f)),
            None => forces.iter().map(|fi| fi / self.params.alpha).collect(),
        };
        if vdot(forces, &p) <= 0.0 {
            let _ = writeln!(log, "{}: uphill direction, resetting inverse Hessian", self.name());
            self.reset(pos.len());
            p = forces.iter().map(|fi| fi / self.params.alpha).collect();
        }

        let settings = Settings { c1: self.params.c1, c2: self.params.c2, ..Settings::default() };
        let found = search_along(&settings, target, &start, forces, &p, 1.0, self.params.maxstep)?;
        if found.is_none() {
            let _ = writeln!(log, "{}: line search failed, taking a steepest-descent step", self.name());
            self.reset(pos.len());
            return fallback_step(target, &start, forces, self.params.maxstep);
        }

        self.last = Some((pos, f));
        Ok(())
    }
}
