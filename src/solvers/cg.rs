use std::io::Write;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solvers::linesearch::{fallback_step, search_along, Settings};
use crate::solvers::{vdot, vnorm, Optimizable, Optimizer, OptimizerFactory};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FminCgParams {
    pub c1: f64,
    pub c2: f64,
    /// Longest allowed displacement of any single row (Å).
    pub maxstep: f64,
}

impl Default for FminCgParams {
    fn default() -> Self {
        Self { c1: 1e-4, c2: 0.4, maxstep: 0.5 }
    }
}

impl OptimizerFactory for FminCgParams {
    fn build(&self) -> Box<dyn Optimizer> {
        Box::new(FminCg::new(self.clone()))
    }
}

#[derive(Debug, Clone)]
struct Previous {
    forces: Vec<Vector3<f64>>,
    direction: Vec<Vector3<f64>>,
    energy: f64,
}

/// Nonlinear conjugate gradient, Polak-Ribière with the beta >= 0 restart.
#[derive(Debug, Clone)]
pub struct FminCg {
    params: FminCgParams,
    previous: Option<Previous>,
}

impl FminCg {
    pub fn new(params: FminCgParams) -> Self {
        Self { params, previous: None }
    }

    fn direction(&self, forces: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let Some(prev) = &self.previous else { return forces.to_vec() };
        if prev.forces.len() != forces.len() {
            return forces.to_vec();
        }
        // With g = -f: beta = g.(g - g_prev) / |g_prev|^2
        let diff: Vec<_> = forces.iter().zip(&prev.forces).map(|(f, f0)| f - f0).collect();
        let denom = vdot(&prev.forces, &prev.forces);
        let beta = match denom > 0.0 {
            true => f64::max(0.0, vdot(forces, &diff) / denom),
            false => 0.0,
        };
        forces.iter().zip(&prev.direction).map(|(f, d)| f + beta * d).collect()
    }
}

impl Optimizer for FminCg {
    fn name(&self) -> &str {
        "SciPyFminCG"
    }

    fn step(&mut self, target: &mut dyn Optimizable, forces: &[Vector3<f64>], log: &mut dyn Write) -> Result<()> {
        let start = target.positions();
        let energy = target.energy()?;

        let mut direction = self.direction(forces);
        let mut slope = -vdot(forces, &direction);
        if !(slope < 0.0) {
            let _ = writeln!(log, "SciPyFminCG: not a descent direction, restarting along the forces");
            self.previous = None;
            direction = forces.to_vec();
            slope = -vdot(forces, forces);
        }

        let first_guess = 1.01 / vnorm(forces).max(f64::MIN_POSITIVE);
        let initial_alpha = match &self.previous {
            Some(prev) => {
                let guess = 1.01 * 2.0 * (energy - prev.energy) / slope;
                match guess.is_finite() && guess > 0.0 {
                    true => guess.min(1.0),
                    false => 1.0,
                }
            }
            None => first_guess.min(1.0),
        };

        let settings = Settings { c1: self.params.c1, c2: self.params.c2, ..Settings::default() };
        let found = search_along(&settings, target, &start, forces, &direction, initial_alpha, self.params.maxstep)?;
        if found.is_none() {
            let _ = writeln!(log, "SciPyFminCG: line search failed, taking a steepest-descent step");
            self.previous = None;
            return fallback_step(target, &start, forces, self.params.maxstep);
        }

        self.previous = Some(Previous { forces: forces.to_vec(), direction, energy });
        Ok(())
    }
}
