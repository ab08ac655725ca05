use std::io::Write;

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solvers::{cap_row_length, flatten, unflatten, Optimizable, Optimizer, OptimizerFactory};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfgsParams {
    /// Longest allowed displacement of any single row (Å).
    pub maxstep: f64,
    /// Initial Hessian guess is `alpha * I` (eV/Å²).
    pub alpha: f64,
}

impl Default for BfgsParams {
    fn default() -> Self {
        Self { maxstep: 0.2, alpha: 70.0 }
    }
}

impl OptimizerFactory for BfgsParams {
    fn build(&self) -> Box<dyn Optimizer> {
        Box::new(Bfgs::new(self.clone()))
    }
}

/// Quasi-Newton with an explicit Hessian, stepped through its eigenbasis so
/// negative curvature still moves downhill.
#[derive(Debug, Clone)]
pub struct Bfgs {
    params: BfgsParams,
    hessian: Option<DMatrix<f64>>,
    last: Option<(DVector<f64>, DVector<f64>)>,
}

impl Bfgs {
    pub fn new(params: BfgsParams) -> Self {
        Self { params, hessian: None, last: None }
    }

    fn update(&mut self, pos: &DVector<f64>, forces: &DVector<f64>) {
        let n = pos.len();
        let fresh = match (&self.hessian, &self.last) {
            (Some(h), Some(_)) => h.nrows() != n,
            _ => true,
        };
        if fresh {
            self.hessian = Some(DMatrix::identity(n, n) * self.params.alpha);
            return;
        }
        let (Some(hessian), Some((pos0, forces0))) = (self.hessian.as_mut(), self.last.as_ref()) else {
            return;
        };

        let dpos = pos - pos0;
        if dpos.amax() < 1e-7 {
            return;
        }
        let dforces = forces - forces0;
        let a = dpos.dot(&dforces);
        let dg = &*hessian * &dpos;
        let b = dpos.dot(&dg);
        if a == 0.0 || b == 0.0 || !a.is_finite() || !b.is_finite() {
            return;
        }
        *hessian -= &dforces * dforces.transpose() / a + &dg * dg.transpose() / b;
    }
}

impl Optimizer for Bfgs {
    fn name(&self) -> &str {
        "BFGS"
    }

    fn step(&mut self, target: &mut dyn Optimizable, forces: &[Vector3<f64>], _log: &mut dyn Write) -> Result<()> {
        let start = target.positions();
        let pos = flatten(&start);
        let f = flatten(forces);

        self.update(&pos, &f);
        let Some(hessian) = &self.hessian else { return Ok(()) };

        let eig = hessian.clone().symmetric_eigen();
        let projected = eig.eigenvectors.transpose() * &f;
        let scaled = projected.zip_map(&eig.eigenvalues, |p, w| p / w.abs());
        let mut dr = unflatten(&(&eig.eigenvectors * scaled));
        cap_row_length(&mut dr, self.params.maxstep);

        let positions: Vec<_> = start.iter().zip(&dr).map(|(r, d)| r + d).collect();
        target.set_positions(&positions)?;
        self.last = Some((pos, f));
        Ok(())
    }
}
