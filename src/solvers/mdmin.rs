use std::io::Write;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solvers::{cap_row_length, vdot, Optimizable, Optimizer, OptimizerFactory};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdMinParams {
    pub dt: f64,
    /// Longest allowed displacement of any single row (Å).
    pub maxstep: f64,
}

impl Default for MdMinParams {
    fn default() -> Self {
        Self { dt: 0.2, maxstep: 0.2 }
    }
}

impl OptimizerFactory for MdMinParams {
    fn build(&self) -> Box<dyn Optimizer> {
        Box::new(MdMin::new(self.clone()))
    }
}

/// Velocity-Verlet MD that keeps only the velocity component along the force
/// and zeroes it whenever it points uphill.
#[derive(Debug, Clone)]
pub struct MdMin {
    params: MdMinParams,
    velocity: Option<Vec<Vector3<f64>>>,
}

impl MdMin {
    pub fn new(params: MdMinParams) -> Self {
        Self { params, velocity: None }
    }
}

impl Optimizer for MdMin {
    fn name(&self) -> &str {
        "MDMin"
    }

    fn step(&mut self, target: &mut dyn Optimizable, forces: &[Vector3<f64>], _log: &mut dyn Write) -> Result<()> {
        let dt = self.params.dt;
        let mut v = match self.velocity.take() {
            None => vec![Vector3::zeros(); forces.len()],
            Some(mut v) => {
                for (vi, fi) in v.iter_mut().zip(forces) {
                    *vi += 0.5 * dt * fi;
                }
                let vf = vdot(&v, forces);
                let ff = vdot(forces, forces);
                if vf < 0.0 || ff == 0.0 {
                    v.iter_mut().for_each(|vi| *vi = Vector3::zeros());
                } else {
                    for (vi, fi) in v.iter_mut().zip(forces) {
                        *vi = fi * (vf / ff);
                    }
                }
                v
            }
        };

        for (vi, fi) in v.iter_mut().zip(forces) {
            *vi += 0.5 * dt * fi;
        }

        let mut dr: Vec<_> = v.iter().map(|vi| dt * vi).collect();
        cap_row_length(&mut dr, self.params.maxstep);

        let positions: Vec<_> = target.positions().iter().zip(&dr).map(|(r, d)| r + d).collect();
        target.set_positions(&positions)?;
        self.velocity = Some(v);
        Ok(())
    }
}
