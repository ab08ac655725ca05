use std::io::Write;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solvers::{vdot, vnorm, Optimizable, Optimizer, OptimizerFactory};

/// FIRE settings. Defaults follow Bitzek et al., PRL 97, 170201 (2006).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireParams {
    /// Initial timestep.
    pub dt: f64,
    pub dt_max: f64,
    /// Longest allowed step (total norm, Å).
    pub maxstep: f64,
    /// Prevent speedup for this many downhill steps.
    pub n_min: usize,
    /// Timestep growth factor, > 1.
    pub f_inc: f64,
    /// Timestep shrink factor, < 1.
    pub f_dec: f64,
    /// Initial mixing coefficient (alpha).
    pub a_start: f64,
    /// Mixing decay factor, < 1.
    pub f_a: f64,
}

impl Default for FireParams {
    fn default() -> Self {
        Self {
            dt: 0.1,
            dt_max: 1.0,
            maxstep: 0.2,
            n_min: 5,
            f_inc: 1.1,
            f_dec: 0.5,
            a_start: 0.1,
            f_a: 0.99,
        }
    }
}

impl OptimizerFactory for FireParams {
    fn build(&self) -> Box<dyn Optimizer> {
        Box::new(Fire::new(self.clone()))
    }
}

/// Fast Inertial Relaxation Engine.
#[derive(Debug, Clone)]
pub struct Fire {
    params: FireParams,
    velocity: Option<Vec<Vector3<f64>>>,
    dt: f64,
    a: f64,
    num_good_steps: usize,
}

impl Fire {
    pub fn new(params: FireParams) -> Self {
        Self {
            dt: params.dt,
            a: params.a_start,
            params,
            velocity: None,
            num_good_steps: 0,
        }
    }
}

impl Optimizer for Fire {
    fn name(&self) -> &str {
        "FIRE"
    }

    fn step(&mut self, target: &mut dyn Optimizable, forces: &[Vector3<f64>], _log: &mut dyn Write) -> Result<()> {
        let p = &self.params;
        let mut v = match self.velocity.take() {
            None => vec![Vector3::zeros(); forces.len()],
            Some(mut v) => {
                if vdot(forces, &v) > 0.0 {
                    // Mix velocity towards the force direction.
                    let f_norm = vnorm(forces);
                    let v_norm = vnorm(&v);
                    if f_norm > 0.0 {
                        for (vi, fi) in v.iter_mut().zip(forces) {
                            *vi = (1.0 - self.a) * *vi + self.a * v_norm / f_norm * fi;
                        }
                    }
                    if self.num_good_steps > p.n_min {
                        self.dt = f64::min(self.dt * p.f_inc, p.dt_max);
                        self.a *= p.f_a;
                    }
                    self.num_good_steps += 1;
                } else {
                    // Uphill: stop, cool down, restart mixing.
                    v.iter_mut().for_each(|vi| *vi = Vector3::zeros());
                    self.a = p.a_start;
                    self.dt *= p.f_dec;
                    self.num_good_steps = 0;
                }
                v
            }
        };

        for (vi, fi) in v.iter_mut().zip(forces) {
            *vi += self.dt * fi;
        }

        let mut dr: Vec<_> = v.iter().map(|vi| self.dt * vi).collect();
        let norm = vnorm(&dr);
        if norm > p.maxstep {
            let scale = p.maxstep / norm;
            dr.iter_mut().for_each(|d| *d *= scale);
        }

        let positions: Vec<_> = target.positions().iter().zip(&dr).map(|(r, d)| r + d).collect();
        target.set_positions(&positions)?;
        self.velocity = Some(v);
        Ok(())
    }
}
