use anyhow::{bail, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::spatial;
use crate::engine::atoms::Atoms;
use crate::engine::calculator::{full_to_voigt, Calculator, Properties};

/// Periodic 12-6 Lennard-Jones pair potential, energy-shifted to zero at the cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LennardJones {
    pub epsilon: f64, // eV
    pub sigma: f64,   // Å
    pub cutoff: f64,  // Å
}

impl LennardJones {
    pub fn new(epsilon: f64, sigma: f64, cutoff: f64) -> Self {
        Self { epsilon, sigma, cutoff }
    }

    /// Pair energy and its radial derivative at separation `r`.
    #[inline]
    fn pair(&self, r: f64) -> (f64, f64) {
        let sr6 = (self.sigma / r).powi(6);
        let energy = 4.0 * self.epsilon * (sr6 * sr6 - sr6);
        let d_energy = 4.0 * self.epsilon * (-12.0 * sr6 * sr6 + 6.0 * sr6) / r;
        (energy, d_energy)
    }
}

impl Calculator for LennardJones {
    fn name(&self) -> &str {
        "Lennard-Jones"
    }

    fn calculate(&self, atoms: &Atoms) -> Result<Properties> {
        if !(self.cutoff > 0.0 && self.sigma > 0.0) {
            bail!("Lennard-Jones needs positive sigma and cutoff");
        }
        let cell = atoms.cell();
        let volume = atoms.volume();
        let inv_t = match cell.transpose().try_inverse() {
            Some(m) if volume > 1e-12 => m,
            _ => bail!("Lennard-Jones needs a non-singular cell"),
        };

        let (e_shift, _) = self.pair(self.cutoff);
        let rc_sq = self.cutoff * self.cutoff;
        let [n1, n2, n3] = spatial::image_range(cell, self.cutoff);
        let cell_t = cell.transpose();

        let positions = atoms.positions();
        let n = positions.len();
        let mut energy = 0.0;
        let mut forces = vec![Vector3::zeros(); n];
        let mut virial = Matrix3::zeros();

        // Sum over ordered pairs (i, j, image); every unordered pair is seen twice.
        for i in 0..n {
            for j in 0..n {
                let d_frac = spatial::minimum_image_fractional(&(inv_t * (positions[j] - positions[i])));

                // One extra shell because d_frac may sit half a cell off-center.
                for a in -(n1 + 1)..=(n1 + 1) {
                    for b in -(n2 + 1)..=(n2 + 1) {
                        for c in -(n3 + 1)..=(n3 + 1) {
                            let shift = Vector3::new(a as f64, b as f64, c as f64);
                            let r_vec = cell_t * (d_frac + shift);
                            let r_sq = r_vec.norm_squared();
                            if r_sq >= rc_sq || r_sq < 1e-20 {
                                continue;
                            }
                            let r = r_sq.sqrt();
                            let (e, de) = self.pair(r);
                            if !e.is_finite() {
                                bail!("Atoms {} and {} overlap (r = {:e})", i, j, r);
                            }
                            energy += 0.5 * (e - e_shift);
                            forces[i] += de * r_vec / r;
                            virial += 0.5 * (de / r) * r_vec * r_vec.transpose();
                        }
                    }
                }
            }
        }

        Ok(Properties {
            energy,
            forces,
            stress: full_to_voigt(&(virial / volume)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimer(r: f64) -> Atoms {
        let cell = Matrix3::from_diagonal_element(20.0);
        Atoms::new(
            vec![18, 18],
            vec![Vector3::new(1.0, 1.0, 1.0), Vector3::new(1.0 + r, 1.0, 1.0)],
            cell,
        )
    }

    #[test]
    fn dimer_minimum() {
        let lj = LennardJones::new(1.0, 1.0, 3.0);
        let r_min = 2f64.powf(1.0 / 6.0);
        let props = lj.calculate(&dimer(r_min)).unwrap();
        let (e_cut, _) = lj.pair(3.0);
        assert!((props.energy - (-1.0 - e_cut)).abs() < 1e-12);
        assert!(props.forces[0].norm() < 1e-10);
    }

    #[test]
    fn compressed_dimer_pushes_apart() {
        let lj = LennardJones::new(1.0, 1.0, 3.0);
        let props = lj.calculate(&dimer(1.0)).unwrap();
        assert!(props.forces[0].x < 0.0);
        assert!(props.forces[1].x > 0.0);
        assert!((props.forces[0] + props.forces[1]).norm() < 1e-12);
        // Compressed along x: negative xx stress.
        assert!(props.stress[0] < 0.0);
    }

    #[test]
    fn forces_match_finite_differences() {
        let lj = LennardJones::new(0.5, 1.1, 2.8);
        let cell = Matrix3::new(2.0, 0.1, 0.0, 0.0, 2.1, 0.0, 0.05, 0.0, 1.9);
        let base = vec![
            Vector3::new(0.1, 0.0, 0.2),
            Vector3::new(1.1, 0.9, 0.0),
            Vector3::new(0.9, 0.1, 1.0),
        ];
        let mut atoms = Atoms::new(vec![18; 3], base.clone(), cell);
        let props = lj.calculate(&atoms).unwrap();

        let h = 1e-6;
        for i in 0..3 {
            for k in 0..3 {
                let mut p = base.clone();
                p[i][k] += h;
                atoms.set_positions(p);
                let e_plus = lj.calculate(&atoms).unwrap().energy;
                let mut p = base.clone();
                p[i][k] -= h;
                atoms.set_positions(p);
                let e_minus = lj.calculate(&atoms).unwrap().energy;
                let numeric = -(e_plus - e_minus) / (2.0 * h);
                assert!((numeric - props.forces[i][k]).abs() < 1e-5 * (1.0 + numeric.abs()));
            }
        }
    }
}
