use nalgebra::{Matrix3, Matrix6, Vector3};
use serde::{Deserialize, Serialize};

use crate::engine::atoms::Atoms;
use crate::engine::calculator::voigt_to_full;
use crate::error::{RelaxError, Result};
use crate::solvers::Optimizable;

/// Options for [`ExpCellFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpCellFilterParams {
    /// Scales the cell coordinates relative to the atomic ones.
    /// `None` uses the number of atoms.
    pub cell_factor: Option<f64>,
    /// External pressure (eV/Å^3); adds `p V` to the energy.
    pub scalar_pressure: f64,
    /// Only allow isotropic deformation.
    pub hydrostatic_strain: bool,
    /// Remove the volume-changing part of the deformation.
    pub constant_volume: bool,
}

impl Default for ExpCellFilterParams {
    fn default() -> Self {
        Self {
            cell_factor: None,
            scalar_pressure: 0.0,
            hydrostatic_strain: false,
            constant_volume: false,
        }
    }
}

/// Makes the cell shape part of the optimization variables.
///
/// The cell is parametrized by the matrix logarithm `L` of the deformation
/// gradient `F = exp(L)` relative to the cell the filter was created with.
/// Generalized coordinates are `n + 3` rows:
///
/// * rows `0..n`: atom positions in the undeformed frame, `x_i = F^-1 r_i`
/// * rows `n..n+3`: `cell_factor * L`
///
/// Generalized forces are the matching negative derivatives of `E + p V`.
#[derive(Debug, Clone)]
pub struct ExpCellFilter {
    atoms: Atoms,
    orig_cell: Matrix3<f64>,
    log_strain: Matrix3<f64>,
    cell_factor: f64,
    params: ExpCellFilterParams,
}

impl ExpCellFilter {
    pub fn new(atoms: Atoms, params: ExpCellFilterParams) -> Self {
        let cell_factor = params.cell_factor.unwrap_or(atoms.len() as f64);
        Self {
            orig_cell: *atoms.cell(),
            log_strain: Matrix3::zeros(),
            cell_factor,
            params,
            atoms,
        }
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    /// Releases the wrapped atoms in their current (relaxed) state.
    pub fn into_atoms(self) -> Atoms {
        self.atoms
    }

    pub fn deform_grad(&self) -> Matrix3<f64> {
        self.log_strain.exp()
    }

    fn virial(&mut self) -> Result<Matrix3<f64>> {
        let stress = voigt_to_full(&self.atoms.stress()?);
        let volume = self.atoms.volume();
        let pressure = Matrix3::from_diagonal_element(self.params.scalar_pressure);
        let mut virial = -volume * (stress + pressure);

        if self.params.hydrostatic_strain {
            virial = Matrix3::from_diagonal_element(virial.trace() / 3.0);
        }
        if self.params.constant_volume {
            virial -= Matrix3::from_diagonal_element(virial.trace() / 3.0);
        }
        Ok(virial)
    }
}

/// Directional (Fréchet) derivative of the matrix exponential at `l` along `e`.
///
/// Read off the upper-right block of `exp([[l, e], [0, l]])`.
pub fn expm_frechet(l: &Matrix3<f64>, e: &Matrix3<f64>) -> Matrix3<f64> {
    let mut block = Matrix6::zeros();
    block.fixed_view_mut::<3, 3>(0, 0).copy_from(l);
    block.fixed_view_mut::<3, 3>(0, 3).copy_from(e);
    block.fixed_view_mut::<3, 3>(3, 3).copy_from(l);
    block.exp().fixed_view::<3, 3>(0, 3).into_owned()
}

impl Optimizable for ExpCellFilter {
    fn len(&self) -> usize {
        self.atoms.len() + 3
    }

    fn positions(&self) -> Vec<Vector3<f64>> {
        // exp(L) is never singular; its inverse is exp(-L).
        let f_inv = (-self.log_strain).exp();

        let mut out: Vec<_> = self.atoms.positions().iter().map(|r| f_inv * r).collect();
        let scaled = self.log_strain * self.cell_factor;
        out.extend((0..3).map(|k| scaled.row(k).transpose()));
        out
    }

    fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<()> {
        let n = self.atoms.len();
        if positions.len() != n + 3 {
            return Err(RelaxError::Optimizer(format!(
                "expected {} generalized positions, got {}",
                n + 3,
                positions.len()
            )));
        }

        let l = Matrix3::from_rows(&[
            positions[n].transpose(),
            positions[n + 1].transpose(),
            positions[n + 2].transpose(),
        ]) / self.cell_factor;
        if l.iter().any(|x| !x.is_finite()) {
            return Err(RelaxError::Optimizer("non-finite cell coordinates".to_string()));
        }

        self.log_strain = l;
        let f = self.deform_grad();
        self.atoms.set_cell(self.orig_cell * f.transpose(), false);
        self.atoms.set_positions(positions[..n].iter().map(|x| f * x).collect());
        Ok(())
    }

    fn forces(&mut self) -> Result<Vec<Vector3<f64>>> {
        let atom_forces = self.atoms.forces()?;
        let virial = self.virial()?;

        let f = self.deform_grad();
        let f_inv_t = (-self.log_strain).exp().transpose();
        let f_t = f.transpose();

        let mut out: Vec<_> = atom_forces.iter().map(|force| f_t * force).collect();

        // -dE/dF, then chain rule through F = exp(L).
        let grad_f = virial * f_inv_t;
        let mut log_force = Matrix3::zeros();
        for m in 0..3 {
            for n in 0..3 {
                let mut dir = Matrix3::zeros();
                dir[(m, n)] = 1.0;
                log_force[(m, n)] = grad_f.component_mul(&expm_frechet(&self.log_strain, &dir)).sum();
            }
        }
        let log_force = log_force / self.cell_factor;
        out.extend((0..3).map(|k| log_force.row(k).transpose()));
        Ok(out)
    }

    fn energy(&mut self) -> Result<f64> {
        let e = self.atoms.potential_energy()?;
        Ok(e + self.params.scalar_pressure * self.atoms.volume())
    }

    fn atoms_mut(&mut self) -> &mut Atoms {
        &mut self.atoms
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::potentials::LennardJones;

    fn distorted_fcc() -> Atoms {
        let a = 1.6;
        #[rustfmt::skip]
        let cell = Matrix3::new(
            a, 0.05, 0.0,
            0.0, a * 1.02, 0.03,
            0.02, 0.0, a * 0.97,
        );
        let frac = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.5, 0.52, 0.0),
            Vector3::new(0.5, 0.0, 0.47),
            Vector3::new(0.03, 0.5, 0.5),
        ];
        let positions = frac.iter().map(|s| cell.transpose() * s).collect();
        let mut atoms = Atoms::new(vec![18; 4], positions, cell);
        atoms.set_calculator(Arc::new(LennardJones::new(1.0, 1.0, 2.5)));
        atoms
    }

    #[test]
    fn positions_round_trip() {
        let mut filter = ExpCellFilter::new(distorted_fcc(), ExpCellFilterParams::default());
        let mut p = filter.positions();
        let n = filter.atoms().len();
        p[n] += Vector3::new(0.1, 0.0, -0.05);
        p[n + 2] += Vector3::new(0.0, 0.02, 0.0);
        filter.set_positions(&p).unwrap();

        let q = filter.positions();
        for (a, b) in p.iter().zip(&q) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn forces_match_finite_differences() {
        let mut filter = ExpCellFilter::new(distorted_fcc(), ExpCellFilterParams {
            scalar_pressure: 0.01,
            ..Default::default()
        });
        // Move away from the reference cell so exp(L) is not the identity.
        let mut start = filter.positions();
        let n = filter.atoms().len();
        start[n] += Vector3::new(0.04, 0.01, 0.0);
        start[n + 1] += Vector3::new(-0.02, 0.03, 0.01);
        filter.set_positions(&start).unwrap();

        let forces = filter.forces().unwrap();
        let h = 1e-6;
        for row in 0..filter.len() {
            for k in 0..3 {
                let mut plus = start.clone();
                plus[row][k] += h;
                filter.set_positions(&plus).unwrap();
                let e_plus = filter.energy().unwrap();

                let mut minus = start.clone();
                minus[row][k] -= h;
                filter.set_positions(&minus).unwrap();
                let e_minus = filter.energy().unwrap();

                let numeric = -(e_plus - e_minus) / (2.0 * h);
                assert!(
                    (numeric - forces[row][k]).abs() < 1e-5 * (1.0 + numeric.abs()),
                    "row {} axis {}: numeric {} analytic {}",
                    row, k, numeric, forces[row][k]
                );
            }
        }
    }

    #[test]
    fn frechet_at_zero_is_direction() {
        let e = Matrix3::new(0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 3.0);
        let d = expm_frechet(&Matrix3::zeros(), &e);
        assert!((d - e).norm() < 1e-12);
    }
}
