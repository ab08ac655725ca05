use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use nalgebra::{Matrix3, Vector3};

use crate::engine::calculator::{Calculator, Properties};
use crate::error::{RelaxError, Result};
use crate::solvers::Optimizable;

/// The native atomic representation the relaxation works on.
///
/// Holds Cartesian positions and a cell whose rows are the lattice vectors.
/// The attached calculator is evaluated lazily and its result cached until
/// the geometry changes.
#[derive(Clone)]
pub struct Atoms {
    numbers: Vec<u8>,
    positions: Vec<Vector3<f64>>,
    cell: Matrix3<f64>,
    calculator: Option<Arc<dyn Calculator>>,
    results: Option<Properties>,
}

impl Atoms {
    pub fn new(numbers: Vec<u8>, positions: Vec<Vector3<f64>>, cell: Matrix3<f64>) -> Self {
        assert_eq!(numbers.len(), positions.len(), "one atomic number per position");
        Self {
            numbers,
            positions,
            cell,
            calculator: None,
            results: None,
        }
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn numbers(&self) -> &[u8] {
        &self.numbers
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    /// Lattice vectors as rows.
    pub fn cell(&self) -> &Matrix3<f64> {
        &self.cell
    }

    pub fn volume(&self) -> f64 {
        self.cell.determinant().abs()
    }

    pub fn set_positions(&mut self, positions: Vec<Vector3<f64>>) {
        assert_eq!(positions.len(), self.positions.len(), "atom count is fixed");
        self.positions = positions;
        self.results = None;
    }

    /// Replaces the cell. With `scale_atoms`, atoms keep their fractional
    /// coordinates; otherwise their Cartesian positions are untouched.
    pub fn set_cell(&mut self, cell: Matrix3<f64>, scale_atoms: bool) {
        if scale_atoms {
            // r_new = H_new^T H_old^-T r_old
            if let Some(inv_t) = self.cell.transpose().try_inverse() {
                let m = cell.transpose() * inv_t;
                for r in &mut self.positions {
                    *r = m * *r;
                }
            }
        }
        self.cell = cell;
        self.results = None;
    }

    pub fn set_calculator(&mut self, calculator: Arc<dyn Calculator>) {
        self.calculator = Some(calculator);
        self.results = None;
    }

    /// Evaluates the attached calculator unless a result for the current
    /// geometry is already cached.
    pub fn properties(&mut self) -> Result<&Properties> {
        let props = match self.results.take() {
            Some(cached) => cached,
            None => {
                let calc = self.calculator.clone().ok_or(RelaxError::NoCalculator)?;
                let props = calc.calculate(self).map_err(RelaxError::Calculator)?;
                if props.forces.len() != self.len() {
                    return Err(RelaxError::Calculator(anyhow!(
                        "{} returned {} forces for {} atoms",
                        calc.name(),
                        props.forces.len(),
                        self.len()
                    )));
                }
                props
            }
        };
        Ok(self.results.insert(props))
    }

    pub fn potential_energy(&mut self) -> Result<f64> {
        Ok(self.properties()?.energy)
    }

    pub fn forces(&mut self) -> Result<Vec<Vector3<f64>>> {
        Ok(self.properties()?.forces.clone())
    }

    pub fn stress(&mut self) -> Result<[f64; 6]> {
        Ok(self.properties()?.stress)
    }
}

impl fmt::Debug for Atoms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atoms")
            .field("numbers", &self.numbers)
            .field("positions", &self.positions)
            .field("cell", &self.cell)
            .field("calculator", &self.calculator.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

/// Fixed-cell relaxation: the generalized coordinates are just the positions.
impl Optimizable for Atoms {
    fn len(&self) -> usize {
        self.numbers.len()
    }

    fn positions(&self) -> Vec<Vector3<f64>> {
        self.positions.clone()
    }

    fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<()> {
        Atoms::set_positions(self, positions.to_vec());
        Ok(())
    }

    fn forces(&mut self) -> Result<Vec<Vector3<f64>>> {
        Atoms::forces(self)
    }

    fn energy(&mut self) -> Result<f64> {
        self.potential_energy()
    }

    fn atoms_mut(&mut self) -> &mut Atoms {
        self
    }
}
