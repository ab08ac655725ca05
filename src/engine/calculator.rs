use anyhow::Result;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::engine::atoms::Atoms;

/// The output of a single-point evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    /// The potential energy (eV).
    pub energy: f64,
    /// Per-atom forces (eV/Å), same order as the atoms.
    pub forces: Vec<Vector3<f64>>,
    /// Stress in Voigt order `[xx, yy, zz, yz, xz, xy]` (eV/Å^3).
    /// Positive values are tensile.
    pub stress: [f64; 6],
}

/// A generic interface for energy models.
/// Implementations must be Thread-Safe (Sync).
pub trait Calculator: Send + Sync {
    /// Evaluates energy, forces and stress at the current geometry of `atoms`.
    fn calculate(&self, atoms: &Atoms) -> Result<Properties>;

    /// Returns the name of the model (e.g., "Lennard-Jones").
    fn name(&self) -> &str;
}

#[rustfmt::skip]
pub fn voigt_to_full(s: &[f64; 6]) -> Matrix3<f64> {
    Matrix3::new(
        s[0], s[5], s[4],
        s[5], s[1], s[3],
        s[4], s[3], s[2],
    )
}

/// Symmetrizes before packing, so only the symmetric part survives.
pub fn full_to_voigt(m: &Matrix3<f64>) -> [f64; 6] {
    [
        m[(0, 0)],
        m[(1, 1)],
        m[(2, 2)],
        0.5 * (m[(1, 2)] + m[(2, 1)]),
        0.5 * (m[(0, 2)] + m[(2, 0)]),
        0.5 * (m[(0, 1)] + m[(1, 0)]),
    ]
}
