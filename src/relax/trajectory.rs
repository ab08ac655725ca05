use std::fs;
use std::ops::Index;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::engine::atoms::Atoms;
use crate::error::{RelaxError, Result};
use crate::solvers::Observer;

/// One recorded state of a relaxation.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub energy: f64,
    pub forces: Vec<Vector3<f64>>,
    /// Voigt order `[xx, yy, zz, yz, xz, xy]`.
    pub stress: [f64; 6],
    pub positions: Vec<Vector3<f64>>,
    /// Lattice vectors as rows.
    pub cell: Matrix3<f64>,
}

impl Snapshot {
    /// `(energy, forces, stress, cell, positions)`
    pub fn as_tuple(&self) -> (f64, &[Vector3<f64>], &[f64; 6], &Matrix3<f64>, &[Vector3<f64>]) {
        (self.energy, &self.forces, &self.stress, &self.cell, &self.positions)
    }
}

/// Records the state of the observed atoms every time it is called.
///
/// The atomic numbers are taken once, at construction; the atom count is
/// fixed for the lifetime of a relaxation.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryObserver {
    atomic_numbers: Vec<u8>,
    snapshots: Vec<Snapshot>,
}

impl TrajectoryObserver {
    pub fn new(atoms: &Atoms) -> Self {
        Self {
            atomic_numbers: atoms.numbers().to_vec(),
            snapshots: Vec::new(),
        }
    }

    /// Appends the current state of `atoms`, evaluating the calculator if its
    /// cached result is stale.
    pub fn capture(&mut self, atoms: &mut Atoms) -> Result<()> {
        let props = atoms.properties()?.clone();
        let snapshot = Snapshot {
            energy: props.energy,
            forces: props.forces,
            stress: props.stress,
            positions: atoms.positions().to_vec(),
            cell: *atoms.cell(),
        };
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn atomic_numbers(&self) -> &[u8] {
        &self.atomic_numbers
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn to_record(&self) -> TrajectoryRecord {
        let rows = |v: &[Vector3<f64>]| v.iter().map(|r| [r.x, r.y, r.z]).collect::<Vec<_>>();
        TrajectoryRecord {
            energy: self.snapshots.iter().map(|s| s.energy).collect(),
            forces: self.snapshots.iter().map(|s| rows(&s.forces)).collect(),
            stresses: self.snapshots.iter().map(|s| s.stress).collect(),
            atom_positions: self.snapshots.iter().map(|s| rows(&s.positions)).collect(),
            cell: self.snapshots.iter().map(|s| matrix_rows(&s.cell)).collect(),
            atomic_number: self.atomic_numbers.clone(),
        }
    }

    /// Writes the whole history to `path` as one JSON document, replacing any
    /// existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let blob = serde_json::to_vec(&self.to_record())?;
        fs::write(path, blob).map_err(|source| RelaxError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Index<usize> for TrajectoryObserver {
    type Output = Snapshot;

    fn index(&self, index: usize) -> &Snapshot {
        &self.snapshots[index]
    }
}

impl<'a> IntoIterator for &'a TrajectoryObserver {
    type Item = &'a Snapshot;
    type IntoIter = std::slice::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshots.iter()
    }
}

impl Observer for TrajectoryObserver {
    fn observe(&mut self, atoms: &mut Atoms) -> Result<()> {
        self.capture(atoms)
    }
}

fn matrix_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

/// The persisted form of a trajectory: parallel per-snapshot arrays plus the
/// atomic numbers. Positions and cells are Cartesian, cells row-wise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub energy: Vec<f64>,
    pub forces: Vec<Vec<[f64; 3]>>,
    pub stresses: Vec<[f64; 6]>,
    pub atom_positions: Vec<Vec<[f64; 3]>>,
    pub cell: Vec<[[f64; 3]; 3]>,
    pub atomic_number: Vec<u8>,
}

impl TrajectoryRecord {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let blob = fs::read(path).map_err(|source| RelaxError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&blob)?)
    }

    pub fn len(&self) -> usize {
        self.energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }

    /// Rebuilds the snapshot at `index`.
    pub fn snapshot(&self, index: usize) -> Option<Snapshot> {
        let vectors = |rows: &[[f64; 3]]| rows.iter().map(|r| Vector3::from(*r)).collect::<Vec<_>>();
        let cell = self.cell.get(index)?;
        Some(Snapshot {
            energy: *self.energy.get(index)?,
            forces: vectors(self.forces.get(index)?),
            stress: *self.stresses.get(index)?,
            positions: vectors(self.atom_positions.get(index)?),
            cell: Matrix3::from_fn(|i, j| cell[i][j]),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::calculator::{Calculator, Properties};

    struct Constant;

    impl Calculator for Constant {
        fn calculate(&self, atoms: &Atoms) -> anyhow::Result<Properties> {
            Ok(Properties {
                energy: -1.5,
                forces: vec![Vector3::new(0.1, 0.0, 0.0); atoms.len()],
                stress: [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            })
        }

        fn name(&self) -> &str {
            "constant"
        }
    }

    fn dimer() -> Atoms {
        let mut atoms = Atoms::new(
            vec![18, 18],
            vec![Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0)],
            Matrix3::from_diagonal_element(5.0),
        );
        atoms.set_calculator(Arc::new(Constant));
        atoms
    }

    #[test]
    fn capture_appends_full_state() {
        let mut atoms = dimer();
        let mut traj = TrajectoryObserver::new(&atoms);
        assert!(traj.is_empty());

        traj.capture(&mut atoms).unwrap();
        traj.capture(&mut atoms).unwrap();
        assert_eq!(traj.len(), 2);
        assert_eq!(traj.atomic_numbers(), &[18, 18]);

        let (energy, forces, stress, cell, positions) = traj[1].as_tuple();
        assert_eq!(energy, -1.5);
        assert_eq!(forces.len(), 2);
        assert_eq!(stress[3], 4.0);
        assert_eq!(cell[(2, 2)], 5.0);
        assert_eq!(positions[1], Vector3::new(1.0, 1.0, 1.0));
        assert!(traj.get(2).is_none());
    }

    #[test]
    fn record_keeps_rows_in_order() {
        let mut atoms = dimer();
        atoms.set_cell(Matrix3::new(5.0, 0.5, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 5.0), false);
        let mut traj = TrajectoryObserver::new(&atoms);
        traj.capture(&mut atoms).unwrap();

        let record = traj.to_record();
        assert_eq!(record.cell[0][0], [5.0, 0.5, 0.0]);
        assert_eq!(record.snapshot(0).unwrap(), traj[0]);
        assert!(record.snapshot(1).is_none());
    }
}
