//! Post-run diagnostics over a recorded trajectory.

use serde::{Deserialize, Serialize};

use crate::relax::trajectory::{Snapshot, TrajectoryObserver};
use crate::solvers::max_force;

/// Largest atomic force of every snapshot, in order.
///
/// Cell forces are not recorded, so this can sit below the fmax the optimizer
/// actually converged on.
pub fn max_force_history(trajectory: &TrajectoryObserver) -> Vec<f64> {
    trajectory.iter().map(|s| max_force(&s.forces)).collect()
}

/// One-line digest of a relaxation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySummary {
    pub snapshots: usize,
    pub initial_energy: f64,
    pub final_energy: f64,
    pub initial_volume: f64,
    pub final_volume: f64,
    pub final_max_force: f64,
    /// Number of recorded steps where the energy went up.
    pub uphill_steps: usize,
}

impl TrajectorySummary {
    /// `None` for an empty trajectory.
    pub fn from_trajectory(trajectory: &TrajectoryObserver) -> Option<Self> {
        let first = trajectory.get(0)?;
        let last = trajectory.last()?;
        let energies: Vec<f64> = trajectory.iter().map(|s| s.energy).collect();
        let uphill_steps = energies.windows(2).filter(|w| w[1] > w[0] + 1e-12).count();

        Some(Self {
            snapshots: trajectory.len(),
            initial_energy: first.energy,
            final_energy: last.energy,
            initial_volume: volume(first),
            final_volume: volume(last),
            final_max_force: max_force(&last.forces),
            uphill_steps,
        })
    }

    pub fn energy_change(&self) -> f64 {
        self.final_energy - self.initial_energy
    }

    /// Relative volume change, `V_final / V_initial - 1`.
    pub fn volume_strain(&self) -> f64 {
        self.final_volume / self.initial_volume - 1.0
    }
}

fn volume(snapshot: &Snapshot) -> f64 {
    snapshot.cell.determinant().abs()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nalgebra::{Matrix3, Vector3};

    use super::*;
    use crate::engine::atoms::Atoms;
    use crate::engine::calculator::{Calculator, Properties};

    /// Energy grows with the x coordinate of the first atom.
    struct Ramp;

    impl Calculator for Ramp {
        fn calculate(&self, atoms: &Atoms) -> anyhow::Result<Properties> {
            Ok(Properties {
                energy: atoms.positions()[0].x,
                forces: vec![Vector3::new(-1.0, 0.0, 0.0); atoms.len()],
                stress: [0.0; 6],
            })
        }

        fn name(&self) -> &str {
            "ramp"
        }
    }

    #[test]
    fn summary_tracks_energy_and_volume() {
        let mut atoms = Atoms::new(vec![1], vec![Vector3::new(1.0, 0.0, 0.0)], Matrix3::identity() * 2.0);
        atoms.set_calculator(Arc::new(Ramp));
        let mut traj = TrajectoryObserver::new(&atoms);

        traj.capture(&mut atoms).unwrap();
        atoms.set_positions(vec![Vector3::new(0.5, 0.0, 0.0)]);
        atoms.set_cell(Matrix3::identity() * 2.2, false);
        traj.capture(&mut atoms).unwrap();
        atoms.set_positions(vec![Vector3::new(0.7, 0.0, 0.0)]);
        traj.capture(&mut atoms).unwrap();

        let summary = TrajectorySummary::from_trajectory(&traj).unwrap();
        assert_eq!(summary.snapshots, 3);
        assert!((summary.energy_change() + 0.3).abs() < 1e-12);
        assert_eq!(summary.uphill_steps, 1);
        assert!((summary.initial_volume - 8.0).abs() < 1e-12);
        assert!((summary.volume_strain() - 0.331).abs() < 1e-9);
        assert_eq!(max_force_history(&traj), vec![1.0; 3]);
    }

    #[test]
    fn empty_trajectory_has_no_summary() {
        let atoms = Atoms::new(vec![1], vec![Vector3::zeros()], Matrix3::identity());
        assert!(TrajectorySummary::from_trajectory(&TrajectoryObserver::new(&atoms)).is_none());
    }
}
