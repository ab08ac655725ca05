//! Joint relaxation of atomic positions and cell shape under a pluggable
//! energy model, with a recorded trajectory.

pub mod analysis;
pub mod core;
pub mod engine;
pub mod error;
pub mod relax;
pub mod solvers;

pub use crate::core::domain::{Lattice, LatticeParameters, RelaxParams, Site, Structure};
pub use crate::engine::adaptor::{AtomsAdaptor, StructureAdaptor};
pub use crate::engine::atoms::Atoms;
pub use crate::engine::calculator::{Calculator, Properties};
pub use crate::engine::filter::{ExpCellFilter, ExpCellFilterParams};
pub use crate::error::{ConfigError, RelaxError, Result};
pub use crate::relax::{RelaxCalc, RelaxCalcBuilder, RelaxResult, TrajectoryObserver, TrajectoryRecord};
