//! The relaxation driver: structure in, relaxed structure and lattice
//! parameters out, with an optional trajectory file on the side.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::domain::RelaxParams;
use crate::engine::adaptor::{AtomsAdaptor, StructureAdaptor};
use crate::engine::calculator::Calculator;
use crate::engine::filter::{ExpCellFilter, ExpCellFilterParams};
use crate::error::{ConfigError, RelaxError, Result};
use crate::solvers::{self, Dynamics, Optimizable, Optimizer, OptimizerCtor, OptimizerFactory};

pub mod trajectory;

pub use trajectory::{Snapshot, TrajectoryObserver, TrajectoryRecord};

/// Relaxed geometry plus the lattice parameters read off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaxResult<S> {
    pub final_structure: S,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// Degrees.
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    /// Å^3
    pub volume: f64,
    /// The force criterion was met before the step budget ran out.
    pub converged: bool,
    /// Optimizer steps taken.
    pub steps: usize,
}

/// Optimizer as requested by the caller, before validation.
#[derive(Clone)]
enum OptimizerRequest {
    Missing,
    Named(String),
    Custom(Arc<dyn OptimizerFactory>),
}

/// Optimizer after validation; always buildable.
#[derive(Clone)]
enum OptimizerSource {
    Registry(&'static str, OptimizerCtor),
    Custom(Arc<dyn OptimizerFactory>),
}

impl OptimizerSource {
    fn build(&self) -> Box<dyn Optimizer> {
        match self {
            OptimizerSource::Registry(_, ctor) => ctor(),
            OptimizerSource::Custom(factory) => factory.build(),
        }
    }
}

impl fmt::Debug for OptimizerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerSource::Registry(name, _) => write!(f, "{}", name),
            OptimizerSource::Custom(_) => write!(f, "<custom>"),
        }
    }
}

pub struct RelaxCalcBuilder<A = AtomsAdaptor> {
    calculator: Arc<dyn Calculator>,
    optimizer: OptimizerRequest,
    fmax: f64,
    steps: usize,
    traj_file: Option<PathBuf>,
    interval: usize,
    adaptor: A,
    cell_filter: ExpCellFilterParams,
}

impl<A: StructureAdaptor> RelaxCalcBuilder<A> {
    /// Selects a registered optimizer by its (case-sensitive) name.
    pub fn optimizer(mut self, name: impl Into<String>) -> Self {
        self.optimizer = OptimizerRequest::Named(name.into());
        self
    }

    /// Uses a caller-supplied optimizer. A fresh one is built per `calc`.
    pub fn optimizer_factory(mut self, factory: impl OptimizerFactory + 'static) -> Self {
        self.optimizer = OptimizerRequest::Custom(Arc::new(factory));
        self
    }

    /// Explicitly clears the optimizer; `build` will refuse it.
    pub fn no_optimizer(mut self) -> Self {
        self.optimizer = OptimizerRequest::Missing;
        self
    }

    pub fn fmax(mut self, fmax: f64) -> Self {
        self.fmax = fmax;
        self
    }

    pub fn steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn traj_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.traj_file = Some(path.into());
        self
    }

    pub fn interval(mut self, interval: usize) -> Self {
        self.interval = interval;
        self
    }

    pub fn cell_filter(mut self, params: ExpCellFilterParams) -> Self {
        self.cell_filter = params;
        self
    }

    /// Swaps the structure adaptor, and with it the structure type accepted
    /// by `calc`.
    pub fn adaptor<B: StructureAdaptor>(self, adaptor: B) -> RelaxCalcBuilder<B> {
        RelaxCalcBuilder {
            calculator: self.calculator,
            optimizer: self.optimizer,
            fmax: self.fmax,
            steps: self.steps,
            traj_file: self.traj_file,
            interval: self.interval,
            adaptor,
            cell_filter: self.cell_filter,
        }
    }

    /// Validates the settings. Nothing is converted or evaluated here.
    pub fn build(self) -> std::result::Result<RelaxCalc<A>, ConfigError> {
        let optimizer = match self.optimizer {
            OptimizerRequest::Missing => return Err(ConfigError::MissingOptimizer),
            OptimizerRequest::Named(name) => {
                let (key, ctor) = solvers::lookup(&name).ok_or(ConfigError::UnknownOptimizer(name))?;
                OptimizerSource::Registry(key, ctor)
            }
            OptimizerRequest::Custom(factory) => OptimizerSource::Custom(factory),
        };
        if self.interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        if !self.fmax.is_finite() || self.fmax < 0.0 {
            return Err(ConfigError::InvalidFmax(self.fmax));
        }
        if let Some(factor) = self.cell_filter.cell_factor {
            if !factor.is_finite() || factor <= 0.0 {
                return Err(ConfigError::InvalidCellFactor(factor));
            }
        }

        Ok(RelaxCalc {
            calculator: self.calculator,
            optimizer,
            fmax: self.fmax,
            steps: self.steps,
            traj_file: self.traj_file,
            interval: self.interval,
            adaptor: self.adaptor,
            cell_filter: self.cell_filter,
        })
    }
}

/// Relaxes atom positions and cell shape together under a fixed calculator.
///
/// Each `calc` call is independent: it builds its own atoms, filter,
/// optimizer and trajectory, and keeps nothing afterwards. A call is silent:
/// the optimizer's step log is discarded and no `log` records are emitted.
pub struct RelaxCalc<A = AtomsAdaptor> {
    calculator: Arc<dyn Calculator>,
    optimizer: OptimizerSource,
    fmax: f64,
    steps: usize,
    traj_file: Option<PathBuf>,
    interval: usize,
    adaptor: A,
    cell_filter: ExpCellFilterParams,
}

impl RelaxCalc<AtomsAdaptor> {
    /// Starts from the defaults: FIRE, fmax 0.1, 500 steps, every step
    /// recorded, nothing saved.
    pub fn builder(calculator: Arc<dyn Calculator>) -> RelaxCalcBuilder<AtomsAdaptor> {
        let defaults = RelaxParams::default();
        RelaxCalcBuilder {
            calculator,
            optimizer: match defaults.optimizer {
                Some(name) => OptimizerRequest::Named(name),
                None => OptimizerRequest::Missing,
            },
            fmax: defaults.fmax,
            steps: defaults.steps,
            traj_file: defaults.traj_file,
            interval: defaults.interval,
            adaptor: AtomsAdaptor,
            cell_filter: ExpCellFilterParams::default(),
        }
    }

    pub fn from_params(
        calculator: Arc<dyn Calculator>,
        params: &RelaxParams,
    ) -> std::result::Result<Self, ConfigError> {
        let mut builder = Self::builder(calculator)
            .fmax(params.fmax)
            .steps(params.steps)
            .interval(params.interval)
            .cell_filter(ExpCellFilterParams {
                cell_factor: params.cell_factor,
                scalar_pressure: params.scalar_pressure,
                hydrostatic_strain: params.hydrostatic_strain,
                constant_volume: params.constant_volume,
            });
        builder = match &params.optimizer {
            Some(name) => builder.optimizer(name.as_str()),
            None => builder.no_optimizer(),
        };
        if let Some(path) = &params.traj_file {
            builder = builder.traj_file(path.clone());
        }
        builder.build()
    }
}

impl<A: StructureAdaptor> RelaxCalc<A> {
    pub fn calc(&self, structure: &A::Structure) -> Result<RelaxResult<A::Structure>> {
        self.calc_with_trajectory(structure).map(|(result, _)| result)
    }

    /// Like [`calc`](Self::calc), but also hands back the recorded trajectory.
    pub fn calc_with_trajectory(
        &self,
        structure: &A::Structure,
    ) -> Result<(RelaxResult<A::Structure>, TrajectoryObserver)> {
        let mut atoms = self.adaptor.to_atoms(structure).map_err(RelaxError::Conversion)?;
        atoms.set_calculator(Arc::clone(&self.calculator));

        let mut trajectory = TrajectoryObserver::new(&atoms);
        let mut filter = ExpCellFilter::new(atoms, self.cell_filter.clone());
        let optimizer = self.optimizer.build();

        let outcome = {
            let mut dynamics = Dynamics::new(optimizer).with_logfile(io::sink());
            dynamics.attach(&mut trajectory, self.interval);
            dynamics.run(&mut filter, self.fmax, self.steps)?
        };
        trajectory.capture(filter.atoms_mut())?;

        if let Some(path) = &self.traj_file {
            trajectory.save(path)?;
        }

        let atoms = filter.into_atoms();
        let final_structure = self.adaptor.from_atoms(&atoms).map_err(RelaxError::Conversion)?;
        let lattice = self.adaptor.lattice_parameters(&final_structure);

        let result = RelaxResult {
            final_structure,
            a: lattice.a,
            b: lattice.b,
            c: lattice.c,
            alpha: lattice.alpha,
            beta: lattice.beta,
            gamma: lattice.gamma,
            volume: lattice.volume,
            converged: outcome.converged,
            steps: outcome.steps,
        };
        Ok((result, trajectory))
    }

    pub fn fmax(&self) -> f64 {
        self.fmax
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn interval(&self) -> usize {
        self.interval
    }
}

impl<A> fmt::Debug for RelaxCalc<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaxCalc")
            .field("calculator", &self.calculator.name())
            .field("optimizer", &self.optimizer)
            .field("fmax", &self.fmax)
            .field("steps", &self.steps)
            .field("traj_file", &self.traj_file)
            .field("interval", &self.interval)
            .field("cell_filter", &self.cell_filter)
            .finish()
    }
}
