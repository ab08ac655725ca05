use std::io::{self, Write};

use chrono::Local;
use nalgebra::{DVector, Vector3};

use crate::engine::atoms::Atoms;
use crate::error::Result;

pub mod bfgs;
pub mod bfgs_linesearch;
pub mod cg;
pub mod fire;
pub mod lbfgs;
pub mod linesearch;
pub mod mdmin;

pub use bfgs::{Bfgs, BfgsParams};
pub use bfgs_linesearch::{InverseBfgs, InverseBfgsParams};
pub use cg::{FminCg, FminCgParams};
pub use fire::{Fire, FireParams};
pub use lbfgs::{Lbfgs, LbfgsParams};
pub use mdmin::{MdMin, MdMinParams};

// --- Optimization Target ---

/// Anything an optimizer can move: `len()` rows of 3-vector coordinates with
/// matching forces (negative energy gradient).
pub trait Optimizable {
    fn len(&self) -> usize;

    fn positions(&self) -> Vec<Vector3<f64>>;

    fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<()>;

    fn forces(&mut self) -> Result<Vec<Vector3<f64>>>;

    fn energy(&mut self) -> Result<f64>;

    /// The physical atoms behind the coordinates, for observers.
    fn atoms_mut(&mut self) -> &mut Atoms;
}

// --- Algorithms ---

/// One iterative minimization algorithm. Holds its own run state, so a fresh
/// instance is needed per relaxation.
pub trait Optimizer {
    fn name(&self) -> &str;

    /// Moves `target` once. `forces` are the current forces of `target`.
    /// Restarts and other notable events are reported to `log`.
    fn step(&mut self, target: &mut dyn Optimizable, forces: &[Vector3<f64>], log: &mut dyn Write) -> Result<()>;
}

/// Builds fresh optimizers. Implemented by every parameter struct and by
/// closures returning a boxed optimizer.
pub trait OptimizerFactory: Send + Sync {
    fn build(&self) -> Box<dyn Optimizer>;
}

impl<F> OptimizerFactory for F
where
    F: Fn() -> Box<dyn Optimizer> + Send + Sync,
{
    fn build(&self) -> Box<dyn Optimizer> {
        self()
    }
}

/// Called back by [`Dynamics`] every `interval` steps.
pub trait Observer {
    fn observe(&mut self, atoms: &mut Atoms) -> Result<()>;
}

impl<F> Observer for F
where
    F: FnMut(&mut Atoms) -> Result<()>,
{
    fn observe(&mut self, atoms: &mut Atoms) -> Result<()> {
        self(atoms)
    }
}

// --- Registry ---

pub type OptimizerCtor = fn() -> Box<dyn Optimizer>;

fn new_fire() -> Box<dyn Optimizer> {
    Box::new(Fire::new(FireParams::default()))
}

fn new_bfgs() -> Box<dyn Optimizer> {
    Box::new(Bfgs::new(BfgsParams::default()))
}

fn new_lbfgs() -> Box<dyn Optimizer> {
    Box::new(Lbfgs::new(LbfgsParams::default()))
}

fn new_lbfgs_ls() -> Box<dyn Optimizer> {
    Box::new(Lbfgs::new(LbfgsParams::line_search()))
}

fn new_mdmin() -> Box<dyn Optimizer> {
    Box::new(MdMin::new(MdMinParams::default()))
}

fn new_fmin_cg() -> Box<dyn Optimizer> {
    Box::new(FminCg::new(FminCgParams::default()))
}

fn new_fmin_bfgs() -> Box<dyn Optimizer> {
    Box::new(InverseBfgs::new(InverseBfgsParams::fmin()))
}

fn new_bfgs_ls() -> Box<dyn Optimizer> {
    Box::new(InverseBfgs::new(InverseBfgsParams::default()))
}

/// Every optimizer selectable by name.
pub static OPTIMIZERS: &[(&str, OptimizerCtor)] = &[
    ("FIRE", new_fire),
    ("BFGS", new_bfgs),
    ("LBFGS", new_lbfgs),
    ("LBFGSLineSearch", new_lbfgs_ls),
    ("MDMin", new_mdmin),
    ("SciPyFminCG", new_fmin_cg),
    ("SciPyFminBFGS", new_fmin_bfgs),
    ("BFGSLineSearch", new_bfgs_ls),
];

/// Finds a registry entry by exact name, returning the static key with it.
pub fn lookup(name: &str) -> Option<(&'static str, OptimizerCtor)> {
    OPTIMIZERS.iter().find(|(key, _)| *key == name).copied()
}

pub fn optimizer_names() -> Vec<&'static str> {
    OPTIMIZERS.iter().map(|(key, _)| *key).collect()
}

// --- Run Loop ---

/// How a [`Dynamics::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Force criterion met (as opposed to running out of steps).
    pub converged: bool,
    /// Total steps taken by this driver so far.
    pub steps: usize,
}

/// Drives an [`Optimizer`] until the forces converge or the step budget runs out,
/// calling attached observers and writing one log line per step.
pub struct Dynamics<'a> {
    optimizer: Box<dyn Optimizer>,
    observers: Vec<(&'a mut dyn Observer, usize)>,
    logfile: Box<dyn Write + 'a>,
    nsteps: usize,
}

impl<'a> Dynamics<'a> {
    /// Logs to stdout by default.
    pub fn new(optimizer: Box<dyn Optimizer>) -> Self {
        Self {
            optimizer,
            observers: Vec::new(),
            logfile: Box::new(io::stdout()),
            nsteps: 0,
        }
    }

    /// Redirects the step log (table, optimizer notes and verdict), e.g. to
    /// `io::sink()` to silence it.
    pub fn with_logfile(mut self, logfile: impl Write + 'a) -> Self {
        self.logfile = Box::new(logfile);
        self
    }

    /// Calls `observer` at step 0 and then every `interval` steps.
    /// An interval of 0 is treated as 1.
    pub fn attach(&mut self, observer: &'a mut dyn Observer, interval: usize) {
        self.observers.push((observer, interval.max(1)));
    }

    pub fn run(&mut self, target: &mut dyn Optimizable, fmax: f64, steps: usize) -> Result<RunOutcome> {
        let max_steps = self.nsteps + steps;

        let mut forces = target.forces()?;
        let mut converged = is_converged(&forces, fmax);

        if self.nsteps == 0 {
            self.log_step(target, &forces)?;
            self.call_observers(target)?;
        }

        while !converged && self.nsteps < max_steps {
            self.optimizer.step(target, &forces, &mut self.logfile)?;
            self.nsteps += 1;
            forces = target.forces()?;
            converged = is_converged(&forces, fmax);
            self.log_step(target, &forces)?;
            self.call_observers(target)?;
        }

        let verdict = match converged {
            true => "converged",
            false => "not converged",
        };
        let _ = writeln!(
            self.logfile,
            "{}: {} after {} steps (fmax {:.4e})",
            self.optimizer.name(),
            verdict,
            self.nsteps,
            max_force(&forces)
        );
        let _ = self.logfile.flush();

        Ok(RunOutcome { converged, steps: self.nsteps })
    }

    fn call_observers(&mut self, target: &mut dyn Optimizable) -> Result<()> {
        for (observer, interval) in &mut self.observers {
            if self.nsteps % *interval == 0 {
                observer.observe(target.atoms_mut())?;
            }
        }
        Ok(())
    }

    fn log_step(&mut self, target: &mut dyn Optimizable, forces: &[Vector3<f64>]) -> Result<()> {
        let energy = target.energy()?;
        let name = self.optimizer.name().to_string();
        let time = Local::now().format("%H:%M:%S");

        // Write failures only lose diagnostics.
        if self.nsteps == 0 {
            let _ = writeln!(
                self.logfile,
                "{:width$}  {:>4} {:>8} {:>15} {:>12}",
                "", "Step", "Time", "Energy", "fmax",
                width = name.len()
            );
        }
        let _ = writeln!(
            self.logfile,
            "{}:  {:>4} {:>8} {:>15.6} {:>12.6}",
            name, self.nsteps, time, energy, max_force(forces)
        );
        let _ = self.logfile.flush();
        Ok(())
    }
}

/// Largest row norm, i.e. the fmax figure of merit.
pub fn max_force(forces: &[Vector3<f64>]) -> f64 {
    forces.iter().map(|f| f.norm_squared()).fold(0.0, f64::max).sqrt()
}

pub fn is_converged(forces: &[Vector3<f64>], fmax: f64) -> bool {
    forces.iter().map(|f| f.norm_squared()).fold(0.0, f64::max) < fmax * fmax
}

// --- Shared vector helpers ---

pub(crate) fn flatten(rows: &[Vector3<f64>]) -> DVector<f64> {
    DVector::from_iterator(rows.len() * 3, rows.iter().flat_map(|r| r.iter().copied()))
}

pub(crate) fn unflatten(v: &DVector<f64>) -> Vec<Vector3<f64>> {
    v.as_slice().chunks_exact(3).map(Vector3::from_column_slice).collect()
}

pub(crate) fn vdot(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.dot(y)).sum()
}

pub(crate) fn vnorm(a: &[Vector3<f64>]) -> f64 {
    vdot(a, a).sqrt()
}

/// Scales `step` so no row moves farther than `maxstep`.
pub(crate) fn cap_row_length(step: &mut [Vector3<f64>], maxstep: f64) {
    let longest = max_force(step);
    if longest > maxstep {
        let scale = maxstep / longest;
        for row in step.iter_mut() {
            *row *= scale;
        }
    }
}
