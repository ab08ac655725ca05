use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use nalgebra::Point3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use cellrelax::analysis::convergence::TrajectorySummary;
use cellrelax::core::domain::{Lattice, RelaxParams, Site, Structure};
use cellrelax::engine::calculator::Calculator;
use cellrelax::engine::operators::Perturbation;
use cellrelax::engine::potentials::LennardJones;
use cellrelax::relax::RelaxCalc;
use cellrelax::solvers;

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Relax atomic positions and cell shape with a Lennard-Jones model", long_about = None)]
struct Args {
    /// Structure to relax (JSON). Without it, an fcc argon cell is built.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Relaxation settings (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the result (JSON). Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Optimizer name (case-sensitive)
    #[arg(long)]
    optimizer: Option<String>,

    /// Force convergence threshold (eV/Å)
    #[arg(long)]
    fmax: Option<f64>,

    /// Maximum optimizer steps
    #[arg(long)]
    steps: Option<usize>,

    /// Save the trajectory to this file
    #[arg(long)]
    traj: Option<PathBuf>,

    /// Record every N steps
    #[arg(long)]
    interval: Option<usize>,

    /// External pressure (eV/Å^3)
    #[arg(long)]
    pressure: Option<f64>,

    /// Lennard-Jones well depth (eV)
    #[arg(long, default_value_t = 0.0104)]
    epsilon: f64,

    /// Lennard-Jones length scale (Å)
    #[arg(long, default_value_t = 3.40)]
    sigma: f64,

    /// Pair cutoff (Å)
    #[arg(long, default_value_t = 8.5)]
    cutoff: f64,

    /// Lattice constant of the built-in fcc cell (Å)
    #[arg(long, default_value_t = 5.26)]
    lattice: f64,

    /// Random displacement amplitude applied before relaxing (Å)
    #[arg(long, default_value_t = 0.0)]
    rattle: f64,

    /// Random isotropic strain amplitude applied before relaxing
    #[arg(long, default_value_t = 0.0)]
    strain: f64,

    /// Seed for --rattle/--strain
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// List the available optimizers and exit
    #[arg(long)]
    list_optimizers: bool,
}

// --- Initialization Helpers ---

fn create_default_structure(a: f64) -> Structure {
    let frac = [
        [0.0, 0.0, 0.0],
        [0.0, 0.5, 0.5],
        [0.5, 0.0, 0.5],
        [0.5, 0.5, 0.0],
    ];
    let sites = frac
        .iter()
        .map(|f| Site {
            species: "Ar".to_string(),
            frac: Point3::new(f[0], f[1], f[2]),
        })
        .collect();
    Structure::new(Lattice::cubic(a), sites)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn resolve_params(args: &Args) -> Result<RelaxParams> {
    let mut params: RelaxParams = match &args.config {
        Some(path) => load_json(path)?,
        None => RelaxParams::default(),
    };
    if let Some(name) = &args.optimizer {
        params.optimizer = Some(name.clone());
    }
    if let Some(fmax) = args.fmax {
        params.fmax = fmax;
    }
    if let Some(steps) = args.steps {
        params.steps = steps;
    }
    if let Some(traj) = &args.traj {
        params.traj_file = Some(traj.clone());
    }
    if let Some(interval) = args.interval {
        params.interval = interval;
    }
    if let Some(pressure) = args.pressure {
        params.scalar_pressure = pressure;
    }
    Ok(params)
}

// --- Main ---

fn main() -> Result<(), Box<dyn Error>> {
    // 1. Logging & Parsing
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_optimizers {
        for name in solvers::optimizer_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    // 2. Configuration
    let params = resolve_params(&args)?;
    let calculator: Arc<dyn Calculator> = Arc::new(LennardJones::new(args.epsilon, args.sigma, args.cutoff));
    let relax = RelaxCalc::from_params(calculator, &params).context("Invalid relaxation settings")?;

    // 3. Input Structure
    let mut structure = match &args.input {
        Some(path) => load_json::<Structure>(path)?,
        None => create_default_structure(args.lattice),
    };
    let mut perturbation = Perturbation::new();
    if args.strain > 0.0 {
        perturbation = perturbation.strain(args.strain);
    }
    if args.rattle > 0.0 {
        perturbation = perturbation.rattle(args.rattle);
    }
    if !perturbation.is_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
        structure = perturbation.apply(&structure, &mut rng);
        info!("Perturbed input (seed {})", args.seed);
    }

    // 4. Relax
    let (result, trajectory) = relax.calc_with_trajectory(&structure).context("Relaxation failed")?;
    if result.converged {
        info!("Converged after {} steps: a = {:.4}, V = {:.3}", result.steps, result.a, result.volume);
    } else {
        warn!("Not converged after {} steps (fmax {})", result.steps, relax.fmax());
    }
    if let Some(path) = &params.traj_file {
        info!("Saved {} snapshots to {}", trajectory.len(), path.display());
    }
    if let Some(summary) = TrajectorySummary::from_trajectory(&trajectory) {
        info!(
            "{} snapshots, dE = {:.6} eV, dV/V = {:.4}, final max force {:.4} eV/Å",
            summary.snapshots,
            summary.energy_change(),
            summary.volume_strain(),
            summary.final_max_force
        );
    }

    // 5. Output
    let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
    match &args.output {
        Some(path) => fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }

    Ok(())
}
