#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use cellrelax::core::domain::{Lattice, LatticeParameters, Site, Structure};
use cellrelax::engine::adaptor::{AtomsAdaptor, StructureAdaptor};
use cellrelax::engine::atoms::Atoms;
use cellrelax::engine::calculator::{Calculator, Properties};
use nalgebra::{Point3, Vector3};

/// Flat energy landscape: everything is already relaxed.
pub struct ZeroForce;

impl Calculator for ZeroForce {
    fn calculate(&self, atoms: &Atoms) -> Result<Properties> {
        Ok(Properties {
            energy: 0.0,
            forces: vec![Vector3::zeros(); atoms.len()],
            stress: [0.0; 6],
        })
    }

    fn name(&self) -> &str {
        "Zero Force"
    }
}

/// Uniform push along +x. Never converges for fmax below the push.
pub struct ConstantForce(pub f64);

impl Calculator for ConstantForce {
    fn calculate(&self, atoms: &Atoms) -> Result<Properties> {
        let energy = -self.0 * atoms.positions().iter().map(|r| r.x).sum::<f64>();
        Ok(Properties {
            energy,
            forces: vec![Vector3::new(self.0, 0.0, 0.0); atoms.len()],
            stress: [0.0; 6],
        })
    }

    fn name(&self) -> &str {
        "Constant Force"
    }
}

/// A spring between atoms 0 and 1 (no periodic images, no stress).
/// The cell feels no force, so only the bond length relaxes.
pub struct HarmonicPair {
    pub k: f64,
    pub r0: f64,
}

impl Calculator for HarmonicPair {
    fn calculate(&self, atoms: &Atoms) -> Result<Properties> {
        if atoms.len() != 2 {
            return Err(anyhow!("HarmonicPair needs exactly two atoms"));
        }
        let d = atoms.positions()[1] - atoms.positions()[0];
        let r = d.norm();
        let stretch = r - self.r0;
        let f1 = -self.k * stretch * d / r;
        Ok(Properties {
            energy: 0.5 * self.k * stretch * stretch,
            forces: vec![-f1, f1],
            stress: [0.0; 6],
        })
    }

    fn name(&self) -> &str {
        "Harmonic Pair"
    }
}

/// Always fails.
pub struct Failing;

impl Calculator for Failing {
    fn calculate(&self, _atoms: &Atoms) -> Result<Properties> {
        Err(anyhow!("model exploded"))
    }

    fn name(&self) -> &str {
        "Failing"
    }
}

/// Counts conversions, otherwise behaves like `AtomsAdaptor`.
#[derive(Default)]
pub struct SpyAdaptor {
    pub conversions: Arc<AtomicUsize>,
}

impl StructureAdaptor for SpyAdaptor {
    type Structure = Structure;

    fn to_atoms(&self, structure: &Structure) -> Result<Atoms> {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        AtomsAdaptor.to_atoms(structure)
    }

    fn from_atoms(&self, atoms: &Atoms) -> Result<Structure> {
        AtomsAdaptor.from_atoms(atoms)
    }

    fn lattice_parameters(&self, structure: &Structure) -> LatticeParameters {
        AtomsAdaptor.lattice_parameters(structure)
    }
}

pub fn fcc(a: f64, species: &str) -> Structure {
    let frac = [
        [0.0, 0.0, 0.0],
        [0.0, 0.5, 0.5],
        [0.5, 0.0, 0.5],
        [0.5, 0.5, 0.0],
    ];
    let sites = frac
        .iter()
        .map(|f| Site {
            species: species.to_string(),
            frac: Point3::new(f[0], f[1], f[2]),
        })
        .collect();
    Structure::new(Lattice::cubic(a), sites)
}

/// Two atoms `separation` apart along x in a cubic box.
pub fn dimer_in_box(box_size: f64, separation: f64) -> Structure {
    Structure::from_cartesian(
        Lattice::cubic(box_size),
        &["Ar", "Ar"],
        &[Point3::new(1.0, 1.0, 1.0), Point3::new(1.0 + separation, 1.0, 1.0)],
    )
}

/// A per-test file path in the system temp dir.
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("cellrelax-{}-{}.json", std::process::id(), name))
}

pub fn shared<C: Calculator + 'static>(calc: C) -> Arc<dyn Calculator> {
    Arc::new(calc)
}
