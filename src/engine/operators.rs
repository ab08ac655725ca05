use nalgebra::{Point3, Vector3};
use rand::Rng;

use crate::core::domain::{Lattice, Structure};
use crate::core::spatial;

/// A composable perturbation builder, used to kick a structure off a
/// symmetric saddle before relaxing it.
#[derive(Clone, Debug, Default)]
pub struct Perturbation {
    strain_intensity: Option<f64>, // Max fractional change of the lattice constants
    rattle_intensity: Option<f64>, // Max Cartesian displacement per axis (Å)
}

impl Perturbation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strain(mut self, max_strain: f64) -> Self {
        self.strain_intensity = Some(max_strain);
        self
    }

    pub fn rattle(mut self, max_dist: f64) -> Self {
        self.rattle_intensity = Some(max_dist);
        self
    }

    pub fn is_identity(&self) -> bool {
        self.strain_intensity.is_none() && self.rattle_intensity.is_none()
    }

    pub fn apply(&self, structure: &Structure, rng: &mut impl Rng) -> Structure {
        let mut s = structure.clone();

        // 1. Isotropic strain (atoms follow the cell)
        if let Some(mag) = self.strain_intensity.filter(|m| *m > 0.0) {
            let scale = 1.0 + rng.gen_range(-mag..mag);
            if let Some(lattice) = Lattice::from_columns(s.lattice.vectors * scale) {
                s.lattice = lattice;
            }
        }

        // 2. Rattle
        if let Some(mag) = self.rattle_intensity.filter(|m| *m > 0.0) {
            for site in &mut s.sites {
                let shift = Vector3::new(
                    rng.gen_range(-mag..mag),
                    rng.gen_range(-mag..mag),
                    rng.gen_range(-mag..mag),
                );
                let cart: Point3<f64> = s.lattice.to_cartesian(&site.frac) + shift;
                site.frac = spatial::wrap_fractional(&s.lattice.to_fractional(&cart));
            }
        }

        s
    }
}
