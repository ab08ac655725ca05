use anyhow::{anyhow, bail, Result};
use nalgebra::Point3;

use crate::core::chemistry;
use crate::core::domain::{Lattice, LatticeParameters, Site, Structure};
use crate::engine::atoms::Atoms;

/// Converts a caller-side structure type to and from the native [`Atoms`].
///
/// The relaxed structure handed back to the caller is produced by
/// `from_atoms`, so it always has the same type as the input.
pub trait StructureAdaptor {
    type Structure;

    fn to_atoms(&self, structure: &Self::Structure) -> Result<Atoms>;

    fn from_atoms(&self, atoms: &Atoms) -> Result<Self::Structure>;

    fn lattice_parameters(&self, structure: &Self::Structure) -> LatticeParameters;
}

/// The adaptor for [`Structure`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomsAdaptor;

impl StructureAdaptor for AtomsAdaptor {
    type Structure = Structure;

    fn to_atoms(&self, structure: &Structure) -> Result<Atoms> {
        if structure.is_empty() {
            bail!("Structure has no sites");
        }
        if structure.lattice.vectors.iter().any(|x| !x.is_finite()) {
            bail!("Lattice contains non-finite entries");
        }
        if structure.lattice.volume() < 1e-12 {
            bail!("Lattice is singular (volume {:e})", structure.lattice.volume());
        }

        let numbers = structure
            .sites
            .iter()
            .enumerate()
            .map(|(i, site)| {
                chemistry::atomic_number(&site.species)
                    .ok_or_else(|| anyhow!("Unknown element '{}' at site {}", site.species, i))
            })
            .collect::<Result<Vec<_>>>()?;

        let positions = structure
            .cartesian_positions()
            .into_iter()
            .map(|p| p.coords)
            .collect();

        Ok(Atoms::new(numbers, positions, structure.lattice.rows()))
    }

    fn from_atoms(&self, atoms: &Atoms) -> Result<Structure> {
        let lattice = Lattice::from_rows(atoms.cell())
            .ok_or_else(|| anyhow!("Relaxed cell is singular"))?;

        // Fractional coordinates are not wrapped back into [0, 1).
        let sites = atoms
            .numbers()
            .iter()
            .zip(atoms.positions())
            .map(|(&z, r)| {
                let species = chemistry::symbol(z)
                    .ok_or_else(|| anyhow!("No element with atomic number {}", z))?;
                Ok(Site {
                    species: species.to_string(),
                    frac: lattice.to_fractional(&Point3::from(*r)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Structure::new(lattice, sites))
    }

    fn lattice_parameters(&self, structure: &Structure) -> LatticeParameters {
        structure.lattice.parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rocksalt() -> Structure {
        let lattice = Lattice::cubic(4.2);
        let sites = vec![
            Site { species: "Mg".into(), frac: Point3::new(0.0, 0.0, 0.0) },
            Site { species: "O".into(), frac: Point3::new(0.5, 0.5, 0.5) },
        ];
        Structure::new(lattice, sites)
    }

    #[test]
    fn round_trip_preserves_geometry() {
        let s = rocksalt();
        let atoms = AtomsAdaptor.to_atoms(&s).unwrap();
        assert_eq!(atoms.numbers(), &[12, 8]);
        assert!((atoms.positions()[1] - nalgebra::Vector3::new(2.1, 2.1, 2.1)).norm() < 1e-12);

        let back = AtomsAdaptor.from_atoms(&atoms).unwrap();
        assert_eq!(back.sites[0].species, "Mg");
        assert!((back.sites[1].frac - s.sites[1].frac).norm() < 1e-12);
        assert!((back.lattice.vectors - s.lattice.vectors).norm() < 1e-12);
    }

    #[test]
    fn unknown_species_is_rejected() {
        let mut s = rocksalt();
        s.sites[1].species = "Qq".into();
        let err = AtomsAdaptor.to_atoms(&s).unwrap_err();
        assert!(err.to_string().contains("Qq"));
    }

    #[test]
    fn empty_structure_is_rejected() {
        let s = Structure::new(Lattice::cubic(3.0), vec![]);
        assert!(AtomsAdaptor.to_atoms(&s).is_err());
    }
}
