use std::path::PathBuf;

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

// --- Periodic Cell ---

/// A periodic cell.
///
/// Only `vectors` is serialized; `inverse` is recomputed on load, and a
/// singular cell is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LatticeVectors", into = "LatticeVectors")]
pub struct Lattice {
    pub vectors: Matrix3<f64>, // Columns are a, b, c
    pub inverse: Matrix3<f64>, // Precomputed for fractional conversion
}

/// Wire form of [`Lattice`].
#[derive(Serialize, Deserialize)]
struct LatticeVectors {
    vectors: Matrix3<f64>,
}

impl TryFrom<LatticeVectors> for Lattice {
    type Error = String;

    fn try_from(raw: LatticeVectors) -> Result<Self, Self::Error> {
        Lattice::from_columns(raw.vectors).ok_or_else(|| "lattice vectors are linearly dependent".to_string())
    }
}

impl From<Lattice> for LatticeVectors {
    fn from(lattice: Lattice) -> Self {
        LatticeVectors { vectors: lattice.vectors }
    }
}

impl Lattice {
    pub fn new(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Option<Self> {
        Self::from_columns(Matrix3::from_columns(&[a, b, c]))
    }

    /// Builds a lattice from a matrix whose columns are the lattice vectors.
    /// Returns `None` for a singular matrix.
    pub fn from_columns(vectors: Matrix3<f64>) -> Option<Self> {
        let inverse = vectors.try_inverse()?;
        Some(Self { vectors, inverse })
    }

    /// Builds a lattice from a matrix whose rows are the lattice vectors.
    pub fn from_rows(rows: &Matrix3<f64>) -> Option<Self> {
        Self::from_columns(rows.transpose())
    }

    pub fn cubic(a: f64) -> Self {
        Self::orthorhombic(a, a, a)
    }

    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Self {
        let vectors = Matrix3::from_diagonal(&Vector3::new(a, b, c));
        let inverse = Matrix3::from_diagonal(&Vector3::new(1.0 / a, 1.0 / b, 1.0 / c));
        Self { vectors, inverse }
    }

    /// Standard setting: a along x, b in the xy plane. Angles in degrees.
    pub fn from_parameters(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Option<Self> {
        let (cos_a, cos_b) = (alpha.to_radians().cos(), beta.to_radians().cos());
        let (sin_g, cos_g) = gamma.to_radians().sin_cos();

        let cx = c * cos_b;
        let cy = c * (cos_a - cos_b * cos_g) / sin_g;
        let cz_sq = c * c - cx * cx - cy * cy;
        if cz_sq <= 0.0 {
            return None;
        }

        Self::new(
            Vector3::new(a, 0.0, 0.0),
            Vector3::new(b * cos_g, b * sin_g, 0.0),
            Vector3::new(cx, cy, cz_sq.sqrt()),
        )
    }

    pub fn to_fractional(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.inverse * p.coords)
    }

    pub fn to_cartesian(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.vectors * p.coords)
    }

    /// Lattice vectors as the rows of a matrix.
    pub fn rows(&self) -> Matrix3<f64> {
        self.vectors.transpose()
    }

    pub fn abc(&self) -> [f64; 3] {
        [
            self.vectors.column(0).norm(),
            self.vectors.column(1).norm(),
            self.vectors.column(2).norm(),
        ]
    }

    /// (alpha, beta, gamma) in degrees.
    pub fn angles(&self) -> [f64; 3] {
        let a = self.vectors.column(0).into_owned();
        let b = self.vectors.column(1).into_owned();
        let c = self.vectors.column(2).into_owned();
        [angle_deg(&b, &c), angle_deg(&a, &c), angle_deg(&a, &b)]
    }

    pub fn volume(&self) -> f64 {
        self.vectors.determinant().abs()
    }

    pub fn parameters(&self) -> LatticeParameters {
        let [a, b, c] = self.abc();
        let [alpha, beta, gamma] = self.angles();
        LatticeParameters { a, b, c, alpha, beta, gamma, volume: self.volume() }
    }
}

fn angle_deg(u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    // Clamp guards acos against rounding just outside [-1, 1].
    let cos = (u.dot(v) / (u.norm() * v.norm())).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// The six cell scalars plus volume (lengths in Å, angles in degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub volume: f64,
}

// --- The Core Entity ---

/// One occupied site of a periodic structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Element symbol, e.g. "Mg".
    pub species: String,
    /// Fractional coordinates with respect to the structure lattice.
    pub frac: Point3<f64>,
}

/// A periodic crystal structure as the caller sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub lattice: Lattice,
    pub sites: Vec<Site>,
}

impl Structure {
    pub fn new(lattice: Lattice, sites: Vec<Site>) -> Self {
        Self { lattice, sites }
    }

    /// Builds a structure from Cartesian coordinates (Å).
    pub fn from_cartesian(lattice: Lattice, species: &[&str], positions: &[Point3<f64>]) -> Self {
        let sites = species
            .iter()
            .zip(positions)
            .map(|(s, p)| Site { species: s.to_string(), frac: lattice.to_fractional(p) })
            .collect();
        Self { lattice, sites }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn cartesian_positions(&self) -> Vec<Point3<f64>> {
        self.sites.iter().map(|s| self.lattice.to_cartesian(&s.frac)).collect()
    }

    pub fn species(&self) -> impl Iterator<Item = &str> {
        self.sites.iter().map(|s| s.species.as_str())
    }
}

// --- Configuration Types ---

/// Serializable relaxation settings. Field defaults mirror `RelaxCalc::builder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaxParams {
    /// Registry key of the optimizer. `null` is rejected, not defaulted.
    pub optimizer: Option<String>,
    /// Convergence threshold on the largest generalized force (eV/Å).
    pub fmax: f64,
    /// Hard cap on optimizer steps.
    pub steps: usize,
    /// Where to save the trajectory, if anywhere.
    pub traj_file: Option<PathBuf>,
    /// Record every `interval` optimizer steps.
    pub interval: usize,

    // Cell filter
    pub cell_factor: Option<f64>,
    pub scalar_pressure: f64, // eV/Å^3
    pub hydrostatic_strain: bool,
    pub constant_volume: bool,
}

impl Default for RelaxParams {
    fn default() -> Self {
        Self {
            optimizer: Some("FIRE".to_string()),
            fmax: 0.1,
            steps: 500,
            traj_file: None,
            interval: 1,
            cell_factor: None,
            scalar_pressure: 0.0,
            hydrostatic_strain: false,
            constant_volume: false,
        }
    }
}
