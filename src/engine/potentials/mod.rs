pub mod lennard_jones;

pub use lennard_jones::LennardJones;
