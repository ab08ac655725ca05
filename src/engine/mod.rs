pub mod adaptor;
pub mod atoms;
pub mod calculator;
pub mod filter;
pub mod operators;
pub mod potentials;
