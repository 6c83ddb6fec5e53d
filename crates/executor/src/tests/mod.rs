//! Test modules for the executor crate.
