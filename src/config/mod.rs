//! # Configuration Module
//!
//! Centralizes the numeric tunables of the archive engine. Constants with
//! interdependencies are co-located in [`constants`] and the load-bearing
//! relationships are enforced through compile-time assertions.

pub mod constants;
pub use constants::*;
