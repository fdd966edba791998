//! Test helpers for classflow
//!
//! Provides convenient builders for IR programs and ready-made fixtures so
//! tests can construct hierarchies and bodies without spelling out every
//! declaration field.

mod builder;
mod fixtures;
mod run;

pub use builder::{BodyBuilder, ProgramBuilder};
pub use fixtures::{animal_world, AnimalWorld};
pub use run::{analyze, analyze_with_config};
