pub mod models;
pub mod rules;
pub mod tracker;
#[cfg(test)]
mod tests;

pub use models::*;
pub use tracker::{StructureTracker, StructureUpdate};
