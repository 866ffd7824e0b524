pub mod classifier;
pub mod models;
#[cfg(test)]
mod tests;

pub use classifier::RegimeClassifier;
pub use models::*;
