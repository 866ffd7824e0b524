pub mod models;
pub mod momentum;
pub mod scorer;
#[cfg(test)]
mod tests;

pub use models::*;
pub use momentum::MomentumReading;
pub use scorer::ConfluenceScorer;
