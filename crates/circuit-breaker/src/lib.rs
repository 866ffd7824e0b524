pub mod breaker;
pub mod models;

pub use breaker::CircuitBreaker;
pub use models::*;
