pub mod guard;
pub mod models;
#[cfg(test)]
mod tests;

pub use guard::ExecutionGuard;
pub use models::*;
