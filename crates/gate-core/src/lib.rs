//! Shared domain types, error taxonomy, statistics helpers and durable JSON
//! stores used by every stage of the signal gate.

pub mod adaptive;
pub mod error;
pub mod store;
pub mod types;

pub use error::*;
pub use store::{write_atomic, JsonStore, JsonlLog};
pub use types::*;
