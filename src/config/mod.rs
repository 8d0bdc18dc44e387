//! Configuration module.

mod endpoints;
mod loader;
mod types;

pub use endpoints::*;
pub use loader::*;
pub use types::*;
