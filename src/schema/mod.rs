//! Entity schema: declarations, annotation handling, runtime models and the registry.

pub mod model;
pub mod registry;
mod tags;
pub mod types;
pub mod validator;

pub use model::*;
pub use registry::Registry;
pub use types::*;
pub use validator::validate;
