//! Safe SQL builder and the PostgreSQL repository: identifiers from the registry only, values as parameters.

mod builder;
pub mod params;
mod repository;

pub use builder::*;
pub use params::*;
pub use repository::PgRepository;
