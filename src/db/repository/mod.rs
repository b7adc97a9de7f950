//! Repository layer: entity-scoped database operations.

mod record;
mod settings;

pub use record::*;
pub use settings::*;
