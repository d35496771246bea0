pub mod model;
pub mod service;

pub use model::{geometry_bounds, Structure, StructureFields, StructureRow};
pub use service::*;
