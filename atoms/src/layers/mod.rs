pub mod model;
pub mod service;

pub use model::{Layer, LayerFields};
pub use service::*;
