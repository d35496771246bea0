pub mod model;
pub mod service;

pub use model::{ImageOverlay, OverlayFields};
pub use service::*;
