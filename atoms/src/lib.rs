//! Storage, query and tile primitives for slide annotation serving.
//!
//! Each entity lives in its own module with a `model`, a `service` holding
//! the database logic and, where it has routes, an `http` layer.

pub mod error;
pub mod store;
pub mod respond;
pub mod items;
pub mod layers;
pub mod structures;
pub mod overlays;
pub mod access;
pub mod query;
pub mod tiles;

pub use error::{Error, Result};
pub use store::Store;
