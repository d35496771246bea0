pub mod model;
pub mod service;
pub mod http;

pub use model::{CreateItemPayload, Item, ItemFields, ItemSource, LocalItem, LocalItemFields, RemoteItem, RemoteItemFields};
pub use service::{can_view, load_visible, register_item, remove_item_cascade};
pub use http::{create_item, delete_item};
