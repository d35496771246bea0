pub mod model;
pub mod service;
pub mod http;

pub use model::{AccessGrant, GrantPayload};
pub use service::{grant, has_grant, revoke};
pub use http::{grant_access, revoke_access};
