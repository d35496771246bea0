pub mod model;
pub mod service;
pub mod http;

pub use model::{Condition, Op, Operand, Scalar, Search};
pub use service::{search, search_records, where_clause};
pub use http::{get_record, search_table};
