pub mod model;
pub mod request;

pub use model::*;
pub use request::QueryRequest;
