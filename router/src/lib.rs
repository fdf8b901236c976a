pub mod cache;
pub mod config;
pub mod db;
pub mod health;
pub mod measurement;
pub mod metrics;
pub mod query;
pub mod router;
pub mod source;

pub mod error;

pub use error::RouterError;
pub use router::{FallbackRouter, RouterStatus, RoutingPolicy};
