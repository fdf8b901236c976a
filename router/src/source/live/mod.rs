//! Live ERDDAP tabledap provider.

pub mod client;
pub mod normalize;
pub mod types;

pub use client::ErddapClient;
pub use normalize::normalize_table;
pub use types::*;
