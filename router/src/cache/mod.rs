pub mod response_cache;

pub use response_cache::{CacheEntry, ResponseCache, spawn_sweeper};
