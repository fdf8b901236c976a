//! Local replica of the live dataset, read through a SQL store.

pub mod adapter;
pub mod repository;
pub mod repository_sqlx;

pub use adapter::ReplicaAdapter;
pub use repository::{MeasurementRepository, RangeFilter};
pub use repository_sqlx::SqlxMeasurementRepository;
