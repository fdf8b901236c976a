pub mod tracker;

pub use tracker::{
    Admission, CircuitState, HealthConfig, HealthSnapshot, HealthTracker, Transition,
};
