pub mod fallback;
pub mod policy;
pub mod status;

pub use fallback::FallbackRouter;
pub use policy::RoutingPolicy;
pub use status::RouterStatus;
