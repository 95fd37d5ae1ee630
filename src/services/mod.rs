pub mod client;
pub mod peer;
pub mod registry;

pub use registry::{Registry, RegistryServer};
