//! Registry service module
//!
//! This module contains the service registry implementation split into logical components:
//! - `types`: Instance and key types
//! - `application`: per-service instance table
//! - `census`: self-preservation statistics
//! - `service`: the registry directory and its operations
//! - `eviction`: scan-evict and need-count reseek schedulers
//! - `grpc_impl`: gRPC trait implementation

pub mod application;
pub mod census;
pub mod error;
pub mod eviction;
pub mod grpc_impl;
pub mod service;
pub mod types;

// Re-export public types for easier access
pub use application::Application;
pub use census::Census;
pub use error::RegistryError;
pub use grpc_impl::RegistryServer;
pub use service::Registry;
pub use types::{AppKey, Instance, InstanceKey};
