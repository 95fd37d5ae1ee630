pub mod registry {
    tonic::include_proto!("registry");
}
pub mod config;
pub mod server;
pub mod services;
pub mod utils;
