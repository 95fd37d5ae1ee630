use grpc_discovery::config::Config;
use grpc_discovery::server;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // RUST_LOG 优先于配置文件中的日志级别
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting registry server...");
    server::start(config).await?;
    Ok(())
}
