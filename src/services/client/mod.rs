//! 注册中心客户端
//!
//! - `stub`: 注册中心 RPC 访问
//! - `resolver`: 服务名到地址列表的解析与定时刷新
//! - `sentinel`: 服务实例的注册与心跳
//! - `provider`: 托管服务并自动注册

pub mod balance;
pub mod config;
pub mod error;
pub mod provider;
pub mod resolver;
pub mod retry;
pub mod sentinel;
pub mod stub;

pub use balance::BalanceUpdater;
pub use config::*;
pub use error::*;
pub use provider::ProviderServer;
pub use resolver::{AddressUpdater, RefreshOutcome, Resolver, ResolverBuilder};
pub use retry::RetryTimer;
pub use sentinel::{Sentinel, SentinelManager, SentinelState};
pub use stub::{RegistryApi, RegistryStub};
