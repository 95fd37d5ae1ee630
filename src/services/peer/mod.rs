//! Peer replication
//!
//! 把本节点接受的注册/续约/下线变更异步重放到集群中的其他注册中心节点。
//! 投递尽力而为，丢失的变更由客户端的周期续约自行修复。

pub mod pool;
pub mod types;

pub use pool::{GrpcPeer, PeerClient, PeerPool};
pub use types::{PeerError, SyncMsg, SyncMsgKind};
