use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tonic::transport::Endpoint;
use tonic::transport::channel::Change;

use super::resolver::AddressUpdater;
use crate::utils::normalize_endpoint;

/// 驱动 tonic 负载均衡通道的地址更新器
///
/// 记录通道当前持有的地址集合，每次刷新只下发增删差量。
#[derive(Debug)]
pub struct BalanceUpdater {
    sender: mpsc::Sender<Change<String, Endpoint>>,
    current: Mutex<HashSet<String>>,
    connect_timeout: Duration,
}

impl BalanceUpdater {
    pub fn new(sender: mpsc::Sender<Change<String, Endpoint>>, connect_timeout: Duration) -> Self {
        Self {
            sender,
            current: Mutex::new(HashSet::new()),
            connect_timeout,
        }
    }

    pub async fn current(&self) -> HashSet<String> {
        self.current.lock().await.clone()
    }
}

#[tonic::async_trait]
impl AddressUpdater for BalanceUpdater {
    async fn update(&self, addresses: Arc<Vec<String>>) {
        let mut current = self.current.lock().await;
        let next: HashSet<String> = addresses.iter().cloned().collect();

        for address in current.difference(&next) {
            if self.sender.send(Change::Remove(address.clone())).await.is_err() {
                tracing::debug!("Balance channel dropped, skipping address update");
                return;
            }
            tracing::debug!(address = %address, "Removed endpoint from balance channel");
        }

        let added: Vec<String> = next.difference(&current).cloned().collect();
        let mut applied: HashSet<String> = current.intersection(&next).cloned().collect();
        for address in added {
            let endpoint = match Endpoint::from_shared(normalize_endpoint(&address)) {
                Ok(endpoint) => endpoint.connect_timeout(self.connect_timeout),
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Skipping invalid endpoint");
                    continue;
                }
            };
            if self
                .sender
                .send(Change::Insert(address.clone(), endpoint))
                .await
                .is_err()
            {
                tracing::debug!("Balance channel dropped, skipping address update");
                *current = applied;
                return;
            }
            tracing::debug!(address = %address, "Inserted endpoint into balance channel");
            applied.insert(address);
        }

        *current = applied;
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<Change<String, Endpoint>>) -> (Vec<String>, Vec<String>) {
        let mut inserted = Vec::new();
        let mut removed = Vec::new();
        while let Ok(change) = rx.try_recv() {
            match change {
                Change::Insert(key, _) => inserted.push(key),
                Change::Remove(key) => removed.push(key),
            }
        }
        inserted.sort();
        removed.sort();
        (inserted, removed)
    }

    #[tokio::test]
    async fn test_update_sends_only_differences() {
        let (tx, mut rx) = mpsc::channel(16);
        let updater = BalanceUpdater::new(tx, Duration::from_secs(1));

        updater
            .update(Arc::new(vec!["10.0.0.1:9000".into(), "10.0.0.2:9000".into()]))
            .await;
        let (inserted, removed) = drain(&mut rx);
        assert_eq!(inserted, vec!["10.0.0.1:9000", "10.0.0.2:9000"]);
        assert!(removed.is_empty());

        updater
            .update(Arc::new(vec!["10.0.0.2:9000".into(), "10.0.0.3:9000".into()]))
            .await;
        let (inserted, removed) = drain(&mut rx);
        assert_eq!(inserted, vec!["10.0.0.3:9000"]);
        assert_eq!(removed, vec!["10.0.0.1:9000"]);

        updater.update(Arc::new(Vec::new())).await;
        let (inserted, removed) = drain(&mut rx);
        assert!(inserted.is_empty());
        assert_eq!(removed, vec!["10.0.0.2:9000", "10.0.0.3:9000"]);
        assert!(updater.current().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_after_channel_dropped() {
        let (tx, rx) = mpsc::channel(16);
        let updater = BalanceUpdater::new(tx, Duration::from_secs(1));
        drop(rx);

        assert!(updater.is_closed());
        updater.update(Arc::new(vec!["10.0.0.1:9000".into()])).await;
        assert!(updater.current().await.is_empty());
    }
}
