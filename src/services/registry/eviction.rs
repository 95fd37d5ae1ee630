use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::service::Registry;
use super::types::Instance;

fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

impl Registry {
    /// 启动扫描淘汰与期望续约数重算两个定时任务
    pub fn start_schedulers(self: &Arc<Self>, tracker: &TaskTracker, shutdown: CancellationToken) {
        let scan_interval = self.config.scan_interval();
        let reseek_interval = self.config.reseek_interval();

        let registry = self.clone();
        let token = shutdown.clone();
        tracker.spawn(
            async move {
                let start = Instant::now() + scan_interval;
                let mut interval = tokio::time::interval_at(start, scan_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            tracing::debug!("Executing scan-evict cycle...");
                            registry.scan_evict();
                        }
                    }
                }
                tracing::info!("Evictor stopped");
            }
            .instrument(tracing::info_span!(parent: &self.span, "evictor")),
        );

        let registry = self.clone();
        tracker.spawn(
            async move {
                let start = Instant::now() + reseek_interval;
                let mut interval = tokio::time::interval_at(start, reseek_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => registry.reseek_need_count(),
                    }
                }
                tracing::info!("Need-count reseek stopped");
            }
            .instrument(tracing::info_span!(parent: &self.span, "reseek")),
        );
    }

    /// 结束当前统计窗口并执行一次淘汰
    pub fn scan_evict(&self) -> usize {
        self.census().reset_count();
        self.evict_at(crate::utils::now_nanos())
    }

    /// 按实例总数重算期望续约数
    pub fn reseek_need_count(&self) {
        let total = self.total_instances();
        self.census().seek_need_count(total);
        tracing::debug!(
            total_instances = total,
            need_count = self.census().need_count(),
            "Reseeked need count"
        );
    }

    /// 以给定时间（纳秒）为准淘汰过期实例，返回实际淘汰数量
    ///
    /// 软过期实例只在非保护状态下淘汰，硬过期实例总是淘汰。
    /// 单轮最多淘汰 `total - floor(total × ratio)` 个，候选超出上限时随机挑选。
    pub fn evict_at(&self, now: i64) -> usize {
        let protected = self.census().protected_status();
        let soft_expiry = nanos(self.config.soft_expiry());
        let hard_expiry = nanos(self.config.hard_expiry());

        let mut total = 0usize;
        let mut expired: Vec<Instance> = Vec::new();
        for app in self.applications() {
            for instance in app.list_instances() {
                total += 1;
                let elapsed = now.saturating_sub(instance.renew_timestamp);
                if (!protected && elapsed > soft_expiry) || elapsed > hard_expiry {
                    expired.push(instance);
                }
            }
        }

        if expired.is_empty() {
            if protected {
                tracing::debug!(
                    threshold = self.census().threshold(),
                    latest_count = self.census().latest_count(),
                    "Self-preservation active, no hard-expired instances"
                );
            }
            return 0;
        }

        let limit = eviction_limit(total, self.config.self_protect_ratio);
        let candidates = expired.len();
        let selected: &mut [Instance] = if candidates > limit {
            let (chosen, _) = expired.partial_shuffle(&mut rand::thread_rng(), limit);
            chosen
        } else {
            &mut expired
        };

        tracing::info!(
            total_instances = total,
            candidates = candidates,
            limit = limit,
            protected = protected,
            "Evicting expired instances"
        );

        let mut evicted = 0;
        for instance in selected.iter() {
            match self.cancel(
                &instance.segment,
                &instance.service_name,
                &instance.ip,
                instance.port,
            ) {
                Ok(_) => {
                    evicted += 1;
                    tracing::warn!(
                        segment = %instance.segment,
                        service_name = %instance.service_name,
                        address = %instance.address(),
                        "Instance evicted due to renew timeout"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        segment = %instance.segment,
                        service_name = %instance.service_name,
                        address = %instance.address(),
                        error = %e,
                        "Failed to evict instance, skipping"
                    );
                }
            }
        }
        evicted
    }
}

/// 单轮淘汰上限：total - floor(total × ratio)，即 ceil(total × (1 - ratio))
pub fn eviction_limit(total: usize, ratio: f64) -> usize {
    let protected = (total as f64 * ratio).floor() as usize;
    total.saturating_sub(protected)
}
