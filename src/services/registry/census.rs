use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::RegistryConfig;

/// 自我保护统计
///
/// `count` 是当前扫描窗口内成功续约的次数，每次扫描时转存到 `latest_count`。
/// `need_count` 是按当前实例总数推算出的一个窗口内应有的续约次数，
/// `threshold = need_count × ratio`。实际续约数低于阈值时进入保护状态，
/// 此时只淘汰超过硬过期窗口的实例。
#[derive(Debug)]
pub struct Census {
    count: AtomicI64,
    latest_count: AtomicI64,
    need_count: Mutex<i64>,
    // f64 的位模式
    threshold: AtomicU64,
    renews_per_window: i64,
    ratio: f64,
}

impl Census {
    pub fn new(scan_interval: Duration, renew_interval: Duration, ratio: f64) -> Self {
        let renews_per_window = if renew_interval.is_zero() {
            1
        } else {
            (scan_interval.as_secs_f64() / renew_interval.as_secs_f64()) as i64
        };

        Self {
            count: AtomicI64::new(0),
            latest_count: AtomicI64::new(0),
            need_count: Mutex::new(0),
            threshold: AtomicU64::new(0f64.to_bits()),
            renews_per_window,
            ratio,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(
            config.scan_interval(),
            config.renew_interval(),
            config.self_protect_ratio,
        )
    }

    /// 成功续约一次
    pub fn incr_count(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// 结束当前窗口：记录本窗口续约数并清零
    pub fn reset_count(&self) {
        let count = self.count.swap(0, Ordering::AcqRel);
        self.latest_count.store(count, Ordering::Release);
    }

    pub fn incr_need_count(&self) {
        self.update_need_count(|need| need + self.renews_per_window);
    }

    pub fn decr_need_count(&self) {
        self.update_need_count(|need| (need - self.renews_per_window).max(0));
    }

    /// 按实例总数重算期望续约数，修正增减累计的偏差
    pub fn seek_need_count(&self, total_instances: usize) {
        let total = i64::try_from(total_instances).unwrap_or(i64::MAX);
        self.update_need_count(|_| total.saturating_mul(self.renews_per_window));
    }

    fn update_need_count(&self, f: impl FnOnce(i64) -> i64) {
        let mut need = self.need_count.lock().unwrap_or_else(|e| e.into_inner());
        *need = f(*need);
        let threshold = *need as f64 * self.ratio;
        self.threshold.store(threshold.to_bits(), Ordering::Release);
    }

    pub fn need_count(&self) -> i64 {
        *self.need_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold.load(Ordering::Acquire))
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn latest_count(&self) -> i64 {
        self.latest_count.load(Ordering::Acquire)
    }

    /// 上个窗口的续约数低于阈值时返回 true
    pub fn protected_status(&self) -> bool {
        self.threshold() > self.latest_count() as f64
    }
}

impl Default for Census {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_follows_need_count() {
        let census = Census::default();
        for _ in 0..5 {
            census.incr_need_count();
        }

        assert_eq!(census.need_count(), 10);
        assert_eq!(census.threshold(), 5.0 * (60.0 / 30.0) * 0.8);

        census.decr_need_count();
        assert_eq!(census.need_count(), 8);
        assert_eq!(census.threshold(), 8.0 * 0.8);
    }

    #[test]
    fn test_need_count_never_negative() {
        let census = Census::default();
        census.decr_need_count();
        assert_eq!(census.need_count(), 0);
        assert_eq!(census.threshold(), 0.0);
        assert!(!census.protected_status());
    }

    #[test]
    fn test_protected_when_renewals_fall_below_threshold() {
        let census = Census::default();
        for _ in 0..10 {
            census.incr_need_count();
        }
        // 阈值 16
        for _ in 0..15 {
            census.incr_count();
        }
        census.reset_count();
        assert_eq!(census.latest_count(), 15);
        assert_eq!(census.count(), 0);
        assert!(census.protected_status());

        for _ in 0..16 {
            census.incr_count();
        }
        census.reset_count();
        assert!(!census.protected_status());
    }

    #[test]
    fn test_seek_need_count_resets_drift() {
        let census = Census::default();
        for _ in 0..3 {
            census.incr_need_count();
        }
        census.seek_need_count(7);
        assert_eq!(census.need_count(), 14);
        assert_eq!(census.threshold(), 14.0 * 0.8);
    }
}
