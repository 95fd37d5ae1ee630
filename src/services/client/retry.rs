use std::time::Duration;

use tokio::time::Instant;

/// 单槽延迟重试
///
/// `schedule` 安排在 `delay` 之后触发一个动作，新的安排覆盖尚未触发的旧安排，
/// 因此待执行的重试至多一个。`fired` 在 select 中被取消时不会丢失已安排的动作。
#[derive(Debug)]
pub struct RetryTimer<A> {
    pending: Option<(Instant, A)>,
}

impl<A> Default for RetryTimer<A> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<A> RetryTimer<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, delay: Duration, action: A) {
        self.pending = Some((Instant::now() + delay, action));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// 等待已安排的动作到期；没有安排时永远挂起
    pub async fn fired(&mut self) -> A {
        let Some(deadline) = self.pending.as_ref().map(|(deadline, _)| *deadline) else {
            return std::future::pending().await;
        };
        tokio::time::sleep_until(deadline).await;
        match self.pending.take() {
            Some((_, action)) => action,
            None => std::future::pending().await,
        }
    }
}
