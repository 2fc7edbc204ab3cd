//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! 不正な設定は `build()` で弾き、何も動き出さないうちに失敗させる。
//!
//! # 学習ポイント
//! - Builder パターン（`self` を受けて返すメソッドチェーン）
//! - 起動時検証（Fail-fast 設計）

use std::sync::Arc;
use std::time::Duration;

use super::retry::RetryPolicy;
use super::scheduler::{Scheduler, SchedulerSettings};
use crate::ports::{Clock, NoopObserver, SchedulerObserver, SystemClock, TaskRunner, TaskStore};

/// # Example
/// ```ignore
/// let scheduler = SchedulerBuilder::new(store, runner)
///     .max_workers(3)
///     .observer(Arc::new(LogObserver::new()))
///     .build()?;
/// scheduler.start().await;
/// ```
pub struct SchedulerBuilder {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn TaskRunner>,
    observer: Arc<dyn SchedulerObserver>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_workers must be at least 1")]
    NoWorkers,

    #[error("max_retries must be at least 1")]
    NoRetries,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("at least one capability tier is required")]
    NoTiers,
}

impl SchedulerBuilder {
    pub fn new(store: Arc<dyn TaskStore>, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            store,
            runner,
            observer: Arc::new(NoopObserver),
            clock: Arc::new(SystemClock),
            settings: SchedulerSettings::default(),
        }
    }

    pub fn settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.settings.max_workers = n;
        self
    }

    pub fn stale_claim_timeout(mut self, timeout: Duration) -> Self {
        self.settings.stale_claim_timeout = timeout;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.settings.tick_interval = interval;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.settings.retry = policy;
        self
    }

    pub fn initial_prompt(mut self, prompt: Option<String>) -> Self {
        self.settings.initial_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn exit_on_idle(mut self, enabled: bool) -> Self {
        self.settings.exit_on_idle = enabled;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SchedulerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        let s = &self.settings;
        if s.max_workers == 0 {
            return Err(BuildError::NoWorkers);
        }
        if s.retry.max_retries == 0 {
            return Err(BuildError::NoRetries);
        }
        if s.tick_interval.is_zero() {
            return Err(BuildError::ZeroDuration("tick_interval"));
        }
        if s.stale_claim_timeout.is_zero() {
            return Err(BuildError::ZeroDuration("stale_claim_timeout"));
        }
        if s.retry.tiers.is_empty() {
            return Err(BuildError::NoTiers);
        }
        Ok(Scheduler::new(
            self.store,
            self.runner,
            self.observer,
            self.clock,
            self.settings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskRecord, WorkerId};
    use crate::ports::{RunnerError, RunnerHandle};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct NeverRunner;

    #[async_trait]
    impl TaskRunner for NeverRunner {
        async fn spawn(
            &self,
            _worker: WorkerId,
            _record: &TaskRecord,
            _tier: &str,
        ) -> Result<RunnerHandle, RunnerError> {
            Err(RunnerError::Spawn("disabled".into()))
        }
    }

    fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new(Arc::new(MemoryStore::new()), Arc::new(NeverRunner))
    }

    #[test]
    fn test_build_success() {
        assert!(builder().build().is_ok());
    }

    #[test]
    fn test_build_rejects_zero_workers() {
        assert_eq!(builder().max_workers(0).build().err(), Some(BuildError::NoWorkers));
    }

    #[test]
    fn test_build_rejects_zero_interval() {
        assert_eq!(
            builder().tick_interval(Duration::ZERO).build().err(),
            Some(BuildError::ZeroDuration("tick_interval"))
        );
    }

    #[test]
    fn test_build_rejects_empty_tiers() {
        let err = builder()
            .retry_policy(RetryPolicy::new(3, Vec::new()))
            .build()
            .err();
        assert_eq!(err, Some(BuildError::NoTiers));
    }

    #[test]
    fn blank_initial_prompt_falls_back_to_default() {
        let b = builder().initial_prompt(Some("   ".into()));
        assert_eq!(b.settings.initial_prompt, None);
    }
}
