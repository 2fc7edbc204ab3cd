//! Scheduler - 定期制御ループ
//!
//! 動作中のスケジューラごとにループタスクを 1 つ持つ。tick と runner の
//! 終了通知はどちらもそのタスク内で `tokio::sync::Mutex` を取って処理する
//! ので、互いに割り込まない。
//!
//! # フロー（1 tick）
//! 1. 終了判定（Implemented レコードがあれば停止）
//! 2. 期限切れ claim の回収
//! 3. runner の後始末（届いている終了通知を反映）
//! 4. 候補選択（Audit の後回しルール込み）
//! 5. 空きスロットへの dispatch
//! 6. idle 終了判定（有効時のみ）
//! 7. ステータス公開

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::retry::RetryPolicy;
use super::selection::select_candidates;
use crate::domain::{GranuleId, TaskClass, TaskRecord, WorkerId};
use crate::observability::{ActiveRunnerView, ExitReport, StatusSnapshot, StoreCounts};
use crate::ports::{
    Clock, KillSwitch, RunnerExit, RunnerHandle, SchedulerObserver, TaskRunner, TaskStore,
};

/// Content of the record created when the scheduler starts on an empty store
/// and no operator prompt was given.
pub const DEFAULT_BOOTSTRAP: &str = "Assess the project. Read the README and any specs, \
do a gap analysis between what is described and what exists, and create granules for the \
work that is missing. When nothing is left to do, create a granule of class \"Implemented\" \
whose content is the final report.";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_workers: usize,
    pub stale_claim_timeout: Duration,
    pub tick_interval: Duration,
    pub retry: RetryPolicy,
    /// Content of the bootstrap record; `None` uses [`DEFAULT_BOOTSTRAP`].
    pub initial_prompt: Option<String>,
    pub exit_on_idle: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_workers: 3,
            stale_claim_timeout: Duration::from_secs(30 * 60),
            tick_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            initial_prompt: None,
            exit_on_idle: false,
        }
    }
}

/// Lifecycle as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Running,
    /// `report` is set when the scheduler stopped on its own.
    Stopped { report: Option<ExitReport> },
}

impl Phase {
    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Running)
    }
}

struct ActiveRunner {
    task_id: GranuleId,
    class: TaskClass,
    content: String,
    tier: String,
    started_at: DateTime<Utc>,
    kill: KillSwitch,
}

struct RunnerCompletion {
    worker: WorkerId,
    exit: RunnerExit,
}

/// Everything a tick touches. Only ever accessed under the scheduler lock.
pub(crate) struct SchedulerCore {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn TaskRunner>,
    observer: Arc<dyn SchedulerObserver>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,

    next_worker: u64,
    active: BTreeMap<WorkerId, ActiveRunner>,

    phase_tx: watch::Sender<Phase>,
    exits_tx: mpsc::UnboundedSender<RunnerCompletion>,
    exits_rx: mpsc::UnboundedReceiver<RunnerCompletion>,
    exits_notify: Arc<Notify>,
}

impl SchedulerCore {
    fn is_running(&self) -> bool {
        self.phase_tx.borrow().is_running()
    }

    fn allocate_worker_id(&mut self) -> WorkerId {
        let id = WorkerId::new(self.next_worker);
        self.next_worker += 1;
        id
    }

    /// 前回のセッションが残した claim の owner id を再利用しない
    fn seed_worker_ids(&mut self) {
        let highest = self
            .store
            .list()
            .iter()
            .filter_map(TaskRecord::claimed_by)
            .map(|w| w.seq())
            .max();
        if let Some(seq) = highest {
            self.next_worker = self.next_worker.max(seq + 1);
        }
    }

    /// Create the bootstrap record if the store is empty.
    fn bootstrap(&self) {
        if !self.store.list().is_empty() {
            return;
        }
        let content = self
            .settings
            .initial_prompt
            .as_deref()
            .unwrap_or(DEFAULT_BOOTSTRAP);
        let record = self.store.create(TaskClass::BOOTSTRAP, content);
        tracing::info!(task_id = %record.id, class = %record.class, "created bootstrap task");
    }

    pub(crate) async fn tick(&mut self) {
        if !self.is_running() {
            return;
        }

        // 1. exit check
        if let Some(done) = self.store.list().into_iter().find(|r| r.class.is_terminal()) {
            self.finish(ExitReport::Implemented {
                task_id: done.id,
                content: done.content().to_string(),
            });
            return;
        }

        // 2. stale reclamation
        self.store
            .release_stale_claims(self.settings.stale_claim_timeout);

        // 3. runner bookkeeping
        self.drain_exits();

        // 4. selection
        let records = self.store.list();
        let assigned: HashSet<GranuleId> = self.active.values().map(|a| a.task_id).collect();
        let candidates: Vec<TaskRecord> =
            select_candidates(&records, &assigned, self.active.len(), &self.settings.retry)
                .into_iter()
                .cloned()
                .collect();

        // 5. dispatch
        let slots = self.settings.max_workers.saturating_sub(self.active.len());
        let mut dispatched = 0;
        for record in candidates.iter().take(slots) {
            if self.dispatch(record).await {
                dispatched += 1;
            }
        }

        // 6. exit on idle
        if self.settings.exit_on_idle
            && dispatched == 0
            && candidates.is_empty()
            && self.active.is_empty()
            && !records.iter().any(TaskRecord::is_claimed)
        {
            let counts = self.counts();
            self.finish(ExitReport::Idle {
                completed: counts.completed,
                failed: counts.failed,
            });
            return;
        }

        // 7. observers
        let status = self.snapshot();
        tracing::debug!(
            unclaimed = status.counts.unclaimed,
            claimed = status.counts.claimed,
            completed = status.counts.completed,
            failed = status.counts.failed,
            active = status.active.len(),
            "tick"
        );
        self.observer.on_status(&status);
    }

    /// Claim `record` for a fresh worker and launch it. Returns whether a
    /// runner was started.
    async fn dispatch(&mut self, record: &TaskRecord) -> bool {
        let worker = self.allocate_worker_id();
        let claimed = match self.store.claim(record.id, worker) {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::debug!(task_id = %record.id, worker_id = %worker, error = %e, "claim lost, skipping");
                return false;
            }
        };

        let tier = self.settings.retry.tier_for(claimed.retry_count).to_string();
        match self.runner.spawn(worker, &claimed, &tier).await {
            Ok(handle) => {
                let RunnerHandle { exit, kill } = handle;
                self.active.insert(
                    worker,
                    ActiveRunner {
                        task_id: claimed.id,
                        class: claimed.class,
                        content: claimed.content().to_string(),
                        tier: tier.clone(),
                        started_at: self.clock.now(),
                        kill,
                    },
                );
                self.forward_exit(worker, exit);
                tracing::info!(task_id = %claimed.id, worker_id = %worker, class = %claimed.class, tier = %tier, "dispatched");
                true
            }
            Err(e) => {
                tracing::warn!(task_id = %claimed.id, worker_id = %worker, error = %e, "spawn failed");
                self.release_failed(claimed.id, worker, &e.to_string());
                false
            }
        }
    }

    fn forward_exit(&self, worker: WorkerId, exit: tokio::sync::oneshot::Receiver<RunnerExit>) {
        let tx = self.exits_tx.clone();
        let notify = Arc::clone(&self.exits_notify);
        tokio::spawn(async move {
            let exit = RunnerHandle::wait(exit).await;
            // ignore send error: the scheduler has been dropped
            let _ = tx.send(RunnerCompletion { worker, exit });
            notify.notify_one();
        });
    }

    /// Fold every runner exit that has arrived into store state.
    pub(crate) fn drain_exits(&mut self) {
        while let Ok(completion) = self.exits_rx.try_recv() {
            self.handle_exit(completion);
        }
    }

    fn handle_exit(&mut self, RunnerCompletion { worker, exit }: RunnerCompletion) {
        // Runners killed by stop() are no longer tracked.
        let Some(runner) = self.active.remove(&worker) else {
            return;
        };
        match exit.failure_message() {
            Some(message) => {
                tracing::warn!(task_id = %runner.task_id, worker_id = %worker, error = %message, "worker failed");
                self.release_failed(runner.task_id, worker, &message);
            }
            None => {
                tracing::info!(task_id = %runner.task_id, worker_id = %worker, "worker exited");
            }
        }
    }

    fn release_failed(&self, task_id: GranuleId, worker: WorkerId, message: &str) {
        // The worker may have completed or released the task itself, or
        // the claim may have been reclaimed as stale.
        if let Err(e) = self.store.release(task_id, worker, Some(message)) {
            tracing::debug!(task_id = %task_id, worker_id = %worker, error = %e, "release after failure skipped");
        }
    }

    /// 追跡中の runner をすべて kill し、claim を（エラーなしで）返却する
    fn kill_all(&mut self) {
        for (worker, runner) in std::mem::take(&mut self.active) {
            if let Err(e) = runner.kill.kill() {
                tracing::debug!(worker_id = %worker, error = %e, "kill failed");
            }
            match self.store.release(runner.task_id, worker, None) {
                Ok(()) => {
                    tracing::info!(task_id = %runner.task_id, worker_id = %worker, "claim returned on stop")
                }
                Err(e) => {
                    tracing::debug!(task_id = %runner.task_id, worker_id = %worker, error = %e, "claim not returned")
                }
            }
        }
    }

    fn finish(&mut self, report: ExitReport) {
        self.kill_all();
        tracing::info!(?report, "scheduler finished");
        self.observer.on_exit(&report);
        self.phase_tx.send_replace(Phase::Stopped {
            report: Some(report),
        });
    }

    fn counts(&self) -> StoreCounts {
        self.store.counts(self.settings.retry.max_retries)
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        let records = self.store.list();
        let counts = StoreCounts::from_records(&records, self.settings.retry.max_retries);
        let failed = records
            .iter()
            .filter(|r| r.is_unclaimed() && self.settings.retry.is_exhausted(r.retry_count))
            .map(|r| r.id)
            .collect();
        let active = self
            .active
            .iter()
            .map(|(worker, r)| ActiveRunnerView {
                worker_id: *worker,
                task_id: r.task_id,
                class: r.class,
                content: r.content.clone(),
                tier: r.tier.clone(),
                started_at: r.started_at,
            })
            .collect();
        StatusSnapshot {
            counts,
            active,
            failed,
        }
    }
}

/// Handle to the control loop. Cheap to share behind an `Arc`.
pub struct Scheduler {
    core: Arc<Mutex<SchedulerCore>>,
    phase_rx: watch::Receiver<Phase>,
    exits_notify: Arc<Notify>,
    tick_interval: Duration,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn TaskRunner>,
        observer: Arc<dyn SchedulerObserver>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        let (phase_tx, phase_rx) = watch::channel(Phase::Stopped { report: None });
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let exits_notify = Arc::new(Notify::new());
        let tick_interval = settings.tick_interval;
        let core = SchedulerCore {
            store,
            runner,
            observer,
            clock,
            settings,
            next_worker: 1,
            active: BTreeMap::new(),
            phase_tx,
            exits_tx,
            exits_rx,
            exits_notify: Arc::clone(&exits_notify),
        };
        Self {
            core: Arc::new(Mutex::new(core)),
            phase_rx,
            exits_notify,
            tick_interval,
            loop_task: Mutex::new(None),
        }
    }

    /// Stopped -> Running. Seeds an empty store, runs one tick immediately
    /// and starts the periodic loop. No-op if already running.
    pub async fn start(&self) {
        let mut loop_task = self.loop_task.lock().await;
        if self.is_running() {
            return;
        }
        // A loop from an earlier run exits as soon as it sees Stopped.
        if let Some(old) = loop_task.take() {
            let _ = old.await;
        }

        {
            let mut core = self.core.lock().await;
            if core.is_running() {
                return;
            }
            core.phase_tx.send_replace(Phase::Running);
            tracing::info!(
                max_workers = core.settings.max_workers,
                tick_interval = ?self.tick_interval,
                "scheduler started"
            );
            core.seed_worker_ids();
            core.bootstrap();
            core.tick().await;
        }

        if self.is_running() {
            *loop_task = Some(tokio::spawn(run_loop(
                Arc::clone(&self.core),
                self.phase_rx.clone(),
                Arc::clone(&self.exits_notify),
                self.tick_interval,
            )));
        }
    }

    /// Running -> Stopped. Kills every tracked runner (errors ignored),
    /// returns their claims without counting a failure, and forgets them.
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        {
            let mut core = self.core.lock().await;
            core.kill_all();
            if core.is_running() {
                core.phase_tx.send_replace(Phase::Stopped { report: None });
                tracing::info!("scheduler stopped");
            }
        }
        if let Some(task) = self.loop_task.lock().await.take() {
            let _ = task.await;
        }
    }

    /// Run one tick now. A stopped scheduler ignores it.
    pub async fn tick(&self) {
        self.core.lock().await.tick().await;
    }

    pub fn is_running(&self) -> bool {
        self.phase_rx.borrow().is_running()
    }

    pub fn phase(&self) -> Phase {
        self.phase_rx.borrow().clone()
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.core.lock().await.snapshot()
    }

    /// Resolve once the scheduler is stopped, with the exit report if it
    /// stopped on its own.
    pub async fn wait_stopped(&self) -> Option<ExitReport> {
        let mut rx = self.phase_rx.clone();
        loop {
            if let Phase::Stopped { report } = &*rx.borrow_and_update() {
                return report.clone();
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

async fn run_loop(
    core: Arc<Mutex<SchedulerCore>>,
    mut phase_rx: watch::Receiver<Phase>,
    exits_notify: Arc<Notify>,
    tick_interval: Duration,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first interval tick fires at once; start() already ticked.
    ticker.tick().await;

    loop {
        if !phase_rx.borrow_and_update().is_running() {
            break;
        }

        tokio::select! {
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                core.lock().await.tick().await;
            }
            _ = exits_notify.notified() => {
                let mut core = core.lock().await;
                if core.is_running() {
                    core.drain_exits();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{NoopObserver, RunnerControl, RunnerError, SystemClock};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Runner that keeps every control so the test decides when workers exit.
    #[derive(Default)]
    struct HeldRunner {
        controls: StdMutex<Vec<(WorkerId, RunnerControl)>>,
    }

    #[async_trait]
    impl TaskRunner for HeldRunner {
        async fn spawn(
            &self,
            worker: WorkerId,
            _record: &TaskRecord,
            _tier: &str,
        ) -> Result<RunnerHandle, RunnerError> {
            let (handle, control) = RunnerHandle::channel();
            self.controls.lock().unwrap().push((worker, control));
            Ok(handle)
        }
    }

    fn scheduler(store: Arc<MemoryStore>, runner: Arc<HeldRunner>) -> Scheduler {
        let settings = SchedulerSettings {
            tick_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        Scheduler::new(store, runner, Arc::new(NoopObserver), Arc::new(SystemClock), settings)
    }

    #[tokio::test]
    async fn respects_worker_cap() {
        let store = Arc::new(MemoryStore::new());
        for n in 0..5 {
            store.create(TaskClass::Implement, &format!("task {n}"));
        }
        let runner = Arc::new(HeldRunner::default());
        let sched = scheduler(store.clone(), runner.clone());

        sched.start().await;
        assert_eq!(sched.status().await.active.len(), 3);
        assert_eq!(store.counts(3).claimed, 3);

        sched.tick().await;
        assert_eq!(runner.controls.lock().unwrap().len(), 3);
        sched.stop().await;
    }

    #[tokio::test]
    async fn failed_exit_releases_with_error_and_frees_slot() {
        let store = Arc::new(MemoryStore::new());
        let rec = store.create(TaskClass::Implement, "x");
        let runner = Arc::new(HeldRunner::default());
        let sched = scheduler(store.clone(), runner.clone());

        sched.start().await;
        let (_, control) = runner.controls.lock().unwrap().pop().unwrap();
        control.report(RunnerExit::Exited(1));
        tokio::task::yield_now().await;

        // The forwarder wakes the loop, which folds the exit in.
        for _ in 0..50 {
            if store.get(rec.id).unwrap().retry_count == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let after = store.get(rec.id).unwrap();
        assert_eq!(after.retry_count, 1);
        assert_eq!(after.last_error.as_deref(), Some("worker exited with code 1"));
        sched.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_clears_active() {
        let store = Arc::new(MemoryStore::new());
        store.create(TaskClass::Explore, "e");
        let runner = Arc::new(HeldRunner::default());
        let sched = scheduler(store, runner);

        sched.start().await;
        assert_eq!(sched.status().await.active.len(), 1);
        sched.stop().await;
        sched.stop().await;
        assert!(!sched.is_running());
        assert!(sched.status().await.active.is_empty());
        assert_eq!(sched.wait_stopped().await, None);
    }
}
