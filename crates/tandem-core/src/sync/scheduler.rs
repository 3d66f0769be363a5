//! Background scheduling of reconciliation cycles
//!
//! A single worker task owns the timers and serializes every trigger, so
//! cycles never overlap. Interfaces talk to it through a cloneable
//! [`SchedulerHandle`].

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use super::poller::ChangePoller;
use super::reconciler::{CycleStats, Reconciler};
use crate::config::ScheduleConfig;
use crate::state::SyncState;

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Periodic,
    /// Debounced local mutation
    Mutation,
    /// Device came back online
    Connectivity,
    /// App returned to the foreground
    Visibility,
    Manual,
    /// A peer asked for a cycle
    RemoteRequest,
}

impl Trigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Periodic => "periodic",
            Self::Mutation => "mutation",
            Self::Connectivity => "connectivity",
            Self::Visibility => "visibility",
            Self::Manual => "manual",
            Self::RemoteRequest => "remote_request",
        }
    }
}

/// Published after every cycle the scheduler runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub trigger: Trigger,
    pub stats: CycleStats,
}

type BusyCheck = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug)]
enum Command {
    Mutation,
    Online(bool),
    Visible(bool),
    SyncNow,
    Shutdown,
}

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    config: ScheduleConfig,
    busy: Option<BusyCheck>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, config: ScheduleConfig) -> Self {
        Self {
            reconciler,
            config,
            busy: None,
        }
    }

    /// Postpone scheduled cycles while `check` returns true, e.g. during
    /// an active text selection. Manual requests are never postponed.
    #[must_use]
    pub fn with_busy_check(mut self, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.busy = Some(Arc::new(check));
        self
    }

    /// Start the worker on the current tokio runtime
    pub fn spawn(self) -> SchedulerHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let initial = if self.config.start_online {
            SyncState::Idle
        } else {
            SyncState::Offline
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let (reports_tx, reports_rx) = watch::channel(None);

        let poller = self
            .config
            .poll_interval
            .map(|_| ChangePoller::new(Arc::clone(&self.reconciler)));
        let worker = Worker {
            online: self.config.start_online,
            visible: true,
            reconciler: self.reconciler,
            poller,
            busy: self.busy,
            config: self.config,
            state: state_tx,
            reports: reports_tx,
            debounce_deadline: None,
            retry_deadline: None,
            postponed: None,
        };
        let task = tokio::spawn(worker.run(commands_rx));

        SchedulerHandle {
            commands: commands_tx,
            state: state_rx,
            reports: reports_rx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Cloneable control surface of a running scheduler.
///
/// Every method is fire-and-forget; once the worker has shut down they do
/// nothing.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SyncState>,
    reports: watch::Receiver<Option<CycleReport>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SchedulerHandle {
    /// A local record changed; a cycle follows after the debounce window
    pub fn notify_mutation(&self) {
        self.send(Command::Mutation);
    }

    pub fn set_online(&self, online: bool) {
        self.send(Command::Online(online));
    }

    pub fn set_visible(&self, visible: bool) {
        self.send(Command::Visible(visible));
    }

    /// Run a cycle now, ignoring the busy check
    pub fn sync_now(&self) {
        self.send(Command::SyncNow);
    }

    /// Latest cycle report, `None` until the first cycle ran
    pub fn subscribe(&self) -> watch::Receiver<Option<CycleReport>> {
        self.reports.clone()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Stop the worker and wait for an in-flight cycle to finish
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!("Sync scheduler task failed: {}", error);
            }
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Sync scheduler is not running");
        }
    }
}

struct Worker {
    reconciler: Arc<Reconciler>,
    poller: Option<ChangePoller>,
    busy: Option<BusyCheck>,
    config: ScheduleConfig,
    state: watch::Sender<SyncState>,
    reports: watch::Sender<Option<CycleReport>>,
    online: bool,
    visible: bool,
    debounce_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,
    postponed: Option<Trigger>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut periodic = self.config.sync_interval.map(repeating);
        let mut polling = self.config.poll_interval.map(repeating);
        tracing::info!(
            online = self.online,
            periodic = ?self.config.sync_interval,
            polling = ?self.config.poll_interval,
            "Sync scheduler started"
        );

        loop {
            let debounce = self.debounce_deadline;
            let retry = self.retry_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                () = tick(periodic.as_mut()) => self.fire(Trigger::Periodic).await,
                () = tick(polling.as_mut()) => self.poll().await,
                () = wait_until(debounce) => {
                    self.debounce_deadline = None;
                    self.fire(Trigger::Mutation).await;
                }
                () = wait_until(retry) => {
                    self.retry_deadline = None;
                    if let Some(trigger) = self.postponed.take() {
                        self.fire(trigger).await;
                    }
                }
            }
        }

        self.state.send_replace(SyncState::Offline);
        tracing::info!("Sync scheduler stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Mutation => {
                self.debounce_deadline = Some(Instant::now() + self.config.debounce);
            }
            Command::Online(online) => {
                let was_online = std::mem::replace(&mut self.online, online);
                if !online {
                    self.state.send_replace(SyncState::Offline);
                } else if !was_online {
                    self.state.send_replace(SyncState::Idle);
                    self.fire(Trigger::Connectivity).await;
                }
            }
            Command::Visible(visible) => {
                let was_visible = std::mem::replace(&mut self.visible, visible);
                if visible && !was_visible {
                    self.fire(Trigger::Visibility).await;
                }
            }
            Command::SyncNow => self.fire(Trigger::Manual).await,
            Command::Shutdown => {}
        }
    }

    fn is_busy(&self) -> bool {
        self.busy.as_ref().is_some_and(|check| check())
    }

    async fn fire(&mut self, trigger: Trigger) {
        if !self.online {
            tracing::debug!(?trigger, "Offline, cycle dropped");
            return;
        }
        if trigger != Trigger::Manual && self.is_busy() {
            tracing::debug!(?trigger, "Busy, cycle postponed");
            if self.postponed.is_none() {
                self.postponed = Some(trigger);
            }
            self.retry_deadline = Some(Instant::now() + self.config.busy_retry);
            return;
        }

        self.postponed = None;
        self.retry_deadline = None;
        self.state.send_replace(SyncState::Syncing);
        let stats = self.reconciler.run_cycle().await;
        if !stats.skipped {
            self.state.send_replace(SyncState::after(&stats));
        }
        tracing::debug!(?trigger, skipped = stats.skipped, "Scheduled cycle done");
        self.reports.send_replace(Some(CycleReport { trigger, stats }));
    }

    async fn poll(&mut self) {
        if !self.online || self.is_busy() {
            return;
        }
        let Some(poller) = self.poller.as_mut() else {
            return;
        };
        match poller.poll().await {
            Ok(report) if report.sync_requested => self.fire(Trigger::RemoteRequest).await,
            Ok(_) => {}
            Err(error) => tracing::warn!("Change list poll failed: {}", error),
        }
    }
}

fn repeating(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MemoryBroadcastStore;
    use crate::config::SyncConfig;
    use crate::db::MemoryLocalStore;
    use crate::models::DeviceId;
    use crate::replica::Replica;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    fn device(name: &str, remote: &MemoryBroadcastStore) -> (Replica, Arc<Reconciler>) {
        let store = Arc::new(MemoryLocalStore::new());
        let device_id = DeviceId::from(name);
        let replica = Replica::new(store.clone(), device_id.clone());
        let reconciler = Arc::new(Reconciler::new(
            store,
            Arc::new(remote.clone()),
            SyncConfig::new("test"),
            device_id,
        ));
        (replica, reconciler)
    }

    fn quiet() -> ScheduleConfig {
        ScheduleConfig::default()
            .without_periodic_sync()
            .without_polling()
    }

    async fn next_report(reports: &mut watch::Receiver<Option<CycleReport>>) -> CycleReport {
        reports.changed().await.unwrap();
        reports.borrow_and_update().clone().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_are_debounced_into_one_cycle() {
        let remote = MemoryBroadcastStore::new();
        let (replica, reconciler) = device("dev-a", &remote);
        let handle = Scheduler::new(
            Arc::clone(&reconciler),
            quiet().with_debounce(Duration::from_secs(2)),
        )
        .spawn();
        let replica = replica.with_notifier(handle.clone());
        let mut reports = handle.subscribe();

        replica.create_conversation("one").await.unwrap();
        sleep(Duration::from_millis(500)).await;
        replica.create_conversation("two").await.unwrap();
        sleep(Duration::from_millis(500)).await;
        assert!(!reports.has_changed().unwrap());

        let report = next_report(&mut reports).await;
        assert_eq!(report.trigger, Trigger::Mutation);
        assert_eq!(report.stats.pushed, 2);
        assert_eq!(reconciler.metadata().await.unwrap().sync_version, 1);
        assert_eq!(handle.state(), SyncState::Synced);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_cycles_wait_for_connectivity() {
        let remote = MemoryBroadcastStore::new();
        let (_, reconciler) = device("dev-a", &remote);
        let handle = Scheduler::new(
            reconciler,
            quiet()
                .with_sync_interval(Duration::from_secs(10))
                .starting_offline(),
        )
        .spawn();
        let mut reports = handle.subscribe();
        assert_eq!(handle.state(), SyncState::Offline);

        sleep(Duration::from_secs(35)).await;
        assert!(!reports.has_changed().unwrap());

        handle.set_online(true);
        assert_eq!(next_report(&mut reports).await.trigger, Trigger::Connectivity);
        assert_eq!(next_report(&mut reports).await.trigger, Trigger::Periodic);

        handle.set_online(false);
        handle.shutdown().await;
        assert_eq!(handle.state(), SyncState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_check_postpones_without_losing_cycles() {
        let remote = MemoryBroadcastStore::new();
        let (_, reconciler) = device("dev-a", &remote);
        let busy = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&busy);
        let handle = Scheduler::new(
            reconciler,
            quiet()
                .with_debounce(Duration::from_secs(1))
                .with_busy_retry(Duration::from_secs(1)),
        )
        .with_busy_check(move || flag.load(Ordering::SeqCst))
        .spawn();
        let mut reports = handle.subscribe();

        handle.notify_mutation();
        sleep(Duration::from_secs(5)).await;
        assert!(!reports.has_changed().unwrap());

        busy.store(false, Ordering::SeqCst);
        assert_eq!(next_report(&mut reports).await.trigger, Trigger::Mutation);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sync_ignores_busy_check() {
        let remote = MemoryBroadcastStore::new();
        let (_, reconciler) = device("dev-a", &remote);
        let handle = Scheduler::new(reconciler, quiet())
            .with_busy_check(|| true)
            .spawn();
        let mut reports = handle.subscribe();

        handle.sync_now();
        let report = next_report(&mut reports).await;
        assert_eq!(report.trigger, Trigger::Manual);
        assert!(report.stats.is_clean());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn returning_to_foreground_triggers_a_cycle() {
        let remote = MemoryBroadcastStore::new();
        let (_, reconciler) = device("dev-a", &remote);
        let handle = Scheduler::new(reconciler, quiet()).spawn();
        let mut reports = handle.subscribe();

        handle.set_visible(false);
        sleep(Duration::from_secs(1)).await;
        assert!(!reports.has_changed().unwrap());

        handle.set_visible(true);
        assert_eq!(next_report(&mut reports).await.trigger, Trigger::Visibility);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn peer_sync_request_triggers_a_cycle() {
        let remote = MemoryBroadcastStore::new();
        let (_, reconciler_a) = device("dev-a", &remote);
        let (replica_b, reconciler_b) = device("dev-b", &remote);
        let handle = Scheduler::new(
            reconciler_a,
            quiet().with_poll_interval(Duration::from_secs(1)),
        )
        .spawn();
        let mut reports = handle.subscribe();

        replica_b.create_conversation("From B").await.unwrap();
        reconciler_b.run_cycle().await;
        reconciler_b.request_sync().await.unwrap();

        let report = next_report(&mut reports).await;
        assert_eq!(report.trigger, Trigger::RemoteRequest);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_after_shutdown_are_ignored() {
        let remote = MemoryBroadcastStore::new();
        let (_, reconciler) = device("dev-a", &remote);
        let handle = Scheduler::new(reconciler, quiet()).spawn();

        handle.shutdown().await;
        handle.sync_now();
        handle.notify_mutation();
        handle.shutdown().await;
        assert_eq!(handle.state(), SyncState::Offline);
    }
}
