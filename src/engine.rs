//! Central engine: discovery passes, snapshot state and the refresh scheduler.
//!
//! All mutable process-wide state lives here, owned by one [`SweepEngine`]
//! instance: the latest snapshot, the schedule flags and the pending timer.
//! Refreshes are single-flight — a request arriving while a pass is running
//! sets a queued-rerun flag that is honored exactly once when the pass
//! completes, so rapid triggers coalesce instead of stacking.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{ConfigStore, Preferences, RefreshInterval};
use crate::error::Result;
use crate::killer::ProcessKiller;
use crate::models::{BulkKillOutcome, Category, KillOutcome, ListeningProcess, RuleSet};
use crate::scanner::{ListenerSource, LsofScanner};

/// Seam to the presentation collaborator (tray menu, notifications).
///
/// All methods default to no-ops so consumers only implement what they show.
pub trait EventSink: Send + Sync {
    /// A discovery pass completed; `processes` is the new full snapshot.
    fn snapshot_published(&self, processes: &[ListeningProcess]) {
        let _ = processes;
    }

    /// A single termination attempt concluded.
    fn kill_completed(&self, outcome: &KillOutcome) {
        let _ = outcome;
    }

    /// A kill-all run concluded.
    fn bulk_kill_completed(&self, outcome: &BulkKillOutcome) {
        let _ = outcome;
    }
}

/// Sink that discards every event.
pub struct NullSink;

impl EventSink for NullSink {}

/// Scheduler state. `in_flight` is true only for the duration of one pass;
/// `queued_rerun` transitions true→false by running exactly one extra pass;
/// once `quitting` is set no timer is ever armed again.
struct ScheduleState {
    timer: Option<JoinHandle<()>>,
    in_flight: bool,
    queued_rerun: bool,
    quitting: bool,
}

impl ScheduleState {
    fn new() -> Self {
        Self {
            timer: None,
            in_flight: false,
            queued_rerun: false,
            quitting: false,
        }
    }
}

/// Discovery, classification and termination engine with a self-rearming
/// refresh timer.
///
/// Generic over the listener source so tests can substitute a fake; the
/// default engine uses [`LsofScanner`].
pub struct SweepEngine<S: ListenerSource> {
    source: S,
    killer: ProcessKiller,
    rules: RuleSet,
    store: ConfigStore,
    prefs: RwLock<Preferences>,
    latest: RwLock<Vec<ListeningProcess>>,
    schedule: Mutex<ScheduleState>,
    sink: Arc<dyn EventSink>,
    weak: Weak<SweepEngine<S>>,
}

/// Engine wired to the real lsof-backed scanner.
pub type DefaultEngine = SweepEngine<LsofScanner>;

impl DefaultEngine {
    /// Create an engine with the lsof scanner, default rules and the default
    /// config path.
    pub async fn with_defaults(sink: Arc<dyn EventSink>) -> Result<Arc<Self>> {
        let store = ConfigStore::new()?;
        Self::new(LsofScanner::new(), RuleSet::default(), store, sink).await
    }
}

impl<S: ListenerSource + 'static> SweepEngine<S> {
    /// Create an engine around an explicit source, rule table and store.
    pub async fn new(
        source: S,
        rules: RuleSet,
        store: ConfigStore,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        let prefs = store.load_or_init().await;
        Ok(Arc::new_cyclic(|weak| Self {
            source,
            killer: ProcessKiller::new(),
            rules,
            store,
            prefs: RwLock::new(prefs),
            latest: RwLock::new(Vec::new()),
            schedule: Mutex::new(ScheduleState::new()),
            sink,
            weak: weak.clone(),
        }))
    }

    /// Run the initial discovery pass and arm the timer.
    pub async fn start(&self) {
        self.trigger_refresh().await;
        self.schedule_next();
    }

    // MARK: - Discovery

    /// One full discovery pass over every enabled category.
    ///
    /// Distinct scan targets are enumerated once each; a pid seen under two
    /// targets is classified on first sight only. Records whose resolved
    /// category is disabled are dropped.
    async fn scan_all(&self) -> Vec<ListeningProcess> {
        let (enabled, only_current_user) = {
            let prefs = self.prefs.read();
            (
                prefs.enabled_categories().into_iter().collect::<HashSet<_>>(),
                !prefs.all_users,
            )
        };

        let targets: BTreeSet<&'static str> =
            enabled.iter().map(Category::scan_target).collect();

        let mut seen: HashSet<u32> = HashSet::new();
        let mut result = Vec::new();

        for target in targets {
            for found in self.source.discover(target, only_current_user).await {
                if !seen.insert(found.pid) {
                    continue;
                }
                let command_line = self.source.command_line(found.pid).await;
                let category = self.rules.resolve(target, command_line.as_deref());
                if !enabled.contains(&category) {
                    continue;
                }
                result.push(ListeningProcess {
                    pid: found.pid,
                    user: found.user,
                    ports: found.ports,
                    category,
                });
            }
        }

        result
    }

    /// Run a discovery pass now, single-flight.
    ///
    /// Returns `false` when a pass was already in flight (the request is
    /// queued and will run exactly once after the current pass), `true` when
    /// this call performed the pass itself. Each completed pass replaces the
    /// snapshot wholesale and publishes it to the sink.
    pub async fn trigger_refresh(&self) -> bool {
        {
            let mut state = self.schedule.lock();
            if state.in_flight {
                debug!("refresh already in flight, queuing rerun");
                state.queued_rerun = true;
                return false;
            }
            state.in_flight = true;
        }

        loop {
            let snapshot = self.scan_all().await;
            debug!(count = snapshot.len(), "discovery pass completed");
            *self.latest.write() = snapshot.clone();
            self.sink.snapshot_published(&snapshot);

            let rerun = {
                let mut state = self.schedule.lock();
                if state.queued_rerun {
                    state.queued_rerun = false;
                    true
                } else {
                    state.in_flight = false;
                    false
                }
            };
            if !rerun {
                break;
            }
            debug!("running queued refresh");
        }

        true
    }

    /// The latest completed snapshot.
    pub fn latest_processes(&self) -> Vec<ListeningProcess> {
        self.latest.read().clone()
    }

    /// Number of processes in the latest snapshot.
    pub fn process_count(&self) -> usize {
        self.latest.read().len()
    }

    /// Whether a discovery pass is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.schedule.lock().in_flight
    }

    // MARK: - Scheduling

    /// Arm a one-shot timer for the configured interval.
    ///
    /// Any pending timer is cancelled first. The timer is deliberately not a
    /// repeating primitive: it fires once, runs a refresh, then re-arms, so a
    /// slow pass can never overlap the next fire. A paused interval or a
    /// quitting engine arms nothing.
    pub fn schedule_next(&self) {
        let mut state = self.schedule.lock();
        if state.quitting {
            return;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let interval = self.prefs.read().refresh_ms;
        let Some(delay) = interval.as_duration() else {
            debug!("refresh paused, timer disarmed");
            return;
        };

        let Some(engine) = self.weak.upgrade() else {
            return;
        };
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if engine.schedule.lock().quitting {
                return;
            }
            engine.trigger_refresh().await;
            engine.schedule_next();
        }));
    }

    /// Whether a timer is currently armed.
    pub fn is_scheduled(&self) -> bool {
        self.schedule
            .lock()
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop scheduling: cancel any pending timer and refuse to arm new ones.
    /// An in-flight pass finishes but does not reschedule.
    pub fn shutdown(&self) {
        let mut state = self.schedule.lock();
        state.quitting = true;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    // MARK: - Termination

    /// Terminate one process, publish the outcome, then refresh out-of-band.
    pub async fn kill_process(&self, pid: u32) -> KillOutcome {
        let outcome = self.killer.terminate(pid).await;
        self.sink.kill_completed(&outcome);
        self.trigger_refresh().await;
        self.schedule_next();
        outcome
    }

    /// Terminate every process in the current snapshot, sequentially.
    ///
    /// Operates on a copy of the snapshot taken up front; processes that
    /// exit mid-run are tolerated as successes.
    pub async fn kill_all(&self) -> BulkKillOutcome {
        let snapshot = self.latest_processes();
        let outcome = self.killer.terminate_all(&snapshot).await;
        self.sink.bulk_kill_completed(&outcome);
        self.trigger_refresh().await;
        self.schedule_next();
        outcome
    }

    // MARK: - Preferences

    /// Current preferences (cached copy).
    pub fn preferences(&self) -> Preferences {
        self.prefs.read().clone()
    }

    /// Change the refresh cadence, persist, then refresh and re-arm.
    pub async fn set_refresh_interval(&self, interval: RefreshInterval) -> Result<()> {
        let snapshot = {
            let mut prefs = self.prefs.write();
            prefs.refresh_ms = interval.sanitized();
            prefs.clone()
        };
        self.persist_and_rescan(snapshot).await
    }

    /// Toggle the all-users scan scope, persist, then refresh and re-arm.
    pub async fn set_all_users(&self, all_users: bool) -> Result<()> {
        let snapshot = {
            let mut prefs = self.prefs.write();
            prefs.all_users = all_users;
            prefs.clone()
        };
        self.persist_and_rescan(snapshot).await
    }

    /// Enable or disable one category, persist, then refresh and re-arm.
    pub async fn set_category_enabled(&self, category: Category, enabled: bool) -> Result<()> {
        let snapshot = {
            let mut prefs = self.prefs.write();
            prefs.categories.insert(category, enabled);
            prefs.clone()
        };
        self.persist_and_rescan(snapshot).await
    }

    async fn persist_and_rescan(&self, prefs: Preferences) -> Result<()> {
        if let Err(e) = self.store.save(&prefs).await {
            warn!(error = %e, "failed to persist preferences");
            return Err(e);
        }
        self.trigger_refresh().await;
        self.schedule_next();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscoveredListener;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory listener source with a configurable per-scan delay.
    struct FakeSource {
        delay: Duration,
        listeners: HashMap<&'static str, Vec<DiscoveredListener>>,
        command_lines: HashMap<u32, String>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                delay: Duration::ZERO,
                listeners: HashMap::new(),
                command_lines: HashMap::new(),
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new()
            }
        }

        fn listener(mut self, target: &'static str, pid: u32, ports: Vec<u16>) -> Self {
            self.listeners.entry(target).or_default().push(DiscoveredListener {
                pid,
                user: Some("dev".to_string()),
                ports,
            });
            self
        }

        fn command(mut self, pid: u32, line: &str) -> Self {
            self.command_lines.insert(pid, line.to_string());
            self
        }
    }

    impl ListenerSource for FakeSource {
        async fn discover(
            &self,
            scan_target: &str,
            _only_current_user: bool,
        ) -> Vec<DiscoveredListener> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.listeners.get(scan_target).cloned().unwrap_or_default()
        }

        async fn command_line(&self, pid: u32) -> Option<String> {
            self.command_lines.get(&pid).cloned()
        }
    }

    /// Sink that counts published snapshots.
    #[derive(Default)]
    struct CountingSink {
        snapshots: AtomicUsize,
        kills: AtomicUsize,
    }

    impl EventSink for CountingSink {
        fn snapshot_published(&self, _processes: &[ListeningProcess]) {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
        }

        fn kill_completed(&self, _outcome: &KillOutcome) {
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn test_engine(
        source: FakeSource,
    ) -> (TempDir, Arc<SweepEngine<FakeSource>>, Arc<CountingSink>) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::with_path(dir.path().join("config.json"));
        let sink = Arc::new(CountingSink::default());
        let engine = SweepEngine::new(source, RuleSet::default(), store, sink.clone())
            .await
            .unwrap();
        (dir, engine, sink)
    }

    #[tokio::test]
    async fn scan_all_classifies_and_publishes_snapshot() {
        let source = FakeSource::new()
            .listener("node", 100, vec![3000])
            .listener("node", 200, vec![5173])
            .listener("bun", 300, vec![8080])
            .command(100, "node server.js")
            .command(200, "/usr/local/bin/node ./node_modules/.bin/vite")
            .command(300, "bun run dev");
        let (_dir, engine, sink) = test_engine(source).await;

        assert!(engine.trigger_refresh().await);

        let snapshot = engine.latest_processes();
        assert_eq!(snapshot.len(), 3);
        let by_pid: HashMap<u32, Category> =
            snapshot.iter().map(|p| (p.pid, p.category)).collect();
        assert_eq!(by_pid[&100], Category::Node);
        assert_eq!(by_pid[&200], Category::Vite);
        assert_eq!(by_pid[&300], Category::Bun);
        assert_eq!(sink.snapshots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pid_seen_under_two_targets_is_kept_once() {
        // Same pid reported for both scan targets; first-seen wins and the
        // record appears exactly once.
        let source = FakeSource::new()
            .listener("bun", 100, vec![8080])
            .listener("node", 100, vec![8080])
            .listener("node", 200, vec![3000])
            .command(100, "bun run dev")
            .command(200, "node server.js");
        let (_dir, engine, _sink) = test_engine(source).await;

        engine.trigger_refresh().await;
        let snapshot = engine.latest_processes();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.iter().filter(|p| p.pid == 100).count(),
            1
        );
    }

    #[tokio::test]
    async fn disabled_category_is_filtered_after_classification() {
        // Vite disabled: a vite process discovered under the node target must
        // be dropped even though node scanning found it.
        let source = FakeSource::new()
            .listener("node", 100, vec![5173])
            .listener("node", 200, vec![3000])
            .command(100, "node ./node_modules/.bin/vite")
            .command(200, "node server.js");
        let (_dir, engine, _sink) = test_engine(source).await;
        engine
            .set_category_enabled(Category::Vite, false)
            .await
            .unwrap();

        let snapshot = engine.latest_processes();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].pid, 200);
        assert_eq!(snapshot[0].category, Category::Node);
        engine.shutdown();
    }

    #[tokio::test]
    async fn rapid_triggers_coalesce_into_exactly_two_passes() {
        let source = FakeSource::with_delay(Duration::from_millis(60));
        let (_dir, engine, sink) = test_engine(source).await;

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.trigger_refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(15)).await;

        // Both of these arrive mid-pass: queued once, coalesced.
        assert!(!engine.trigger_refresh().await);
        assert!(!engine.trigger_refresh().await);

        assert!(first.await.unwrap());
        assert!(!engine.is_refreshing());
        assert_eq!(sink.snapshots.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timer_rearms_after_each_fire() {
        let (_dir, engine, sink) = test_engine(FakeSource::new()).await;
        engine
            .set_refresh_interval(RefreshInterval::Millis(25))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        // The setter ran one pass; the timer must have fired at least twice
        // more and re-armed itself each time.
        assert!(sink.snapshots.load(Ordering::SeqCst) >= 3);
        assert!(engine.is_scheduled());
        engine.shutdown();
        assert!(!engine.is_scheduled());
    }

    #[tokio::test]
    async fn paused_interval_arms_no_timer() {
        let (_dir, engine, _sink) = test_engine(FakeSource::new()).await;
        engine
            .set_refresh_interval(RefreshInterval::Paused)
            .await
            .unwrap();
        assert!(!engine.is_scheduled());

        // A manual refresh still works while paused.
        assert!(engine.trigger_refresh().await);
    }

    #[tokio::test]
    async fn shutdown_prevents_rearming() {
        let (_dir, engine, sink) = test_engine(FakeSource::new()).await;
        engine.shutdown();
        engine.schedule_next();
        assert!(!engine.is_scheduled());

        // In-flight work still completes after quitting is set.
        engine.trigger_refresh().await;
        assert_eq!(sink.snapshots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn kill_process_publishes_outcome_and_refreshes() {
        let (_dir, engine, sink) = test_engine(FakeSource::new()).await;
        let outcome = engine.kill_process(999_999_997).await;

        assert!(outcome.succeeded);
        assert_eq!(sink.kills.load(Ordering::SeqCst), 1);
        // The out-of-band refresh after the kill published a snapshot.
        assert_eq!(sink.snapshots.load(Ordering::SeqCst), 1);
        engine.shutdown();
    }
}
