use crate::catalog::{Endpoint, RateLimiter, builtin_catalog};
use crate::config::Settings;
use crate::logging;
use crate::model::{EndpointMeta, Mode, QuotaState, ScheduleState, StatusView};
use crate::policy;
use crate::query;
use crate::scheduler::{GateReason, Phase, Planner};
use crate::stats::Stats;
use crate::store::{QUOTA_KEY, SCHEDULE_KEY, STATS_KEY, Store};
use crate::transport::{FetchError, FetchRequest, Transport, fetch_with_deadline};
use chrono::{DateTime, Local, TimeDelta};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Short and frequent.
    Refresh,
    /// Longer and rarer, kept as redundancy for refresh.
    Processing,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 2] = [TriggerKind::Refresh, TriggerKind::Processing];

    pub fn label(self) -> &'static str {
        match self {
            TriggerKind::Refresh => "refresh",
            TriggerKind::Processing => "processing",
        }
    }

    pub fn earliest_begin(self) -> TimeDelta {
        match self {
            TriggerKind::Refresh => TimeDelta::minutes(15),
            TriggerKind::Processing => TimeDelta::hours(1),
        }
    }

    pub fn deadline(self) -> Duration {
        match self {
            TriggerKind::Refresh => Duration::from_secs(30),
            TriggerKind::Processing => Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Busy,
    Gated(GateReason),
    NoEligibleEndpoint,
    NotDue,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::Busy => "cycle already in flight",
            SkipReason::Gated(reason) => reason.label(),
            SkipReason::NoEligibleEndpoint => "no eligible endpoint",
            SkipReason::NotDue => "not due",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleResult {
    pub executed: bool,
    pub success: Option<bool>,
    pub endpoint: Option<Endpoint>,
    pub skipped: Option<SkipReason>,
    pub cancelled: bool,
    pub next_fire_time: Option<DateTime<Local>>,
}

impl CycleResult {
    fn skipped(reason: SkipReason, next_fire_time: Option<DateTime<Local>>) -> Self {
        Self {
            executed: false,
            success: None,
            endpoint: None,
            skipped: Some(reason),
            cancelled: false,
            next_fire_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManualResult {
    pub query: String,
    pub success: bool,
    pub bytes: u64,
}

struct Inner {
    settings: Settings,
    planner: Planner,
    quota: QuotaState,
    stats: Stats,
    limiter: RateLimiter,
    rng: StdRng,
}

impl Inner {
    /// Quota is checked before the window.
    fn gate_reason(&self, now: DateTime<Local>) -> Option<GateReason> {
        if !self.quota.has_quota(self.settings.daily_limit) {
            Some(GateReason::QuotaExhausted)
        } else if !policy::is_within_active_window(&self.settings.active_window, now) {
            Some(GateReason::OutsideWindow)
        } else {
            None
        }
    }

    fn roll_day(&mut self, now: DateTime<Local>) -> bool {
        let rolled = self.quota.check_and_roll_day(now);
        self.stats.check_and_roll_day(now);
        rolled
    }

    fn replan(&mut self, now: DateTime<Local>) -> Phase {
        let blocked = self.gate_reason(now);
        let Inner {
            settings,
            planner,
            rng,
            ..
        } = self;
        planner.plan(now, blocked, settings, rng)
    }
}

/// Single owner of all scheduling state.
///
/// `inner` serializes every read-modify-write; `cycle` admits one cycle at a
/// time and turns overlapping triggers away as [`SkipReason::Busy`].
pub struct Engine<T: Transport> {
    transport: T,
    store: Store,
    logs_dir: PathBuf,
    inner: Mutex<Inner>,
    cycle: Mutex<()>,
}

impl<T: Transport> Engine<T> {
    pub fn open(store: Store, logs_dir: PathBuf, settings: Settings, transport: T, now: DateTime<Local>) -> Self {
        Self::open_with_rng(store, logs_dir, settings, transport, now, StdRng::from_entropy())
    }

    pub fn open_with_rng(
        store: Store,
        logs_dir: PathBuf,
        settings: Settings,
        transport: T,
        now: DateTime<Local>,
        rng: StdRng,
    ) -> Self {
        let schedule: ScheduleState = load_or_default(&store, &logs_dir, SCHEDULE_KEY, ScheduleState::default);
        let quota = load_or_default(&store, &logs_dir, QUOTA_KEY, || QuotaState::new(now));
        let stats = load_or_default(&store, &logs_dir, STATS_KEY, || Stats::new(now));
        let limiter = RateLimiter::new(builtin_catalog(), settings.cooldown(), settings.failure_threshold);

        Self {
            transport,
            store,
            logs_dir,
            inner: Mutex::new(Inner {
                settings,
                planner: Planner::restore(schedule),
                quota,
                stats,
                limiter,
                rng,
            }),
            cycle: Mutex::new(()),
        }
    }

    pub async fn start(&self, now: DateTime<Local>) -> Phase {
        let mut inner = self.inner.lock().await;
        let was_enabled = inner.planner.is_enabled();
        inner.planner.start();
        inner.roll_day(now);

        let phase = match inner.planner.phase(now) {
            Phase::Planned(at) if was_enabled => Phase::Planned(at),
            Phase::Due(at) if was_enabled => Phase::Due(at),
            Phase::Running(at) if was_enabled => Phase::Running(at),
            _ => inner.replan(now),
        };
        self.persist(&inner);
        self.log_daemon("INFO", &format!("event=enabled phase={}", phase.label()));
        phase
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.planner.stop();
        self.persist(&inner);
        self.log_daemon("INFO", "event=disabled");
    }

    /// One full cycle, regardless of whether the fire time is due.
    pub async fn run_cycle(&self, now: DateTime<Local>, cancel: &CancellationToken) -> CycleResult {
        let Ok(_guard) = self.cycle.try_lock() else {
            return CycleResult::skipped(SkipReason::Busy, None);
        };
        self.run_cycle_locked(now, cancel).await
    }

    /// Resume / foreground-timer entry point.
    ///
    /// Executes at once when the persisted fire time has already passed,
    /// keeps a future plan untouched, and plans when nothing is outstanding.
    pub async fn resume_check(&self, now: DateTime<Local>, cancel: &CancellationToken) -> CycleResult {
        let Ok(_guard) = self.cycle.try_lock() else {
            return CycleResult::skipped(SkipReason::Busy, None);
        };

        {
            let mut inner = self.inner.lock().await;
            if !inner.planner.is_enabled() {
                return CycleResult::skipped(SkipReason::Disabled, None);
            }
            if inner.roll_day(now) {
                self.log_daemon("INFO", "event=day_rollover");
            }

            if let Some(reason) = inner.gate_reason(now) {
                let Inner {
                    settings, planner, ..
                } = &mut *inner;
                planner.set_gate(reason, now, settings);
                self.persist(&inner);
                return CycleResult::skipped(SkipReason::Gated(reason), None);
            }

            match inner.planner.phase(now) {
                Phase::Due(at) => {
                    self.log_daemon("INFO", &format!("event=catch_up fire_time={}", at.to_rfc3339()));
                }
                Phase::Planned(at) => {
                    return CycleResult::skipped(SkipReason::NotDue, Some(at));
                }
                Phase::Running(_) => {
                    return CycleResult::skipped(SkipReason::Busy, None);
                }
                Phase::Idle | Phase::Gated(_) => {
                    let phase = inner.replan(now);
                    self.persist(&inner);
                    let next = inner.planner.state().next_fire_time;
                    self.log_daemon("INFO", &format!("event=planned phase={}", phase.label()));
                    return CycleResult::skipped(SkipReason::NotDue, next);
                }
            }
        }

        self.run_cycle_locked(now, cancel).await
    }

    /// Host trigger entry point; the caller has already resubmitted `kind`.
    ///
    /// Runs a full cycle whenever the engine is enabled and the gates allow
    /// it, whether or not the planned fire time has passed.
    pub async fn handle_trigger(&self, kind: TriggerKind, now: DateTime<Local>, cancel: &CancellationToken) -> CycleResult {
        let result = self.run_cycle(now, cancel).await;
        let detail = match result.skipped {
            Some(reason) => format!("skipped reason=\"{}\"", reason.label()),
            None => format!("executed success={}", result.success.unwrap_or(false)),
        };
        self.log_daemon("INFO", &format!("event=trigger kind={} {detail}", kind.label()));
        result
    }

    async fn run_cycle_locked(&self, now: DateTime<Local>, cancel: &CancellationToken) -> CycleResult {
        let run_id = Uuid::new_v4().to_string();

        let (endpoint, request) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            if !inner.planner.is_enabled() {
                return CycleResult::skipped(SkipReason::Disabled, None);
            }
            inner.roll_day(now);

            if let Some(reason) = inner.gate_reason(now) {
                inner.planner.set_gate(reason, now, &inner.settings);
                self.persist(inner);
                self.log_cycle("INFO", Mode::Scheduled, &run_id, &format!("event=gated reason=\"{}\"", reason.label()));
                return CycleResult::skipped(SkipReason::Gated(reason), None);
            }

            inner.planner.consume();
            let selected = inner.limiter.select(
                &inner.settings.enabled_categories,
                &inner.settings.enabled_languages,
                now,
                &mut inner.rng,
            );

            let Some(endpoint) = selected else {
                inner.replan(now);
                self.persist(inner);
                let next = inner.planner.state().next_fire_time;
                self.log_cycle("WARN", Mode::Scheduled, &run_id, "event=no_endpoint");
                return CycleResult::skipped(SkipReason::NoEligibleEndpoint, next);
            };

            let request = FetchRequest {
                url: endpoint.url.clone(),
                headers: request_headers(&inner.settings),
                timeout: inner.settings.request_timeout(),
            };
            (endpoint, request)
        };

        self.log_cycle(
            "INFO",
            Mode::Scheduled,
            &run_id,
            &format!("event=start endpoint=\"{}\" url={}", endpoint.description, endpoint.url),
        );

        let started = Instant::now();
        let outcome = fetch_with_deadline(&self.transport, &request, cancel).await;
        let finished = now + TimeDelta::from_std(started.elapsed()).unwrap_or_default();

        let (success, bytes, cancelled, message) = match outcome {
            Ok(resp) if resp.is_success() => (true, resp.bytes, false, format!("event=success status={} bytes={}", resp.status, resp.bytes)),
            Ok(resp) => (false, 0, false, format!("event=failed status={}", resp.status)),
            Err(FetchError::Cancelled) => (false, 0, true, "event=cancelled".to_string()),
            Err(err) => (false, 0, false, format!("event=failed message=\"{err}\"")),
        };

        let next_fire_time = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            inner.limiter.record_outcome(&endpoint.url, success, finished);
            inner.stats.record(
                finished,
                &endpoint.description,
                Mode::Scheduled,
                success,
                bytes,
                Some(EndpointMeta::from(&endpoint)),
            );
            inner.quota.increment();
            inner.replan(finished);
            self.persist(inner);
            inner.planner.state().next_fire_time
        };

        self.log_cycle(if success { "INFO" } else { "ERROR" }, Mode::Scheduled, &run_id, &message);

        CycleResult {
            executed: true,
            success: Some(success),
            endpoint: Some(endpoint),
            skipped: None,
            cancelled,
            next_fire_time,
        }
    }

    /// Bypasses gating and quota, and leaves the fire time alone.
    pub async fn manual_search(&self, query: Option<String>, now: DateTime<Local>, cancel: &CancellationToken) -> ManualResult {
        let run_id = Uuid::new_v4().to_string();
        let (query, request) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let query = match query {
                Some(q) if !q.trim().is_empty() => q,
                _ => query::generate_query(&inner.settings.topic_categories, &mut inner.rng),
            };
            let url = reqwest::Url::parse_with_params(&inner.settings.search_url, &[("q", query.as_str())])
                .map(|u| u.to_string())
                .unwrap_or_else(|_| inner.settings.search_url.clone());
            let request = FetchRequest {
                url,
                headers: request_headers(&inner.settings),
                timeout: inner.settings.request_timeout(),
            };
            (query, request)
        };

        self.log_cycle("INFO", Mode::Manual, &run_id, &format!("event=start query=\"{query}\""));
        let outcome = fetch_with_deadline(&self.transport, &request, cancel).await;
        let (success, bytes) = match &outcome {
            Ok(resp) if resp.is_success() => (true, resp.bytes),
            _ => (false, 0),
        };

        {
            let mut inner = self.inner.lock().await;
            inner.stats.record(now, &query, Mode::Manual, success, bytes, None);
            self.persist(&inner);
        }

        let message = match outcome {
            Ok(resp) => format!("event=finished status={} bytes={}", resp.status, resp.bytes),
            Err(err) => format!("event=failed message=\"{err}\""),
        };
        self.log_cycle(if success { "INFO" } else { "ERROR" }, Mode::Manual, &run_id, &message);

        ManualResult { query, success, bytes }
    }

    /// Swap settings; a gated or idle planner is re-evaluated, a live plan is kept.
    pub async fn reload_settings(&self, settings: Settings, now: DateTime<Local>) {
        let mut inner = self.inner.lock().await;
        inner.limiter.set_limits(settings.cooldown(), settings.failure_threshold);
        inner.settings = settings;
        if inner.planner.is_enabled() && matches!(inner.planner.phase(now), Phase::Idle | Phase::Gated(_)) {
            inner.replan(now);
            self.persist(&inner);
        }
    }

    pub async fn reset_stats(&self, now: DateTime<Local>) {
        let mut inner = self.inner.lock().await;
        inner.stats.reset(now);
        self.persist(&inner);
        self.log_daemon("INFO", "event=stats_reset");
    }

    pub async fn wake_at(&self) -> Option<DateTime<Local>> {
        self.inner.lock().await.planner.wake_at()
    }

    pub async fn snapshot(&self, now: DateTime<Local>) -> StatusView {
        let inner = self.inner.lock().await;
        let phase = inner.planner.phase(now);
        StatusView {
            enabled: inner.planner.is_enabled(),
            phase: phase.label(),
            next_fire_time: inner.planner.state().next_fire_time,
            recheck_at: inner.planner.gate().map(|g| g.recheck_at),
            daily_count: inner.quota.daily_count,
            daily_limit: inner.settings.daily_limit,
            within_window: policy::is_within_active_window(&inner.settings.active_window, now),
            window_start_hour: policy::todays_start_hour(&inner.settings.active_window, now),
            stats: inner.stats.clone(),
        }
    }

    fn persist(&self, inner: &Inner) {
        let results = [
            (SCHEDULE_KEY, self.store.save(SCHEDULE_KEY, &inner.planner.persisted())),
            (QUOTA_KEY, self.store.save(QUOTA_KEY, &inner.quota)),
            (STATS_KEY, self.store.save(STATS_KEY, &inner.stats)),
        ];
        for (key, res) in results {
            if let Err(err) = res {
                self.log_daemon("ERROR", &format!("event=persist_failed key={key} message=\"{err:#}\""));
            }
        }
    }

    fn log_daemon(&self, level: &str, message: &str) {
        let _ = logging::log_daemon(&self.logs_dir, level, message);
    }

    fn log_cycle(&self, level: &str, mode: Mode, run_id: &str, message: &str) {
        let _ = logging::log_cycle(&self.logs_dir, level, mode.label(), run_id, message);
    }
}

fn request_headers(settings: &Settings) -> Vec<(String, String)> {
    vec![
        ("User-Agent".to_string(), settings.user_agent.clone()),
        ("Accept".to_string(), "application/json, text/html;q=0.9".to_string()),
    ]
}

fn load_or_default<V: DeserializeOwned>(store: &Store, logs_dir: &std::path::Path, key: &str, default: impl FnOnce() -> V) -> V {
    match store.load(key) {
        Ok(Some(value)) => value,
        Ok(None) => default(),
        Err(err) => {
            let _ = logging::log_daemon(logs_dir, "ERROR", &format!("event=load_failed key={key} message=\"{err:#}\""));
            default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::local;
    use crate::transport::testing::{FakeTransport, Scripted};
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Arc;

    fn open(dir: &Path, settings: Settings, script: Vec<Scripted>, now: DateTime<Local>) -> Engine<FakeTransport> {
        let store = Store::open(dir.join("state")).expect("store");
        Engine::open_with_rng(
            store,
            dir.to_path_buf(),
            settings,
            FakeTransport::with_script(script),
            now,
            StdRng::seed_from_u64(99),
        )
    }

    fn noon() -> DateTime<Local> {
        local(2025, 3, 12, 12, 0)
    }

    #[tokio::test]
    async fn catch_up_runs_overdue_fire_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let now = noon();
        Store::open(dir.path().join("state"))
            .expect("store")
            .save(
                SCHEDULE_KEY,
                &ScheduleState {
                    next_fire_time: Some(now - TimeDelta::hours(1)),
                    is_enabled: true,
                },
            )
            .expect("seed");

        let engine = open(dir.path(), Settings::default(), Vec::new(), now);
        let result = engine.resume_check(now, &CancellationToken::new()).await;

        assert!(result.executed);
        assert_eq!(result.success, Some(true));
        let next = result.next_fire_time.expect("replanned");
        assert!(next > now);
        assert_eq!(engine.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn future_plan_is_left_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = open(dir.path(), Settings::default(), Vec::new(), noon());
        let Phase::Planned(at) = engine.start(noon()).await else {
            panic!("expected planned");
        };

        let result = engine.resume_check(noon() + TimeDelta::minutes(5), &CancellationToken::new()).await;
        assert_eq!(result.skipped, Some(SkipReason::NotDue));
        assert_eq!(result.next_fire_time, Some(at));
        assert_eq!(engine.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn quota_exhaustion_gates_until_midnight() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            daily_limit: 3,
            ..Settings::default()
        };
        let engine = open(dir.path(), settings, Vec::new(), noon());
        engine.start(noon()).await;
        let cancel = CancellationToken::new();

        for i in 0..3 {
            let result = engine.run_cycle(noon() + TimeDelta::minutes(i * 10), &cancel).await;
            assert!(result.executed, "cycle {i}");
            assert_eq!(result.success, Some(true));
        }

        let fourth = engine.run_cycle(noon() + TimeDelta::minutes(40), &cancel).await;
        assert!(!fourth.executed);
        assert_eq!(fourth.skipped, Some(SkipReason::Gated(GateReason::QuotaExhausted)));
        assert_eq!(fourth.skipped.map(|s| s.label()), Some("quota exhausted"));

        let status = engine.snapshot(noon() + TimeDelta::minutes(40)).await;
        assert_eq!(status.next_fire_time, None);
        assert_eq!(status.daily_count, 3);
        assert_eq!(engine.wake_at().await, Some(local(2025, 3, 13, 0, 1)));
        assert_eq!(engine.transport.call_count(), 3);

        let next_day = engine.resume_check(local(2025, 3, 13, 8, 0), &cancel).await;
        assert_eq!(next_day.skipped, Some(SkipReason::NotDue));
        assert!(next_day.next_fire_time.is_some());
        assert_eq!(engine.snapshot(local(2025, 3, 13, 8, 0)).await.daily_count, 0);
    }

    #[tokio::test]
    async fn outside_window_gates_with_short_recheck() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = open(dir.path(), Settings::default(), Vec::new(), noon());
        engine.start(noon()).await;

        let night = local(2025, 3, 12, 23, 30);
        let result = engine.run_cycle(night, &CancellationToken::new()).await;
        assert_eq!(result.skipped, Some(SkipReason::Gated(GateReason::OutsideWindow)));
        assert_eq!(engine.wake_at().await, Some(night + TimeDelta::minutes(10)));
        assert_eq!(engine.snapshot(night).await.daily_count, 0);
        assert_eq!(engine.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn no_eligible_endpoint_replans_without_quota() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            enabled_categories: HashSet::new(),
            ..Settings::default()
        };
        let engine = open(dir.path(), settings, Vec::new(), noon());
        engine.start(noon()).await;

        let result = engine.run_cycle(noon(), &CancellationToken::new()).await;
        assert_eq!(result.skipped, Some(SkipReason::NoEligibleEndpoint));
        assert!(result.next_fire_time.is_some_and(|t| t > noon()));
        let status = engine.snapshot(noon()).await;
        assert_eq!(status.daily_count, 0);
        assert_eq!(status.stats.total_count, 0);
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = open(dir.path(), Settings::default(), vec![Scripted::Status(503, 0), Scripted::Fail], noon());
        engine.start(noon()).await;
        let cancel = CancellationToken::new();

        let first = engine.run_cycle(noon(), &cancel).await;
        assert_eq!(first.success, Some(false));
        let second = engine.run_cycle(noon() + TimeDelta::minutes(1), &cancel).await;
        assert_eq!(second.success, Some(false));

        let status = engine.snapshot(noon() + TimeDelta::minutes(1)).await;
        assert_eq!(status.stats.failure_count, 2);
        assert_eq!(status.stats.success_count, 0);
        assert_eq!(status.daily_count, 2);
        assert!(!status.stats.history[0].success);
        assert!(status.stats.history[0].endpoint.is_some());
    }

    #[tokio::test]
    async fn cancelled_cycle_still_replans() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = open(dir.path(), Settings::default(), vec![Scripted::Hang], noon());
        engine.start(noon()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.run_cycle(noon(), &cancel).await;
        assert!(result.executed);
        assert!(result.cancelled);
        assert_eq!(result.success, Some(false));
        assert!(result.next_fire_time.is_some_and(|t| t > noon()));

        let status = engine.snapshot(noon()).await;
        assert_eq!(status.stats.failure_count, 1);
        assert_eq!(status.daily_count, 1);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(open(dir.path(), Settings::default(), vec![Scripted::Hang], noon()));
        engine.start(noon()).await;

        let cancel = CancellationToken::new();
        let first = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run_cycle(noon(), &cancel).await })
        };

        while engine.transport.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = engine
            .handle_trigger(TriggerKind::Refresh, noon(), &CancellationToken::new())
            .await;
        assert_eq!(second.skipped, Some(SkipReason::Busy));

        cancel.cancel();
        let first = first.await.expect("join");
        assert!(first.cancelled);
        assert_eq!(engine.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn manual_search_bypasses_schedule_and_quota() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            daily_limit: 1,
            ..Settings::default()
        };
        let engine = open(dir.path(), settings, Vec::new(), noon());
        engine.start(noon()).await;
        let before = engine.snapshot(noon()).await.next_fire_time;

        let night = local(2025, 3, 12, 23, 45);
        let result = engine
            .manual_search(Some("sourdough starter".to_string()), night, &CancellationToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.query, "sourdough starter");

        let status = engine.snapshot(night).await;
        assert_eq!(status.next_fire_time, before);
        assert_eq!(status.daily_count, 0);
        assert_eq!(status.stats.history[0].mode, Mode::Manual);
        let calls = engine.transport.calls.lock().expect("calls").clone();
        assert!(calls[0].url.contains("q=sourdough+starter"));
    }

    #[tokio::test]
    async fn stop_clears_plan_and_blocks_cycles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = open(dir.path(), Settings::default(), Vec::new(), noon());
        engine.start(noon()).await;
        engine.stop().await;

        let status = engine.snapshot(noon()).await;
        assert!(!status.enabled);
        assert_eq!(status.next_fire_time, None);
        assert_eq!(engine.wake_at().await, None);

        let result = engine.run_cycle(noon(), &CancellationToken::new()).await;
        assert_eq!(result.skipped, Some(SkipReason::Disabled));
        assert_eq!(engine.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (next, count) = {
            let engine = open(dir.path(), Settings::default(), Vec::new(), noon());
            engine.start(noon()).await;
            let result = engine.run_cycle(noon(), &CancellationToken::new()).await;
            (result.next_fire_time, engine.snapshot(noon()).await.daily_count)
        };

        let reopened = open(dir.path(), Settings::default(), Vec::new(), noon());
        let status = reopened.snapshot(noon()).await;
        assert!(status.enabled);
        assert_eq!(status.next_fire_time, next);
        assert_eq!(status.daily_count, count);
        assert_eq!(status.stats.total_count, 1);
    }

    #[tokio::test]
    async fn reload_reevaluates_gate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = open(dir.path(), Settings::default(), Vec::new(), noon());
        let night = local(2025, 3, 12, 23, 30);
        engine.start(night).await;
        assert!(engine.snapshot(night).await.next_fire_time.is_none());

        let wide = Settings {
            active_window: crate::config::ActiveWindow::Fixed {
                start_hour: 6,
                end_hour: 2,
            },
            ..Settings::default()
        };
        engine.reload_settings(wide, night).await;
        assert!(engine.snapshot(night).await.next_fire_time.is_some());
    }

    #[tokio::test]
    async fn host_trigger_runs_ahead_of_future_plan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = open(dir.path(), Settings::default(), Vec::new(), noon());
        let Phase::Planned(at) = engine.start(noon()).await else {
            panic!("expected planned");
        };

        let later = noon() + TimeDelta::minutes(15);
        assert!(later < at);
        let result = engine
            .handle_trigger(TriggerKind::Refresh, later, &CancellationToken::new())
            .await;

        assert!(result.executed);
        assert_eq!(result.success, Some(true));
        assert!(result.next_fire_time.is_some_and(|t| t > later));
        assert_eq!(engine.transport.call_count(), 1);
        assert_eq!(engine.snapshot(later).await.daily_count, 1);
    }

    #[tokio::test]
    async fn fire_time_stays_on_disk_while_cycle_is_in_flight() {
        let dir = tempfile::tempdir().expect("tempdir");
        let now = noon();
        let overdue = now - TimeDelta::hours(1);
        let seeded = ScheduleState {
            next_fire_time: Some(overdue),
            is_enabled: true,
        };
        Store::open(dir.path().join("state"))
            .expect("store")
            .save(SCHEDULE_KEY, &seeded)
            .expect("seed");

        let engine = Arc::new(open(dir.path(), Settings::default(), vec![Scripted::Hang], now));
        let cancel = CancellationToken::new();
        let cycle = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.resume_check(now, &cancel).await })
        };
        while engine.transport.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Any other write while the fetch hangs must keep the consumed time.
        engine
            .manual_search(Some("tide tables".to_string()), now, &CancellationToken::new())
            .await;
        let on_disk: Option<ScheduleState> = Store::open(dir.path().join("state"))
            .expect("store")
            .load(SCHEDULE_KEY)
            .expect("load");
        assert_eq!(on_disk, Some(seeded));

        let restarted = open(dir.path(), Settings::default(), Vec::new(), now);
        let caught_up = restarted.resume_check(now, &CancellationToken::new()).await;
        assert!(caught_up.executed);

        cancel.cancel();
        let first = cycle.await.expect("join");
        assert!(first.cancelled);
    }

    #[tokio::test]
    async fn store_failure_keeps_memory_authoritative() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = open(dir.path(), Settings::default(), Vec::new(), noon());
        engine.start(noon()).await;
        let cancel = CancellationToken::new();

        let schedule_path = dir.path().join("state").join("schedule.json");
        std::fs::remove_file(&schedule_path).expect("remove schedule");
        std::fs::create_dir(&schedule_path).expect("block schedule");

        let first = engine.run_cycle(noon(), &cancel).await;
        assert!(first.executed);
        assert!(first.next_fire_time.is_some());
        let second = engine.run_cycle(noon() + TimeDelta::minutes(1), &cancel).await;
        assert!(second.executed);
        assert_eq!(engine.snapshot(noon()).await.daily_count, 2);

        let logged: String = std::fs::read_dir(dir.path())
            .expect("read logs")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("daemon-"))
            .map(|e| std::fs::read_to_string(e.path()).expect("read log"))
            .collect();
        assert!(logged.contains("event=persist_failed key=schedule"));

        std::fs::remove_dir(&schedule_path).expect("unblock schedule");
        let third = engine.run_cycle(noon() + TimeDelta::minutes(2), &cancel).await;
        assert!(third.executed);

        let reopened = open(dir.path(), Settings::default(), Vec::new(), noon());
        let status = reopened.snapshot(noon() + TimeDelta::minutes(2)).await;
        assert_eq!(status.next_fire_time, third.next_fire_time);
        assert_eq!(status.daily_count, 3);
        assert_eq!(status.stats.total_count, 3);
    }
}
