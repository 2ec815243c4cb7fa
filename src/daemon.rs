use crate::clock::{Clock, SystemClock};
use crate::config::{self, Settings};
use crate::coordinator::{Engine, TriggerKind};
use crate::logging;
use crate::model::DaemonState;
use crate::paths::AppPaths;
use crate::store::Store;
use crate::transport::HttpTransport;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type DaemonEngine = Engine<HttpTransport>;

/// Work handed to a running daemon through `run/requests/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Request {
    Search { query: Option<String> },
    Enable,
    Disable,
    ResetStats,
    RunNow,
    Trigger { kind: TriggerKind },
}

pub fn open_engine(paths: &AppPaths, settings: Settings) -> Result<DaemonEngine> {
    let store = Store::open(&paths.store_dir)?;
    let transport = HttpTransport::new()?;
    Ok(Engine::open(store, paths.logs_dir.clone(), settings, transport, SystemClock.now()))
}

/// Earliest-begin time per host trigger kind.
#[derive(Debug, Clone)]
struct TriggerQueue {
    next: HashMap<TriggerKind, DateTime<Local>>,
}

impl TriggerQueue {
    fn new(now: DateTime<Local>) -> Self {
        let next = TriggerKind::ALL
            .into_iter()
            .map(|kind| (kind, now + kind.earliest_begin()))
            .collect();
        Self { next }
    }

    fn due(&self, now: DateTime<Local>) -> Vec<TriggerKind> {
        TriggerKind::ALL
            .into_iter()
            .filter(|kind| self.next.get(kind).is_none_or(|at| *at <= now))
            .collect()
    }

    fn resubmit(&mut self, kind: TriggerKind, now: DateTime<Local>) -> DateTime<Local> {
        let at = now + kind.earliest_begin();
        self.next.insert(kind, at);
        at
    }
}

pub async fn run_daemon(paths: AppPaths) -> Result<()> {
    paths.ensure_dirs()?;
    if let Some(pid) = read_pid(&paths.pid_file)? {
        if is_pid_running(pid) {
            return Err(anyhow!("daemon is already running with pid {pid}"));
        }
    }

    write_pid(&paths.pid_file)?;
    let _pid_guard = PidGuard {
        path: paths.pid_file.clone(),
    };

    logging::log_daemon(&paths.logs_dir, "INFO", "daemon started")?;
    logging::cleanup_old_logs(&paths.logs_dir, 30)?;

    let mut last_reload_error: Option<String> = None;
    let settings = match config::load_settings(&paths.settings_file) {
        Ok(v) => v,
        Err(err) => {
            let msg = format!("initial load failed: {err:#}");
            logging::log_daemon(&paths.logs_dir, "ERROR", &msg)?;
            last_reload_error = Some(msg);
            Settings::default()
        }
    };

    let engine = Arc::new(open_engine(&paths, settings)?);
    let shutdown = CancellationToken::new();
    let mut triggers = TriggerQueue::new(SystemClock.now());
    let mut tasks = JoinSet::new();

    // App-resume equivalent: a fire time that passed while we were down runs now.
    let mut foreground = Some(spawn_resume(Arc::clone(&engine), shutdown.child_token()));

    let (event_tx, event_rx) = std::sync::mpsc::channel();
    let watcher = setup_watcher(&paths.config_dir, event_tx)?;

    let mut ticker = interval(Duration::from_secs(1));
    let mut cleanup_tick = interval(Duration::from_secs(3600));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if drain_watcher(&event_rx) {
                    match config::load_settings(&paths.settings_file) {
                        Ok(v) => {
                            engine.reload_settings(v, SystemClock.now()).await;
                            last_reload_error = None;
                            logging::log_daemon(&paths.logs_dir, "INFO", "settings reloaded")?;
                        }
                        Err(err) => {
                            let msg = format!("reload failed: {err:#}");
                            last_reload_error = Some(msg.clone());
                            logging::log_daemon(&paths.logs_dir, "ERROR", &msg)?;
                        }
                    }
                }

                while tasks.try_join_next().is_some() {}

                for request in collect_requests(&paths.requests_dir)? {
                    dispatch(request, &engine, &mut tasks, &mut triggers, &shutdown, &paths.logs_dir)?;
                }

                let now = SystemClock.now();
                let idle = foreground.as_ref().is_none_or(|h| h.is_finished());
                if idle && engine.wake_at().await.is_some_and(|at| at <= now) {
                    foreground = Some(spawn_resume(Arc::clone(&engine), shutdown.child_token()));
                }

                for kind in triggers.due(now) {
                    fire_trigger(kind, &engine, &mut tasks, &mut triggers, &shutdown, &paths.logs_dir)?;
                }

                write_state(&paths, &engine, last_reload_error.clone()).await?;
            }
            _ = cleanup_tick.tick() => {
                logging::cleanup_old_logs(&paths.logs_dir, 30)?;
            }
            _ = tokio::signal::ctrl_c() => {
                shutdown.cancel();
                break;
            }
        }
    }

    // Cancelled cycles still record their failure and re-plan before exit.
    if let Some(handle) = foreground {
        let _ = handle.await;
    }
    while tasks.join_next().await.is_some() {}
    drop(watcher);
    logging::log_daemon(&paths.logs_dir, "INFO", "daemon stopped")?;
    Ok(())
}

fn dispatch(
    request: Request,
    engine: &Arc<DaemonEngine>,
    tasks: &mut JoinSet<()>,
    triggers: &mut TriggerQueue,
    shutdown: &CancellationToken,
    logs_dir: &Path,
) -> Result<()> {
    let engine = Arc::clone(engine);
    let cancel = shutdown.child_token();
    match request {
        Request::Trigger { kind } => return fire_trigger(kind, &engine, tasks, triggers, shutdown, logs_dir),
        Request::Search { query } => {
            tasks.spawn(async move {
                engine.manual_search(query, SystemClock.now(), &cancel).await;
            });
        }
        Request::Enable => {
            tasks.spawn(async move {
                engine.start(SystemClock.now()).await;
            });
        }
        Request::Disable => {
            tasks.spawn(async move {
                engine.stop().await;
            });
        }
        Request::ResetStats => {
            tasks.spawn(async move {
                engine.reset_stats(SystemClock.now()).await;
            });
        }
        Request::RunNow => {
            tasks.spawn(async move {
                engine.run_cycle(SystemClock.now(), &cancel).await;
            });
        }
    }
    Ok(())
}

/// Resubmits `kind` before any work so a crash mid-cycle cannot leave the
/// schedule without a pending trigger.
fn fire_trigger(
    kind: TriggerKind,
    engine: &Arc<DaemonEngine>,
    tasks: &mut JoinSet<()>,
    triggers: &mut TriggerQueue,
    shutdown: &CancellationToken,
    logs_dir: &Path,
) -> Result<()> {
    let next = triggers.resubmit(kind, SystemClock.now());
    logging::log_daemon(
        logs_dir,
        "INFO",
        &format!("event=trigger_submitted kind={} earliest={}", kind.label(), next.format("%Y-%m-%d %H:%M:%S")),
    )?;

    let engine = Arc::clone(engine);
    let cancel = shutdown.child_token();
    tasks.spawn(async move {
        let expiry = cancel_after(&cancel, kind.deadline());
        engine.handle_trigger(kind, SystemClock.now(), &cancel).await;
        expiry.abort();
    });
    Ok(())
}

/// Cancel `cancel` once `deadline` elapses; abort the handle when done early.
pub fn cancel_after(cancel: &CancellationToken, deadline: Duration) -> JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        cancel.cancel();
    })
}

fn spawn_resume(engine: Arc<DaemonEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        engine.resume_check(SystemClock.now(), &cancel).await;
    })
}

fn setup_watcher(
    config_dir: &Path,
    event_tx: std::sync::mpsc::Sender<notify::Result<notify::Event>>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = event_tx.send(res);
    })?;
    watcher.watch(config_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn drain_watcher(event_rx: &std::sync::mpsc::Receiver<notify::Result<notify::Event>>) -> bool {
    let mut changed = false;
    while let Ok(event) = event_rx.try_recv() {
        if event.is_ok() {
            changed = true;
        }
    }
    changed
}

fn collect_requests(requests_dir: &Path) -> Result<Vec<Request>> {
    let mut requests = Vec::new();

    for entry in std::fs::read_dir(requests_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }

        let raw = std::fs::read_to_string(&path)?;
        if let Ok(req) = serde_json::from_str::<Request>(&raw) {
            requests.push(req);
        }
        let _ = std::fs::remove_file(path);
    }

    Ok(requests)
}

async fn write_state(paths: &AppPaths, engine: &DaemonEngine, last_reload_error: Option<String>) -> Result<()> {
    let now = SystemClock.now();
    let state = DaemonState {
        updated_at: now,
        pid: std::process::id(),
        running: true,
        last_reload_error,
        status: engine.snapshot(now).await,
    };

    let content = serde_json::to_string_pretty(&state)?;
    std::fs::write(&paths.state_file, content)?;
    Ok(())
}

fn write_pid(path: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = OpenOptions::new().create(true).truncate(true).write(true).open(path)?;
    file.write_all(pid.to_string().as_bytes())?;
    Ok(())
}

fn read_pid(path: &Path) -> Result<Option<i32>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(path)?;
    let pid = s.trim().parse::<i32>().ok();
    Ok(pid)
}

fn is_pid_running(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

struct PidGuard {
    path: std::path::PathBuf,
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub fn daemon_running(paths: &AppPaths) -> Result<Option<i32>> {
    let Some(pid) = read_pid(&paths.pid_file)? else {
        return Ok(None);
    };

    if is_pid_running(pid) {
        Ok(Some(pid))
    } else {
        Ok(None)
    }
}

pub fn submit_request(paths: &AppPaths, request: &Request) -> Result<()> {
    let req_id = Uuid::new_v4().to_string();
    let tmp = paths.requests_dir.join(format!("{req_id}.tmp"));
    std::fs::write(&tmp, serde_json::to_vec(request)?)?;
    std::fs::rename(&tmp, paths.requests_dir.join(format!("{req_id}.json")))?;
    Ok(())
}
