use crate::cli::{Cli, Command, TriggerArg};
use crate::clock::{Clock, SystemClock};
use crate::config;
use crate::coordinator::{CycleResult, TriggerKind};
use crate::daemon::{self, Request};
use crate::model::{DaemonState, Mode};
use crate::paths::AppPaths;
use crate::stats::{Stats, format_bytes};
use crate::store::{STATS_KEY, Store};
use anyhow::{Context, Result, anyhow};
use chrono::Local;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process::Stdio;
use tokio_util::sync::CancellationToken;

pub async fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::new(&cli.base_dir)?;
    paths.ensure_dirs()?;

    match cli.command.unwrap_or(Command::Status) {
        Command::Version => version(),
        Command::Start => start(&paths),
        Command::Stop => stop(&paths),
        Command::Status => status(&paths),
        Command::History { tail } => history(&paths, tail),
        Command::Logs { tail } => logs(&paths, tail),
        Command::Search { query } => submit_or_inline(&paths, Request::Search { query }).await,
        Command::Enable => submit_or_inline(&paths, Request::Enable).await,
        Command::Disable => submit_or_inline(&paths, Request::Disable).await,
        Command::Trigger { kind } => {
            let kind = match kind {
                TriggerArg::Refresh => TriggerKind::Refresh,
                TriggerArg::Processing => TriggerKind::Processing,
            };
            submit_or_inline(&paths, Request::Trigger { kind }).await
        }
        Command::ResetStats => submit_or_inline(&paths, Request::ResetStats).await,
        Command::RunNow => submit_or_inline(&paths, Request::RunNow).await,
        Command::Config => show_config(&paths),
        Command::Daemon => daemon::run_daemon(paths).await,
    }
}

fn version() -> Result<()> {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    Ok(())
}

fn start(paths: &AppPaths) -> Result<()> {
    if let Some(pid) = daemon::daemon_running(paths)? {
        println!("daemon is already running (pid={pid})");
        return Ok(());
    }

    let exe = std::env::current_exe().context("resolve current exe")?;
    let child = std::process::Command::new(exe)
        .arg("--base-dir")
        .arg(&paths.base_dir)
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn daemon")?;

    println!("daemon started (pid={})", child.id());
    Ok(())
}

fn stop(paths: &AppPaths) -> Result<()> {
    let Some(pid) = daemon::daemon_running(paths)? else {
        println!("daemon is not running");
        return Ok(());
    };

    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid),
        Some(nix::sys::signal::Signal::SIGINT),
    )
    .context("failed to send SIGINT")?;
    println!("stop signal sent to pid={pid}");
    Ok(())
}

fn status(paths: &AppPaths) -> Result<()> {
    if let Some(pid) = daemon::daemon_running(paths)? {
        println!("daemon: running (pid={pid})");
    } else {
        println!("daemon: stopped");
    }

    if !paths.state_file.exists() {
        println!("state: unavailable");
        return Ok(());
    }

    let state = read_state(paths)?;
    let view = &state.status;
    let fmt = |t: Option<chrono::DateTime<Local>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!("updated_at: {}", state.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!("enabled: {}", view.enabled);
    println!("phase: {}", view.phase);
    println!("next_fire_time: {}", fmt(view.next_fire_time));
    println!("recheck_at: {}", fmt(view.recheck_at));
    match (view.within_window, view.window_start_hour) {
        (true, _) => println!("window: open"),
        (false, Some(hour)) => println!("window: closed, resumes at {hour}:00"),
        (false, None) => println!("window: day disabled in schedule"),
    }
    let limit = if view.daily_limit == 0 {
        "unlimited".to_string()
    } else {
        view.daily_limit.to_string()
    };
    println!("today: {}/{}", view.daily_count, limit);
    print_totals(&view.stats);
    if let Some(err) = &state.last_reload_error {
        println!("last_reload_error: {err}");
    }
    Ok(())
}

fn history(paths: &AppPaths, tail: usize) -> Result<()> {
    let store = Store::open(&paths.store_dir)?;
    let Some(stats) = store.load::<Stats>(STATS_KEY)? else {
        println!("no history recorded");
        return Ok(());
    };

    print_totals(&stats);
    for record in stats.history.iter().take(tail) {
        let target = record
            .endpoint
            .as_ref()
            .map(|e| e.url.as_str())
            .unwrap_or("-");
        println!(
            "{} mode={} success={} bytes={} description=\"{}\" url={}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.mode.label(),
            record.success,
            record.data_size.unwrap_or(0),
            record.description,
            target
        );
    }
    Ok(())
}

fn print_totals(stats: &Stats) {
    println!(
        "total={} today={} success={} failed={} success_rate={:.1}% data={}",
        stats.total_count,
        stats.today_count,
        stats.success_count,
        stats.failure_count,
        stats.success_rate(),
        format_bytes(stats.total_bytes)
    );
    let week: Vec<String> = stats.weekly_counts.iter().map(|c| c.to_string()).collect();
    println!("last 7 days: {}", week.join(" "));
}

fn logs(paths: &AppPaths, tail: usize) -> Result<()> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&paths.logs_dir)? {
        let entry = entry?;
        if entry.path().is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by_key(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split_once('-').map(|(_, date)| date.to_string()))
            .unwrap_or_default()
    });

    let Some(latest) = files.last() else {
        println!("no logs found");
        return Ok(());
    };

    let date = latest
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split_once('-').map(|(_, d)| d.to_string()))
        .ok_or_else(|| anyhow!("no log file"))?;

    let mut lines = Vec::new();
    for path in files.iter().filter(|p| p.to_string_lossy().ends_with(&date)) {
        let reader = BufReader::new(File::open(path)?);
        lines.extend(reader.lines().collect::<std::result::Result<Vec<_>, _>>()?);
    }
    lines.sort();

    let start = lines.len().saturating_sub(tail);
    for line in &lines[start..] {
        println!("{line}");
    }

    Ok(())
}

fn show_config(paths: &AppPaths) -> Result<()> {
    let settings = config::load_settings(&paths.settings_file)?;
    if !paths.settings_file.exists() {
        config::save_settings(&paths.settings_file, &settings)?;
        println!("wrote default settings");
    }
    println!("settings_file: {}", paths.settings_file.display());
    println!("window: {}", settings.active_window.label());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn submit_or_inline(paths: &AppPaths, request: Request) -> Result<()> {
    let force_inline = std::env::var("NOISED_FORCE_INLINE").ok().as_deref() == Some("1");
    if daemon::daemon_running(paths)?.is_some() && !force_inline {
        daemon::submit_request(paths, &request)?;
        println!("request submitted: {}", serde_json::to_string(&request)?);
        return Ok(());
    }

    let settings = config::load_settings(&paths.settings_file)?;
    let engine = daemon::open_engine(paths, settings)?;
    let cancel = CancellationToken::new();
    let now = SystemClock.now();

    match request {
        Request::Search { query } => {
            let result = engine.manual_search(query, now, &cancel).await;
            println!(
                "mode={} query=\"{}\" success={} bytes={}",
                Mode::Manual.label(),
                result.query,
                result.success,
                result.bytes
            );
        }
        Request::Enable => {
            let phase = engine.start(now).await;
            println!("enabled phase={}", phase.label());
        }
        Request::Disable => {
            engine.stop().await;
            println!("disabled");
        }
        Request::ResetStats => {
            engine.reset_stats(now).await;
            println!("stats reset");
        }
        Request::Trigger { kind } => {
            let expiry = daemon::cancel_after(&cancel, kind.deadline());
            let result = engine.handle_trigger(kind, now, &cancel).await;
            expiry.abort();
            print_cycle(kind.label(), &result);
        }
        Request::RunNow => {
            let result = engine.run_cycle(now, &cancel).await;
            print_cycle("run-now", &result);
        }
    }
    Ok(())
}

fn print_cycle(source: &str, result: &CycleResult) {
    let next = result
        .next_fire_time
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    if !result.executed {
        let reason = result.skipped.map(|r| r.label()).unwrap_or("-");
        println!("source={source} skipped=\"{reason}\" next={next}");
        return;
    }
    let endpoint = result.endpoint.as_ref().map(|e| e.description.as_str()).unwrap_or("-");
    println!(
        "source={source} endpoint=\"{endpoint}\" success={} cancelled={} next={next}",
        result.success.unwrap_or(false),
        result.cancelled
    );
}

fn read_state(paths: &AppPaths) -> Result<DaemonState> {
    let raw = std::fs::read_to_string(&paths.state_file)?;
    let state = serde_json::from_str(&raw).context("parse state file")?;
    Ok(state)
}
