use crate::catalog::{Category, Language};
use crate::query::TopicCategory;
use anyhow::{Context, Result, anyhow, bail};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const DAY_SECONDS: u64 = 24 * 60 * 60;
const MAX_INTERVAL_SECONDS: u64 = 7 * DAY_SECONDS;
const MAX_TIMEOUT_SECONDS: u64 = 10 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default)]
    pub active_window: ActiveWindow,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_min_interval")]
    pub min_interval_seconds: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_categories")]
    pub enabled_categories: HashSet<Category>,
    #[serde(default = "default_languages")]
    pub enabled_languages: HashSet<Language>,
    #[serde(default = "default_topics")]
    pub topic_categories: HashSet<TopicCategory>,
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_policy_recheck")]
    pub policy_recheck_seconds: u64,
    #[serde(default = "default_quota_recheck_offset")]
    pub quota_recheck_offset_seconds: u64,
}

/// Either one window applied every day, or one entry per weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActiveWindow {
    Fixed { start_hour: u32, end_hour: u32 },
    Weekly { days: Vec<DaySchedule> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    /// 1 = Monday .. 7 = Sunday
    pub day_of_week: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for ActiveWindow {
    fn default() -> Self {
        ActiveWindow::Fixed {
            start_hour: 7,
            end_hour: 23,
        }
    }
}

impl ActiveWindow {
    pub fn label(&self) -> String {
        match self {
            ActiveWindow::Fixed {
                start_hour,
                end_hour,
            } => format!("{start_hour}:00-{end_hour}:00 daily"),
            ActiveWindow::Weekly { days } => {
                let enabled = days.iter().filter(|d| d.enabled).count();
                format!("weekly({enabled}/7 days)")
            }
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            active_window: ActiveWindow::default(),
            cooldown_seconds: default_cooldown(),
            failure_threshold: default_failure_threshold(),
            min_interval_seconds: default_min_interval(),
            max_interval_seconds: default_max_interval(),
            request_timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
            enabled_categories: default_categories(),
            enabled_languages: default_languages(),
            topic_categories: default_topics(),
            search_url: default_search_url(),
            policy_recheck_seconds: default_policy_recheck(),
            quota_recheck_offset_seconds: default_quota_recheck_offset(),
        }
    }
}

impl Settings {
    pub fn cooldown(&self) -> TimeDelta {
        bounded_seconds(self.cooldown_seconds, DAY_SECONDS)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_seconds.clamp(1, MAX_TIMEOUT_SECONDS))
    }

    pub fn policy_recheck(&self) -> TimeDelta {
        bounded_seconds(self.policy_recheck_seconds, DAY_SECONDS)
    }

    pub fn quota_recheck_offset(&self) -> TimeDelta {
        bounded_seconds(self.quota_recheck_offset_seconds, DAY_SECONDS)
    }

    /// Jitter bounds in seconds, clamped to what validation accepts.
    pub fn interval_bounds(&self) -> (u64, u64) {
        let min = self.min_interval_seconds.clamp(1, MAX_INTERVAL_SECONDS);
        let max = self.max_interval_seconds.clamp(min, MAX_INTERVAL_SECONDS);
        (min, max)
    }
}

/// Values come from validated settings, so `cap` only guards hand-built ones.
fn bounded_seconds(seconds: u64, cap: u64) -> TimeDelta {
    TimeDelta::seconds(seconds.min(cap) as i64)
}

/// Missing file means defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read settings file {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("parse settings file {}", path.display()))?;
    validate_settings(&settings).context("invalid settings")?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    validate_settings(settings)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content).with_context(|| format!("write settings file {}", path.display()))?;
    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    match &settings.active_window {
        ActiveWindow::Fixed {
            start_hour,
            end_hour,
        } => {
            validate_hour("active_window.start_hour", *start_hour)?;
            validate_hour("active_window.end_hour", *end_hour)?;
        }
        ActiveWindow::Weekly { days } => {
            if days.len() != 7 {
                bail!("active_window.days must have 7 entries");
            }
            let mut seen = HashSet::new();
            for day in days {
                if !(1..=7).contains(&day.day_of_week) {
                    bail!("day_of_week must be 1..=7");
                }
                if !seen.insert(day.day_of_week) {
                    bail!("duplicate day_of_week: {}", day.day_of_week);
                }
                validate_hour("start_hour", day.start_hour)?;
                validate_hour("end_hour", day.end_hour)?;
            }
        }
    }

    if settings.min_interval_seconds == 0 {
        bail!("min_interval_seconds must be positive");
    }
    if settings.min_interval_seconds > settings.max_interval_seconds {
        bail!("min_interval_seconds must not exceed max_interval_seconds");
    }
    validate_at_most("max_interval_seconds", settings.max_interval_seconds, MAX_INTERVAL_SECONDS)?;
    if settings.cooldown_seconds == 0 {
        bail!("cooldown_seconds must be positive");
    }
    validate_at_most("cooldown_seconds", settings.cooldown_seconds, DAY_SECONDS)?;
    if settings.failure_threshold == 0 {
        bail!("failure_threshold must be positive");
    }
    if settings.request_timeout_seconds == 0 {
        bail!("request_timeout_seconds must be positive");
    }
    validate_at_most("request_timeout_seconds", settings.request_timeout_seconds, MAX_TIMEOUT_SECONDS)?;
    if settings.policy_recheck_seconds == 0 {
        bail!("policy_recheck_seconds must be positive");
    }
    validate_at_most("policy_recheck_seconds", settings.policy_recheck_seconds, DAY_SECONDS)?;
    validate_at_most("quota_recheck_offset_seconds", settings.quota_recheck_offset_seconds, DAY_SECONDS)?;
    reqwest::Url::parse(&settings.search_url).map_err(|e| anyhow!("invalid search_url: {e}"))?;

    Ok(())
}

fn validate_at_most(field: &str, value: u64, max: u64) -> Result<()> {
    if value > max {
        bail!("{field} must be at most {max}");
    }
    Ok(())
}

fn validate_hour(field: &str, hour: u32) -> Result<()> {
    if hour > 23 {
        bail!("{field} must be 0..=23");
    }
    Ok(())
}

fn default_enabled() -> bool {
    true
}

fn default_daily_limit() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_min_interval() -> u64 {
    3600
}

fn default_max_interval() -> u64 {
    21600
}

fn default_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn default_categories() -> HashSet<Category> {
    Category::ALL.into_iter().collect()
}

fn default_languages() -> HashSet<Language> {
    Language::ALL.into_iter().collect()
}

fn default_topics() -> HashSet<TopicCategory> {
    TopicCategory::ALL.into_iter().collect()
}

fn default_search_url() -> String {
    "https://duckduckgo.com/html/".to_string()
}

fn default_policy_recheck() -> u64 {
    600
}

fn default_quota_recheck_offset() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&dir.path().join("settings.json")).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.daily_limit, 3);
        assert_eq!(settings.cooldown_seconds, 300);
        assert_eq!(settings.failure_threshold, 3);
        assert_eq!(
            settings.active_window,
            ActiveWindow::Fixed {
                start_hour: 7,
                end_hour: 23
            }
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"daily_limit": 0, "active_window": {"type": "fixed", "start_hour": 22, "end_hour": 6}}"#,
        )
        .expect("write");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.daily_limit, 0);
        assert_eq!(
            settings.active_window,
            ActiveWindow::Fixed {
                start_hour: 22,
                end_hour: 6
            }
        );
        assert_eq!(settings.min_interval_seconds, 3600);
        assert_eq!(settings.enabled_languages.len(), Language::ALL.len());
    }

    #[test]
    fn rejects_out_of_range_hour() {
        let settings = Settings {
            active_window: ActiveWindow::Fixed {
                start_hour: 24,
                end_hour: 6,
            },
            ..Settings::default()
        };
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn rejects_duplicate_weekday() {
        let mut days: Vec<DaySchedule> = (1..=7)
            .map(|d| DaySchedule {
                day_of_week: d,
                enabled: true,
                start_hour: 8,
                end_hour: 20,
            })
            .collect();
        days[6].day_of_week = 1;
        let settings = Settings {
            active_window: ActiveWindow::Weekly { days },
            ..Settings::default()
        };
        let err = validate_settings(&settings).expect_err("duplicate");
        assert!(err.to_string().contains("duplicate day_of_week"));
    }

    #[test]
    fn rejects_inverted_interval() {
        let settings = Settings {
            min_interval_seconds: 7200,
            max_interval_seconds: 3600,
            ..Settings::default()
        };
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn rejects_huge_durations() {
        let intervals = Settings {
            min_interval_seconds: 10_000_000_000_000_000,
            max_interval_seconds: 10_000_000_000_000_000,
            ..Settings::default()
        };
        let err = validate_settings(&intervals).expect_err("interval");
        assert!(err.to_string().contains("max_interval_seconds"));

        let cooldown = Settings {
            cooldown_seconds: u64::MAX,
            ..Settings::default()
        };
        let err = validate_settings(&cooldown).expect_err("cooldown");
        assert!(err.to_string().contains("cooldown_seconds"));
    }

    #[test]
    fn duration_helpers_never_go_negative() {
        let settings = Settings {
            cooldown_seconds: u64::MAX,
            policy_recheck_seconds: u64::MAX,
            min_interval_seconds: u64::MAX,
            max_interval_seconds: u64::MAX,
            ..Settings::default()
        };
        assert_eq!(settings.cooldown(), TimeDelta::days(1));
        assert_eq!(settings.policy_recheck(), TimeDelta::days(1));
        assert_eq!(settings.interval_bounds(), (MAX_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config").join("settings.json");
        let settings = Settings {
            daily_limit: 9,
            ..Settings::default()
        };
        save_settings(&path, &settings).expect("save");
        assert_eq!(load_settings(&path).expect("load"), settings);
    }
}
