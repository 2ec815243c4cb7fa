use crate::catalog::{Category, Endpoint, Language};
use crate::stats::Stats;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub next_fire_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub is_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub daily_count: u32,
    pub last_reset_day: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Manual,
    Scheduled,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMeta {
    pub url: String,
    pub category: Category,
    pub language: Option<Language>,
}

impl From<&Endpoint> for EndpointMeta {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            url: endpoint.url.clone(),
            category: endpoint.category,
            language: endpoint.language,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: Uuid,
    pub description: String,
    pub timestamp: DateTime<Local>,
    pub mode: Mode,
    pub success: bool,
    pub data_size: Option<u64>,
    pub endpoint: Option<EndpointMeta>,
}

/// Snapshot written by the daemon for `status` and `history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub updated_at: DateTime<Local>,
    pub pid: u32,
    pub running: bool,
    pub last_reload_error: Option<String>,
    pub status: StatusView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    pub enabled: bool,
    pub phase: String,
    pub next_fire_time: Option<DateTime<Local>>,
    pub recheck_at: Option<DateTime<Local>>,
    pub daily_count: u32,
    pub daily_limit: u32,
    pub within_window: bool,
    /// Start hour of today's window; `None` when today is disabled.
    pub window_start_hour: Option<u32>,
    pub stats: Stats,
}
