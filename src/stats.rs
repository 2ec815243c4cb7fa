use crate::clock;
use crate::model::{EndpointMeta, Mode, SearchRecord};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const HISTORY_LIMIT: usize = 100;
const WEEK: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_count: u64,
    pub today_count: u64,
    pub last_reset_day: NaiveDate,
    /// Oldest first; the last slot is today.
    pub weekly_counts: [u64; WEEK],
    /// Newest first.
    pub history: Vec<SearchRecord>,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_bytes: u64,
}

impl Stats {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            total_count: 0,
            today_count: 0,
            last_reset_day: clock::calendar_day(now),
            weekly_counts: [0; WEEK],
            history: Vec::new(),
            success_count: 0,
            failure_count: 0,
            total_bytes: 0,
        }
    }

    pub fn reset(&mut self, now: DateTime<Local>) {
        *self = Self::new(now);
    }

    /// Shift one slot per elapsed day, dropping the oldest.
    pub fn check_and_roll_day(&mut self, now: DateTime<Local>) -> bool {
        let today = clock::calendar_day(now);
        if self.last_reset_day >= today {
            return false;
        }

        let elapsed = (today - self.last_reset_day).num_days().clamp(1, WEEK as i64) as usize;
        self.weekly_counts.rotate_left(elapsed);
        for slot in &mut self.weekly_counts[WEEK - elapsed..] {
            *slot = 0;
        }
        self.today_count = 0;
        self.last_reset_day = today;
        true
    }

    pub fn record(
        &mut self,
        now: DateTime<Local>,
        description: &str,
        mode: Mode,
        success: bool,
        data_size: u64,
        endpoint: Option<EndpointMeta>,
    ) -> &SearchRecord {
        self.check_and_roll_day(now);

        self.total_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_bytes = self.total_bytes.saturating_add(data_size);
        if mode == Mode::Scheduled {
            self.today_count += 1;
        }
        self.weekly_counts[WEEK - 1] += 1;

        self.history.insert(
            0,
            SearchRecord {
                id: Uuid::new_v4(),
                description: description.to_string(),
                timestamp: now,
                mode,
                success,
                data_size: (success || data_size > 0).then_some(data_size),
                endpoint,
            },
        );
        self.history.truncate(HISTORY_LIMIT);
        &self.history[0]
    }

    /// Percentage of attempts that succeeded.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.success_count + self.failure_count;
        if attempts == 0 {
            return 0.0;
        }
        self.success_count as f64 / attempts as f64 * 100.0
    }
}

pub fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b < 1024.0 {
        format!("{bytes} B")
    } else if b < 1024.0 * 1024.0 {
        format!("{:.1} KB", b / 1024.0)
    } else if b < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", b / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", b / (1024.0 * 1024.0 * 1024.0))
    }
}
