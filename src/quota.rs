use crate::clock;
use crate::model::QuotaState;
use chrono::{DateTime, Local};

impl QuotaState {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            daily_count: 0,
            last_reset_day: clock::calendar_day(now),
        }
    }

    /// Zero the counter when `now` falls on a later calendar day.
    pub fn check_and_roll_day(&mut self, now: DateTime<Local>) -> bool {
        let today = clock::calendar_day(now);
        if self.last_reset_day < today {
            self.daily_count = 0;
            self.last_reset_day = today;
            return true;
        }
        false
    }

    /// `limit == 0` is unlimited.
    pub fn has_quota(&self, limit: u32) -> bool {
        limit == 0 || self.daily_count < limit
    }

    pub fn increment(&mut self) {
        self.daily_count = self.daily_count.saturating_add(1);
    }
}
