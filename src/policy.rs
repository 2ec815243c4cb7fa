use crate::clock;
use crate::config::ActiveWindow;
use chrono::{DateTime, Local};

/// Whether execution is allowed at `now` under `window`.
///
/// Fixed windows wrap past midnight when `start_hour > end_hour`. Weekly
/// entries are a plain `[start, end)` range with no wraparound, so an
/// overnight weekly entry never matches.
pub fn is_within_active_window(window: &ActiveWindow, now: DateTime<Local>) -> bool {
    let hour = clock::hour_of(now);
    match window {
        ActiveWindow::Fixed {
            start_hour,
            end_hour,
        } => hour_in_range(hour, *start_hour, *end_hour),
        ActiveWindow::Weekly { days } => {
            let today = clock::weekday_number(now);
            match days.iter().find(|d| d.day_of_week == today) {
                Some(day) if day.enabled => hour >= day.start_hour && hour < day.end_hour,
                _ => false,
            }
        }
    }
}

/// Start hour of today's window, or `None` when today is disabled.
pub fn todays_start_hour(window: &ActiveWindow, now: DateTime<Local>) -> Option<u32> {
    match window {
        ActiveWindow::Fixed { start_hour, .. } => Some(*start_hour),
        ActiveWindow::Weekly { days } => {
            let today = clock::weekday_number(now);
            days.iter()
                .find(|d| d.day_of_week == today && d.enabled)
                .map(|d| d.start_hour)
        }
    }
}

fn hour_in_range(hour: u32, start: u32, end: u32) -> bool {
    if start > end {
        hour >= start || hour < end
    } else {
        hour >= start && hour < end
    }
}
