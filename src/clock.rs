use chrono::{DateTime, Datelike, Days, Local, LocalResult, NaiveDate, TimeDelta, TimeZone, Timelike};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Local calendar day of an instant. Quota and stats both roll on this.
pub fn calendar_day(at: DateTime<Local>) -> NaiveDate {
    at.date_naive()
}

pub fn hour_of(at: DateTime<Local>) -> u32 {
    at.hour()
}

/// 1 = Monday .. 7 = Sunday.
pub fn weekday_number(at: DateTime<Local>) -> u8 {
    at.weekday().number_from_monday() as u8
}

/// Start of the next local day plus `offset`.
pub fn next_local_midnight(at: DateTime<Local>, offset: TimeDelta) -> DateTime<Local> {
    let tomorrow = at
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or_else(|| at.date_naive());
    start_of_day(tomorrow) + offset
}

fn start_of_day(date: NaiveDate) -> DateTime<Local> {
    let mut minute = 0;
    while minute < 24 * 60 {
        let naive = date.and_hms_opt(minute / 60, minute % 60, 0);
        if let Some(naive) = naive {
            match Local.from_local_datetime(&naive) {
                LocalResult::Single(dt) => return dt,
                LocalResult::Ambiguous(dt, _) => return dt,
                LocalResult::None => {}
            }
        }
        minute += 1;
    }
    Local.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

#[cfg(test)]
pub(crate) fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
    match Local.with_ymd_and_hms(y, m, d, h, min, 0) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None => panic!("non-existent local time {y}-{m}-{d} {h}:{min}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_is_monday_based() {
        // 2025-01-13 is a Monday
        assert_eq!(weekday_number(local(2025, 1, 13, 12, 0)), 1);
        assert_eq!(weekday_number(local(2025, 1, 19, 12, 0)), 7);
    }

    #[test]
    fn next_midnight_plus_offset() {
        let at = local(2025, 1, 15, 22, 30);
        let next = next_local_midnight(at, TimeDelta::minutes(1));
        assert_eq!(calendar_day(next), NaiveDate::from_ymd_opt(2025, 1, 16).unwrap());
        assert_eq!(hour_of(next), 0);
        assert_eq!(next.minute(), 1);
    }

    #[test]
    fn next_midnight_crosses_year() {
        let at = local(2025, 12, 31, 23, 59);
        let next = next_local_midnight(at, TimeDelta::zero());
        assert_eq!(calendar_day(next), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }
}
