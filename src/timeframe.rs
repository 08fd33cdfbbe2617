//! Reporting window helpers.
//!
//! Every helper returns an inclusive `[start, end]` pair bounded to
//! 00:00:00 and 23:59:59, matching the second-resolution order timestamps
//! the statistics engine filters on. Weeks start on Monday; quarters are
//! the fixed calendar quarters.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(23, 59, 59)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN))
}

fn day_window(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    (start_of_day(date), end_of_day(date))
}

fn month_window(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let first = date.with_day(1).unwrap_or(date);
    let last = first
        .checked_add_months(Months::new(1))
        .map(|next| next - Duration::days(1))
        .unwrap_or(first);
    (start_of_day(first), end_of_day(last))
}

/// `<today> 00:00:00` to `<today> 23:59:59`.
pub fn today(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    day_window(now.date())
}

pub fn yesterday(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    day_window(now.date() - Duration::days(1))
}

/// Monday 00:00:00 to Sunday 23:59:59 of the current week.
pub fn this_week(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let monday =
        now.date() - Duration::days(i64::from(now.date().weekday().num_days_from_monday()));
    (start_of_day(monday), end_of_day(monday + Duration::days(6)))
}

pub fn last_week(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    this_week(now - Duration::days(7))
}

/// First to last day of the current month.
pub fn this_month(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    month_window(now.date())
}

pub fn last_month(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let first_of_this = now.date().with_day(1).unwrap_or(now.date());
    month_window(first_of_this - Duration::days(1))
}

/// Window of a calendar quarter: 1 = Jan–Mar, 2 = Apr–Jun, 3 = Jul–Sep,
/// 4 = Oct–Dec.
pub fn quarter_window(year: i32, quarter: u32) -> (NaiveDateTime, NaiveDateTime) {
    let quarter = quarter.clamp(1, 4);
    let start_month = 3 * (quarter - 1) + 1;
    let first = NaiveDate::from_ymd_opt(year, start_month, 1).expect("valid quarter start");
    let last = first
        .checked_add_months(Months::new(3))
        .map(|next| next - Duration::days(1))
        .unwrap_or(first);
    (start_of_day(first), end_of_day(last))
}

fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}

pub fn this_quarter(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    quarter_window(now.year(), quarter_of(now.date()))
}

pub fn last_quarter(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let back = now
        .date()
        .checked_sub_months(Months::new(3))
        .unwrap_or(now.date());
    quarter_window(back.year(), quarter_of(back))
}
