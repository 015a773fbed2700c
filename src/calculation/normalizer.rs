use jiff::Timestamp;
use jiff::civil::{Date, DateTime};
use jiff::tz::TimeZone;

use crate::config::columns::{PERIOD_END, PERIOD_START, TIME_INTERVAL};
use crate::io::line_item::RawLineItem;

/// The canonical rendering of every date dimension, `YYYY-MM-DD HH:MM:SS`.
const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fields derived from a single line item's date columns.
///
/// `None` is the null marker: the column was absent or couldn't be parsed. Normalizing never
/// fails, so a broken date on one row can't abort a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedDates {
    pub event_date: Option<DateTime>,
    pub period_start: Option<DateTime>,
    pub period_end: Option<DateTime>,
}

pub fn normalize(item: &RawLineItem) -> NormalizedDates {
    NormalizedDates {
        event_date: interval_start(item.get(TIME_INTERVAL)).and_then(parse_date_time),
        period_start: item.get(PERIOD_START).and_then(parse_date_time),
        period_end: item.get(PERIOD_END).and_then(parse_date_time),
    }
}

/// Picks `start` out of `start/end`. Without a slash the whole value is the start.
pub fn interval_start(interval: Option<&str>) -> Option<&str> {
    let start = interval?.split('/').next()?.trim();

    (!start.is_empty()).then_some(start)
}

/// Parse-or-null for every date shape a CUR export has been seen to carry.
///
/// Instants with an offset (`2024-05-01T00:00:00Z`) are moved to UTC wall clock time, so a
/// non-UTC offset near midnight can land on another day or month. Billing periods are UTC
/// months. Civil date-times and bare dates are taken as they are.
pub fn parse_date_time(raw: &str) -> Option<DateTime> {
    let raw = raw.trim();

    if let Ok(instant) = raw.parse::<Timestamp>() {
        return Some(instant.to_zoned(TimeZone::UTC).datetime());
    }

    if let Ok(civil) = raw.parse::<DateTime>() {
        return Some(civil);
    }

    // Space separated, the way most databases print them.
    if let Ok(civil) = DateTime::strptime(CANONICAL_FORMAT, raw) {
        return Some(civil);
    }

    raw.parse::<Date>().ok().map(|day| day.to_datetime(jiff::civil::Time::midnight()))
}

pub fn render(moment: &DateTime) -> String {
    moment.strftime(CANONICAL_FORMAT).to_string()
}
