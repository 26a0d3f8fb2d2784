//! Inode timestamp rendering.

use std::fmt::Write as _;

const SECS_PER_DAY: u64 = 86_400;

/// Format epoch seconds as `MM/DD/YY HH:MM:SS` in UTC.
#[must_use]
pub fn format_timestamp(epoch_secs: u32) -> String {
    let secs = u64::from(epoch_secs);
    let days = secs / SECS_PER_DAY;
    let rem = secs % SECS_PER_DAY;
    let (year, month, day) = civil_from_days(days);

    let mut out = String::with_capacity(17);
    let _ = write!(
        out,
        "{month:02}/{day:02}/{:02} {:02}:{:02}:{:02}",
        year % 100,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    );
    out
}

/// Days since 1970-01-01 to a proleptic Gregorian `(year, month, day)`.
///
/// Howard Hinnant's `civil_from_days`, restricted to non-negative day counts.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}
