// Parsing and formatting helpers.
//
// All of the "dirty" text handling (spreadsheet dates, numeric cells, header
// spelling) lives here so the rest of the crate works on typed values.
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use num_format::{Locale, ToFormattedString};

/// Cell values that spreadsheet exports use in place of a missing date.
const DATE_ERROR_TOKENS: &[&str] = &[
    "null", "none", "nan", "na", "n/a", "#n/a", "-", "#value!", "#ref!", "#div/0!",
];

/// Day zero of the spreadsheet serial date system (1900 system, with the
/// leap-year bug already folded in).
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Serial for 9999-12-31, the largest date a spreadsheet can hold.
const MAX_SERIAL: f64 = 2_958_465.0;

/// chrono's `%Y` accepts any digit count, so `24` would read as year 24.
/// Layouts other than the two-digit `%y` one must yield a 4-digit year.
const MIN_FULL_YEAR: i32 = 1000;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d-%b-%Y",
    "%d-%b-%y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
];

/// Parse a string-like value into `f64`, forgiving the formatting noise that
/// is common in CSV exports.
///
/// - Trims whitespace and strips thousands separators.
/// - Rejects values containing letters (`"N/A"`, `"abc"`).
/// - Returns `None` for empty, unparseable or non-finite input.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Normalize a date cell into a local instant.
///
/// Rules are applied in order:
/// 1. blank text or a known error token is unparseable;
/// 2. pure numeric text is a spreadsheet serial day count;
/// 3. text with exactly three `/`-separated parts and a 4-digit year is read
///    strictly as month/day/year, never day/month/year;
/// 4. anything else goes through a list of common date and datetime layouts.
///
/// Date-only inputs resolve to local midnight. Never panics.
pub fn parse_date(s: Option<&str>) -> Option<NaiveDateTime> {
    let s = s?.trim();
    if s.is_empty() || DATE_ERROR_TOKENS.iter().any(|t| s.eq_ignore_ascii_case(t)) {
        return None;
    }
    if is_plain_number(s) {
        return parse_serial_date(s);
    }
    if s.contains('/') {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() == 3 {
            if let Some(date) = parse_month_day_year(parts[0], parts[1], parts[2]) {
                return Some(start_of_day(date));
            }
        }
    }
    parse_generic_date(s)
}

fn is_plain_number(s: &str) -> bool {
    let mut dots = 0;
    let mut digits = 0;
    for c in s.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

fn parse_serial_date(s: &str) -> Option<NaiveDateTime> {
    let serial = s.parse::<f64>().ok()?;
    if !(0.0..=MAX_SERIAL).contains(&serial) {
        return None;
    }
    let (y, m, d) = SERIAL_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(y, m, d)?;
    epoch
        .checked_add_signed(Duration::days(serial.floor() as i64))
        .map(start_of_day)
}

fn parse_month_day_year(month: &str, day: &str, year: &str) -> Option<NaiveDate> {
    let (month, day, year) = (month.trim(), day.trim(), year.trim());
    let short_num = |p: &str| (1..=2).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit());
    if !short_num(month) || !short_num(day) {
        return None;
    }
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let iso = format!("{}-{:0>2}-{:0>2}", year, month, day);
    NaiveDate::parse_from_str(&iso, "%Y-%m-%d").ok()
}

fn parse_generic_date(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    let datetime = DATETIME_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .find(|dt| dt.year() >= MIN_FULL_YEAR);
    if datetime.is_some() {
        return datetime;
    }
    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .find(|d| d.year() >= MIN_FULL_YEAR)
        .map(start_of_day)
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Last representable millisecond of `date`, used for inclusive end bounds.
pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| start_of_day(date))
}

/// Whole days elapsed from `from` to `to`, truncated toward zero.
pub fn elapsed_days(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    (to - from).num_days()
}

/// Canonical form of a CSV header: trimmed, lowercased, inner whitespace
/// collapsed to single spaces.
pub fn normalize_header(h: &str) -> String {
    h.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trimmed value, or `"Unknown"` when the cell is blank.
pub fn or_unknown(s: &str) -> &str {
    let s = s.trim();
    if s.is_empty() {
        "Unknown"
    } else {
        s
    }
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Fixed decimals with locale-aware thousands separators (`1,234.5`).
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_val: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = parts.next() {
        res.push('.');
        res.push_str(frac);
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Counts in console messages (e.g. `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}
