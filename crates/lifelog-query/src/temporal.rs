//! Relative date expressions resolved against a reference day.
//!
//! Rules are tried in table order against the original query; a span
//! claimed by an earlier rule is never re-read by a later one.

use chrono::{Datelike, Days, Duration, Months, NaiveDate, Weekday};
use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Days from `date` to the nearest edge of the range, `0` inside it.
    pub fn distance_days(&self, date: NaiveDate) -> i64 {
        if date < self.start {
            (self.start - date).num_days()
        } else if date > self.end {
            (date - self.end).num_days()
        } else {
            0
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_day() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemporalExpression {
    /// The expression as written in the query.
    pub text: String,
    pub range: DateRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemporalInfo {
    /// In order of appearance.
    pub expressions: Vec<TemporalExpression>,
}

impl TemporalInfo {
    pub fn has_temporal(&self) -> bool {
        !self.expressions.is_empty()
    }

    /// Smallest range covering every expression.
    pub fn envelope(&self) -> Option<DateRange> {
        let start = self.expressions.iter().map(|e| e.range.start).min()?;
        let end = self.expressions.iter().map(|e| e.range.end).max()?;
        Some(DateRange::new(start, end))
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.expressions.iter().filter(|e| e.range.is_single_day()).map(|e| e.range.start).collect()
    }

    pub fn ranges(&self) -> Vec<DateRange> {
        self.expressions.iter().filter(|e| !e.range.is_single_day()).map(|e| e.range).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Query with each expression replaced by its ISO date or range.
    pub normalized: String,
    /// Query with each expression removed, whitespace collapsed.
    pub stripped: String,
    pub info: TemporalInfo,
}

type Resolver = fn(&Captures<'_>, NaiveDate) -> Option<DateRange>;

struct Rule {
    re: Regex,
    resolve: Resolver,
}

const COUNT: &str = r"(\d+|a|an|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve)";
const WEEKDAYS: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday";
const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december";
const MONTH_ABBREVIATIONS: &str = "jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec";
/// "May" on its own is far more often the verb than the month.
const MONTHS_ALONE: &str = "january|february|march|april|june|july|august|september|october|november|december";

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let table: Vec<(String, Resolver)> = vec![
        (r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b".into(), iso_date as Resolver),
        (r"\bday before yesterday\b".into(), day_before_yesterday as Resolver),
        (format!(r"\b{COUNT}\s+(day|week|month|year)s?\s+ago\b"), units_ago as Resolver),
        (format!(r"\b(?:last|past|previous)\s+{COUNT}\s+(day|week|month)s?\b"), trailing_window as Resolver),
        (r"\b(?:today|tonight|this\s+(?:morning|afternoon|evening))\b".into(), same_day as Resolver),
        (r"\b(?:yesterday|last\s+night)\b".into(), previous_day as Resolver),
        (r"\b(this|last|previous|past)\s+(week|month|year)\b".into(), named_period as Resolver),
        (format!(r"\b(?:(last|on|this)\s+)?({WEEKDAYS})\b"), weekday as Resolver),
        (format!(r"\b({MONTHS}|{MONTH_ABBREVIATIONS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b"), month_day as Resolver),
        (format!(r"\b({MONTHS_ALONE})\b"), whole_month as Resolver),
    ];
    table
        .into_iter()
        .filter_map(|(pattern, resolve)| Regex::new(&format!("(?i){pattern}")).ok().map(|re| Rule { re, resolve }))
        .collect()
});

/// Finds every temporal expression in `query` relative to `today`.
pub fn resolve(query: &str, today: NaiveDate) -> Resolved {
    let mut claimed: Vec<(usize, usize, DateRange)> = Vec::new();
    for rule in RULES.iter() {
        for caps in rule.re.captures_iter(query) {
            let Some(whole) = caps.get(0) else { continue };
            let (start, end) = (whole.start(), whole.end());
            if claimed.iter().any(|&(s, e, _)| start < e && s < end) {
                continue;
            }
            if let Some(range) = (rule.resolve)(&caps, today) {
                claimed.push((start, end, range));
            }
        }
    }
    claimed.sort_by_key(|&(start, _, _)| start);

    let mut normalized = String::with_capacity(query.len());
    let mut stripped = String::with_capacity(query.len());
    let mut expressions = Vec::with_capacity(claimed.len());
    let mut cursor = 0;
    for (start, end, range) in claimed {
        normalized.push_str(&query[cursor..start]);
        stripped.push_str(&query[cursor..start]);
        stripped.push(' ');
        normalized.push_str(&range.to_string());
        expressions.push(TemporalExpression { text: query[start..end].to_string(), range });
        cursor = end;
    }
    normalized.push_str(&query[cursor..]);
    stripped.push_str(&query[cursor..]);

    Resolved {
        normalized,
        stripped: stripped.split_whitespace().collect::<Vec<_>>().join(" "),
        info: TemporalInfo { expressions },
    }
}

/// Whether `text` contains any expression the resolver understands.
pub fn mentions_time(text: &str) -> bool {
    RULES.iter().any(|rule| rule.re.is_match(text))
}

fn parse_count(word: &str) -> Option<u32> {
    if let Ok(n) = word.parse() {
        return Some(n);
    }
    let n = match word.to_ascii_lowercase().as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        _ => return None,
    };
    Some(n)
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn month_start(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)
}

/// The calendar month `back` months before the one containing `date`.
fn calendar_month(date: NaiveDate, back: u32) -> Option<DateRange> {
    let start = month_start(date)?.checked_sub_months(Months::new(back))?;
    let end = start.checked_add_months(Months::new(1))? - Duration::days(1);
    Some(DateRange::new(start, end))
}

fn calendar_year(year: i32) -> Option<DateRange> {
    Some(DateRange::new(NaiveDate::from_ymd_opt(year, 1, 1)?, NaiveDate::from_ymd_opt(year, 12, 31)?))
}

fn same_day(_caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    Some(DateRange::day(today))
}

fn previous_day(_caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    Some(DateRange::day(today - Duration::days(1)))
}

fn day_before_yesterday(_caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    Some(DateRange::day(today - Duration::days(2)))
}

fn iso_date(caps: &Captures<'_>, _today: NaiveDate) -> Option<DateRange> {
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(DateRange::day)
}

fn days_back(today: NaiveDate, days: u64) -> Option<NaiveDate> {
    today.checked_sub_days(Days::new(days))
}

fn units_ago(caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let n = parse_count(caps.get(1)?.as_str())?;
    match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "day" => days_back(today, n.into()).map(DateRange::day),
        "week" => {
            let start = days_back(week_start(today), u64::from(n).checked_mul(7)?)?;
            Some(DateRange::new(start, start.checked_add_days(Days::new(6))?))
        }
        "month" => calendar_month(today, n),
        "year" => calendar_year(today.year().checked_sub(i32::try_from(n).ok()?)?),
        _ => None,
    }
}

fn trailing_window(caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let n = parse_count(caps.get(1)?.as_str())?;
    let start = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "day" => days_back(today, n.into())?,
        "week" => days_back(today, u64::from(n).checked_mul(7)?)?,
        "month" => today.checked_sub_months(Months::new(n))?,
        _ => return None,
    };
    Some(DateRange::new(start, today))
}

fn named_period(caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let which = caps.get(1)?.as_str().to_ascii_lowercase();
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    match (which.as_str(), unit.as_str()) {
        ("this", "week") => Some(DateRange::new(week_start(today), today)),
        ("this", "month") => Some(DateRange::new(month_start(today)?, today)),
        ("this", "year") => Some(DateRange::new(NaiveDate::from_ymd_opt(today.year(), 1, 1)?, today)),
        ("past", "week") => Some(DateRange::new(today - Duration::days(7), today)),
        ("past", "month") => Some(DateRange::new(today.checked_sub_months(Months::new(1))?, today)),
        ("past", "year") => Some(DateRange::new(today.checked_sub_months(Months::new(12))?, today)),
        (_, "week") => {
            let start = week_start(today) - Duration::days(7);
            Some(DateRange::new(start, start + Duration::days(6)))
        }
        (_, "month") => calendar_month(today, 1),
        (_, "year") => calendar_year(today.year() - 1),
        _ => None,
    }
}

fn weekday(caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let target: Weekday = caps.get(2)?.as_str().parse().ok()?;
    let strictly_before = caps.get(1).is_some_and(|m| m.as_str().eq_ignore_ascii_case("last"));
    let mut back = (7 + today.weekday().num_days_from_monday() - target.num_days_from_monday()) % 7;
    if back == 0 && strictly_before {
        back = 7;
    }
    Some(DateRange::day(today - Duration::days(i64::from(back))))
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_ascii_lowercase();
    let prefix = name.get(..3)?;
    let n = match prefix {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

/// A month/day without a year is the most recent such day not after `today`.
fn month_day(caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let month = month_number(caps.get(1)?.as_str())?;
    let day = caps.get(2)?.as_str().parse().ok()?;
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if this_year <= today {
        return Some(DateRange::day(this_year));
    }
    NaiveDate::from_ymd_opt(today.year() - 1, month, day).map(DateRange::day)
}

fn whole_month(caps: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let month = month_number(caps.get(1)?.as_str())?;
    let year = if month <= today.month() { today.year() } else { today.year() - 1 };
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    calendar_month(start, 0)
}
