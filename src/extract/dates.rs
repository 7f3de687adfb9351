//! Italian posting-date phrases.

use chrono::{Days, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

static DAYS_AGO: Lazy<Regex> = Lazy::new(|| build_regex(r"(\d+)\s*giorn[io]\s*fa"));
static WEEKS_AGO: Lazy<Regex> = Lazy::new(|| build_regex(r"(\d+)\s*settiman[ae]\s*fa"));
static MONTHS_AGO: Lazy<Regex> = Lazy::new(|| build_regex(r"(\d+)\s*mes[ie]\s*fa"));
static NUMERIC_DATE: Lazy<Regex> = Lazy::new(|| build_regex(r"(\d{1,2})[/\-](\d{1,2})[/\-](\d{4})"));
static NAMED_MONTH_DATE: Lazy<Regex> = Lazy::new(|| {
    build_regex(
        r"(\d{1,2})\s*(gennaio|febbraio|marzo|aprile|maggio|giugno|luglio|agosto|settembre|ottobre|novembre|dicembre)\s*(\d{4})",
    )
});

const ITALIAN_MONTHS: [&str; 12] = [
    "gennaio", "febbraio", "marzo", "aprile", "maggio", "giugno", "luglio", "agosto", "settembre",
    "ottobre", "novembre", "dicembre",
];

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid date regex `{}`: {}", pattern, err))
}

fn captured_number(regex: &Regex, text: &str) -> Option<u64> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn days_before(today: NaiveDate, days: u64) -> NaiveDate {
    today.checked_sub_days(Days::new(days)).unwrap_or(today)
}

/// Resolve an Italian date phrase relative to `today`.
///
/// Never fails: anything unrecognised resolves to `today`. Months count as
/// 30 days.
pub fn parse_italian_date(text: &str, today: NaiveDate) -> NaiveDate {
    let text = text.trim().to_lowercase();
    if text.is_empty() || text.contains("oggi") {
        return today;
    }
    if text.contains("ieri") {
        return days_before(today, 1);
    }

    if let Some(days) = captured_number(&DAYS_AGO, &text) {
        return days_before(today, days);
    }

    if text.contains("una settimana fa") {
        return days_before(today, 7);
    }
    if let Some(weeks) = captured_number(&WEEKS_AGO, &text) {
        return days_before(today, weeks.saturating_mul(7));
    }

    if text.contains("un mese fa") {
        return days_before(today, 30);
    }
    if let Some(months) = captured_number(&MONTHS_AGO, &text) {
        return days_before(today, months.saturating_mul(30));
    }

    if let Some(caps) = NUMERIC_DATE.captures(&text) {
        let day = caps[1].parse().ok();
        let month = caps[2].parse().ok();
        let year = caps[3].parse().ok();
        if let (Some(day), Some(month), Some(year)) = (day, month, year)
            && let Some(date) = NaiveDate::from_ymd_opt(year, month, day)
        {
            return date;
        }
    }

    if let Some(caps) = NAMED_MONTH_DATE.captures(&text) {
        let month = ITALIAN_MONTHS
            .iter()
            .position(|name| *name == &caps[2])
            .map(|index| index as u32 + 1);
        let day = caps[1].parse().ok();
        let year = caps[3].parse().ok();
        if let (Some(day), Some(month), Some(year)) = (day, month, year)
            && let Some(date) = NaiveDate::from_ymd_opt(year, month, day)
        {
            return date;
        }
    }

    today
}
