use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

pub const CHECK_DATE_FORMAT: &str = "%d.%m.%Y %H:%M";
const CHECK_DAY_FORMAT: &str = "%d.%m.%Y";

pub fn format_check_date(now: NaiveDateTime) -> String {
    now.format(CHECK_DATE_FORMAT).to_string()
}

/// Accepts `DD.MM.YYYY HH:MM` or a bare `DD.MM.YYYY` (midnight).
pub fn parse_check_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(text, CHECK_DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, CHECK_DAY_FORMAT)
                .ok()
                .map(|day| day.and_time(NaiveTime::default()))
        })
}

/// Monday 00:00 of the week containing `now`.
pub fn week_start(now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date();
    let offset = u64::from(today.weekday().num_days_from_monday());
    today
        .checked_sub_days(Days::new(offset))
        .unwrap_or(today)
        .and_time(NaiveTime::default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceReason {
    Requested,
    MissingCheckDate,
    UnparseableCheckDate(String),
    StaleCheckDate(String),
}

impl fmt::Display for ForceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForceReason::Requested => f.write_str("--force"),
            ForceReason::MissingCheckDate => f.write_str("missing Check date"),
            ForceReason::UnparseableCheckDate(value) => {
                write!(f, "unrecognized Check date '{value}'")
            }
            ForceReason::StaleCheckDate(value) => write!(f, "stale Check date '{value}'"),
        }
    }
}

/// Decides per row whether cached verdicts must be ignored.
///
/// With `--checkdate`, rows without a usable recorded check date are always
/// forced, while rows checked before the current week share a budget of one
/// forced revalidation per run.
#[derive(Debug, Clone)]
pub struct ForcePolicy {
    force_all: bool,
    stale_before: Option<NaiveDateTime>,
    stale_budget: usize,
}

impl ForcePolicy {
    pub fn new(force_all: bool, checkdate: bool, now: NaiveDateTime) -> Self {
        Self {
            force_all,
            stale_before: checkdate.then(|| week_start(now)),
            stale_budget: usize::from(checkdate),
        }
    }

    pub fn decide(&mut self, recorded_check_date: Option<&str>) -> Option<ForceReason> {
        if self.force_all {
            return Some(ForceReason::Requested);
        }
        let stale_before = self.stale_before?;
        let recorded = recorded_check_date.map(str::trim).unwrap_or("");
        if recorded.is_empty() {
            return Some(ForceReason::MissingCheckDate);
        }
        let Some(checked_at) = parse_check_date(recorded) else {
            return Some(ForceReason::UnparseableCheckDate(recorded.to_string()));
        };
        if checked_at < stale_before && self.stale_budget > 0 {
            self.stale_budget -= 1;
            return Some(ForceReason::StaleCheckDate(recorded.to_string()));
        }
        None
    }
}
