//! Week and quarter arithmetic.
//!
//! Weeks are Monday-anchored ISO weeks. Quarters are fixed blocks of 13 weeks
//! rather than calendar months, so week 14 is always the first week of Q2.
//! Every function here is pure: callers pass the date they care about.

use chrono::{Datelike, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Number of weeks in every quarter except a 53-week Q4.
pub const WEEKS_PER_QUARTER: u32 = 13;

/// ISO week number of `date` (1-based).
pub fn week_of_year(date: NaiveDate) -> u32 {
  date.iso_week().week()
}

/// Year that owns the week returned by [`week_of_year`].
///
/// Differs from `date.year()` for the last days of December and the first
/// days of January.
pub fn week_year(date: NaiveDate) -> i32 {
  date.iso_week().year()
}

/// Number of ISO weeks in `year` (52 or 53).
pub fn weeks_in_year(year: i32) -> u32 {
  // Dec 28 always falls in the last week of its year
  NaiveDate::from_ymd_opt(year, 12, 28)
    .map(|d| d.iso_week().week())
    .unwrap_or(52)
}

/// Quarter that owns `week`.
pub fn quarter_of_week(week: u32) -> u8 {
  match week {
    0..=13 => 1,
    14..=26 => 2,
    27..=39 => 3,
    _ => 4,
  }
}

/// Monday 00:00:00.000 of the week containing `at`.
pub fn start_of_week(at: NaiveDateTime) -> NaiveDateTime {
  // Sunday is 6 days after its Monday, not the first day of a new week
  let offset = at.date().weekday().num_days_from_monday();
  let monday = at.date() - Days::new(u64::from(offset));
  monday.and_time(NaiveTime::MIN)
}

/// Sunday 23:59:59.999 of the week containing `at`.
pub fn end_of_week(at: NaiveDateTime) -> NaiveDateTime {
  start_of_week(at) + Duration::days(7) - Duration::milliseconds(1)
}

/// Monday start and Sunday end of ISO week `week` in `year`.
pub fn week_range(year: i32, week: u32) -> Option<(NaiveDateTime, NaiveDateTime)> {
  let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
  let start = monday.and_time(NaiveTime::MIN);
  Some((start, end_of_week(start)))
}

/// A year/quarter pair, as carried in `?q=2025-Q2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuarterRef {
  pub year: i32,
  pub quarter: u8,
}

impl QuarterRef {
  pub fn new(year: i32, quarter: u8) -> Option<Self> {
    (1..=4).contains(&quarter).then_some(Self { year, quarter })
  }

  /// Quarter owning the week that contains `date`.
  pub fn containing(date: NaiveDate) -> Self {
    Self {
      year: week_year(date),
      quarter: quarter_of_week(week_of_year(date)),
    }
  }

  pub fn window(&self) -> Option<QuarterWindow> {
    quarter_window(self.year, self.quarter)
  }

  pub fn next(&self) -> Self {
    if self.quarter == 4 {
      Self {
        year: self.year + 1,
        quarter: 1,
      }
    } else {
      Self {
        year: self.year,
        quarter: self.quarter + 1,
      }
    }
  }

  pub fn previous(&self) -> Self {
    if self.quarter == 1 {
      Self {
        year: self.year - 1,
        quarter: 4,
      }
    } else {
      Self {
        year: self.year,
        quarter: self.quarter - 1,
      }
    }
  }
}

impl fmt::Display for QuarterRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-Q{}", self.year, self.quarter)
  }
}

/// Error returned when a quarter parameter is not of the form `YYYY-QN`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid quarter '{0}', expected YYYY-QN with N in 1..=4")]
pub struct ParseQuarterError(String);

impl FromStr for QuarterRef {
  type Err = ParseQuarterError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ParseQuarterError(s.to_string());
    let (year, quarter) = s.trim().split_once('-').ok_or_else(invalid)?;
    let quarter = quarter
      .strip_prefix('Q')
      .or_else(|| quarter.strip_prefix('q'))
      .ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let quarter: u8 = quarter.parse().map_err(|_| invalid())?;
    QuarterRef::new(year, quarter).ok_or_else(invalid)
  }
}

/// Resolve a `?q=` parameter, falling back to the quarter containing `today`.
pub fn parse_q_param(param: Option<&str>, today: NaiveDate) -> QuarterRef {
  match param.map(str::parse::<QuarterRef>) {
    Some(Ok(quarter)) => quarter,
    Some(Err(err)) => {
      tracing::debug!(error = %err, "ignoring malformed quarter parameter");
      QuarterRef::containing(today)
    }
    None => QuarterRef::containing(today),
  }
}

/// Inverse of [`parse_q_param`].
pub fn format_q_param(quarter: QuarterRef) -> String {
  quarter.to_string()
}

/// Date and week bounds of one quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuarterWindow {
  pub year: i32,
  pub quarter: u8,
  /// Monday on or before the first day of the quarter's first month
  pub start: NaiveDateTime,
  /// 13 weeks after `start`, minus one millisecond
  pub end: NaiveDateTime,
  pub start_week: u32,
  pub end_week: u32,
}

impl QuarterWindow {
  pub fn weeks(&self) -> RangeInclusive<u32> {
    self.start_week..=self.end_week
  }

  pub fn contains_week(&self, week: u32) -> bool {
    self.weeks().contains(&week)
  }

  pub fn contains(&self, at: NaiveDateTime) -> bool {
    self.start <= at && at <= self.end
  }

  /// Pull `week` back inside the window.
  pub fn clamp_week(&self, week: u32) -> u32 {
    week.clamp(self.start_week, self.end_week)
  }

  /// Week after `week`, or `None` at the end of the quarter.
  pub fn next_week(&self, week: u32) -> Option<u32> {
    let next = week.checked_add(1)?;
    self.contains_week(next).then_some(next)
  }

  /// Week before `week`, or `None` at the start of the quarter.
  pub fn prev_week(&self, week: u32) -> Option<u32> {
    let prev = week.checked_sub(1)?;
    self.contains_week(prev).then_some(prev)
  }
}

/// Bounds of `quarter` (1..=4) in `year`.
pub fn quarter_window(year: i32, quarter: u8) -> Option<QuarterWindow> {
  let quarter_ref = QuarterRef::new(year, quarter)?;
  let month = u32::from(quarter - 1) * 3 + 1;
  let first = NaiveDate::from_ymd_opt(year, month, 1)?;
  let start = start_of_week(first.and_time(NaiveTime::MIN));
  let end = start + Duration::weeks(i64::from(WEEKS_PER_QUARTER)) - Duration::milliseconds(1);

  let q = u32::from(quarter_ref.quarter);
  let start_week = (q - 1) * WEEKS_PER_QUARTER + 1;
  let end_week = if q == 4 {
    weeks_in_year(year)
  } else {
    q * WEEKS_PER_QUARTER
  };

  Some(QuarterWindow {
    year,
    quarter,
    start,
    end,
    start_week,
    end_week,
  })
}
