use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar day. No time-of-day, no time zone.
pub type Day = NaiveDate;

/// Wire format for a day.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Half-open run of nights `[start, end)`.
///
/// `start` is the first night, `end` is the morning the stay ends (the check-out day).
/// Every interval inside the engine uses this type; inclusive "last night" views are
/// converted with [`DateSpan::from_inclusive`] at the editing boundary only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: Day,
    pub end: Day,
}

impl DateSpan {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// Returns `None` unless `start < end`.
    pub fn try_new(start: Day, end: Day) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Span covering `first..=last`.
    pub fn from_inclusive(first: Day, last: Day) -> Option<Self> {
        Self::try_new(first, last.succ_opt()?)
    }

    /// The last night inside the span.
    pub fn last_night(&self) -> Day {
        self.end.pred_opt().unwrap_or(self.start)
    }

    pub fn nights(&self) -> u32 {
        nights_between(self.start, self.end).max(0) as u32
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_day(&self, day: Day) -> bool {
        self.start <= day && day < self.end
    }

    pub fn contains_span(&self, other: &DateSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersection(&self, other: &DateSpan) -> Option<DateSpan> {
        Self::try_new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Every night in the span, in order.
    pub fn nights_iter(&self) -> impl Iterator<Item = Day> {
        self.start.iter_days().take_while({
            let end = self.end;
            move |d| *d < end
        })
    }
}

impl std::fmt::Display for DateSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(DAY_FORMAT),
            self.end.format(DAY_FORMAT)
        )
    }
}

/// Signed number of nights from `from` to `to`.
pub fn nights_between(from: Day, to: Day) -> i64 {
    (to - from).num_days()
}

/// Parse a `YYYY-MM-DD` day. Anything else (including a time component) is rejected.
pub fn parse_day(s: &str) -> Option<Day> {
    NaiveDate::parse_from_str(s.trim(), DAY_FORMAT).ok()
}

pub fn format_day(day: Day) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Today in the server's local calendar.
pub fn today() -> Day {
    Local::now().date_naive()
}

/// Day-granularity comparison: is `day` strictly before `reference`?
pub fn is_before(day: Day, reference: Day) -> bool {
    day < reference
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Day {
        parse_day(s).unwrap()
    }

    #[test]
    fn span_basics() {
        let s = DateSpan::new(d("2025-06-01"), d("2025-06-10"));
        assert_eq!(s.nights(), 9);
        assert!(s.contains_day(d("2025-06-01")));
        assert!(s.contains_day(d("2025-06-09")));
        assert!(!s.contains_day(d("2025-06-10"))); // half-open
        assert_eq!(s.last_night(), d("2025-06-09"));
    }

    #[test]
    fn adjacent_spans_do_not_overlap() {
        let a = DateSpan::new(d("2025-06-01"), d("2025-06-05"));
        let b = DateSpan::new(d("2025-06-05"), d("2025-06-08"));
        let c = DateSpan::new(d("2025-06-04"), d("2025-06-06"));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn inclusive_conversion() {
        let s = DateSpan::from_inclusive(d("2025-06-01"), d("2025-06-01")).unwrap();
        assert_eq!(s.nights(), 1);
        assert_eq!(s.end, d("2025-06-02"));
        assert!(DateSpan::from_inclusive(d("2025-06-02"), d("2025-06-01")).is_none());
    }

    #[test]
    fn try_new_rejects_empty_and_inverted() {
        assert!(DateSpan::try_new(d("2025-06-01"), d("2025-06-01")).is_none());
        assert!(DateSpan::try_new(d("2025-06-02"), d("2025-06-01")).is_none());
    }

    #[test]
    fn intersection_clamps() {
        let a = DateSpan::new(d("2025-06-01"), d("2025-06-10"));
        let b = DateSpan::new(d("2025-06-08"), d("2025-06-12"));
        assert_eq!(
            a.intersection(&b),
            Some(DateSpan::new(d("2025-06-08"), d("2025-06-10")))
        );
        let c = DateSpan::new(d("2025-06-10"), d("2025-06-12"));
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn nights_iter_crosses_month_end() {
        let s = DateSpan::new(d("2025-01-30"), d("2025-02-02"));
        let nights: Vec<_> = s.nights_iter().map(format_day).collect();
        assert_eq!(nights, vec!["2025-01-30", "2025-01-31", "2025-02-01"]);
    }

    #[test]
    fn parse_rejects_time_component() {
        assert!(parse_day("2025-06-01").is_some());
        assert!(parse_day("2025-06-01T10:00:00").is_none());
        assert!(parse_day("06/01/2025").is_none());
        assert!(parse_day("").is_none());
    }

    #[test]
    fn nights_between_is_signed() {
        assert_eq!(nights_between(d("2025-06-01"), d("2025-06-05")), 4);
        assert_eq!(nights_between(d("2025-06-05"), d("2025-06-01")), -4);
        assert!(is_before(d("2025-06-01"), d("2025-06-02")));
        assert!(!is_before(d("2025-06-02"), d("2025-06-02")));
    }
}
