use rust_decimal::Decimal;

use crate::dates::{format_day, nights_between, DateSpan, Day};
use crate::model::*;

use super::store::RangeStore;

// ── Price aggregation ─────────────────────────────────────────────

/// Why a quote is not bookable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NonPositiveDuration,
    /// First night with no range.
    Uncovered(Day),
    /// First night inside an unavailable range.
    Unavailable(Day),
    /// Rolling estimate ran out of available nights.
    InsufficientNights { found: u32 },
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::NonPositiveDuration => write!(f, "stay has no nights"),
            InvalidReason::Uncovered(d) => write!(f, "night of {} has no price", format_day(*d)),
            InvalidReason::Unavailable(d) => {
                write!(f, "night of {} is not available", format_day(*d))
            }
            InvalidReason::InsufficientNights { found } => {
                write!(f, "only {found} available nights remain")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StayQuote {
    pub nights: u32,
    pub total_price: Decimal,
    pub valid: bool,
    pub reason: Option<InvalidReason>,
}

impl StayQuote {
    fn ok(nights: u32, total_price: Decimal) -> Self {
        Self {
            nights,
            total_price,
            valid: true,
            reason: None,
        }
    }

    fn invalid(nights: u32, total_price: Decimal, reason: InvalidReason) -> Self {
        Self {
            nights,
            total_price,
            valid: false,
            reason: Some(reason),
        }
    }

    /// Mean nightly price, rounded to cents. `None` when nothing was priced.
    pub fn average_nightly(&self) -> Option<Decimal> {
        if !self.valid || self.nights == 0 {
            return None;
        }
        Some((self.total_price / Decimal::from(self.nights)).round_dp(2))
    }
}

/// Price a committed stay `[check_in, check_out)`.
///
/// Every night must fall in an available range; the first night that does not stops
/// the scan and is reported. On an invalid quote `nights` is still the stay length and
/// `total_price` holds only the nights priced before the failure.
pub fn price_for_stay(store: &RangeStore, check_in: Day, check_out: Day) -> StayQuote {
    let span_nights = nights_between(check_in, check_out);
    if span_nights <= 0 {
        return StayQuote::invalid(0, Decimal::ZERO, InvalidReason::NonPositiveDuration);
    }
    let nights = span_nights as u32;
    let stay = DateSpan::new(check_in, check_out);

    let mut total = Decimal::ZERO;
    let mut cursor = check_in;
    for range in store.overlapping(&stay) {
        if range.span.start > cursor {
            return StayQuote::invalid(nights, total, InvalidReason::Uncovered(cursor));
        }
        if !range.available {
            return StayQuote::invalid(nights, total, InvalidReason::Unavailable(cursor));
        }
        let upto = range.span.end.min(check_out);
        total += range.price * Decimal::from(nights_between(cursor, upto));
        cursor = upto;
    }
    if cursor < check_out {
        return StayQuote::invalid(nights, total, InvalidReason::Uncovered(cursor));
    }
    StayQuote::ok(nights, total)
}

/// Indicative price for the next `target_nights` available nights from
/// `max(reference, today)`.
///
/// Unlike [`price_for_stay`] the nights need not be contiguous: gaps and unavailable
/// ranges are skipped. Falls short only when the store runs out of available nights,
/// in which case the quote is invalid with [`InvalidReason::InsufficientNights`].
pub fn rolling_estimate(
    store: &RangeStore,
    reference: Day,
    today: Day,
    target_nights: u32,
) -> StayQuote {
    if target_nights == 0 {
        return StayQuote::invalid(0, Decimal::ZERO, InvalidReason::NonPositiveDuration);
    }
    let from = reference.max(today);

    let mut total = Decimal::ZERO;
    let mut counted: u32 = 0;
    for range in store.ranges_from(from) {
        if !range.available {
            continue;
        }
        let start = range.span.start.max(from);
        let usable = nights_between(start, range.span.end) as u32;
        let take = usable.min(target_nights - counted);
        total += range.price * Decimal::from(take);
        counted += take;
        if counted == target_nights {
            return StayQuote::ok(counted, total);
        }
    }
    StayQuote::invalid(
        counted,
        total,
        InvalidReason::InsufficientNights { found: counted },
    )
}

// ── Bookable calendar ─────────────────────────────────────────────

/// Runs of nights inside `window` that are available and not held by a pending or
/// approved reservation.
pub fn bookable_spans(ps: &PropertyState, window: &DateSpan) -> Vec<DateSpan> {
    let open: Vec<DateSpan> = ps
        .ranges
        .overlapping(window)
        .filter(|r| r.available)
        .filter_map(|r| r.span.intersection(window))
        .collect();
    let open = merge_overlapping(&open);

    let mut held: Vec<DateSpan> = ps
        .blocking_reservations(window)
        .map(|r| r.stay)
        .collect();
    if held.is_empty() {
        return open;
    }
    held.sort_by_key(|s| s.start);
    let held = merge_overlapping(&held);
    subtract_spans(&open, &held)
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[DateSpan]) -> Vec<DateSpan> {
    let mut merged: Vec<DateSpan> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and internally disjoint.
pub fn subtract_spans(base: &[DateSpan], to_remove: &[DateSpan]) -> Vec<DateSpan> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DateSpan::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(DateSpan::new(current_start, current_end));
        }
    }

    result
}
