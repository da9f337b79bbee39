//! SLA clock.
//!
//! Plain SLAs count wall-clock time. Calendar-aware SLAs
//! (`business_hours_only` and/or `exclude_weekends`) only count time inside
//! the allowed window of each local day: the business window when
//! `business_hours_only`, the whole day otherwise, and no time at all on
//! Saturday and Sunday when `exclude_weekends`.

use blueprint_interchange::{EscalationTrigger, Sla};
use rust_decimal::Decimal;
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset, Weekday};

use crate::error::EngineError;

/// Business window and time zone used by calendar-aware SLAs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    day_start: Time,
    day_end: Time,
    offset: UtcOffset,
}

impl Default for BusinessCalendar {
    /// 09:00 to 17:00 UTC.
    fn default() -> Self {
        BusinessCalendar {
            day_start: Time::from_hms(9, 0, 0).unwrap_or(Time::MIDNIGHT),
            day_end: Time::from_hms(17, 0, 0).unwrap_or(Time::MIDNIGHT),
            offset: UtcOffset::UTC,
        }
    }
}

impl BusinessCalendar {
    /// The window must be non-empty: `day_start < day_end`.
    pub fn new(day_start: Time, day_end: Time, offset: UtcOffset) -> Result<Self, EngineError> {
        if day_start >= day_end {
            return Err(EngineError::validation(format!(
                "business day start {} must be before end {}",
                day_start, day_end
            )));
        }
        Ok(BusinessCalendar {
            day_start,
            day_end,
            offset,
        })
    }

    pub fn day_start(&self) -> Time {
        self.day_start
    }

    pub fn day_end(&self) -> Time {
        self.day_end
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// The counted span of a local date for this SLA, if any.
    fn window(&self, sla: &Sla, date: Date) -> Option<(OffsetDateTime, OffsetDateTime)> {
        if sla.exclude_weekends && matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday) {
            return None;
        }
        if sla.business_hours_only {
            Some((
                PrimitiveDateTime::new(date, self.day_start).assume_offset(self.offset),
                PrimitiveDateTime::new(date, self.day_end).assume_offset(self.offset),
            ))
        } else {
            let start = PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_offset(self.offset);
            Some((start, start.checked_add(Duration::DAY)?))
        }
    }
}

fn out_of_range(sla: &Sla, entered_at: OffsetDateTime) -> EngineError {
    EngineError::validation(format!(
        "SLA {} of {} hours entered at {} ends outside the supported date range",
        sla.id, sla.duration_hours, entered_at
    ))
}

/// When the SLA for a state entered at `entered_at` is due. Fails when the
/// deadline falls outside the representable date range.
pub fn due_at(
    sla: &Sla,
    entered_at: OffsetDateTime,
    calendar: &BusinessCalendar,
) -> Result<OffsetDateTime, EngineError> {
    let total = sla.duration_seconds();
    if !sla.is_calendar_aware() {
        return entered_at
            .checked_add(Duration::seconds(total))
            .ok_or_else(|| out_of_range(sla, entered_at));
    }

    let local = entered_at.to_offset(calendar.offset);
    let mut remaining = total;
    if remaining <= 0 {
        return Ok(local);
    }
    let mut date = local.date();
    loop {
        if let Some((window_start, window_end)) = calendar.window(sla, date) {
            let start = window_start.max(local);
            if start < window_end {
                let available = (window_end - start).whole_seconds();
                if available >= remaining {
                    return start
                        .checked_add(Duration::seconds(remaining))
                        .ok_or_else(|| out_of_range(sla, entered_at));
                }
                remaining -= available;
            }
        }
        date = date.next_day().ok_or_else(|| out_of_range(sla, entered_at))?;
    }
}

/// Seconds of counted SLA time between two instants.
pub fn counted_seconds(
    sla: &Sla,
    from: OffsetDateTime,
    to: OffsetDateTime,
    calendar: &BusinessCalendar,
) -> i64 {
    if to <= from {
        return 0;
    }
    if !sla.is_calendar_aware() {
        return (to - from).whole_seconds();
    }

    let from = from.to_offset(calendar.offset);
    let to = to.to_offset(calendar.offset);
    let mut counted = 0;
    let mut date = from.date();
    while date <= to.date() {
        if let Some((window_start, window_end)) = calendar.window(sla, date) {
            let start = window_start.max(from);
            let end = window_end.min(to);
            if start < end {
                counted += (end - start).whole_seconds();
            }
        }
        match date.next_day() {
            Some(next) => date = next,
            None => break,
        }
    }
    counted
}

/// Snapshot of an SLA clock for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaStatus {
    pub sla_id: i64,
    pub sla_name: String,
    pub state_id: i64,
    pub duration_hours: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub state_entered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub due_at: OffsetDateTime,
    /// Counted time since entry, in seconds.
    pub elapsed_seconds: i64,
    /// Wall-clock seconds until `due_at`, never negative.
    pub remaining_seconds: i64,
    /// Counted time as a percentage of the duration, on a 0-100 scale
    /// (100 = due), rounded to two places. Not capped. Escalation
    /// thresholds compare against this scale: `approaching 75` fires at 75.
    pub percent_elapsed: Decimal,
    /// Counted time as a fraction of the duration (1.0 = due), rounded to
    /// four places. Not capped.
    pub elapsed_ratio: Decimal,
    pub is_breached: bool,
    /// An `approaching` escalation threshold has been reached and the SLA is
    /// not yet breached.
    pub is_approaching: bool,
}

impl SlaStatus {
    /// True once `percent` of the duration has been counted. Integer
    /// arithmetic so that thresholds are exact.
    pub fn reached_percent(&self, percent: u8) -> bool {
        let duration = i64::from(self.duration_hours) * 3600;
        i128::from(self.elapsed_seconds) * 100 >= i128::from(percent) * i128::from(duration)
    }

    /// Whether an escalation trigger condition currently holds.
    pub fn triggers(&self, trigger: &EscalationTrigger) -> bool {
        match trigger {
            EscalationTrigger::Approaching { percent } => self.reached_percent(*percent),
            EscalationTrigger::Breached => self.is_breached,
        }
    }
}

/// Compute the status of `sla` for a record that entered the state at
/// `entered_at`.
pub fn status(
    sla: &Sla,
    entered_at: OffsetDateTime,
    now: OffsetDateTime,
    calendar: &BusinessCalendar,
) -> Result<SlaStatus, EngineError> {
    let due = due_at(sla, entered_at, calendar)?;
    let elapsed = counted_seconds(sla, entered_at, now, calendar);
    let duration = sla.duration_seconds();
    let elapsed_ratio = if duration > 0 {
        Decimal::from(elapsed) / Decimal::from(duration)
    } else {
        Decimal::ONE
    };
    let percent_elapsed = (elapsed_ratio * Decimal::ONE_HUNDRED).round_dp(2);
    let is_breached = now >= due;

    let mut status = SlaStatus {
        sla_id: sla.id,
        sla_name: sla.name.clone(),
        state_id: sla.state_id,
        duration_hours: sla.duration_hours,
        state_entered_at: entered_at,
        due_at: due,
        elapsed_seconds: elapsed,
        remaining_seconds: (due - now).whole_seconds().max(0),
        percent_elapsed,
        elapsed_ratio: elapsed_ratio.round_dp(4),
        is_breached,
        is_approaching: false,
    };
    status.is_approaching = !is_breached
        && sla.escalations.iter().any(|e| match e.trigger {
            EscalationTrigger::Approaching { percent } => status.reached_percent(percent),
            EscalationTrigger::Breached => false,
        });
    Ok(status)
}
