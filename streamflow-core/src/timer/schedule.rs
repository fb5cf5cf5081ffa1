//! ISO-8601 timer definitions: durations (`PT1M`), repeating cycles
//! (`R3/PT10S`, `R/2024-01-01T00:00:00Z/P1D`) and fixed dates (RFC 3339).

use crate::types::Timestamp;
use chrono::{DateTime, Months, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid timer definition '{text}': {message}")]
pub struct ScheduleError {
    pub text: String,
    pub message: String,
}

impl ScheduleError {
    fn new(text: &str, message: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            message: message.into(),
        }
    }
}

/// Calendar-aware duration. Months (and years) are added on the calendar,
/// the rest as a fixed number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoDuration {
    pub months: u32,
    pub millis: i64,
}

impl IsoDuration {
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let body = text
            .trim()
            .strip_prefix('P')
            .ok_or_else(|| ScheduleError::new(text, "expected a duration starting with 'P'"))?;
        if body.is_empty() {
            return Err(ScheduleError::new(text, "empty duration"));
        }

        let mut months: u32 = 0;
        let mut millis: f64 = 0.0;
        let mut in_time = false;
        let mut number = String::new();
        let mut seen_component = false;

        for c in body.chars() {
            match c {
                'T' => {
                    if in_time || !number.is_empty() {
                        return Err(ScheduleError::new(text, "misplaced 'T'"));
                    }
                    in_time = true;
                }
                '0'..='9' | '.' | ',' => number.push(if c == ',' { '.' } else { c }),
                unit => {
                    let value: f64 = number
                        .parse()
                        .map_err(|_| ScheduleError::new(text, format!("missing number before '{unit}'")))?;
                    number.clear();
                    seen_component = true;
                    match (in_time, unit) {
                        (false, 'Y') => {
                            let years = whole(text, value)?.checked_mul(12);
                            months = add_months(text, months, years)?;
                        }
                        (false, 'M') => months = add_months(text, months, Some(whole(text, value)?))?,
                        (false, 'W') => millis += value * 7.0 * 86_400_000.0,
                        (false, 'D') => millis += value * 86_400_000.0,
                        (true, 'H') => millis += value * 3_600_000.0,
                        (true, 'M') => millis += value * 60_000.0,
                        (true, 'S') => millis += value * 1_000.0,
                        _ => {
                            return Err(ScheduleError::new(text, format!("unexpected unit '{unit}'")))
                        }
                    }
                }
            }
        }
        if !number.is_empty() || !seen_component {
            return Err(ScheduleError::new(text, "incomplete duration"));
        }
        if !millis.is_finite() || millis >= i64::MAX as f64 {
            return Err(ScheduleError::new(text, "duration out of range"));
        }
        Ok(Self {
            months,
            millis: millis.round() as i64,
        })
    }

    pub fn is_zero(&self) -> bool {
        self.months == 0 && self.millis == 0
    }

    pub fn add_to(&self, timestamp: Timestamp) -> Timestamp {
        let Some(start) = Utc.timestamp_millis_opt(timestamp).single() else {
            return timestamp.saturating_add(self.millis);
        };
        let shifted = if self.months > 0 {
            start
                .checked_add_months(Months::new(self.months))
                .unwrap_or(start)
        } else {
            start
        };
        shifted.timestamp_millis().saturating_add(self.millis)
    }
}

fn whole(text: &str, value: f64) -> Result<u32, ScheduleError> {
    if value.fract() != 0.0 || value < 0.0 {
        return Err(ScheduleError::new(text, "years and months must be whole numbers"));
    }
    if value > f64::from(u32::MAX) {
        return Err(ScheduleError::new(text, "duration out of range"));
    }
    Ok(value as u32)
}

fn add_months(text: &str, months: u32, more: Option<u32>) -> Result<u32, ScheduleError> {
    more.and_then(|more| months.checked_add(more))
        .ok_or_else(|| ScheduleError::new(text, "duration out of range"))
}

pub fn parse_date(text: &str) -> Result<Timestamp, ScheduleError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|date| date.timestamp_millis())
        .map_err(|err| ScheduleError::new(text, err.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSchedule {
    Duration(IsoDuration),
    /// `repetitions == -1` repeats forever.
    Cycle {
        repetitions: i32,
        start: Option<Timestamp>,
        interval: IsoDuration,
    },
    Date(Timestamp),
}

impl TimerSchedule {
    pub fn duration(text: &str) -> Result<Self, ScheduleError> {
        IsoDuration::parse(text).map(TimerSchedule::Duration)
    }

    pub fn date(text: &str) -> Result<Self, ScheduleError> {
        parse_date(text).map(TimerSchedule::Date)
    }

    pub fn cycle(text: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = text.trim().split('/').collect();
        let repeat = parts
            .first()
            .and_then(|p| p.strip_prefix('R'))
            .ok_or_else(|| ScheduleError::new(text, "expected a cycle starting with 'R'"))?;
        let repetitions = if repeat.is_empty() {
            -1
        } else {
            repeat
                .parse::<i32>()
                .ok()
                .filter(|n| *n >= 0)
                .ok_or_else(|| ScheduleError::new(text, "invalid repetition count"))?
        };
        let (start, interval) = match parts.as_slice() {
            [_, interval] => (None, IsoDuration::parse(interval)?),
            [_, start, interval] => (Some(parse_date(start)?), IsoDuration::parse(interval)?),
            _ => return Err(ScheduleError::new(text, "expected R[n]/[start/]duration")),
        };
        if interval.is_zero() {
            return Err(ScheduleError::new(text, "cycle interval must not be zero"));
        }
        Ok(TimerSchedule::Cycle {
            repetitions,
            start,
            interval,
        })
    }

    /// Due date of the first occurrence relative to `now`.
    pub fn first_due_date(&self, now: Timestamp) -> Timestamp {
        match self {
            TimerSchedule::Duration(duration) => duration.add_to(now),
            TimerSchedule::Date(date) => *date,
            TimerSchedule::Cycle {
                start: Some(start),
                ..
            } if *start > now => *start,
            TimerSchedule::Cycle { interval, .. } => interval.add_to(now),
        }
    }

    /// Due date of the occurrence following one that fired at `now`.
    pub fn next_due_date(&self, now: Timestamp) -> Timestamp {
        match self {
            TimerSchedule::Cycle { interval, .. } => interval.add_to(now),
            other => other.first_due_date(now),
        }
    }

    pub fn repetitions(&self) -> i32 {
        match self {
            TimerSchedule::Cycle { repetitions, .. } => *repetitions,
            _ => 1,
        }
    }
}

/// A timer that fired with `repetitions` remaining is rescheduled when it
/// repeats forever or still has more than one occurrence left.
pub fn should_reschedule(repetitions: i32) -> bool {
    repetitions == -1 || repetitions > 1
}

pub fn remaining_after_trigger(repetitions: i32) -> i32 {
    if repetitions == -1 {
        -1
    } else {
        repetitions - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_time_durations() {
        assert_eq!(IsoDuration::parse("PT1M").unwrap().millis, 60_000);
        assert_eq!(IsoDuration::parse("PT1.5S").unwrap().millis, 1_500);
        assert_eq!(IsoDuration::parse("P1DT1H").unwrap().millis, 90_000_000);
        assert!(IsoDuration::parse("1M").is_err());
        assert!(IsoDuration::parse("P").is_err());
        assert!(IsoDuration::parse("PT5").is_err());
    }

    #[test]
    fn oversized_durations_are_errors() {
        let err = IsoDuration::parse("P400000000Y").unwrap_err();
        assert_eq!(err.message, "duration out of range");
        assert!(IsoDuration::parse("P4294967295M").is_ok());
        assert!(IsoDuration::parse("P4294967295M1M").is_err());
        assert!(IsoDuration::parse("P99999999999999999999D").is_err());
        assert!(TimerSchedule::cycle("R/P400000000Y").is_err());
    }

    #[test]
    fn months_follow_the_calendar() {
        let jan_31 = parse_date("2024-01-31T00:00:00Z").unwrap();
        let feb_29 = parse_date("2024-02-29T00:00:00Z").unwrap();
        assert_eq!(IsoDuration::parse("P1M").unwrap().add_to(jan_31), feb_29);
    }

    #[test]
    fn cycles() {
        let schedule = TimerSchedule::cycle("R3/PT10S").unwrap();
        assert_eq!(schedule.repetitions(), 3);
        assert_eq!(schedule.first_due_date(1_000), 11_000);
        assert_eq!(schedule.next_due_date(11_000), 21_000);

        let infinite = TimerSchedule::cycle("R/PT1M").unwrap();
        assert_eq!(infinite.repetitions(), -1);

        let start = parse_date("2030-01-01T00:00:00Z").unwrap();
        let started = TimerSchedule::cycle("R2/2030-01-01T00:00:00Z/P1D").unwrap();
        assert_eq!(started.first_due_date(0), start);

        assert!(TimerSchedule::cycle("PT10S").is_err());
        assert!(TimerSchedule::cycle("R2/PT0S").is_err());
    }

    #[test]
    fn reschedule_rules() {
        assert!(should_reschedule(-1));
        assert!(should_reschedule(2));
        assert!(!should_reschedule(1));
        assert_eq!(remaining_after_trigger(3), 2);
        assert_eq!(remaining_after_trigger(-1), -1);
    }

    proptest! {
        #[test]
        fn day_time_durations_add_exactly(d in 0u32..40, h in 0u32..30, m in 0u32..90, s in 0u32..90) {
            let text = format!("P{d}DT{h}H{m}M{s}S");
            let duration = IsoDuration::parse(&text).unwrap();
            let expected = ((d as i64 * 24 + h as i64) * 60 + m as i64) * 60_000 + s as i64 * 1000;
            prop_assert_eq!(duration.add_to(5_000), 5_000 + expected);
        }
    }
}
