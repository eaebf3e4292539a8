//! Calendar arithmetic for partition slots.
//!
//! A slot is the canonical partition that should exist for a given step
//! offset from "now". Boundaries are local midnights in the configured
//! timezone, expressed as epoch seconds because that is what the tables are
//! partitioned on.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use common::StepUnit;
use thiserror::Error;

use crate::policy::RetentionPolicy;

/// Number of 15 minute probes past midnight tried when a zone skips midnight.
const MIDNIGHT_GAP_PROBES: i64 = 12;

/// Canonical description of a partition that should exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSlot {
    /// Partition identifier, `p` followed by the formatted start date.
    pub name: String,
    /// First calendar day covered by the slot.
    pub start: NaiveDate,
    /// Inclusive lower boundary (epoch seconds).
    pub lower: i64,
    /// Exclusive upper boundary (epoch seconds), the lower boundary of the next slot.
    pub upper: i64,
}

/// Range of partition timestamps a table may hold for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegalWindow {
    /// Partitions starting before this are expired.
    pub min: i64,
    /// Start of the furthest-future slot; partitions starting after it are beyond the horizon.
    pub max: i64,
}

/// Immutable "now" context for slot computations of one table.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    anchor: NaiveDate,
    step: StepUnit,
    tz: Tz,
}

impl TimeWindow {
    /// Capture `now` in `tz`, truncated to the start of its step.
    pub fn new(now: DateTime<Utc>, tz: Tz, step: StepUnit) -> Self {
        let local_date = now.with_timezone(&tz).date_naive();
        Self {
            anchor: truncate(local_date, step),
            step,
            tz,
        }
    }

    /// The start of the step containing "now".
    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    pub fn step(&self) -> StepUnit {
        self.step
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Slot starting `offset + 1` steps after the current one's start.
    ///
    /// Offset `-1` is the slot containing now, offset `0` the one right after it.
    pub fn slot_at(&self, offset: i64) -> Result<PartitionSlot, WindowError> {
        let shift = offset
            .checked_add(1)
            .ok_or(WindowError::OutOfRange {
                date: self.anchor,
                step: self.step,
                count: offset,
            })?;
        let start = advance(self.anchor, self.step, shift)?;
        self.slot_starting(start)
    }

    /// Slot immediately following `slot`.
    pub fn next_slot(&self, slot: &PartitionSlot) -> Result<PartitionSlot, WindowError> {
        let start = advance(slot.start, self.step, 1)?;
        self.slot_starting(start)
    }

    /// Slot whose first day is `start`. `start` is expected to be step aligned.
    pub fn slot_starting(&self, start: NaiveDate) -> Result<PartitionSlot, WindowError> {
        let end = advance(start, self.step, 1)?;
        Ok(PartitionSlot {
            name: slot_name(start, self.step),
            start,
            lower: self.boundary_of(start)?,
            upper: self.boundary_of(end)?,
        })
    }

    /// Epoch seconds of local midnight at the start of `date`.
    pub fn boundary_of(&self, date: NaiveDate) -> Result<i64, WindowError> {
        local_midnight(self.tz, date)
    }

    /// Compute the legal window for `policy`.
    pub fn legal_window(&self, policy: &RetentionPolicy) -> Result<LegalWindow, WindowError> {
        let oldest = advance(self.anchor, self.step, -i64::from(policy.retention()))?;
        let furthest = advance(self.anchor, self.step, i64::from(policy.look_ahead()))?;

        Ok(LegalWindow {
            min: self.boundary_of(oldest)?,
            max: self.boundary_of(furthest)?,
        })
    }
}

/// Start of the step containing `date`.
pub fn truncate(date: NaiveDate, step: StepUnit) -> NaiveDate {
    match step {
        StepUnit::Day => date,
        StepUnit::Month => date - Days::new(u64::from(date.day0())),
    }
}

/// Move `date` by `count` steps; negative counts go backwards.
///
/// Month steps keep the day of month, clamped to the length of the target month.
pub fn advance(date: NaiveDate, step: StepUnit, count: i64) -> Result<NaiveDate, WindowError> {
    let magnitude = count.unsigned_abs();
    let forward = count >= 0;

    let shifted = match step {
        StepUnit::Day => {
            let days = Days::new(magnitude);
            if forward {
                date.checked_add_days(days)
            } else {
                date.checked_sub_days(days)
            }
        }
        StepUnit::Month => u32::try_from(magnitude).ok().and_then(|months| {
            let months = Months::new(months);
            if forward {
                date.checked_add_months(months)
            } else {
                date.checked_sub_months(months)
            }
        }),
    };

    shifted.ok_or(WindowError::OutOfRange { date, step, count })
}

/// Date format of slot names, without the `p` prefix.
pub fn name_format(step: StepUnit) -> &'static str {
    match step {
        StepUnit::Day => "%Y%m%d",
        StepUnit::Month => "%Y%m",
    }
}

/// Partition name of the slot starting at `start`.
pub fn slot_name(start: NaiveDate, step: StepUnit) -> String {
    format!("p{}", start.format(name_format(step)))
}

/// Decode a partition name produced by [`slot_name`] back to its start date.
///
/// Only the exact fixed-width form is accepted: `p` + `YYYYMM` for months or
/// `p` + `YYYYMMDD` for days, naming a real calendar date.
pub fn parse_slot_name(name: &str, step: StepUnit) -> Option<NaiveDate> {
    let digits = name.strip_prefix('p')?;
    let expected_len = match step {
        StepUnit::Day => 8,
        StepUnit::Month => 6,
    };
    if digits.len() != expected_len || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = digits[0..4].parse().ok()?;
    let month: u32 = digits[4..6].parse().ok()?;
    let day: u32 = match step {
        StepUnit::Day => digits[6..8].parse().ok()?,
        StepUnit::Month => 1,
    };

    NaiveDate::from_ymd_opt(year, month, day)
}

fn local_midnight(tz: Tz, date: NaiveDate) -> Result<i64, WindowError> {
    let midnight = date.and_time(NaiveTime::MIN);

    // Zones that move their clocks at midnight skip it on transition days.
    (0..=MIDNIGHT_GAP_PROBES)
        .map(|probe| midnight + TimeDelta::minutes(15 * probe))
        .find_map(|local| tz.from_local_datetime(&local).earliest())
        .map(|instant| instant.timestamp())
        .ok_or(WindowError::NonexistentMidnight {
            date,
            timezone: tz.name(),
        })
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Cannot move {date} by {count} {step} steps: out of calendar range")]
    OutOfRange {
        date: NaiveDate,
        step: StepUnit,
        count: i64,
    },

    #[error("Start of day {date} does not exist in timezone {timezone}")]
    NonexistentMidnight {
        date: NaiveDate,
        timezone: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_slots_relative_to_now() {
        let window = TimeWindow::new(utc(2024, 3, 15, 13), Tz::UTC, StepUnit::Day);

        let current = window.slot_at(-1).unwrap();
        assert_eq!(current.name, "p20240315");
        assert_eq!(current.lower, utc(2024, 3, 15, 0).timestamp());
        assert_eq!(current.upper, utc(2024, 3, 16, 0).timestamp());

        let first_future = window.slot_at(0).unwrap();
        assert_eq!(first_future.name, "p20240316");
        assert_eq!(first_future.upper, 1_710_633_600);

        let past = window.slot_at(-3).unwrap();
        assert_eq!(past.name, "p20240313");
    }

    #[test]
    fn test_month_slots_and_year_rollover() {
        let window = TimeWindow::new(utc(2024, 11, 30, 23), Tz::UTC, StepUnit::Month);
        assert_eq!(window.anchor(), date(2024, 11, 1));

        let slot = window.slot_at(0).unwrap();
        assert_eq!(slot.name, "p202412");
        assert_eq!(slot.lower, utc(2024, 12, 1, 0).timestamp());
        assert_eq!(slot.upper, utc(2025, 1, 1, 0).timestamp());

        let next = window.next_slot(&slot).unwrap();
        assert_eq!(next.name, "p202501");
        assert_eq!(next.lower, slot.upper);
    }

    #[test]
    fn test_successive_slots_chain() {
        for step in [StepUnit::Day, StepUnit::Month] {
            let window = TimeWindow::new(utc(2024, 1, 31, 12), Tz::UTC, step);
            for offset in -5..40 {
                let slot = window.slot_at(offset).unwrap();
                let following = window.slot_at(offset + 1).unwrap();
                assert_eq!(slot.upper, following.lower, "{step} offset {offset}");
                assert_eq!(window.next_slot(&slot).unwrap(), following);
            }
        }
    }

    #[test]
    fn test_advance_clamps_month_end() {
        assert_eq!(
            advance(date(2024, 1, 31), StepUnit::Month, 1).unwrap(),
            date(2024, 2, 29)
        );
        assert_eq!(
            advance(date(2024, 3, 31), StepUnit::Month, -1).unwrap(),
            date(2024, 2, 29)
        );
        assert_eq!(
            advance(date(2024, 2, 28), StepUnit::Day, 2).unwrap(),
            date(2024, 3, 1)
        );
        assert_eq!(
            advance(date(2024, 1, 1), StepUnit::Day, -1).unwrap(),
            date(2023, 12, 31)
        );
        assert!(advance(NaiveDate::MAX, StepUnit::Day, 1).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate(date(2024, 3, 15), StepUnit::Day), date(2024, 3, 15));
        assert_eq!(truncate(date(2024, 3, 15), StepUnit::Month), date(2024, 3, 1));
    }

    #[test]
    fn test_slot_names_round_trip_through_parser() {
        assert_eq!(slot_name(date(2024, 3, 5), StepUnit::Day), "p20240305");
        assert_eq!(slot_name(date(2024, 3, 5), StepUnit::Month), "p202403");

        assert_eq!(
            parse_slot_name("p20240305", StepUnit::Day),
            Some(date(2024, 3, 5))
        );
        assert_eq!(
            parse_slot_name("p202403", StepUnit::Month),
            Some(date(2024, 3, 1))
        );
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(parse_slot_name("ptmp", StepUnit::Day), None);
        assert_eq!(parse_slot_name("pmax", StepUnit::Month), None);
        assert_eq!(parse_slot_name("20240305", StepUnit::Day), None);
        assert_eq!(parse_slot_name("p202403", StepUnit::Day), None);
        assert_eq!(parse_slot_name("p20240305", StepUnit::Month), None);
        assert_eq!(parse_slot_name("p20240230", StepUnit::Day), None);
        assert_eq!(parse_slot_name("p202413", StepUnit::Month), None);
        assert_eq!(parse_slot_name("p2024-3-5", StepUnit::Day), None);
        assert_eq!(parse_slot_name("p+2024035", StepUnit::Day), None);
    }

    #[test]
    fn test_legal_window() {
        let window = TimeWindow::new(utc(2024, 3, 15, 8), Tz::UTC, StepUnit::Day);
        let policy = RetentionPolicy::new(StepUnit::Day, 30, 7).unwrap();

        let legal = window.legal_window(&policy).unwrap();
        assert_eq!(legal.min, utc(2024, 2, 14, 0).timestamp());
        assert_eq!(legal.max, utc(2024, 3, 22, 0).timestamp());
        assert!(legal.min < legal.max);

        let last = window
            .slot_at(i64::from(policy.look_ahead()) - 1)
            .unwrap();
        assert_eq!(last.lower, legal.max);
    }

    #[test]
    fn test_local_timezone_boundaries() {
        let berlin: Tz = "Europe/Berlin".parse().unwrap();
        // 23:00 UTC on March 30th is already midnight of March 31st in Berlin.
        let window = TimeWindow::new(utc(2024, 3, 30, 23), berlin, StepUnit::Day);
        assert_eq!(window.anchor(), date(2024, 3, 31));

        let current = window.slot_at(-1).unwrap();
        assert_eq!(current.name, "p20240331");
        assert_eq!(current.lower, utc(2024, 3, 30, 23).timestamp());
        // Clocks move forward that night, so the day is 23 hours long.
        assert_eq!(current.upper - current.lower, 23 * 3600);
    }

    #[test]
    fn test_skipped_midnight_resolves_to_first_valid_instant() {
        // Santiago moved clocks from 00:00 to 01:00 on 2022-09-11.
        let santiago: Tz = "America/Santiago".parse().unwrap();
        let window = TimeWindow::new(utc(2022, 9, 11, 12), santiago, StepUnit::Day);

        let current = window.slot_at(-1).unwrap();
        assert_eq!(current.lower, utc(2022, 9, 11, 4).timestamp());
        assert_eq!(current.upper - current.lower, 23 * 3600);
    }
}
