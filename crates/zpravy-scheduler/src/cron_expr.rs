//! Five-field cron expressions evaluated in UTC.
//!
//! `minute hour day-of-month month day-of-week`, parsed by the `cron` crate
//! after prepending a zero seconds field. Day-of-week is written 0–7 here
//! (0 and 7 are Sunday) and renumbered to the crate's 1 = Sunday … 7 =
//! Saturday before parsing; `MON`–`SUN` names pass through. When both day
//! fields are restricted a day must match both.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field `{value}`: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Syntax(String),

    #[error("expression never fires")]
    NeverFires,
}

const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: Schedule,
    expression: String,
}

impl CronSchedule {
    /// Parse `expression`. Expressions with no future firing (e.g.
    /// `0 0 30 2 *`) are rejected.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }
        for (name, field) in FIELD_NAMES.iter().zip(&fields) {
            check_steps(name, field)?;
        }

        let day_of_week = renumber_days_of_week(fields[4])?;
        let six_field = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], day_of_week
        );
        let schedule =
            Schedule::from_str(&six_field).map_err(|e| CronError::Syntax(e.to_string()))?;
        if schedule.upcoming(Utc).next().is_none() {
            return Err(CronError::NeverFires);
        }

        Ok(Self {
            schedule,
            expression: fields.join(" "),
        })
    }

    /// The expression with whitespace collapsed to single spaces.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First matching minute strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }
}

fn invalid(field: &'static str, value: &str, reason: &str) -> CronError {
    CronError::InvalidField {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// A zero step would never advance.
fn check_steps(field: &'static str, text: &str) -> Result<(), CronError> {
    for part in text.split(',') {
        if let Some((_, step)) = part.split_once('/') {
            if step.parse::<u32>().ok() == Some(0) {
                return Err(invalid(field, text, "step must be positive"));
            }
        }
    }
    Ok(())
}

/// Rewrite numeric day-of-week items from 0–7 (Sunday = 0 or 7) into the
/// crate's 1–7 (Sunday = 1) as an explicit list. `*` and named days are kept.
fn renumber_days_of_week(text: &str) -> Result<String, CronError> {
    const FIELD: &str = "day-of-week";
    if !text.bytes().any(|b| b.is_ascii_digit()) {
        return Ok(text.to_string());
    }

    let number = |s: &str| {
        s.parse::<u32>()
            .map_err(|_| invalid(FIELD, text, "not a number"))
    };

    let mut days = [false; 7];
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, number(step)?),
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (0, 7)
        } else if let Some((a, b)) = range.split_once('-') {
            (number(a)?, number(b)?)
        } else {
            let start = number(range)?;
            (start, if part.contains('/') { 7 } else { start })
        };
        if hi > 7 {
            return Err(invalid(FIELD, text, "out of range 0-7"));
        }
        if lo > hi {
            return Err(invalid(FIELD, text, "range start after end"));
        }
        for day in (lo..=hi).step_by(step as usize) {
            days[(day % 7) as usize] = true;
        }
    }

    let list: Vec<String> = days
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(day, _)| (day + 1).to_string())
        .collect();
    Ok(list.join(","))
}
