//! `@now`/`@date`, `@time` and `@time-stepper` directives.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, TimeDelta, TimeZone};
use serde::Deserialize;
use serde_json::Value;

use super::context::{RenderContext, Var};
use super::datefmt::{self, DEFAULT_DATE_FORMAT, DEFAULT_TIME_FORMAT};
use super::{Directive, DirectiveError, DirectiveOutput, DirectiveParam};

/// Upper bound on buckets a stepper will produce.
const MAX_STEPS: usize = 100_000;

fn duration(field: &str, raw: &str) -> Result<TimeDelta, DirectiveError> {
    datefmt::parse_duration(raw)
        .ok_or_else(|| DirectiveError::InvalidParam(format!("{field}: invalid duration '{raw}'")))
}

#[derive(Debug, Default, Deserialize)]
struct NowParam {
    #[serde(default)]
    fmt: String,
    #[serde(default)]
    offset: String,
}

/// Formats the render's clock.
pub struct Now;

#[async_trait]
impl Directive for Now {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        _key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let param = match param {
            DirectiveParam::Text(fmt) => NowParam {
                fmt,
                offset: String::new(),
            },
            DirectiveParam::Json(Value::String(fmt)) => NowParam {
                fmt,
                offset: String::new(),
            },
            DirectiveParam::Json(v @ Value::Object(_)) => serde_json::from_value(v)
                .map_err(|e| DirectiveError::InvalidParam(e.to_string()))?,
            DirectiveParam::Json(_) => NowParam::default(),
        };

        let t = ctx.now() + duration("offset", &param.offset)?;
        let layout = if param.fmt.trim().is_empty() {
            DEFAULT_DATE_FORMAT
        } else {
            param.fmt.trim()
        };
        Ok(DirectiveOutput::Set(Value::String(datefmt::format_date(
            &t, layout,
        ))))
    }
}

#[derive(Debug, Default, Deserialize)]
struct TimeParam {
    #[serde(default)]
    value: String,
    #[serde(default)]
    offset: String,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    truncate: String,
}

/// Resolves a symbolic anchor into a context variable.
///
/// `unit` selects the output: `s`/`seconds` and `ms`/`millis` give epoch
/// numbers, anything else is a date format.
pub struct TimeAnchor;

#[async_trait]
impl Directive for TimeAnchor {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let param: TimeParam = match param {
            DirectiveParam::Text(value) | DirectiveParam::Json(Value::String(value)) => TimeParam {
                value,
                ..TimeParam::default()
            },
            other => other.parse()?,
        };

        let mut t = anchor(param.value.trim(), ctx.now())?;
        t += duration("offset", &param.offset)?;
        t = datefmt::truncate(t, duration("truncate", &param.truncate)?);

        let value = match param.unit.trim() {
            "s" | "seconds" => Value::from(t.timestamp()),
            "ms" | "millis" => Value::from(t.timestamp_millis()),
            "" => Value::String(datefmt::format_date(&t, DEFAULT_TIME_FORMAT)),
            layout => Value::String(datefmt::format_date(&t, layout)),
        };
        ctx.set_value(key, value);
        Ok(DirectiveOutput::Delete)
    }
}

fn anchor(name: &str, now: DateTime<Local>) -> Result<DateTime<Local>, DirectiveError> {
    let day_start = datefmt::truncate(now, TimeDelta::days(1));
    let month_start = Local
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .earliest()
        .unwrap_or(day_start);
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let next_month_start = Local
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .earliest()
        .unwrap_or(month_start);
    let second = TimeDelta::seconds(1);

    Ok(match name {
        "" | "now" | "today" => now,
        "yesterday" => now - TimeDelta::days(1),
        "tomorrow" => now + TimeDelta::days(1),
        "dayStart" => day_start,
        "nextDayStart" => day_start + TimeDelta::days(1),
        "dayEnd" => day_start + TimeDelta::days(1) - second,
        "monthStart" => month_start,
        "nextMonthStart" => next_month_start,
        "monthEnd" => next_month_start - second,
        other => {
            return Err(DirectiveError::InvalidParam(format!(
                "unknown time anchor '{other}'"
            )))
        }
    })
}

/// One bucket produced by [`TimeStepper::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLabel {
    pub label: String,
    pub nanos: i64,
}

/// Restartable cursor over time buckets between two instants (both inclusive).
#[derive(Debug, Clone)]
pub struct TimeStepper {
    start: DateTime<Local>,
    end: DateTime<Local>,
    cursor: DateTime<Local>,
    step: TimeDelta,
    fmt: String,
    fill: Value,
    produced: usize,
}

impl TimeStepper {
    /// Start and end are truncated to `step`. A non-positive step is rejected.
    pub fn new(
        now: DateTime<Local>,
        step: TimeDelta,
        start_offset: TimeDelta,
        end_offset: TimeDelta,
        fmt: impl Into<String>,
        fill: Value,
    ) -> Result<Self, DirectiveError> {
        if step <= TimeDelta::zero() {
            return Err(DirectiveError::InvalidParam(
                "step must be a positive duration".into(),
            ));
        }
        let start = datefmt::truncate(now + start_offset, step);
        Ok(Self {
            start,
            end: datefmt::truncate(now + end_offset, step),
            cursor: start,
            step,
            fmt: fmt.into(),
            fill,
            produced: 0,
        })
    }

    pub fn step(&mut self) -> Option<StepLabel> {
        if self.cursor > self.end || self.produced >= MAX_STEPS {
            return None;
        }
        let label = StepLabel {
            label: datefmt::format_date(&self.cursor, &self.fmt),
            nanos: self.cursor.timestamp_nanos_opt().unwrap_or_default(),
        };
        self.cursor += self.step;
        self.produced += 1;
        Some(label)
    }

    pub fn reset(&mut self) {
        self.cursor = self.start;
        self.produced = 0;
    }

    #[must_use]
    pub const fn fill(&self) -> &Value {
        &self.fill
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepperParam {
    step: String,
    #[serde(default)]
    start_offset: String,
    #[serde(default)]
    end_offset: String,
    #[serde(default)]
    fmt: String,
    #[serde(default)]
    fill: Value,
}

pub struct TimeStepperDirective;

#[async_trait]
impl Directive for TimeStepperDirective {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError> {
        let param: StepperParam = param.parse()?;
        let fmt = if param.fmt.is_empty() {
            DEFAULT_TIME_FORMAT.to_string()
        } else {
            param.fmt
        };
        let stepper = TimeStepper::new(
            ctx.now(),
            duration("step", &param.step)?,
            duration("startOffset", &param.start_offset)?,
            duration("endOffset", &param.end_offset)?,
            fmt,
            param.fill,
        )?;
        ctx.set(key, Var::Stepper(stepper));
        Ok(DirectiveOutput::Delete)
    }
}
