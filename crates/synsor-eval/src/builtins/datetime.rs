//! Temporal builtins.
//!
//! Calendar functions return `Date`/`DateTime` values; span builders return
//! `Duration`. Mixed date arithmetic happens in the interpreter's operator
//! layer; the boundary coercions (duration → seconds, datetime → ISO text)
//! happen when a formula result is published.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use synsor_common::{EngineError, EngineErrorKind, Value, parse_datetime};

use crate::function::{ArgumentHandle, FnCaps, Function};
use crate::traits::EvaluationEnv;

fn value_error(msg: String) -> EngineError {
    EngineError::new(EngineErrorKind::Value).with_message(msg)
}

/// Interpret an argument as a point in time: a `DateTime`, a `Date` at
/// midnight, or an ISO-8601 string.
fn as_datetime(v: &Value) -> Result<NaiveDateTime, EngineError> {
    match v {
        Value::DateTime(dt) => Ok(*dt),
        Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0).unwrap()),
        Value::Text(s) => parse_datetime(s)
            .ok_or_else(|| value_error(format!("cannot parse '{s}' as a datetime"))),
        other => Err(value_error(format!("expected a datetime, got '{other}'"))),
    }
}

fn span_from_millis(millis: f64) -> Value {
    Value::Duration(Duration::milliseconds(millis as i64))
}

/* ───────────────────────── clock readers ────────────────────── */

#[derive(Debug)]
pub struct NowFn;

impl Function for NowFn {
    fn caps(&self) -> FnCaps {
        FnCaps::VOLATILE
    }
    fn name(&self) -> &'static str {
        "now"
    }

    fn eval<'a, 'b>(
        &self,
        _args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::DateTime(env.now()))
    }
}

#[derive(Debug)]
pub struct TodayFn;

impl Function for TodayFn {
    fn caps(&self) -> FnCaps {
        FnCaps::VOLATILE
    }
    fn name(&self) -> &'static str {
        "today"
    }

    fn eval<'a, 'b>(
        &self,
        _args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::Date(env.now().date()))
    }
}

#[derive(Debug)]
pub struct YesterdayFn;

impl Function for YesterdayFn {
    fn caps(&self) -> FnCaps {
        FnCaps::VOLATILE
    }
    fn name(&self) -> &'static str {
        "yesterday"
    }

    fn eval<'a, 'b>(
        &self,
        _args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::Date(env.now().date() - Duration::days(1)))
    }
}

#[derive(Debug)]
pub struct TomorrowFn;

impl Function for TomorrowFn {
    fn caps(&self) -> FnCaps {
        FnCaps::VOLATILE
    }
    fn name(&self) -> &'static str {
        "tomorrow"
    }

    fn eval<'a, 'b>(
        &self,
        _args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::Date(env.now().date() + Duration::days(1)))
    }
}

#[derive(Debug)]
pub struct UtcTodayFn;

impl Function for UtcTodayFn {
    fn caps(&self) -> FnCaps {
        FnCaps::VOLATILE
    }
    fn name(&self) -> &'static str {
        "utc_today"
    }

    fn eval<'a, 'b>(
        &self,
        _args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::Date(env.utc_now().date()))
    }
}

#[derive(Debug)]
pub struct UtcYesterdayFn;

impl Function for UtcYesterdayFn {
    fn caps(&self) -> FnCaps {
        FnCaps::VOLATILE
    }
    fn name(&self) -> &'static str {
        "utc_yesterday"
    }

    fn eval<'a, 'b>(
        &self,
        _args: &'a [ArgumentHandle<'a, 'b>],
        env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        Ok(Value::Date(env.utc_now().date() - Duration::days(1)))
    }
}

/* ───────────────────────── constructors ─────────────────────── */

#[derive(Debug)]
pub struct DateFn;

impl Function for DateFn {
    fn name(&self) -> &'static str {
        "date"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        match args[0].value()?.as_ref() {
            Value::Date(d) => Ok(Value::Date(*d)),
            Value::DateTime(dt) => Ok(Value::Date(dt.date())),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| value_error(format!("cannot parse '{s}' as a date"))),
            other => Err(value_error(format!("cannot make a date from '{other}'"))),
        }
    }
}

#[derive(Debug)]
pub struct DatetimeFn;

impl Function for DatetimeFn {
    fn name(&self) -> &'static str {
        "datetime"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        as_datetime(args[0].value()?.as_ref()).map(Value::DateTime)
    }
}

/* ───────────────────────── span builders ────────────────────── */

macro_rules! span_fn {
    ($struct_name:ident, $fn_name:literal, $millis_per_unit:expr) => {
        #[derive(Debug)]
        pub struct $struct_name;

        impl Function for $struct_name {
            fn name(&self) -> &'static str {
                $fn_name
            }
            fn min_args(&self) -> usize {
                1
            }

            fn eval<'a, 'b>(
                &self,
                args: &'a [ArgumentHandle<'a, 'b>],
                _env: &dyn EvaluationEnv,
            ) -> Result<Value, EngineError> {
                if let Value::Alt(alt) = args[0].value()?.as_ref() {
                    return Ok(Value::Alt(*alt));
                }
                Ok(span_from_millis(args[0].number()? * $millis_per_unit))
            }
        }
    };
}

span_fn!(SecondsFn, "seconds", 1_000.0);
span_fn!(MinutesFn, "minutes", 60_000.0);
span_fn!(HoursFn, "hours", 3_600_000.0);
span_fn!(DaysFn, "days", 86_400_000.0);
span_fn!(WeeksFn, "weeks", 604_800_000.0);

/// `timedelta(days[, hours[, minutes[, seconds]]])`
#[derive(Debug)]
pub struct TimedeltaFn;

impl Function for TimedeltaFn {
    fn name(&self) -> &'static str {
        "timedelta"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(4)
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        const UNIT_MILLIS: [f64; 4] = [86_400_000.0, 3_600_000.0, 60_000.0, 1_000.0];
        let mut millis = 0.0;
        for (arg, unit) in args.iter().zip(UNIT_MILLIS) {
            millis += arg.number()? * unit;
        }
        Ok(span_from_millis(millis))
    }
}

/* ───────────────────────── diff helpers ─────────────────────── */

macro_rules! between_fn {
    ($struct_name:ident, $fn_name:literal, $millis_per_unit:expr) => {
        #[derive(Debug)]
        pub struct $struct_name;

        impl Function for $struct_name {
            fn name(&self) -> &'static str {
                $fn_name
            }
            fn min_args(&self) -> usize {
                2
            }

            fn eval<'a, 'b>(
                &self,
                args: &'a [ArgumentHandle<'a, 'b>],
                _env: &dyn EvaluationEnv,
            ) -> Result<Value, EngineError> {
                let from = as_datetime(args[0].value()?.as_ref())?;
                let to = as_datetime(args[1].value()?.as_ref())?;
                let millis = (to - from).num_milliseconds() as f64;
                Ok(Value::Number(millis / $millis_per_unit))
            }
        }
    };
}

between_fn!(MinutesBetweenFn, "minutes_between", 60_000.0);
between_fn!(HoursBetweenFn, "hours_between", 3_600_000.0);
between_fn!(DaysBetweenFn, "days_between", 86_400_000.0);

/* ───────────────────────── formatting ───────────────────────── */

#[derive(Debug)]
pub struct FormatFriendlyFn;

impl Function for FormatFriendlyFn {
    fn name(&self) -> &'static str {
        "format_friendly"
    }
    fn min_args(&self) -> usize {
        1
    }

    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _env: &dyn EvaluationEnv,
    ) -> Result<Value, EngineError> {
        let text = match args[0].value()?.as_ref() {
            Value::DateTime(dt) => dt.format("%B %-d, %Y at %-H:%M").to_string(),
            Value::Date(d) => d.format("%B %-d, %Y").to_string(),
            Value::Duration(d) => friendly_duration(d),
            Value::Number(n) => friendly_duration(&Duration::milliseconds((n * 1_000.0) as i64)),
            Value::Int(n) => friendly_duration(&Duration::seconds(*n)),
            Value::Text(s) => {
                let dt = as_datetime(&Value::Text(s.clone()))?;
                dt.format("%B %-d, %Y at %-H:%M").to_string()
            }
            other => {
                return Err(value_error(format!(
                    "format_friendly() is not defined for '{other}'"
                )));
            }
        };
        Ok(Value::Text(text))
    }
}

fn friendly_duration(d: &Duration) -> String {
    let total_secs = d.num_seconds().abs();
    let (days, rem) = (total_secs / 86_400, total_secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    let joined = parts.join(" ");
    if d.num_seconds() < 0 {
        format!("-{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::FormulaFixture;

    #[test]
    fn spans_read_as_seconds() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("minutes(3) / 60"), Ok(Value::Number(3.0)));
        assert_eq!(fx.eval("hours(1) + minutes(30)"), Ok(Value::Duration(Duration::minutes(90))));
        assert_eq!(
            fx.eval("timedelta(1, 2, 30)"),
            Ok(Value::Duration(Duration::minutes(24 * 60 + 150)))
        );
    }

    #[test]
    fn date_constructors_and_diffs() {
        let fx = FormulaFixture::new();
        assert_eq!(
            fx.eval("date('2024-05-01')"),
            Ok(Value::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()))
        );
        assert_eq!(
            fx.eval("days_between('2024-05-01', '2024-05-04')"),
            Ok(Value::Number(3.0))
        );
        assert_eq!(
            fx.eval("hours_between('2024-05-01T06:00:00', '2024-05-01T04:30:00')"),
            Ok(Value::Number(-1.5))
        );
    }

    #[test]
    fn date_arithmetic_through_operators() {
        let fx = FormulaFixture::new();
        assert_eq!(
            fx.eval("datetime('2024-05-01T00:00:00') + days(2)"),
            Ok(Value::DateTime(
                NaiveDate::from_ymd_opt(2024, 5, 3).unwrap().and_hms_opt(0, 0, 0).unwrap()
            ))
        );
        assert_eq!(
            fx.eval("datetime('2024-05-03T12:00:00') - datetime('2024-05-03T10:00:00')"),
            Ok(Value::Duration(Duration::hours(2)))
        );
    }

    #[test]
    fn now_is_volatile() {
        let f = crate::function_registry::get("now").unwrap();
        assert!(f.volatile());
        let f = crate::function_registry::get("minutes").unwrap();
        assert!(!f.volatile());
    }

    #[test]
    fn friendly_formatting() {
        let fx = FormulaFixture::new();
        assert_eq!(
            fx.eval("format_friendly(hours(26) + minutes(5))"),
            Ok(Value::Text("1d 2h 5m".into()))
        );
        assert_eq!(
            fx.eval("format_friendly(date('2024-05-01'))"),
            Ok(Value::Text("May 1, 2024".into()))
        );
    }
}
