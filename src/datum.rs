//! SQL values carried by the protocol.
//!
//! [`Datum`] is the value universe the wire protocol can transport: a tagged
//! sum over the SQL scalar kinds, plus [`Datum::Tuple`] and [`Datum::ValArg`]
//! which appear during statement preparation but have no on-wire encoding.
//! The executor produces and consumes Datums; the protocol layer maps them to
//! and from PostgreSQL type OIDs and wire bytes.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use rust_decimal::Decimal;

/// A single SQL value.
///
/// Integer types of all widths collapse into `Int`, floats into `Float`, and
/// `text`/`varchar` into `String`; the per-position OID a client declared is
/// tracked separately by the prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer; also carries int2/int4 values.
    Int(i64),
    /// 64-bit float; also carries float4 values.
    Float(f64),
    /// Arbitrary-precision numeric.
    Decimal(Decimal),
    /// Character string; also carries varchar values.
    String(String),
    /// Binary string.
    Bytes(Vec<u8>),
    /// Days since the Unix epoch.
    Date(i64),
    /// Point in time with a UTC offset.
    Timestamp(DateTime<FixedOffset>),
    /// Time interval.
    Interval(Interval),
    /// Ordered collection of datums.
    Tuple(Vec<Datum>),
    /// Named bind-variable placeholder.
    ValArg(String),
}

impl Datum {
    /// Returns the SQL-facing name of this datum's kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "NULL",
            Datum::Bool(_) => "bool",
            Datum::Int(_) => "int",
            Datum::Float(_) => "float",
            Datum::Decimal(_) => "decimal",
            Datum::String(_) => "string",
            Datum::Bytes(_) => "bytes",
            Datum::Date(_) => "date",
            Datum::Timestamp(_) => "timestamp",
            Datum::Interval(_) => "interval",
            Datum::Tuple(_) => "tuple",
            Datum::ValArg(_) => "parameter",
        }
    }

    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

/// A time interval with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval(pub TimeDelta);

impl Default for Interval {
    fn default() -> Self {
        Interval(TimeDelta::zero())
    }
}

impl fmt::Display for Interval {
    /// Formats as `[N day(s) ]HH:MM:SS[.fffffffff]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut delta = self.0;
        if delta < TimeDelta::zero() {
            write!(f, "-")?;
            delta = -delta;
        }

        let secs = delta.num_seconds();
        let days = secs / 86_400;
        let rem = secs % 86_400;

        if days == 1 {
            write!(f, "1 day ")?;
        } else if days != 0 {
            write!(f, "{} days ", days)?;
        }
        write!(f, "{:02}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60)?;

        let nanos = delta.subsec_nanos();
        if nanos != 0 {
            let mut frac = format!("{:09}", nanos);
            while frac.ends_with('0') {
                frac.pop();
            }
            write!(f, ".{}", frac)?;
        }
        Ok(())
    }
}

/// Number of seconds in a day, for date <-> timestamp conversions.
pub const SECONDS_IN_DAY: i64 = 24 * 60 * 60;

/// Parses a timestamp in any of the textual forms PostgreSQL clients send.
///
/// PostgreSQL is lenient in what it accepts over the wire, so this tries
/// RFC 3339 first (sent by several client libraries), then the ISO-style
/// `YYYY-MM-DD HH:MM:SS[.fff][±HH[:MM]]` forms with an optional ` BC`
/// suffix, then a bare date.
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts);
    }

    let (body, bc) = match s.strip_suffix(" BC") {
        Some(body) => (body, true),
        None => (s, false),
    };

    let ts = parse_iso_timestamp(body)?;
    if bc {
        // ISO year 0 is 1 BC, -1 is 2 BC, and so on.
        ts.with_year(1 - ts.year())
    } else {
        Some(ts)
    }
}

fn parse_iso_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ts.and_utc().fixed_offset());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc().fixed_offset());
    }
    None
}

/// Formats a timestamp in the form PostgreSQL clients expect:
/// `YYYY-MM-DD HH:MM:SS[.fffffffff]±HH:MM[:SS]`, with years before 1 AD
/// rendered with a ` BC` suffix instead of a minus sign.
pub fn format_timestamp(t: &DateTime<FixedOffset>) -> String {
    let year = t.year();
    // ISO year 0 is 1 BC, -1 is 2 BC, and so on.
    let bc = year <= 0;
    let display_year = if bc { 1 - year } else { year };

    let mut s = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        display_year,
        t.month(),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    );

    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let mut frac = format!("{:09}", nanos);
        while frac.ends_with('0') {
            frac.pop();
        }
        s.push('.');
        s.push_str(&frac);
    }

    let offset = t.offset().local_minus_utc();
    let (sign, abs) = if offset < 0 { ('-', -offset) } else { ('+', offset) };
    s.push(sign);
    s.push_str(&format!("{:02}:{:02}", abs / 3600, (abs % 3600) / 60));
    // The zone field only has minute resolution; a sub-minute offset is
    // carried as a trailing :SS.
    if abs % 60 != 0 {
        s.push_str(&format!(":{:02}", abs % 60));
    }

    if bc {
        s.push_str(" BC");
    }
    s
}

/// Formats a float value matching PostgreSQL output conventions.
///
/// Special values (`Infinity`, `-Infinity`, `NaN`) use PostgreSQL's
/// canonical text representation; everything else uses the shortest
/// round-tripping decimal form.
pub fn format_float(n: f64) -> String {
    if n.is_infinite() {
        if n.is_sign_positive() {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n.is_nan() {
        "NaN".to_string()
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn utc(s: &str) -> DateTime<FixedOffset> {
        parse_timestamp(s).unwrap().with_timezone(&Utc).fixed_offset()
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Datum::Null.type_name(), "NULL");
        assert_eq!(Datum::Int(1).type_name(), "int");
        assert_eq!(Datum::String("x".into()).type_name(), "string");
        assert_eq!(Datum::ValArg("1".into()).type_name(), "parameter");
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let ts = parse_timestamp("1996-12-19T16:39:57-08:00").unwrap();
        assert_eq!(ts.year(), 1996);
        assert_eq!(ts.hour(), 16);
        assert_eq!(ts.offset().local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn test_parse_timestamp_iso_with_offset() {
        let ts = parse_timestamp("2015-09-12 18:05:01.23+07").unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 7 * 3600);
        assert_eq!(ts.nanosecond(), 230_000_000);
    }

    #[test]
    fn test_parse_timestamp_naive_assumes_utc() {
        let ts = parse_timestamp("2015-09-12 18:05:01").unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 0);
        assert_eq!(ts.minute(), 5);
    }

    #[test]
    fn test_parse_timestamp_bare_date() {
        let ts = parse_timestamp("2015-09-12").unwrap();
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (0, 0, 0));
    }

    #[test]
    fn test_parse_timestamp_bc() {
        // "0001-01-01 BC" is ISO year 0.
        let ts = parse_timestamp("0001-01-01 00:00:00 BC").unwrap();
        assert_eq!(ts.year(), 0);
        let ts = parse_timestamp("0002-01-01 00:00:00 BC").unwrap();
        assert_eq!(ts.year(), -1);
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!(parse_timestamp("not a timestamp").is_none());
        assert!(parse_timestamp("2015-13-40 99:00:00").is_none());
    }

    #[test]
    fn test_format_timestamp_basic() {
        let ts = utc("2015-09-12 18:05:01");
        assert_eq!(format_timestamp(&ts), "2015-09-12 18:05:01+00:00");
    }

    #[test]
    fn test_format_timestamp_fraction_trimmed() {
        let ts = utc("2015-09-12 18:05:01.250000000");
        assert_eq!(format_timestamp(&ts), "2015-09-12 18:05:01.25+00:00");
    }

    #[test]
    fn test_format_timestamp_bc() {
        let ts = parse_timestamp("0002-01-01 00:00:00 BC").unwrap();
        assert_eq!(format_timestamp(&ts), "0002-01-01 00:00:00+00:00 BC");
    }

    #[test]
    fn test_format_timestamp_round_trip() {
        for s in [
            "2015-09-12 18:05:01+00:00",
            "1969-12-31 23:59:59.5+00:00",
            "0001-01-01 00:00:00+00:00 BC",
        ] {
            let ts = parse_timestamp(s).unwrap();
            assert_eq!(format_timestamp(&ts), s);
        }
    }

    #[test]
    fn test_interval_display() {
        assert_eq!(Interval(TimeDelta::seconds(0)).to_string(), "00:00:00");
        assert_eq!(Interval(TimeDelta::seconds(3661)).to_string(), "01:01:01");
        assert_eq!(
            Interval(TimeDelta::seconds(86_400 + 60)).to_string(),
            "1 day 00:01:00"
        );
        assert_eq!(
            Interval(TimeDelta::seconds(3 * 86_400)).to_string(),
            "3 days 00:00:00"
        );
        assert_eq!(
            Interval(TimeDelta::milliseconds(1500)).to_string(),
            "00:00:01.5"
        );
        assert_eq!(Interval(TimeDelta::seconds(-90)).to_string(), "-00:01:30");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(-0.25), "-0.25");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_float(f64::NAN), "NaN");
    }
}
