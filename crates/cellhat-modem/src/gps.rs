//! `AT+CGPSINFO` response parsing.
//!
//! A fixed reply looks like
//! `+CGPSINFO: 3113.343286,N,12121.234064,E,250311,072809.3,44.1,0.0,0`
//! (lat ddmm.mmmmmm, N/S, lon dddmm.mmmmmm, E/W, date ddmmyy, UTC hhmmss.s,
//! altitude m, speed knots, course degrees). Before the receiver has a fix
//! every field is empty: `+CGPSINFO: ,,,,,,,,`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

pub const GPSINFO_PREFIX: &str = "+CGPSINFO: ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsFix {
    /// Decimal degrees, negative south.
    pub latitude: f64,
    /// Decimal degrees, negative west.
    pub longitude: f64,
    pub utc: Option<NaiveDateTime>,
    pub altitude_m: Option<f64>,
    pub speed_knots: Option<f64>,
    pub course_deg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GpsReading {
    Fix(GpsFix),
    /// Receiver is running but has no position yet.
    NotReady,
}

/// Parse the first `+CGPSINFO:` line of a response. `None` if the line is
/// missing or its positional fields are malformed.
pub fn parse_gpsinfo(text: &str) -> Option<GpsReading> {
    let line = text
        .lines()
        .find_map(|l| l.trim().strip_prefix(GPSINFO_PREFIX.trim_end()))?;
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();

    if fields.iter().all(|f| f.is_empty()) {
        return Some(GpsReading::NotReady);
    }

    let field = |i: usize| fields.get(i).copied().filter(|f| !f.is_empty());
    let latitude = degrees(field(0)?, field(1)?, 'S')?;
    let longitude = degrees(field(2)?, field(3)?, 'W')?;
    let utc = field(4).zip(field(5)).and_then(|(d, t)| parse_utc(d, t));

    Some(GpsReading::Fix(GpsFix {
        latitude,
        longitude,
        utc,
        altitude_m: field(6).and_then(|v| v.parse().ok()),
        speed_knots: field(7).and_then(|v| v.parse().ok()),
        course_deg: field(8).and_then(|v| v.parse().ok()),
    }))
}

/// `(d)ddmm.mmmm` plus hemisphere to signed decimal degrees.
fn degrees(value: &str, hemisphere: &str, negative: char) -> Option<f64> {
    let raw: f64 = value.parse().ok()?;
    let whole = (raw / 100.0).trunc();
    let minutes = raw - whole * 100.0;
    let decimal = whole + minutes / 60.0;
    match hemisphere.chars().next()? {
        c if c == negative => Some(-decimal),
        'N' | 'E' => Some(decimal),
        _ => None,
    }
}

fn parse_utc(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%d%m%y").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S%.f").ok()?;
    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn empty_fields_mean_not_ready() {
        let reading = parse_gpsinfo("\r\n+CGPSINFO: ,,,,,,,,\r\n\r\nOK\r\n").unwrap();
        assert_eq!(reading, GpsReading::NotReady);
    }

    #[test]
    fn populated_fix_converts_to_decimal_degrees() {
        let text = "\r\n+CGPSINFO: 3113.343286,N,12121.234064,E,250311,072809.3,44.1,0.0,0\r\n\r\nOK\r\n";
        let Some(GpsReading::Fix(fix)) = parse_gpsinfo(text) else {
            panic!("expected a fix");
        };
        assert!((fix.latitude - 31.222388).abs() < 1e-5);
        assert!((fix.longitude - 121.353901).abs() < 1e-5);
        let utc = fix.utc.unwrap();
        assert_eq!((utc.year(), utc.month(), utc.day()), (2011, 3, 25));
        assert_eq!((utc.hour(), utc.minute(), utc.second()), (7, 28, 9));
        assert_eq!(fix.altitude_m, Some(44.1));
    }

    #[test]
    fn southern_western_hemispheres_are_negative() {
        let text = "+CGPSINFO: 3352.128,S,15112.558,W,010124,000000.0,,,";
        let Some(GpsReading::Fix(fix)) = parse_gpsinfo(text) else {
            panic!("expected a fix");
        };
        assert!(fix.latitude < 0.0);
        assert!(fix.longitude < 0.0);
        assert_eq!(fix.altitude_m, None);
    }

    #[test]
    fn malformed_or_missing_line() {
        assert!(parse_gpsinfo("\r\nOK\r\n").is_none());
        assert!(parse_gpsinfo("+CGPSINFO: abc,N,,E,,,,,").is_none());
    }
}
