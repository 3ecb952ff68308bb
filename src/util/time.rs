//! Conversions between MySQL's packed date/time encodings and `chrono`
//! types. Row events carry these values pre-packed into integers; the
//! binlog decoder unpacks them here so the rest of the pipeline only ever
//! sees `Value::Timestamp`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

/// Unpacks a 3-byte `TIME` value encoded as `hh*10000 + mm*100 + ss`. The
/// sign bit (negative durations) is dropped; callers needing signed
/// intervals should track it separately.
pub fn unpack_time(packed: i32) -> NaiveTime {
    let packed = packed.unsigned_abs();
    let h = (packed / 10000) % 100;
    let m = (packed / 100) % 100;
    let s = packed % 100;
    NaiveTime::from_hms_opt(h.min(23), m.min(59), s.min(59)).unwrap_or_default()
}

/// Unpacks a 3-byte `DATE` value encoded as `(year << 9) | (month << 5) | day`.
pub fn unpack_date(packed: u32) -> Option<NaiveDate> {
    let day = (packed & 0x1f) as u32;
    let month = ((packed >> 5) & 0xf) as u32;
    let year = (packed >> 9) as i32;
    if day == 0 || month == 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Unpacks an 8-byte `DATETIME` value encoded as `YYYYMMDDHHMMSS` in decimal.
pub fn unpack_datetime(packed: u64) -> Option<NaiveDateTime> {
    let date_part = (packed / 1_000_000) as u32;
    let time_part = (packed % 1_000_000) as i32;
    let date = unpack_date_ymd(date_part)?;
    let time = NaiveTime::from_hms_opt(
        (time_part / 10000) as u32,
        ((time_part / 100) % 100) as u32,
        (time_part % 100) as u32,
    )?;
    Some(NaiveDateTime::new(date, time))
}

fn unpack_date_ymd(ymd: u32) -> Option<NaiveDate> {
    let year = (ymd / 10000) as i32;
    let month = (ymd / 100) % 100;
    let day = ymd % 100;
    if year == 0 || month == 0 || day == 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `TIMESTAMP` columns are stored as seconds since the epoch (UTC).
pub fn timestamp_from_epoch_seconds(seconds: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp(seconds, 0).map(|dt| dt.naive_utc())
}

/// Parses the `--start-time`/`--stop-time` flag form (`YYYY-MM-DD HH:MM:SS`,
/// interpreted in local time) into the epoch seconds binlog event headers
/// carry, so the time-window filter compares like with like.
pub fn parse_local_datetime(s: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()?;
    chrono::Local.from_local_datetime(&naive).earliest().map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_date() {
        let packed = (2023u32 << 9) | (6 << 5) | 15;
        assert_eq!(unpack_date(packed), NaiveDate::from_ymd_opt(2023, 6, 15));
    }

    #[test]
    fn unpacks_datetime() {
        let packed = 20230615143012u64;
        let dt = unpack_datetime(packed).unwrap();
        assert_eq!(dt.to_string(), "2023-06-15 14:30:12");
    }

    #[test]
    fn zero_date_is_none() {
        assert_eq!(unpack_date(0), None);
    }

    #[test]
    fn parses_time_flag_format() {
        assert!(parse_local_datetime("2024-03-01 12:00:00").is_some());
        assert!(parse_local_datetime("2024-03-01T12:00:00").is_none());
        assert!(parse_local_datetime("garbage").is_none());
    }

    #[test]
    fn time_flag_ordering_matches_wall_clock_ordering() {
        let earlier = parse_local_datetime("2024-03-01 12:00:00").unwrap();
        let later = parse_local_datetime("2024-03-01 12:00:01").unwrap();
        assert!(earlier < later);
    }
}
