use jiff::tz::TimeZone;
use jiff::Timestamp;

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01 (Unix epoch).
const FILETIME_UNIX_DELTA_SECS: i64 = 11_644_473_600;

/// FILETIME ticks are 100ns units.
const TICKS_PER_SEC: u64 = 10_000_000;

/// Render a Windows FILETIME (100-ns ticks since 1601-01-01 UTC) as
/// `yyyy-MM-ddTHH:mm:ss.fffffffZ`.
///
/// The 7 fractional digits carry the full tick resolution, so parsing the
/// string back yields the original tick count. Returns `None` for values
/// outside the representable civil range (silently corrupt timestamps are a
/// routine sight in carved event logs).
pub(crate) fn format_filetime(ticks: u64) -> Option<String> {
    let secs = (ticks / TICKS_PER_SEC) as i64 - FILETIME_UNIX_DELTA_SECS;
    let frac_ticks = ticks % TICKS_PER_SEC;

    let ts = Timestamp::from_second(secs).ok()?;
    let dt = ts.to_zoned(TimeZone::UTC).datetime();

    Some(format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:07}Z",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        frac_ticks
    ))
}

/// Render a Windows SYSTEMTIME (eight u16 fields) as
/// `yyyy-MM-ddTHH:mm:ss.fffZ`.
///
/// The day-of-week field is redundant and ignored. Fields are emitted as
/// given; out-of-range values are the producer's lie to tell.
pub(crate) fn format_systemtime(
    year: u16,
    month: u16,
    day: u16,
    hour: u16,
    minute: u16,
    second: u16,
    millis: u16,
) -> String {
    format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filetime_epoch_is_1601() {
        assert_eq!(
            format_filetime(0).unwrap(),
            "1601-01-01T00:00:00.0000000Z"
        );
    }

    #[test]
    fn filetime_known_value() {
        // 2021-01-01T00:00:00Z.
        assert_eq!(
            format_filetime(132_514_560_000_000_000).unwrap(),
            "2021-01-01T00:00:00.0000000Z"
        );
    }

    #[test]
    fn filetime_keeps_tick_resolution() {
        assert_eq!(
            format_filetime(132_514_560_000_000_001).unwrap(),
            "2021-01-01T00:00:00.0000001Z"
        );
        assert_eq!(
            format_filetime(132_514_560_012_345_678).unwrap(),
            "2021-01-01T00:00:01.2345678Z"
        );
    }

    #[test]
    fn filetime_out_of_range_is_none() {
        assert_eq!(format_filetime(u64::MAX), None);
    }

    #[test]
    fn systemtime_formats_millis() {
        assert_eq!(
            format_systemtime(2020, 2, 29, 23, 59, 58, 7),
            "2020-02-29T23:59:58.007Z"
        );
    }
}
