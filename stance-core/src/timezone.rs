use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;

/// Calendar day of `instant` as observed in `tz`.
pub fn day_bucket(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// UTC instants covering the whole local day `[start, end)`.
///
/// Local midnight can be skipped by a DST jump in some zones; the earliest
/// valid instant after it is used then.
pub fn bucket_bounds(day: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(day, tz);
    let end = day
        .succ_opt()
        .map(|next| local_midnight(next, tz))
        .unwrap_or_else(|| start + chrono::Duration::days(1));
    (start, end)
}

fn local_midnight(day: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = day.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_late_utc_evening_lands_on_next_berlin_day() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap();
        assert_eq!(
            day_bucket(instant, DEFAULT_TIMEZONE),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn test_bucket_bounds_cover_dst_day() {
        // Europe/Berlin springs forward on 2024-03-31, so the day is 23h long.
        let day = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let (start, end) = bucket_bounds(day, DEFAULT_TIMEZONE);
        assert_eq!(end - start, chrono::Duration::hours(23));
        assert_eq!(day_bucket(start, DEFAULT_TIMEZONE), day);
    }
}
