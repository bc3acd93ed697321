use chrono::Days;
use tracing::debug;

use crate::domain::{DateRange, IsoDate};
use crate::error::NdviError;

/// Splits `[start, end]` into consecutive windows of `interval` days.
///
/// Every window but the last spans exactly `interval` days. The last window
/// is cut at `end`, and dropped entirely when it would begin on `end` itself,
/// so a one-day remainder is never requested.
pub fn date_ranges(
    start: IsoDate,
    end: IsoDate,
    interval: u32,
) -> Result<Vec<DateRange>, NdviError> {
    if interval == 0 {
        return Err(NdviError::InvalidInterval);
    }
    let span = Days::new(u64::from(interval - 1));
    let mut ranges: Vec<DateRange> = Vec::new();

    loop {
        let begin = match ranges.last() {
            None => start.date(),
            Some(last) => next_day(last.to)?,
        };
        let new_end = begin
            .checked_add_days(span)
            .ok_or_else(|| NdviError::InvalidDate(begin.to_string()))?;

        if new_end > end.date() {
            if begin < end.date() {
                ranges.push(DateRange {
                    from: IsoDate::new(begin),
                    to: end,
                });
            }
            break;
        }

        ranges.push(DateRange {
            from: IsoDate::new(begin),
            to: IsoDate::new(new_end),
        });
    }

    debug!(%start, %end, interval, count = ranges.len(), "partitioned date range");
    Ok(ranges)
}

/// Keeps at most `max` ranges; the flag reports whether any were dropped.
pub fn truncate_ranges(mut ranges: Vec<DateRange>, max: usize) -> (Vec<DateRange>, bool) {
    if ranges.len() > max {
        ranges.truncate(max);
        return (ranges, true);
    }
    (ranges, false)
}

fn next_day(date: IsoDate) -> Result<chrono::NaiveDate, NdviError> {
    date.date()
        .checked_add_days(Days::new(1))
        .ok_or_else(|| NdviError::InvalidDate(date.to_string()))
}
