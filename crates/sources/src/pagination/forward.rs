use backfill_core::{Cursor, FetchWindow, Period};
use chrono::{DateTime, Duration, Utc};

/// Walks the window forward in fixed calendar-day chunks sized to fit one
/// page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardChunks {
    chunk_days: i64,
}

impl ForwardChunks {
    /// Chunks of `max(1, page_limit / records_per_day)` days.
    #[must_use]
    pub fn new(page_limit: usize, records_per_day: u64) -> Self {
        let per_day = records_per_day.max(1) as usize;
        let chunk_days = (page_limit / per_day).max(1) as i64;
        Self { chunk_days }
    }

    /// Chunks sized for a source sampling at `period`.
    #[must_use]
    pub fn for_period(page_limit: usize, period: Period) -> Self {
        Self::new(page_limit, period.records_per_day())
    }

    /// Fixed-size chunks, for sources whose granularity depends on the span.
    #[must_use]
    pub fn days(chunk_days: i64) -> Self {
        Self {
            chunk_days: chunk_days.max(1),
        }
    }

    #[must_use]
    pub fn chunk_days(&self) -> i64 {
        self.chunk_days
    }

    /// Inclusive bounds of the chunk at the current cursor.
    #[must_use]
    pub fn chunk(&self, window: &FetchWindow) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = match window.cursor {
            Cursor::Timestamp(ts) => ts,
            _ => window.start,
        };
        let end = (start + Duration::days(self.chunk_days) - Duration::seconds(1)).min(window.end);
        (start, end)
    }

    /// Cursor once the current chunk has been served.
    ///
    /// When the page was full (`page_full`) and its last record falls
    /// short of the chunk end, the chunk continues right after that record
    /// at `step`.
    #[must_use]
    pub fn next(
        &self,
        window: &FetchWindow,
        last_record: Option<DateTime<Utc>>,
        page_full: bool,
        step: Duration,
    ) -> Cursor {
        let (_, chunk_end) = self.chunk(window);

        if page_full {
            if let Some(last) = last_record {
                let resume = last + step;
                if resume <= chunk_end {
                    return Cursor::Timestamp(resume);
                }
            }
        }

        if chunk_end >= window.end {
            Cursor::Done
        } else {
            Cursor::Timestamp(chunk_end + Duration::seconds(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(days: i64) -> FetchWindow {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        FetchWindow::new(
            "binance_klines",
            "BTCUSDT",
            start,
            start + Duration::days(days) - Duration::hours(1),
            1000,
        )
    }

    #[test]
    fn test_chunk_days_from_page_limit() {
        assert_eq!(ForwardChunks::for_period(1000, Period::OneHour).chunk_days(), 41);
        assert_eq!(ForwardChunks::for_period(1000, Period::OneMinute).chunk_days(), 1);
        assert_eq!(ForwardChunks::for_period(1000, Period::OneDay).chunk_days(), 1000);
        assert_eq!(ForwardChunks::days(0).chunk_days(), 1);
    }

    #[test]
    fn test_chunks_cover_window_without_overlap() {
        let planner = ForwardChunks::days(7);
        let mut w = window(30);
        let mut chunks = Vec::new();
        loop {
            let chunk = planner.chunk(&w);
            chunks.push(chunk);
            let next = planner.next(&w, None, false, Duration::hours(1));
            if next.is_done() {
                break;
            }
            w.advance(next);
        }

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].0, w.start);
        assert_eq!(chunks.last().unwrap().1, w.end);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].0, pair[0].1 + Duration::seconds(1));
        }
    }

    #[test]
    fn test_single_day_window_is_one_chunk() {
        let planner = ForwardChunks::for_period(1000, Period::OneHour);
        let w = window(1);
        let (start, end) = planner.chunk(&w);
        assert_eq!((start, end), (w.start, w.end));
        assert_eq!(planner.next(&w, Some(end), false, Duration::hours(1)), Cursor::Done);
    }

    #[test]
    fn test_full_page_resumes_inside_chunk() {
        let planner = ForwardChunks::days(10);
        let w = window(30);
        let last = w.start + Duration::hours(99);
        assert_eq!(
            planner.next(&w, Some(last), true, Duration::hours(1)),
            Cursor::Timestamp(last + Duration::hours(1))
        );
    }
}
