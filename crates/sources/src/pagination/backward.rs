use backfill_core::{Cursor, FetchWindow};
use chrono::{DateTime, Duration, Utc};

/// Pages from the window end back toward its start with a decreasing
/// `before` bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackwardCursor;

impl BackwardCursor {
    /// Inclusive upper bound for the next request.
    #[must_use]
    pub fn end_bound(window: &FetchWindow) -> DateTime<Utc> {
        match window.cursor {
            Cursor::Timestamp(ts) => ts,
            _ => window.end,
        }
    }

    /// Cursor after a page whose oldest record is `oldest`.
    ///
    /// Done on an empty page, once the window start is reached, or if the
    /// bound would not move backward.
    #[must_use]
    pub fn next(window: &FetchWindow, oldest: Option<DateTime<Utc>>) -> Cursor {
        let Some(oldest) = oldest else {
            return Cursor::Done;
        };
        if oldest <= window.start {
            return Cursor::Done;
        }
        let bound = oldest - Duration::seconds(1);
        if bound >= Self::end_bound(window) {
            return Cursor::Done;
        }
        Cursor::Timestamp(bound)
    }
}
