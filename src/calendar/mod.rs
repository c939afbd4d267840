// Trading-session calendar and blackout windows.
//
// Two-tier strategy selected by capability: the Alpaca calendar endpoint
// when credentials are configured, otherwise a static NYSE schedule plus a
// holiday set. A stale or unreachable source degrades to the static tier —
// it never fails the gate.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use tokio::sync::RwLock;

use crate::models::BlockReason;
use crate::providers::AlpacaClient;

/// NYSE full-day closures. Extended as years roll over.
const HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2025
    (2025, 1, 1),
    (2025, 1, 20),
    (2025, 2, 17),
    (2025, 4, 18),
    (2025, 5, 26),
    (2025, 6, 19),
    (2025, 7, 4),
    (2025, 9, 1),
    (2025, 11, 27),
    (2025, 12, 25),
    // 2026
    (2026, 1, 1),
    (2026, 1, 19),
    (2026, 2, 16),
    (2026, 4, 3),
    (2026, 5, 25),
    (2026, 6, 19),
    (2026, 7, 3),
    (2026, 9, 7),
    (2026, 11, 26),
    (2026, 12, 25),
];

/// Sessions that close at 13:00 ET.
const EARLY_CLOSES: &[(i32, u32, u32)] = &[
    (2025, 7, 3),
    (2025, 11, 28),
    (2025, 12, 24),
    (2026, 11, 27),
    (2026, 12, 24),
];

const REGULAR_OPEN: (u32, u32) = (9, 30);
const REGULAR_CLOSE: (u32, u32) = (16, 0);
const EARLY_CLOSE: (u32, u32) = (13, 0);

/// One trading day's boundaries, with the blackout margins baked in.
/// Computed once per day and never mutated mid-day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    pub date: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
    pub early_close: bool,
    /// `open + after_open_margin` — first instant execution is allowed.
    pub trade_start: DateTime<Utc>,
    /// `close - before_close_margin` — last instant execution is allowed.
    pub trade_end: DateTime<Utc>,
}

impl SessionWindow {
    fn new(
        date: NaiveDate,
        open: DateTime<Utc>,
        close: DateTime<Utc>,
        early_close: bool,
        after_open: Duration,
        before_close: Duration,
    ) -> Self {
        Self {
            date,
            open,
            close,
            early_close,
            trade_start: open + after_open,
            trade_end: close - before_close,
        }
    }
}

struct DayCache {
    date: NaiveDate,
    window: Option<SessionWindow>,
}

/// Computes trading-session boundaries and answers blackout queries.
pub struct SessionCalendar {
    source: Option<AlpacaClient>,
    after_open: Duration,
    before_close: Duration,
    // Source is consulted at most once per date; the answer (including a
    // degraded one) is pinned for the rest of the day.
    cache: RwLock<Option<DayCache>>,
}

impl SessionCalendar {
    pub fn new(
        source: Option<AlpacaClient>,
        after_open_margin_minutes: i64,
        before_close_margin_minutes: i64,
    ) -> Self {
        Self {
            source,
            after_open: Duration::minutes(after_open_margin_minutes),
            before_close: Duration::minutes(before_close_margin_minutes),
            cache: RwLock::new(None),
        }
    }

    /// Static-only calendar (no authoritative source configured).
    pub fn static_default(after_open_margin_minutes: i64, before_close_margin_minutes: i64) -> Self {
        Self::new(None, after_open_margin_minutes, before_close_margin_minutes)
    }

    /// The session for `date`, or `None` when the market is closed.
    pub async fn session_for(&self, date: NaiveDate) -> Option<SessionWindow> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.date == date {
                    return entry.window.clone();
                }
            }
        }

        let window = self.compute_session(date).await;

        let mut cache = self.cache.write().await;
        *cache = Some(DayCache {
            date,
            window: window.clone(),
        });
        window
    }

    async fn compute_session(&self, date: NaiveDate) -> Option<SessionWindow> {
        if let Some(source) = &self.source {
            match source.calendar_day(date).await {
                Ok(Some(times)) => {
                    let open = ny_to_utc(date, times.open)?;
                    let close = ny_to_utc(date, times.close)?;
                    let regular_close =
                        NaiveTime::from_hms_opt(REGULAR_CLOSE.0, REGULAR_CLOSE.1, 0)?;
                    return Some(SessionWindow::new(
                        date,
                        open,
                        close,
                        times.close < regular_close,
                        self.after_open,
                        self.before_close,
                    ));
                }
                Ok(None) => return None,
                Err(e) => {
                    let err = crate::CoreError::CalendarUnavailable(e.to_string());
                    tracing::warn!(%date, error = %err, "degrading to static schedule");
                }
            }
        }
        self.static_session(date)
    }

    fn static_session(&self, date: NaiveDate) -> Option<SessionWindow> {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return None;
        }
        let key = (date.year(), date.month(), date.day());
        if HOLIDAYS.contains(&key) {
            return None;
        }

        let early_close = EARLY_CLOSES.contains(&key);
        let (close_h, close_m) = if early_close { EARLY_CLOSE } else { REGULAR_CLOSE };

        let open = ny_to_utc(date, NaiveTime::from_hms_opt(REGULAR_OPEN.0, REGULAR_OPEN.1, 0)?)?;
        let close = ny_to_utc(date, NaiveTime::from_hms_opt(close_h, close_m, 0)?)?;

        Some(SessionWindow::new(
            date,
            open,
            close,
            early_close,
            self.after_open,
            self.before_close,
        ))
    }

    /// True when `ts` falls inside a blackout: `[open, open+after_margin)`,
    /// `(close-before_margin, close]`, or any day without a session.
    pub async fn is_blackout(&self, ts: DateTime<Utc>) -> bool {
        self.check(ts).await.is_some()
    }

    /// Like [`is_blackout`](Self::is_blackout) but reports why execution is
    /// blocked, or `None` when it is allowed. Timestamps outside the session
    /// entirely count as market-closed.
    pub async fn check(&self, ts: DateTime<Utc>) -> Option<BlockReason> {
        let date = ts.with_timezone(&New_York).date_naive();
        let Some(session) = self.session_for(date).await else {
            return Some(BlockReason::MarketClosed);
        };

        if ts < session.open || ts > session.close {
            return Some(BlockReason::MarketClosed);
        }
        if ts < session.trade_start {
            return Some(BlockReason::AfterOpenBlackout);
        }
        if ts > session.trade_end {
            return Some(BlockReason::BeforeCloseBlackout);
        }
        None
    }
}

fn ny_to_utc(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    New_York
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ny(date: (i32, u32, u32), h: u32, m: u32, s: u32) -> DateTime<Utc> {
        let d = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        ny_to_utc(d, NaiveTime::from_hms_opt(h, m, s).unwrap()).unwrap()
    }

    // A regular Monday session.
    const DAY: (i32, u32, u32) = (2026, 3, 2);

    fn calendar() -> SessionCalendar {
        SessionCalendar::static_default(30, 30)
    }

    #[tokio::test]
    async fn regular_session_boundaries() {
        let cal = calendar();
        let date = NaiveDate::from_ymd_opt(DAY.0, DAY.1, DAY.2).unwrap();
        let session = cal.session_for(date).await.unwrap();

        assert_eq!(session.open, ny(DAY, 9, 30, 0));
        assert_eq!(session.close, ny(DAY, 16, 0, 0));
        assert_eq!(session.trade_start, ny(DAY, 10, 0, 0));
        assert_eq!(session.trade_end, ny(DAY, 15, 30, 0));
        assert!(!session.early_close);
    }

    #[tokio::test]
    async fn blackout_covers_open_and_close_margins() {
        let cal = calendar();

        // After-open blackout is [09:30, 10:00).
        assert_eq!(
            cal.check(ny(DAY, 9, 30, 0)).await,
            Some(BlockReason::AfterOpenBlackout)
        );
        assert_eq!(
            cal.check(ny(DAY, 9, 45, 0)).await,
            Some(BlockReason::AfterOpenBlackout)
        );
        assert_eq!(
            cal.check(ny(DAY, 9, 59, 59)).await,
            Some(BlockReason::AfterOpenBlackout)
        );
        assert_eq!(cal.check(ny(DAY, 10, 0, 0)).await, None);

        // Before-close blackout is (15:30, 16:00].
        assert_eq!(cal.check(ny(DAY, 15, 30, 0)).await, None);
        assert_eq!(
            cal.check(ny(DAY, 15, 30, 1)).await,
            Some(BlockReason::BeforeCloseBlackout)
        );
        assert_eq!(
            cal.check(ny(DAY, 16, 0, 0)).await,
            Some(BlockReason::BeforeCloseBlackout)
        );

        // Interior of the session is allowed.
        assert_eq!(cal.check(ny(DAY, 12, 0, 0)).await, None);
        assert!(!cal.is_blackout(ny(DAY, 12, 0, 0)).await);
    }

    #[tokio::test]
    async fn outside_session_hours_is_market_closed() {
        let cal = calendar();
        assert_eq!(
            cal.check(ny(DAY, 8, 0, 0)).await,
            Some(BlockReason::MarketClosed)
        );
        assert_eq!(
            cal.check(ny(DAY, 16, 0, 1)).await,
            Some(BlockReason::MarketClosed)
        );
    }

    #[tokio::test]
    async fn weekends_and_holidays_have_no_session() {
        let cal = calendar();

        let saturday = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert!(cal.session_for(saturday).await.is_none());
        assert!(cal.is_blackout(ny((2026, 3, 7), 12, 0, 0)).await);

        let cal = calendar();
        let christmas = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        assert!(cal.session_for(christmas).await.is_none());
    }

    #[tokio::test]
    async fn early_close_shortens_the_window() {
        let cal = calendar();
        let date = NaiveDate::from_ymd_opt(2026, 11, 27).unwrap();
        let session = cal.session_for(date).await.unwrap();

        assert!(session.early_close);
        assert_eq!(session.close, ny((2026, 11, 27), 13, 0, 0));
        assert_eq!(session.trade_end, ny((2026, 11, 27), 12, 30, 0));
    }

    #[tokio::test]
    async fn source_failure_degrades_to_static_schedule() {
        // Unreachable source: connection refused, classified transient.
        let source = AlpacaClient::new(
            "http://127.0.0.1:1".to_string(),
            "key".to_string(),
            "secret".to_string(),
        );
        let cal = SessionCalendar::new(Some(source), 30, 30);

        let date = NaiveDate::from_ymd_opt(DAY.0, DAY.1, DAY.2).unwrap();
        let session = cal.session_for(date).await.unwrap();
        assert_eq!(session.open, ny(DAY, 9, 30, 0));
    }

    #[tokio::test]
    async fn authoritative_source_wins_when_available() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/calendar")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"date": "2026-03-02", "open": "09:30", "close": "13:00"}]"#)
            // Cached per date: one upstream call only.
            .expect(1)
            .create_async()
            .await;

        let source = AlpacaClient::new(server.url(), "key".to_string(), "secret".to_string());
        let cal = SessionCalendar::new(Some(source), 30, 30);

        let date = NaiveDate::from_ymd_opt(DAY.0, DAY.1, DAY.2).unwrap();
        let first = cal.session_for(date).await.unwrap();
        let second = cal.session_for(date).await.unwrap();

        assert!(first.early_close);
        assert_eq!(first.close, ny(DAY, 13, 0, 0));
        assert_eq!(first, second);
    }
}
