//! Read-side queries over the sample store.
//!
//! [`QueryService`] holds no state of its own beyond the store and a clock;
//! each call reads the store once and is consistent on its own. Parameter
//! parsing for the HTTP layer lives here too so the rules are testable
//! without a server.

use std::sync::Arc;

use chrono::{
    DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use moodwatch_types::{Aggregate, Sample, SampleEvent};
use url::form_urlencoded;

use crate::clock::Clock;
use crate::error::{PersistenceError, QueryError};
use crate::store::{ListQuery, SampleStore, SortOrder, Window};

/// Default page size for history listings.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Default cap on range results.
pub const DEFAULT_RANGE_LIMIT: u32 = 1000;

/// Longest look-back a history listing accepts.
pub const MAX_HISTORY_DAYS: u32 = 36_500;

/// Parameters of a history listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryParams {
    pub page: u32,
    pub limit: u32,
    pub order: SortOrder,
    /// Look-back in days; `None` means all time.
    pub days: Option<u32>,
}

impl Default for HistoryParams {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            order: SortOrder::Desc,
            days: None,
        }
    }
}

impl HistoryParams {
    /// Parse `page`, `limit`, `sort` and `days` from a raw query string.
    ///
    /// `limit` is clamped to [`MAX_PAGE_SIZE`]; `days=0` means all time and
    /// more than [`MAX_HISTORY_DAYS`] is rejected.
    pub fn from_query(query: Option<&str>) -> Result<Self, QueryError> {
        let mut params = Self::default();

        for (key, value) in pairs(query) {
            match key.as_str() {
                "page" => params.page = positive("page", &value)?,
                "limit" => params.limit = positive("limit", &value)?.min(MAX_PAGE_SIZE),
                "sort" => {
                    params.order = match value.to_ascii_lowercase().as_str() {
                        "asc" => SortOrder::Asc,
                        "desc" => SortOrder::Desc,
                        _ => return Err(QueryError::invalid("sort", &value, "expected asc or desc")),
                    }
                }
                "days" => {
                    let days: u32 = value
                        .trim()
                        .parse()
                        .map_err(|_| QueryError::invalid("days", &value, "expected a whole number"))?;
                    if days > MAX_HISTORY_DAYS {
                        return Err(QueryError::invalid("days", &value, "look-back is too long"));
                    }
                    params.days = (days > 0).then_some(days);
                }
                _ => {}
            }
        }

        Ok(params)
    }

    /// Human label for the look-back: `"7 days"` or `"all time"`.
    pub fn period(&self) -> String {
        match self.days {
            Some(days) => format!("{} days", days),
            None => "all time".to_string(),
        }
    }
}

/// Parameters of a time-range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeParams {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: u32,
}

impl RangeParams {
    /// Parse `start`, `end` and `limit` from a raw query string.
    ///
    /// Both bounds are required. They accept RFC 3339 timestamps, plain
    /// dates (UTC midnight) and naive date-times (taken as UTC).
    pub fn from_query(query: Option<&str>) -> Result<Self, QueryError> {
        let mut start = None;
        let mut end = None;
        let mut limit = DEFAULT_RANGE_LIMIT;

        for (key, value) in pairs(query) {
            match key.as_str() {
                "start" if !value.trim().is_empty() => start = Some(parse_instant("start", &value)?),
                "end" if !value.trim().is_empty() => end = Some(parse_instant("end", &value)?),
                "limit" => limit = positive("limit", &value)?,
                _ => {}
            }
        }

        match (start, end) {
            (Some(start), Some(end)) => Ok(Self { start, end, limit }),
            _ => Err(QueryError::MissingRange),
        }
    }
}

fn pairs(query: Option<&str>) -> impl Iterator<Item = (String, String)> + '_ {
    form_urlencoded::parse(query.unwrap_or_default().as_bytes()).into_owned()
}

fn positive(name: &'static str, value: &str) -> Result<u32, QueryError> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(QueryError::invalid(name, value, "expected a positive whole number")),
    }
}

/// Parse a timestamp given as a query parameter.
pub fn parse_instant(name: &'static str, value: &str) -> Result<DateTime<Utc>, QueryError> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(QueryError::invalid(name, value, "expected an ISO 8601 date"))
}

/// The calendar day containing `now` in `tz`, as `[midnight, next midnight)`.
pub fn day_window<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> Window {
    let today = now.with_timezone(tz).date_naive();
    let start = local_midnight(today, tz);
    let end = today
        .succ_opt()
        .map(|tomorrow| local_midnight(tomorrow, tz))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    Window::between(start, end)
}

fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    // Midnight can fall in a DST gap; the naive time read as UTC is close enough.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

/// Calendar date of `ts` in `tz`, like `Jan 5, 2024`.
pub fn format_date<Tz: TimeZone>(ts: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    ts.with_timezone(tz).format("%b %-d, %Y").to_string()
}

/// One page of history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub items: Vec<Sample>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
    pub period: String,
}

/// Summary statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub today: Aggregate,
    pub all_time: Aggregate,
    pub last_24h: u64,
    /// When these figures were computed.
    pub last_updated: DateTime<Utc>,
}

/// Samples within a time range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeResult {
    pub items: Vec<Sample>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Query front-end over a [`SampleStore`].
///
/// All methods block on the store.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn SampleStore>,
    clock: Arc<dyn Clock>,
}

impl QueryService {
    pub fn new(store: Arc<dyn SampleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// A page of samples, optionally limited to the last `days` days.
    pub fn history(&self, params: &HistoryParams) -> Result<HistoryPage, PersistenceError> {
        let since = params.days.and_then(|days| {
            self.clock
                .now()
                .checked_sub_signed(Duration::try_days(i64::from(days))?)
        });

        let (items, total) = self.store.list(&ListQuery {
            since,
            page: params.page,
            page_size: params.limit,
            order: params.order,
        })?;

        Ok(HistoryPage {
            items,
            page: params.page,
            limit: params.limit,
            total,
            pages: total.div_ceil(u64::from(params.limit.max(1))),
            period: params.period(),
        })
    }

    /// The most recent sample as an event.
    pub fn latest(&self) -> Result<Option<SampleEvent>, PersistenceError> {
        Ok(self.store.latest()?.as_ref().map(Sample::event))
    }

    /// Today's and all-time aggregates plus the last-24-hour count.
    pub fn stats(&self) -> Result<Stats, PersistenceError> {
        let now = self.clock.now();

        Ok(Stats {
            today: self.store.aggregate(day_window(now, &Local))?,
            all_time: self.store.aggregate(Window::all_time())?,
            last_24h: self.store.count(Window::since(now - Duration::hours(24)))?,
            last_updated: now,
        })
    }

    /// Samples between two instants, both inclusive, oldest first.
    pub fn range(&self, params: &RangeParams) -> Result<RangeResult, PersistenceError> {
        let items = self.store.range(params.start, params.end, params.limit)?;
        Ok(RangeResult {
            items,
            start: params.start,
            end: params.end,
        })
    }

    /// Current time according to the service clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService").finish_non_exhaustive()
    }
}
