use std::{fmt, str::FromStr};

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::domain::{parse_timestamp, EnergyRecord, ValidationError};

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Continuation token for a per-site query: the sort key of the last item
/// returned. The next page starts strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageToken(pub OffsetDateTime);

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.0.format(&Rfc3339).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl FromStr for PageToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_timestamp(s).map(PageToken)
    }
}

impl serde::Serialize for PageToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Query over one partition of the keyed store, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub site_id: String,
    /// Inclusive lower bound.
    pub start: Option<OffsetDateTime>,
    /// Inclusive upper bound.
    pub end: Option<OffsetDateTime>,
    pub after: Option<PageToken>,
    pub anomalies_only: bool,
    pub limit: usize,
}

impl RecordQuery {
    pub fn for_site(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            start: None,
            end: None,
            after: None,
            anomalies_only: false,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    /// Whether a record falls inside this query, ignoring the page limit.
    pub fn matches(&self, record: &EnergyRecord) -> bool {
        record.site_id == self.site_id
            && self.start.map_or(true, |start| record.timestamp >= start)
            && self.end.map_or(true, |end| record.timestamp <= end)
            && self.after.map_or(true, |PageToken(after)| record.timestamp > after)
            && (!self.anomalies_only || record.anomaly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<PageToken>,
}

impl Page<EnergyRecord> {
    /// Build a page from a result set fetched with `limit + 1` rows; the extra
    /// row only signals that another page exists.
    pub fn from_overfetch(mut items: Vec<EnergyRecord>, limit: usize) -> Self {
        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_token = if has_more {
            items.last().map(|r| PageToken(r.timestamp))
        } else {
            None
        };
        Self { items, next_token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use time::macros::datetime;

    fn record(ts: OffsetDateTime, anomaly: bool) -> EnergyRecord {
        EnergyRecord {
            site_id: "site_alpha".to_string(),
            timestamp: ts,
            energy_generated_kwh: Decimal::ONE,
            energy_consumed_kwh: Decimal::ONE,
            net_energy_kwh: Decimal::ZERO,
            anomaly,
        }
    }

    #[test]
    fn page_token_round_trips_through_text() {
        let token = PageToken(datetime!(2025-06-01 12:00:00.000123 UTC));
        let parsed: PageToken = token.to_string().parse().unwrap();
        assert_eq!(parsed, token);
        assert!("not-a-time".parse::<PageToken>().is_err());
    }

    #[test]
    fn query_bounds_are_inclusive_and_after_is_exclusive() {
        let mut q = RecordQuery::for_site("site_alpha");
        q.start = Some(datetime!(2025-06-01 00:00:00 UTC));
        q.end = Some(datetime!(2025-06-02 00:00:00 UTC));

        assert!(q.matches(&record(datetime!(2025-06-01 00:00:00 UTC), false)));
        assert!(q.matches(&record(datetime!(2025-06-02 00:00:00 UTC), false)));
        assert!(!q.matches(&record(datetime!(2025-06-02 00:00:01 UTC), false)));

        q.after = Some(PageToken(datetime!(2025-06-01 00:00:00 UTC)));
        assert!(!q.matches(&record(datetime!(2025-06-01 00:00:00 UTC), false)));

        q.anomalies_only = true;
        assert!(!q.matches(&record(datetime!(2025-06-01 06:00:00 UTC), false)));
        assert!(q.matches(&record(datetime!(2025-06-01 06:00:00 UTC), true)));
    }

    #[test]
    fn overfetch_sets_next_token_only_when_rows_remain() {
        let rows = vec![
            record(datetime!(2025-06-01 00:00:00 UTC), false),
            record(datetime!(2025-06-01 00:01:00 UTC), false),
            record(datetime!(2025-06-01 00:02:00 UTC), false),
        ];

        let page = Page::from_overfetch(rows.clone(), 2);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_token, Some(PageToken(datetime!(2025-06-01 00:01:00 UTC))));

        let page = Page::from_overfetch(rows, 3);
        assert_eq!(page.items.len(), 3);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn limit_is_clamped() {
        let mut q = RecordQuery::for_site("s");
        q.limit = 0;
        assert_eq!(q.limit(), 1);
        q.limit = 50_000;
        assert_eq!(q.limit(), MAX_PAGE_LIMIT);
    }
}
