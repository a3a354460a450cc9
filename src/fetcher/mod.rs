//! Per-venue occupancy sampling.
//!
//! Every venue yields exactly one [`FetchOutcome`]. Source errors, malformed
//! payloads and timeouts all become `Unavailable`; nothing here aborts the
//! rest of the batch. There is a single attempt per venue per cycle.

mod popular_times;

pub use popular_times::{PopularTimesClient, DEFAULT_DETAILS_URL, DEFAULT_SEARCH_URL};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::catalog::Venue;
use crate::models::{truncate_to_secs, Popularity, Reading};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch::fetcher";

use crate::{log_info, log_warn};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("source answered HTTP {0}")]
    Status(u16),

    #[error("source rejected the lookup: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// External occupancy estimator.
#[async_trait]
pub trait OccupancySource: Send + Sync {
    /// `Ok(None)` when the source answered but has no live estimate.
    async fn current_popularity(&self, venue: &Venue) -> Result<Option<i64>, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Reading(Reading),
    Unavailable { venue_ref: String, reason: String },
}

impl FetchOutcome {
    pub fn venue_ref(&self) -> &str {
        match self {
            FetchOutcome::Reading(reading) => &reading.venue_ref,
            FetchOutcome::Unavailable { venue_ref, .. } => venue_ref,
        }
    }

    pub fn reading(&self) -> Option<&Reading> {
        match self {
            FetchOutcome::Reading(reading) => Some(reading),
            FetchOutcome::Unavailable { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct OccupancyFetcher {
    source: Arc<dyn OccupancySource>,
    concurrency: usize,
    timeout: Duration,
    offset: FixedOffset,
}

impl OccupancyFetcher {
    pub fn new(source: Arc<dyn OccupancySource>, offset: FixedOffset) -> Self {
        Self {
            source,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            offset,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Samples one venue. Readings are stamped with `at`.
    pub async fn fetch(&self, venue: &Venue, at: DateTime<Utc>) -> FetchOutcome {
        let unavailable = |reason: String| {
            log_warn!("Venue {} unavailable: {reason}", venue.place_ref);
            FetchOutcome::Unavailable {
                venue_ref: venue.place_ref.clone(),
                reason,
            }
        };

        let raw = match tokio::time::timeout(self.timeout, self.source.current_popularity(venue)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => return unavailable(err.to_string()),
            Err(_) => return unavailable(format!("timed out after {}s", self.timeout.as_secs())),
        };

        let popularity = match raw {
            Some(value) => match Popularity::from_source(value) {
                Some(popularity) => Some(popularity),
                None => return unavailable(format!("popularity {value} out of range")),
            },
            None => None,
        };

        let is_open = venue.is_open_at(at, self.offset);
        FetchOutcome::Reading(Reading::observe(
            venue.place_ref.clone(),
            popularity,
            at,
            self.offset,
            is_open,
        ))
    }

    /// Samples every venue with bounded parallelism and waits for all of
    /// them to settle. Outcomes keep the order of `venues`.
    pub async fn fetch_all(&self, venues: &[Venue], at: DateTime<Utc>) -> Vec<FetchOutcome> {
        let at = truncate_to_secs(at);
        let outcomes: Vec<FetchOutcome> = stream::iter(venues.to_vec())
            .map(|venue| {
                let fetcher = self.clone();
                async move { fetcher.fetch(&venue, at).await }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let available = outcomes.iter().filter(|o| o.reading().is_some()).count();
        log_info!("Fetched {available}/{} venues", outcomes.len());
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        values: HashMap<String, Result<Option<i64>, String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Scripted {
        fn new(values: &[(&str, Result<Option<i64>, &str>)]) -> Self {
            Self {
                values: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.map_err(str::to_string)))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OccupancySource for Scripted {
        async fn current_popularity(&self, venue: &Venue) -> Result<Option<i64>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.values.get(&venue.place_ref) {
                Some(Ok(value)) => Ok(*value),
                Some(Err(reason)) => Err(FetchError::Rejected(reason.clone())),
                None => Err(FetchError::Malformed("unknown venue".into())),
            }
        }
    }

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(7200).unwrap()
    }

    fn venues(ids: &[&str]) -> Vec<Venue> {
        ids.iter().map(|id| Venue::bare(*id)).collect()
    }

    #[tokio::test]
    async fn failures_do_not_block_other_venues() {
        let source = Arc::new(Scripted::new(&[
            ("a", Ok(Some(40))),
            ("b", Err("NOT_FOUND")),
            ("c", Ok(None)),
            ("d", Ok(Some(250))),
            ("e", Ok(Some(-3))),
        ]));
        let fetcher = OccupancyFetcher::new(source, offset());
        let at = Utc.with_ymd_and_hms(2024, 1, 28, 12, 0, 0).unwrap();

        let outcomes = fetcher.fetch_all(&venues(&["a", "b", "c", "d", "e"]), at).await;

        let order: Vec<_> = outcomes.iter().map(|o| o.venue_ref()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(outcomes[0].reading().unwrap().popularity, Popularity::new(40));
        assert!(outcomes[1].reading().is_none());
        assert_eq!(outcomes[2].reading().unwrap().popularity, None);
        assert_eq!(outcomes[3].reading().unwrap().popularity, Popularity::new(100));
        assert!(outcomes[4].reading().is_none());
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let ids: Vec<String> = (0..8).map(|i| format!("v{i}")).collect();
        let script: Vec<(&str, Result<Option<i64>, &str>)> =
            ids.iter().map(|id| (id.as_str(), Ok(Some(10)))).collect();
        let source = Arc::new(Scripted::new(&script));
        let fetcher = OccupancyFetcher::new(source.clone(), offset()).with_concurrency(3);
        let venues: Vec<Venue> = ids.iter().map(|id| Venue::bare(id.clone())).collect();

        fetcher.fetch_all(&venues, Utc::now()).await;

        assert!(source.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn slow_source_times_out_as_unavailable() {
        struct Stuck;

        #[async_trait]
        impl OccupancySource for Stuck {
            async fn current_popularity(&self, _venue: &Venue) -> Result<Option<i64>, FetchError> {
                futures::future::pending().await
            }
        }

        let fetcher = OccupancyFetcher::new(Arc::new(Stuck), offset())
            .with_timeout(Duration::from_millis(20));
        let outcome = fetcher.fetch(&Venue::bare("slow"), Utc::now()).await;

        assert!(matches!(outcome, FetchOutcome::Unavailable { .. }));
    }
}
