//! One fetch, store and notify pass over the active venues.

mod scheduler;

pub use scheduler::run_scheduler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::catalog::{Catalog, Venue};
use crate::failure::Failure;
use crate::fetcher::{FetchOutcome, OccupancyFetcher};
use crate::models::truncate_to_secs;
use crate::notify::{
    HandleStore, MessageHandle, NotificationRenderer, PublishAction, VenueState, VenueStatus,
};
use crate::store::ReadingStore;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch::cycle";

const HANDLE_SAVE_ATTEMPTS: usize = 2;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub at: DateTime<Utc>,
    pub venues: Vec<VenueStatus>,
    pub readings_fetched: usize,
    pub readings_stored: usize,
    pub notification: Option<PublishAction>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("a cycle is already running")]
    Busy,

    /// Readings were fetched but not one of them reached the store.
    #[error("none of the {} fetched readings could be stored", .0.readings_fetched)]
    NothingPersisted(Box<CycleSummary>),
}

/// Everything a cycle needs. Cheap to clone; clones share the cycle guard.
#[derive(Clone)]
pub struct AppContext {
    pub catalog: Arc<Catalog>,
    pub store: ReadingStore,
    pub fetcher: OccupancyFetcher,
    pub renderer: NotificationRenderer,
    pub handles: HandleStore,
    pub skip_closed_venues: bool,
    guard: Arc<Mutex<()>>,
}

impl AppContext {
    pub fn new(
        catalog: Arc<Catalog>,
        store: ReadingStore,
        fetcher: OccupancyFetcher,
        renderer: NotificationRenderer,
        handles: HandleStore,
    ) -> Self {
        Self {
            catalog,
            store,
            fetcher,
            renderer,
            handles,
            skip_closed_venues: true,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_skip_closed_venues(mut self, skip: bool) -> Self {
        self.skip_closed_venues = skip;
        self
    }

    /// Holds the cycle guard; `None` while another cycle runs.
    pub fn try_begin(&self) -> Option<OwnedMutexGuard<()>> {
        self.guard.clone().try_lock_owned().ok()
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, at: DateTime<Utc>) -> Result<CycleSummary, CycleError> {
        let _guard = self.try_begin().ok_or(CycleError::Busy)?;
        let summary = self.cycle(truncate_to_secs(at)).await;

        if summary.readings_fetched > 0 && summary.readings_stored == 0 {
            log_error!(
                "Cycle {} stored none of its {} readings",
                summary.cycle_id,
                summary.readings_fetched
            );
            return Err(CycleError::NothingPersisted(Box::new(summary)));
        }
        Ok(summary)
    }

    async fn cycle(&self, at: DateTime<Utc>) -> CycleSummary {
        let cycle_id = Uuid::new_v4();
        let offset = self.catalog.offset();
        let active: Vec<&Venue> = self.catalog.active().collect();
        log_info!("Cycle {cycle_id} at {at} over {} venue(s)", active.len());

        let closed = |venue: &Venue| {
            self.skip_closed_venues && venue.is_open_at(at, offset) == Some(false)
        };
        let to_fetch: Vec<Venue> = active
            .iter()
            .filter(|venue| !closed(**venue))
            .map(|venue| (*venue).clone())
            .collect();

        let outcomes = self.fetcher.fetch_all(&to_fetch, at).await;

        let mut failures = Vec::new();
        let mut fetched_states = Vec::with_capacity(outcomes.len());
        let mut readings_fetched = 0;
        let mut readings_stored = 0;

        for (venue, outcome) in to_fetch.iter().zip(outcomes) {
            let state = match outcome {
                FetchOutcome::Reading(reading) => {
                    readings_fetched += 1;
                    match self.store.append(&reading).await {
                        Ok(_) => {
                            readings_stored += 1;
                            VenueState::Observed {
                                popularity: reading.popularity,
                                is_open: reading.is_open,
                            }
                        }
                        Err(err) => {
                            log_warn!("Storing reading for {} failed: {err}", venue.place_ref);
                            failures.push(Failure::StoreWriteFailure {
                                venue_ref: venue.place_ref.clone(),
                                reason: err.to_string(),
                            });
                            VenueState::NoData {
                                is_open: reading.is_open,
                            }
                        }
                    }
                }
                FetchOutcome::Unavailable { venue_ref, reason } => {
                    failures.push(Failure::VenueUnavailable { venue_ref, reason });
                    VenueState::NoData {
                        is_open: venue.is_open_at(at, offset),
                    }
                }
            };
            fetched_states.push(state);
        }

        let mut fetched_states = fetched_states.into_iter();
        let venues: Vec<VenueStatus> = active
            .iter()
            .map(|venue| {
                let state = if closed(*venue) {
                    VenueState::Closed
                } else {
                    fetched_states.next().unwrap_or(VenueState::NoData { is_open: None })
                };
                VenueStatus::new(venue, state)
            })
            .collect();

        let notification = self.notify(&venues, at, &mut failures).await;

        log_info!(
            "Cycle {cycle_id} done: {readings_stored}/{readings_fetched} stored, {} failure(s)",
            failures.len()
        );
        CycleSummary {
            cycle_id,
            at,
            venues,
            readings_fetched,
            readings_stored,
            notification,
            failures,
        }
    }

    async fn notify(
        &self,
        venues: &[VenueStatus],
        at: DateTime<Utc>,
        failures: &mut Vec<Failure>,
    ) -> Option<PublishAction> {
        // Without the stored handle a publish could only send a second
        // message, so skip it this cycle.
        let previous = match self.handles.load().await {
            Ok(handle) => handle,
            Err(err) => {
                log_warn!("Loading the status message handle failed: {err}");
                failures.push(Failure::NotificationFailure {
                    reason: format!("handle load failed: {err}"),
                });
                return None;
            }
        };

        let outcome = self.renderer.publish(venues, previous.clone(), at).await;
        if let PublishAction::Failed { reason } = &outcome.action {
            failures.push(Failure::NotificationFailure {
                reason: reason.clone(),
            });
        }

        if outcome.handle != previous {
            if let Err(reason) = self.keep_handle(&outcome.handle).await {
                failures.push(Failure::NotificationFailure { reason });
            }
        }

        Some(outcome.action)
    }

    /// Persists a changed handle. A freshly sent message whose handle cannot
    /// be stored is withdrawn, or the next cycle would send another one.
    async fn keep_handle(&self, handle: &Option<MessageHandle>) -> Result<(), String> {
        let mut last_err = None;
        for attempt in 1..=HANDLE_SAVE_ATTEMPTS {
            match self.handles.save(handle.as_ref()).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    log_warn!("Saving the status message handle failed (attempt {attempt}): {err}");
                    last_err = Some(err);
                }
            }
        }
        let reason = match last_err {
            Some(err) => format!("handle save failed: {err}"),
            None => "handle save failed".to_string(),
        };

        // A cleared handle only leaves the stale one behind.
        let Some(sent) = handle else {
            return Err(reason);
        };
        match self.renderer.retract(sent).await {
            Ok(()) => Err(format!("{reason}; message {sent} withdrawn")),
            Err(err) => {
                log_error!("Status message {sent} is orphaned: {err}");
                Err(format!("{reason}; withdrawing message {sent} failed: {err}"))
            }
        }
    }
}
