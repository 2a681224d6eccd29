//! Debounced free-text search where only the most recent request may publish.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::{EntityType, LookupOption};
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

use crate::{error::ResourceError, lookup::LookupProvider};

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchResults {
    pub query: String,
    pub options: Vec<LookupOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Published,
    /// A newer request arrived before this one finished.
    Superseded,
    Failed(ResourceError),
}

pub struct DebouncedSearch {
    provider: Arc<dyn LookupProvider>,
    entity: EntityType,
    quiet_period: Duration,
    generation: AtomicU64,
    results: watch::Sender<SearchResults>,
}

impl DebouncedSearch {
    pub fn new(provider: Arc<dyn LookupProvider>, entity: EntityType) -> Self {
        Self::with_quiet_period(provider, entity, DEFAULT_QUIET_PERIOD)
    }

    pub fn with_quiet_period(
        provider: Arc<dyn LookupProvider>,
        entity: EntityType,
        quiet_period: Duration,
    ) -> Self {
        let (results, _) = watch::channel(SearchResults::default());
        Self {
            provider,
            entity,
            quiet_period,
            generation: AtomicU64::new(0),
            results,
        }
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchResults> {
        self.results.subscribe()
    }

    pub fn latest(&self) -> SearchResults {
        self.results.borrow().clone()
    }

    /// Invalidates every request still waiting or in flight.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Waits out the quiet period, queries, and publishes unless superseded.
    /// Blank text clears the published results immediately.
    pub async fn search(&self, text: &str) -> SearchOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = text.trim().to_string();
        if query.is_empty() {
            self.results.send_replace(SearchResults::default());
            return SearchOutcome::Published;
        }

        tokio::time::sleep(self.quiet_period).await;
        if !self.is_current(generation) {
            debug!(entity = %self.entity, query = %query, "search: superseded during quiet period");
            return SearchOutcome::Superseded;
        }

        let result = self.provider.search(self.entity, &query).await;
        if !self.is_current(generation) {
            debug!(entity = %self.entity, query = %query, "search: discarding stale response");
            return SearchOutcome::Superseded;
        }

        match result {
            Ok(options) => {
                debug!(entity = %self.entity, query = %query, hits = options.len(), "search: published");
                self.results.send_replace(SearchResults { query, options });
                SearchOutcome::Published
            }
            Err(err) => SearchOutcome::Failed(err),
        }
    }

    /// Runs [`Self::search`] on the runtime so keystrokes never wait on each other.
    pub fn spawn_search(self: &Arc<Self>, text: impl Into<String>) -> JoinHandle<SearchOutcome> {
        let search = Arc::clone(self);
        let text = text.into();
        tokio::spawn(async move { search.search(&text).await })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

#[cfg(test)]
#[path = "tests/search_tests.rs"]
mod tests;
