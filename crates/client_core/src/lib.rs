use std::sync::Arc;

use anyhow::Result;
use shared::domain::{DocumentType, EntityType};
use tracing::info;

pub mod config;
pub mod controller;
pub mod error;
pub mod lookup;
pub mod mapper;
pub mod resource;
pub mod search;
pub mod session;

pub use config::{load_settings, ClientSettings};
pub use controller::{DocumentLifecycleController, DocumentSnapshot, LifecycleEvent, Operation};
pub use error::{ErrorKind, LifecycleError, ResourceError};
pub use lookup::{DependentLookups, FrappeLookupProvider, LookupGraph, LookupPage, LookupProvider};
pub use mapper::{mapper_for, FieldMapper, PayloadMapper};
pub use resource::{FrappeResourceClient, ResourceClient};
pub use search::{DebouncedSearch, SearchOutcome, SearchResults};
pub use session::{Auth, Session};

/// Shared backend collaborators for one signed-in session.
///
/// Controllers, dependent lookups and searches built from the same client share its
/// HTTP connection pool and credentials.
#[derive(Clone)]
pub struct FleetClient {
    settings: ClientSettings,
    resources: Arc<dyn ResourceClient>,
    lookups: Arc<dyn LookupProvider>,
}

impl FleetClient {
    pub fn from_settings(settings: ClientSettings) -> Result<Self> {
        let session = settings.session()?;
        let http = settings.http_client()?;
        info!(
            server_url = %session.server_url(),
            authenticated = settings.api_key.is_some() || settings.session_id.is_some(),
            "fleet client configured"
        );
        let resources = Arc::new(FrappeResourceClient::with_http(http.clone(), session.clone()));
        let lookups = Arc::new(FrappeLookupProvider::with_http(
            http,
            session,
            settings.lookup_page_length,
        ));
        Ok(Self {
            settings,
            resources,
            lookups,
        })
    }

    pub fn with_collaborators(
        settings: ClientSettings,
        resources: Arc<dyn ResourceClient>,
        lookups: Arc<dyn LookupProvider>,
    ) -> Self {
        Self {
            settings,
            resources,
            lookups,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn controller(&self, doc_type: DocumentType) -> DocumentLifecycleController {
        DocumentLifecycleController::new(doc_type, Arc::clone(&self.resources))
    }

    pub fn dependent_lookups(&self) -> DependentLookups {
        DependentLookups::new(Arc::clone(&self.lookups))
    }

    pub fn search(&self, entity: EntityType) -> DebouncedSearch {
        DebouncedSearch::with_quiet_period(
            Arc::clone(&self.lookups),
            entity,
            self.settings.search_debounce(),
        )
    }

    pub fn lookups(&self) -> Arc<dyn LookupProvider> {
        Arc::clone(&self.lookups)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
