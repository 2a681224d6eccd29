//! Reference-data lookups and the dependent-selection graph
//! (Company -> Warehouse -> CostCenter -> Employee, Warehouse -> Vehicle).

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use shared::{
    domain::{EntityType, Fields, LookupOption},
    protocol::{DataEnvelope, Filter},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{error::ResourceError, resource::classify_failure, session::Session};

#[async_trait]
pub trait LookupProvider: Send + Sync {
    async fn query(
        &self,
        entity: EntityType,
        filters: &[Filter],
    ) -> Result<Vec<LookupOption>, ResourceError>;
    async fn search(
        &self,
        entity: EntityType,
        text: &str,
    ) -> Result<Vec<LookupOption>, ResourceError>;
}

#[derive(Serialize)]
struct ListQuery {
    fields: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    or_filters: Option<String>,
    limit_page_length: u32,
    order_by: &'static str,
}

pub struct FrappeLookupProvider {
    http: Client,
    session: Session,
    page_length: u32,
}

impl FrappeLookupProvider {
    pub fn new(session: Session, page_length: u32) -> Self {
        Self::with_http(Client::new(), session, page_length)
    }

    pub fn with_http(http: Client, session: Session, page_length: u32) -> Self {
        Self {
            http,
            session,
            page_length,
        }
    }

    async fn list(
        &self,
        entity: EntityType,
        filters: &[Filter],
        or_filters: &[Filter],
    ) -> Result<Vec<LookupOption>, ResourceError> {
        let encode = |filters: &[Filter]| -> Result<Option<String>, ResourceError> {
            if filters.is_empty() {
                return Ok(None);
            }
            serde_json::to_string(filters)
                .map(Some)
                .map_err(|err| ResourceError::Network(format!("invalid lookup filter: {err}")))
        };
        let fields = serde_json::to_string(&["name", entity.display_field()])
            .map_err(|err| ResourceError::Network(format!("invalid lookup fields: {err}")))?;
        let query = ListQuery {
            fields,
            filters: encode(filters)?,
            or_filters: encode(or_filters)?,
            limit_page_length: self.page_length,
            order_by: "name asc",
        };

        let url = self
            .session
            .endpoint(&["api", "resource", entity.doctype()]);
        debug!(entity = %entity, filters = filters.len(), "lookup: list");
        let response = self
            .session
            .authorize(self.http.get(url).query(&query))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let envelope: DataEnvelope<Vec<Fields>> = response.json().await?;
        Ok(envelope
            .data
            .iter()
            .filter_map(|row| LookupOption::from_row(entity, row))
            .collect())
    }
}

#[async_trait]
impl LookupProvider for FrappeLookupProvider {
    async fn query(
        &self,
        entity: EntityType,
        filters: &[Filter],
    ) -> Result<Vec<LookupOption>, ResourceError> {
        self.list(entity, filters, &[]).await
    }

    async fn search(
        &self,
        entity: EntityType,
        text: &str,
    ) -> Result<Vec<LookupOption>, ResourceError> {
        let pattern = format!("%{}%", escape_like(text.trim()));
        self.list(
            entity,
            &[],
            &[
                Filter::like("name", pattern.clone()),
                Filter::like(entity.display_field(), pattern),
            ],
        )
        .await
    }
}

/// Escapes `like` wildcards so user text only matches literally.
pub(crate) fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// One page of options. Iterating a `&LookupPage` can be repeated any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPage {
    options: Arc<[LookupOption]>,
}

impl Default for LookupPage {
    fn default() -> Self {
        Self::from(Vec::new())
    }
}

impl LookupPage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LookupOption> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.options.iter().any(|option| option.name == name)
    }
}

impl From<Vec<LookupOption>> for LookupPage {
    fn from(options: Vec<LookupOption>) -> Self {
        Self {
            options: options.into(),
        }
    }
}

impl<'a> IntoIterator for &'a LookupPage {
    type Item = &'a LookupOption;
    type IntoIter = std::slice::Iter<'a, LookupOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub parent: EntityType,
    pub child: EntityType,
    /// Field on the child doctype that links it to the parent.
    pub filter_field: &'static str,
}

const FLEET_DEPENDENCIES: &[Dependency] = &[
    Dependency {
        parent: EntityType::Company,
        child: EntityType::Warehouse,
        filter_field: "company",
    },
    Dependency {
        parent: EntityType::Warehouse,
        child: EntityType::CostCenter,
        filter_field: "warehouse",
    },
    Dependency {
        parent: EntityType::CostCenter,
        child: EntityType::Employee,
        filter_field: "payroll_cost_center",
    },
    Dependency {
        parent: EntityType::Warehouse,
        child: EntityType::Vehicle,
        filter_field: "warehouse",
    },
];

#[derive(Debug, Clone)]
pub struct LookupGraph {
    edges: &'static [Dependency],
}

impl Default for LookupGraph {
    fn default() -> Self {
        Self {
            edges: FLEET_DEPENDENCIES,
        }
    }
}

impl LookupGraph {
    pub fn new(edges: &'static [Dependency]) -> Self {
        Self { edges }
    }

    pub fn parent_of(&self, child: EntityType) -> Option<&Dependency> {
        self.edges.iter().find(|edge| edge.child == child)
    }

    pub fn dependents_of(&self, parent: EntityType) -> impl Iterator<Item = &Dependency> + '_ {
        self.edges.iter().filter(move |edge| edge.parent == parent)
    }

    /// Transitive dependents, nearest first.
    pub fn descendants_of(&self, key: EntityType) -> Vec<EntityType> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([key]);
        while let Some(current) = queue.pop_front() {
            for edge in self.dependents_of(current) {
                if !out.contains(&edge.child) {
                    out.push(edge.child);
                    queue.push_back(edge.child);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionChange {
    /// Keys whose selection was dropped because it no longer fits its parent.
    pub cleared: Vec<EntityType>,
    /// Keys whose option set was reloaded and applied.
    pub refreshed: Vec<EntityType>,
    /// Keys whose response was discarded because a newer request superseded it.
    pub stale: Vec<EntityType>,
}

#[derive(Default)]
struct LookupState {
    selections: HashMap<EntityType, String>,
    options: HashMap<EntityType, LookupPage>,
    issued: HashMap<EntityType, u64>,
}

impl LookupState {
    fn issue(&mut self, key: EntityType) -> u64 {
        let seq = self.issued.entry(key).or_insert(0);
        *seq += 1;
        *seq
    }

    fn is_latest(&self, key: EntityType, seq: u64) -> bool {
        self.issued.get(&key).copied().unwrap_or(0) == seq
    }
}

enum RefreshResult {
    Applied { cleared: Vec<EntityType> },
    Stale,
}

pub struct DependentLookups {
    provider: Arc<dyn LookupProvider>,
    graph: LookupGraph,
    inner: Mutex<LookupState>,
}

impl DependentLookups {
    pub fn new(provider: Arc<dyn LookupProvider>) -> Self {
        Self::with_graph(provider, LookupGraph::default())
    }

    pub fn with_graph(provider: Arc<dyn LookupProvider>, graph: LookupGraph) -> Self {
        Self {
            provider,
            graph,
            inner: Mutex::new(LookupState::default()),
        }
    }

    pub fn graph(&self) -> &LookupGraph {
        &self.graph
    }

    /// Fetches one page of options for `key` constrained by its parent's value.
    pub async fn resolve(
        &self,
        key: EntityType,
        parent_value: Option<&str>,
    ) -> Result<LookupPage, ResourceError> {
        let filters = match (self.graph.parent_of(key), parent_value) {
            (Some(edge), Some(value)) => vec![Filter::eq(edge.filter_field, value)],
            (Some(edge), None) => {
                debug!(entity = %key, parent = %edge.parent, "lookup: no parent value");
                return Ok(LookupPage::empty());
            }
            (None, _) => Vec::new(),
        };
        let options = self.provider.query(key, &filters).await?;
        Ok(LookupPage::from(options))
    }

    pub async fn selection(&self, key: EntityType) -> Option<String> {
        self.inner.lock().await.selections.get(&key).cloned()
    }

    pub async fn options(&self, key: EntityType) -> LookupPage {
        self.inner
            .lock()
            .await
            .options
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Reloads the options of `key` from its parent's current selection.
    pub async fn refresh(&self, key: EntityType) -> Result<SelectionChange, ResourceError> {
        let mut change = SelectionChange::default();
        match self.refresh_key(key).await? {
            RefreshResult::Applied { cleared } => {
                change.refreshed.push(key);
                change.cleared = cleared;
            }
            RefreshResult::Stale => change.stale.push(key),
        }
        Ok(change)
    }

    /// Records a selection and re-validates everything downstream of it.
    ///
    /// A dependent whose current value is missing from its new option set is cleared,
    /// together with everything below it. An empty `value` clears all descendants.
    pub async fn select(
        &self,
        key: EntityType,
        value: Option<&str>,
    ) -> Result<SelectionChange, ResourceError> {
        let value = value.map(str::trim).filter(|value| !value.is_empty());
        let mut change = SelectionChange::default();

        {
            let mut guard = self.inner.lock().await;
            let previous = guard.selections.get(&key).cloned();
            match value {
                Some(value) => {
                    guard.selections.insert(key, value.to_string());
                }
                None => {
                    guard.selections.remove(&key);
                    change.cleared = self.clear_descendants(&mut guard, key);
                    return Ok(change);
                }
            }
            if previous.as_deref() == value {
                return Ok(change);
            }
        }

        let dependents: Vec<EntityType> =
            self.graph.dependents_of(key).map(|edge| edge.child).collect();
        let results = join_all(dependents.iter().map(|child| self.refresh_key(*child))).await;

        let mut first_error = None;
        for (child, result) in dependents.into_iter().zip(results) {
            match result {
                Ok(RefreshResult::Applied { cleared }) => {
                    change.refreshed.push(child);
                    change.cleared.extend(cleared);
                }
                Ok(RefreshResult::Stale) => change.stale.push(child),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(change),
        }
    }

    async fn refresh_key(&self, key: EntityType) -> Result<RefreshResult, ResourceError> {
        let (seq, parent_value) = {
            let mut guard = self.inner.lock().await;
            let parent_value = self
                .graph
                .parent_of(key)
                .and_then(|edge| guard.selections.get(&edge.parent).cloned());
            (guard.issue(key), parent_value)
        };

        let result = self.resolve(key, parent_value.as_deref()).await;

        let mut guard = self.inner.lock().await;
        if !guard.is_latest(key, seq) {
            debug!(entity = %key, seq, "lookup: discarding superseded response");
            return Ok(RefreshResult::Stale);
        }

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                // Without a fresh option set the current value cannot be validated.
                warn!(entity = %key, error = %err, "lookup: refresh failed, clearing selection");
                guard.options.insert(key, LookupPage::empty());
                guard.selections.remove(&key);
                self.clear_descendants(&mut guard, key);
                return Err(err);
            }
        };

        let mut cleared = Vec::new();
        let orphaned = guard
            .selections
            .get(&key)
            .is_some_and(|selected| !page.contains(selected));
        guard.options.insert(key, page);
        if orphaned {
            if let Some(dropped) = guard.selections.remove(&key) {
                debug!(entity = %key, value = %dropped, "lookup: cleared orphaned selection");
            }
            cleared.push(key);
            cleared.extend(self.clear_descendants(&mut guard, key));
        }
        Ok(RefreshResult::Applied { cleared })
    }

    // Descendants lose their selection and options; in-flight refreshes for them go stale.
    fn clear_descendants(&self, state: &mut LookupState, key: EntityType) -> Vec<EntityType> {
        let mut cleared = Vec::new();
        for descendant in self.graph.descendants_of(key) {
            state.issue(descendant);
            state.options.insert(descendant, LookupPage::empty());
            if state.selections.remove(&descendant).is_some() {
                cleared.push(descendant);
            }
        }
        cleared
    }
}

#[cfg(test)]
#[path = "tests/lookup_tests.rs"]
mod tests;
