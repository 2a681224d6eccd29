//! Resource API collaborator: authenticated CRUD and lifecycle calls against the backend.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{DocName, DocStatus, Document, DocumentType, Fields},
    error::{ApiError, ErrorCode, ServerErrorEnvelope},
    protocol::{
        AmendOutcome, CancelOutcome, CancelRequest, DataEnvelope, MessageEnvelope, SaveOutcome,
        SubmitRequest,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::ResourceError, session::Session};

/// Optimistic-lock timestamp the server checks on every write after the first.
pub const MODIFIED_FIELD: &str = "modified";

#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn fetch_by_identity(
        &self,
        doc_type: DocumentType,
        name: &DocName,
    ) -> Result<Document, ResourceError>;
    /// Inserts when `payload` has no `name`, updates otherwise.
    async fn save(
        &self,
        doc_type: DocumentType,
        payload: Fields,
    ) -> Result<SaveOutcome, ResourceError>;
    async fn submit(
        &self,
        doc_type: DocumentType,
        payload: Fields,
    ) -> Result<SaveOutcome, ResourceError>;
    async fn cancel(
        &self,
        doc_type: DocumentType,
        name: &DocName,
    ) -> Result<CancelOutcome, ResourceError>;
    /// Creates a new draft copied from a cancelled document and returns its identity.
    async fn amend(
        &self,
        doc_type: DocumentType,
        name: &DocName,
    ) -> Result<AmendOutcome, ResourceError>;
}

pub struct FrappeResourceClient {
    http: Client,
    session: Session,
}

impl FrappeResourceClient {
    pub fn new(session: Session) -> Self {
        Self::with_http(Client::new(), session)
    }

    pub fn with_http(http: Client, session: Session) -> Self {
        Self { http, session }
    }

    fn resource_url(&self, doc_type: DocumentType, name: Option<&DocName>) -> Url {
        match name {
            Some(name) => self
                .session
                .endpoint(&["api", "resource", doc_type.doctype(), name.as_str()]),
            None => self
                .session
                .endpoint(&["api", "resource", doc_type.doctype()]),
        }
    }

    fn method_url(&self, method: &str) -> Url {
        self.session.endpoint(&["api", "method", method])
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ResourceError> {
        let response = self.session.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|err| {
                warn!(error = %err, "resource response body did not decode");
                ResourceError::network()
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn insert(
        &self,
        doc_type: DocumentType,
        payload: Fields,
    ) -> Result<SaveOutcome, ResourceError> {
        let url = self.resource_url(doc_type, None);
        debug!(doctype = doc_type.doctype(), "resource: insert");
        let envelope: DataEnvelope<Value> =
            self.send_json(self.http.post(url).json(&payload)).await?;
        outcome_from_wire(doc_type, envelope.data)
    }
}

/// Reads identity, status, the `modified` timestamp and child row names from a document
/// echoed after a write.
pub(crate) fn outcome_from_wire(
    doc_type: DocumentType,
    raw: Value,
) -> Result<SaveOutcome, ResourceError> {
    let document = Document::from_wire(doc_type, raw).map_err(|err| {
        warn!(error = %err, "resource: malformed write response");
        ResourceError::network()
    })?;
    let Some(name) = document.name else {
        warn!(doctype = doc_type.doctype(), "resource: write response without a name");
        return Err(ResourceError::network());
    };

    let mut outcome = SaveOutcome::new(name, document.doc_status);
    outcome.modified = document
        .fields
        .get(MODIFIED_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);
    for (table, rows) in document.children {
        let names: Vec<String> = rows
            .iter()
            .filter_map(|row| row.server_name().map(str::to_string))
            .collect();
        if names.len() == rows.len() {
            outcome.child_names.insert(table, names);
        }
    }
    Ok(outcome)
}

/// 404 is not-found; a parseable error envelope is a rejection; anything else is transport.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> ResourceError {
    if status == StatusCode::NOT_FOUND {
        return ResourceError::NotFound;
    }
    match ServerErrorEnvelope::parse(body).and_then(ServerErrorEnvelope::into_api_error) {
        Some(api) if api.code == ErrorCode::NotFound => ResourceError::NotFound,
        Some(api) => {
            debug!(status = status.as_u16(), code = ?api.code, message = %api.message, "resource: rejected");
            ResourceError::Rejected(api)
        }
        None => {
            warn!(status = status.as_u16(), "resource: unstructured failure response");
            ResourceError::network()
        }
    }
}

#[async_trait]
impl ResourceClient for FrappeResourceClient {
    async fn fetch_by_identity(
        &self,
        doc_type: DocumentType,
        name: &DocName,
    ) -> Result<Document, ResourceError> {
        let url = self.resource_url(doc_type, Some(name));
        debug!(doctype = doc_type.doctype(), name = %name, "resource: fetch");
        let envelope: DataEnvelope<Value> = self.send_json(self.http.get(url)).await?;
        Document::from_wire(doc_type, envelope.data).map_err(|err| {
            warn!(name = %name, error = %err, "resource: malformed document");
            ResourceError::network()
        })
    }

    async fn save(
        &self,
        doc_type: DocumentType,
        payload: Fields,
    ) -> Result<SaveOutcome, ResourceError> {
        let existing = payload
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(DocName::from);

        let outcome = match existing {
            Some(name) => {
                let url = self.resource_url(doc_type, Some(&name));
                debug!(doctype = doc_type.doctype(), name = %name, "resource: update");
                let envelope: DataEnvelope<Value> =
                    self.send_json(self.http.put(url).json(&payload)).await?;
                outcome_from_wire(doc_type, envelope.data)?
            }
            None => self.insert(doc_type, payload).await?,
        };
        info!(doctype = doc_type.doctype(), name = %outcome.name, "resource: saved");
        Ok(outcome)
    }

    async fn submit(
        &self,
        doc_type: DocumentType,
        payload: Fields,
    ) -> Result<SaveOutcome, ResourceError> {
        let url = self.method_url("frappe.client.submit");
        let envelope: MessageEnvelope<Value> = self
            .send_json(self.http.post(url).json(&SubmitRequest { doc: payload }))
            .await?;
        let outcome = outcome_from_wire(doc_type, envelope.message)?;
        info!(doctype = doc_type.doctype(), name = %outcome.name, "resource: submitted");
        Ok(outcome)
    }

    async fn cancel(
        &self,
        doc_type: DocumentType,
        name: &DocName,
    ) -> Result<CancelOutcome, ResourceError> {
        let url = self.method_url("frappe.client.cancel");
        let request = CancelRequest {
            doctype: doc_type.doctype().to_string(),
            name: name.to_string(),
        };
        let _: Value = self.send_json(self.http.post(url).json(&request)).await?;
        info!(doctype = doc_type.doctype(), name = %name, "resource: cancelled");
        Ok(CancelOutcome {
            doc_status: DocStatus::Cancelled,
        })
    }

    async fn amend(
        &self,
        doc_type: DocumentType,
        name: &DocName,
    ) -> Result<AmendOutcome, ResourceError> {
        let mut copy = self.fetch_by_identity(doc_type, name).await?;
        if copy.doc_status != DocStatus::Cancelled {
            return Err(ResourceError::Rejected(ApiError::new(
                ErrorCode::Validation,
                format!("{name} is not cancelled and cannot be amended"),
            )));
        }

        copy.name = None;
        copy.doc_status = DocStatus::Draft;
        copy.amended_from = Some(name.clone());
        for row in copy.children.values_mut().flatten() {
            row.detach();
        }

        let outcome = self.insert(doc_type, copy.to_wire()).await?;
        info!(
            doctype = doc_type.doctype(),
            amended_from = %name,
            name = %outcome.name,
            "resource: amended"
        );
        Ok(AmendOutcome { name: outcome.name })
    }
}

#[cfg(test)]
#[path = "tests/resource_tests.rs"]
mod tests;
