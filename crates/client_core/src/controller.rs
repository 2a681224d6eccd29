//! Draft/submit/cancel/amend lifecycle for a single transactional document.
//!
//! ```text
//! Draft(no id)  --save-->   Draft(id)
//! Draft(id)     --save-->   Draft(id)
//! Draft(id)     --submit--> Submitted(id)
//! Submitted(id) --cancel--> Cancelled(id)
//! Cancelled(id) --amend-->  Draft(id')
//! ```
//!
//! Operations run single-flight: while one is in flight every other lifecycle call
//! and every edit is rejected with [`LifecycleError::Precondition`] before touching
//! the network. Failures never mutate the held document.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde_json::Value;
use shared::{
    domain::{ChildEntry, DocName, DocStatus, Document, DocumentType, Fields, RowIdentity},
    protocol::SaveOutcome,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{ErrorKind, LifecycleError, ResourceError},
    mapper::{mapper_for, PayloadMapper},
    resource::{ResourceClient, MODIFIED_FIELD},
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    LoadBlank,
    LoadExisting,
    Edit,
    Save,
    Submit,
    Cancel,
    Amend,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LoadBlank => "load_blank",
            Self::LoadExisting => "load_existing",
            Self::Edit => "edit",
            Self::Save => "save",
            Self::Submit => "submit",
            Self::Cancel => "cancel",
            Self::Amend => "amend",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Loaded {
        name: Option<DocName>,
        doc_status: DocStatus,
    },
    Saved {
        name: DocName,
    },
    Submitted {
        name: DocName,
    },
    Cancelled {
        name: DocName,
    },
    Amended {
        previous: DocName,
        name: DocName,
    },
    /// The editor should be dismissed (after submit or a failed load).
    CloseEditor,
    Failed {
        operation: Operation,
        error: LifecycleError,
    },
}

/// Read-only view of the controller handed to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub doc_type: DocumentType,
    pub name: Option<DocName>,
    pub doc_status: DocStatus,
    /// The document's own `amended_from` field. Display data only: no operation
    /// on this controller reads it, so the cancelled original cannot be reached.
    pub amended_from: Option<DocName>,
    pub fields: Fields,
    pub children: BTreeMap<String, Vec<ChildEntry>>,
    pub busy: bool,
    pub closed: bool,
    pub last_error: Option<LifecycleError>,
}

struct ControllerState {
    document: Document,
    busy: bool,
    closed: bool,
    last_error: Option<LifecycleError>,
    // Bumped by `close`; responses carrying an older epoch are dropped.
    epoch: u64,
}

struct Ticket {
    epoch: u64,
    document: Document,
}

pub struct DocumentLifecycleController {
    doc_type: DocumentType,
    resources: Arc<dyn ResourceClient>,
    mapper: Arc<dyn PayloadMapper>,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl DocumentLifecycleController {
    pub fn new(doc_type: DocumentType, resources: Arc<dyn ResourceClient>) -> Self {
        Self::with_mapper(doc_type, resources, Arc::new(mapper_for(doc_type)))
    }

    pub fn with_mapper(
        doc_type: DocumentType,
        resources: Arc<dyn ResourceClient>,
        mapper: Arc<dyn PayloadMapper>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            doc_type,
            resources,
            mapper,
            inner: Mutex::new(ControllerState {
                document: Document::blank(doc_type, Fields::new()),
                busy: false,
                closed: false,
                last_error: None,
                epoch: 0,
            }),
            events,
        }
    }

    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> DocumentSnapshot {
        let guard = self.inner.lock().await;
        DocumentSnapshot {
            doc_type: self.doc_type,
            name: guard.document.name.clone(),
            doc_status: guard.document.doc_status,
            amended_from: guard.document.amended_from.clone(),
            fields: guard.document.fields.clone(),
            children: guard.document.children.clone(),
            busy: guard.busy,
            closed: guard.closed,
            last_error: guard.last_error.clone(),
        }
    }

    pub async fn is_busy(&self) -> bool {
        self.inner.lock().await.busy
    }

    /// Starts a fresh draft with caller-supplied defaults. No network call.
    pub async fn load_blank(&self, defaults: Fields) -> Result<(), LifecycleError> {
        let mut guard = self.inner.lock().await;
        if guard.busy {
            let err = LifecycleError::precondition("load_blank rejected: an operation is in flight");
            drop(guard);
            self.emit_failure(Operation::LoadBlank, &err);
            return Err(err);
        }
        guard.document = Document::blank(self.doc_type, defaults);
        guard.closed = false;
        guard.last_error = None;
        drop(guard);

        debug!(doctype = self.doc_type.doctype(), "lifecycle: blank draft");
        self.emit(LifecycleEvent::Loaded {
            name: None,
            doc_status: DocStatus::Draft,
        });
        Ok(())
    }

    /// Fetches an existing document. Any failure is fatal for the editor session.
    pub async fn load_existing(&self, name: &DocName) -> Result<(), LifecycleError> {
        let ticket = {
            let mut guard = self.inner.lock().await;
            if guard.busy {
                let err =
                    LifecycleError::precondition("load_existing rejected: an operation is in flight");
                drop(guard);
                self.emit_failure(Operation::LoadExisting, &err);
                return Err(err);
            }
            guard.closed = false;
            guard.busy = true;
            Ticket {
                epoch: guard.epoch,
                document: guard.document.clone(),
            }
        };

        let result = self
            .resources
            .fetch_by_identity(self.doc_type, name)
            .await
            .map_err(|err| match err {
                ResourceError::NotFound => {
                    LifecycleError::LoadFailure(format!("{} {name} not found", self.doc_type))
                }
                other => LifecycleError::LoadFailure(other.to_string()),
            });

        let mapper = Arc::clone(&self.mapper);
        let requested = name.clone();
        self.finish(Operation::LoadExisting, &ticket, result, move |document, fetched| {
            let mut loaded = mapper.from_wire(fetched);
            if loaded.name.is_none() {
                loaded.name = Some(requested);
            }
            let event = LifecycleEvent::Loaded {
                name: loaded.name.clone(),
                doc_status: loaded.doc_status,
            };
            *document = loaded;
            Ok(vec![event])
        })
        .await
    }

    pub async fn save(&self) -> Result<(), LifecycleError> {
        let ticket = self
            .begin(Operation::Save, |document| {
                if document.doc_status != DocStatus::Draft {
                    return Err(LifecycleError::precondition(format!(
                        "save requires a draft, document is {}",
                        document.doc_status
                    )));
                }
                Ok(())
            })
            .await?;

        let payload = self.mapper.to_wire(&ticket.document).to_wire();
        let result = self
            .resources
            .save(self.doc_type, payload)
            .await
            .map_err(LifecycleError::from);

        self.finish(Operation::Save, &ticket, result, |document, outcome| {
            expect_status(Operation::Save, DocStatus::Draft, outcome.doc_status)?;
            expect_identity(document.name.as_ref(), &outcome.name)?;
            document.name = Some(outcome.name.clone());
            document.doc_status = outcome.doc_status;
            adopt_write_outcome(document, &outcome);
            Ok(vec![LifecycleEvent::Saved { name: outcome.name }])
        })
        .await
    }

    pub async fn submit(&self) -> Result<(), LifecycleError> {
        let mapper = Arc::clone(&self.mapper);
        let ticket = self
            .begin(Operation::Submit, move |document| {
                if document.name.is_none() {
                    return Err(LifecycleError::precondition(
                        "submit requires a saved document",
                    ));
                }
                if document.doc_status != DocStatus::Draft {
                    return Err(LifecycleError::precondition(format!(
                        "submit requires a draft, document is {}",
                        document.doc_status
                    )));
                }
                mapper
                    .check_submittable(document)
                    .map_err(LifecycleError::Validation)
            })
            .await?;

        let payload = self.mapper.to_wire(&ticket.document).to_wire();
        let result = self
            .resources
            .submit(self.doc_type, payload)
            .await
            .map_err(LifecycleError::from);

        self.finish(Operation::Submit, &ticket, result, |document, outcome| {
            expect_status(Operation::Submit, DocStatus::Submitted, outcome.doc_status)?;
            expect_identity(document.name.as_ref(), &outcome.name)?;
            document.doc_status = DocStatus::Submitted;
            adopt_write_outcome(document, &outcome);
            Ok(vec![
                LifecycleEvent::Submitted { name: outcome.name },
                LifecycleEvent::CloseEditor,
            ])
        })
        .await
    }

    pub async fn cancel(&self) -> Result<(), LifecycleError> {
        let ticket = self
            .begin(Operation::Cancel, |document| {
                match (&document.name, document.doc_status) {
                    (Some(_), DocStatus::Submitted) => Ok(()),
                    (None, _) => Err(LifecycleError::precondition(
                        "cancel requires a saved document",
                    )),
                    (_, status) => Err(LifecycleError::precondition(format!(
                        "cancel requires a submitted document, document is {status}"
                    ))),
                }
            })
            .await?;

        let Some(name) = ticket.document.name.clone() else {
            return self.abort(&ticket).await;
        };
        let result = self
            .resources
            .cancel(self.doc_type, &name)
            .await
            .map_err(LifecycleError::from);

        self.finish(Operation::Cancel, &ticket, result, |document, outcome| {
            expect_status(Operation::Cancel, DocStatus::Cancelled, outcome.doc_status)?;
            document.doc_status = DocStatus::Cancelled;
            Ok(vec![LifecycleEvent::Cancelled { name }])
        })
        .await
    }

    /// Replaces the cancelled document with a new draft copy under a fresh identity.
    pub async fn amend(&self) -> Result<(), LifecycleError> {
        let ticket = self
            .begin(Operation::Amend, |document| {
                match (&document.name, document.doc_status) {
                    (Some(_), DocStatus::Cancelled) => Ok(()),
                    (None, _) => Err(LifecycleError::precondition(
                        "amend requires a saved document",
                    )),
                    (_, status) => Err(LifecycleError::precondition(format!(
                        "amend requires a cancelled document, document is {status}"
                    ))),
                }
            })
            .await?;

        let Some(previous) = ticket.document.name.clone() else {
            return self.abort(&ticket).await;
        };
        let result = async {
            let outcome = self.resources.amend(self.doc_type, &previous).await?;
            let reloaded = match self
                .resources
                .fetch_by_identity(self.doc_type, &outcome.name)
                .await
            {
                Ok(document) => Some(document),
                Err(err) => {
                    warn!(
                        name = %outcome.name,
                        error = %err,
                        "lifecycle: amended document reload failed, keeping local copy"
                    );
                    None
                }
            };
            Ok::<_, LifecycleError>((outcome, reloaded))
        }
        .await;

        let mapper = Arc::clone(&self.mapper);
        self.finish(Operation::Amend, &ticket, result, move |document, (outcome, reloaded)| {
            if outcome.name == previous {
                return Err(LifecycleError::Validation(format!(
                    "amend of {previous} returned the same identity"
                )));
            }
            let next = match reloaded {
                Some(fetched) => {
                    let mut next = mapper.from_wire(fetched);
                    next.name = Some(outcome.name.clone());
                    next.doc_status = DocStatus::Draft;
                    next
                }
                None => {
                    let mut next = document.clone();
                    next.name = Some(outcome.name.clone());
                    next.doc_status = DocStatus::Draft;
                    next.amended_from = Some(previous.clone());
                    next.fields.remove(MODIFIED_FIELD);
                    for row in next.children.values_mut().flatten() {
                        row.detach();
                    }
                    next
                }
            };
            *document = next;
            Ok(vec![LifecycleEvent::Amended {
                previous,
                name: outcome.name,
            }])
        })
        .await
    }

    /// Ends the editor session. Responses still in flight are dropped when they arrive.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        guard.closed = true;
        guard.busy = false;
        guard.epoch += 1;
        debug!(doctype = self.doc_type.doctype(), "lifecycle: editor closed");
    }

    pub async fn set_field(&self, field: &str, value: Value) -> Result<(), LifecycleError> {
        self.edit(|document| {
            document.fields.insert(field.to_string(), value);
            Ok(())
        })
        .await
    }

    /// Appends a new unsaved row and returns its client-side id.
    pub async fn add_child(&self, table: &str, fields: Fields) -> Result<Uuid, LifecycleError> {
        let entry = ChildEntry::new(fields);
        let local_id = entry.local_id;
        self.edit(|document| {
            table_mut(document, table)?.push(entry);
            Ok(())
        })
        .await?;
        Ok(local_id)
    }

    pub async fn update_child(
        &self,
        table: &str,
        local_id: Uuid,
        fields: Fields,
    ) -> Result<(), LifecycleError> {
        self.edit(|document| {
            let row = table_mut(document, table)?
                .iter_mut()
                .find(|row| row.local_id == local_id)
                .ok_or_else(|| LifecycleError::precondition(format!("no row {local_id} in {table}")))?;
            row.fields.extend(fields);
            Ok(())
        })
        .await
    }

    pub async fn remove_child(&self, table: &str, local_id: Uuid) -> Result<(), LifecycleError> {
        self.edit(|document| {
            let rows = table_mut(document, table)?;
            let before = rows.len();
            rows.retain(|row| row.local_id != local_id);
            if rows.len() == before {
                return Err(LifecycleError::precondition(format!(
                    "no row {local_id} in {table}"
                )));
            }
            Ok(())
        })
        .await
    }

    async fn edit(
        &self,
        change: impl FnOnce(&mut Document) -> Result<(), LifecycleError>,
    ) -> Result<(), LifecycleError> {
        let mut guard = self.inner.lock().await;
        let verdict = if guard.closed {
            Err(LifecycleError::precondition("editor is closed"))
        } else if guard.busy {
            Err(LifecycleError::precondition(
                "edits are rejected while an operation is in flight",
            ))
        } else if guard.document.doc_status != DocStatus::Draft {
            Err(LifecycleError::precondition(format!(
                "only drafts can be edited, document is {}",
                guard.document.doc_status
            )))
        } else {
            let mut next = guard.document.clone();
            change(&mut next).map(|()| next)
        };

        match verdict {
            Ok(next) => {
                guard.document = next;
                Ok(())
            }
            Err(err) => {
                drop(guard);
                self.emit_failure(Operation::Edit, &err);
                Err(err)
            }
        }
    }

    async fn begin(
        &self,
        operation: Operation,
        check: impl FnOnce(&Document) -> Result<(), LifecycleError>,
    ) -> Result<Ticket, LifecycleError> {
        let mut guard = self.inner.lock().await;
        let verdict = if guard.closed {
            Err(LifecycleError::precondition("editor is closed"))
        } else if guard.busy {
            Err(LifecycleError::precondition(format!(
                "{operation} rejected: another operation is in flight"
            )))
        } else {
            check(&guard.document)
        };

        if let Err(err) = verdict {
            if err.kind() != ErrorKind::Precondition {
                guard.last_error = Some(err.clone());
            }
            drop(guard);
            self.emit_failure(operation, &err);
            return Err(err);
        }

        guard.busy = true;
        debug!(
            doctype = self.doc_type.doctype(),
            operation = %operation,
            name = ?guard.document.name,
            "lifecycle: operation started"
        );
        Ok(Ticket {
            epoch: guard.epoch,
            document: guard.document.clone(),
        })
    }

    /// Applies `result` to a copy of the document and commits the copy only on success.
    async fn finish<T>(
        &self,
        operation: Operation,
        ticket: &Ticket,
        result: Result<T, LifecycleError>,
        apply: impl FnOnce(&mut Document, T) -> Result<Vec<LifecycleEvent>, LifecycleError>,
    ) -> Result<(), LifecycleError> {
        let mut guard = self.inner.lock().await;
        if guard.epoch != ticket.epoch {
            debug!(operation = %operation, "lifecycle: dropping response for a closed editor");
            return Err(LifecycleError::precondition(
                "editor was closed before the response arrived",
            ));
        }
        guard.busy = false;

        let applied = result.and_then(|value| {
            let mut next = guard.document.clone();
            let events = apply(&mut next, value)?;
            Ok((next, events))
        });

        match applied {
            Ok((next, events)) => {
                info!(
                    doctype = self.doc_type.doctype(),
                    operation = %operation,
                    name = ?next.name,
                    doc_status = %next.doc_status,
                    "lifecycle: operation succeeded"
                );
                guard.document = next;
                guard.last_error = None;
                drop(guard);
                for event in events {
                    self.emit(event);
                }
                Ok(())
            }
            Err(err) => {
                guard.last_error = Some(err.clone());
                drop(guard);
                self.emit_failure(operation, &err);
                if err.is_fatal() {
                    self.emit(LifecycleEvent::CloseEditor);
                }
                Err(err)
            }
        }
    }

    async fn abort(&self, ticket: &Ticket) -> Result<(), LifecycleError> {
        let mut guard = self.inner.lock().await;
        if guard.epoch == ticket.epoch {
            guard.busy = false;
        }
        Err(LifecycleError::precondition("document has no identity"))
    }

    fn emit_failure(&self, operation: Operation, error: &LifecycleError) {
        match error.kind() {
            ErrorKind::Precondition => {
                debug!(operation = %operation, error = %error, "lifecycle: rejected")
            }
            _ => warn!(operation = %operation, error = %error, "lifecycle: failed"),
        }
        self.emit(LifecycleEvent::Failed {
            operation,
            error: error.clone(),
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }
}

fn table_mut<'a>(
    document: &'a mut Document,
    table: &str,
) -> Result<&'a mut Vec<ChildEntry>, LifecycleError> {
    let doc_type = document.doc_type;
    document
        .children
        .get_mut(table)
        .ok_or_else(|| LifecycleError::precondition(format!("{doc_type} has no child table {table}")))
}

fn expect_status(
    operation: Operation,
    expected: DocStatus,
    actual: DocStatus,
) -> Result<(), LifecycleError> {
    if actual == expected {
        return Ok(());
    }
    Err(LifecycleError::Validation(format!(
        "server reported {actual} after {operation}, expected {expected}"
    )))
}

fn expect_identity(current: Option<&DocName>, returned: &DocName) -> Result<(), LifecycleError> {
    match current {
        Some(current) if current != returned => Err(LifecycleError::Validation(format!(
            "server returned {returned} while saving {current}"
        ))),
        _ => Ok(()),
    }
}

// Rows come back in the order they were sent; a count mismatch leaves local tags alone.
fn adopt_write_outcome(document: &mut Document, outcome: &SaveOutcome) {
    if let Some(modified) = &outcome.modified {
        document
            .fields
            .insert(MODIFIED_FIELD.to_string(), Value::String(modified.clone()));
    }
    for (table, names) in &outcome.child_names {
        let Some(rows) = document.children.get_mut(table) else {
            continue;
        };
        if rows.len() != names.len() {
            warn!(
                table = %table,
                local = rows.len(),
                server = names.len(),
                "lifecycle: child row count mismatch, keeping local row tags"
            );
            continue;
        }
        for (row, name) in rows.iter_mut().zip(names) {
            row.identity = RowIdentity::Persisted { name: name.clone() };
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
