use super::*;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex as StdMutex,
};

use async_trait::async_trait;
use serde_json::json;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{AmendOutcome, CancelOutcome},
};
use tokio::sync::Notify;

use crate::resource::outcome_from_wire;

#[derive(Default)]
struct FakeResources {
    store: StdMutex<HashMap<String, Document>>,
    calls: StdMutex<Vec<String>>,
    payloads: StdMutex<Vec<Fields>>,
    next_names: StdMutex<VecDeque<String>>,
    fail_with: StdMutex<Option<ResourceError>>,
    unreachable: StdMutex<HashSet<String>>,
    row_counter: StdMutex<u32>,
    gate: Option<Arc<Notify>>,
}

impl FakeResources {
    fn new() -> Self {
        Self::default()
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn with_document(self, doc_type: DocumentType, raw: Value) -> Self {
        let doc = Document::from_wire(doc_type, raw).expect("fixture document");
        let name = doc.name.clone().expect("fixture name");
        self.store.lock().unwrap().insert(name.to_string(), doc);
        self
    }

    fn with_next_name(self, name: &str) -> Self {
        self.next_names.lock().unwrap().push_back(name.to_string());
        self
    }

    fn fail_next(&self, err: ResourceError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    fn make_unreachable(&self, name: &str) {
        self.unreachable.lock().unwrap().insert(name.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn payloads(&self) -> Vec<Fields> {
        self.payloads.lock().unwrap().clone()
    }

    fn stored(&self, name: &str) -> Document {
        self.store.lock().unwrap().get(name).cloned().expect("stored document")
    }

    async fn enter(&self, call: String) -> Result<(), ResourceError> {
        self.calls.lock().unwrap().push(call);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.fail_with.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn assign_name(&self) -> DocName {
        self.next_names
            .lock()
            .unwrap()
            .pop_front()
            .map(DocName::from)
            .unwrap_or_else(|| DocName::from("NEW-0001"))
    }

    fn persist(&self, mut doc: Document) -> SaveOutcome {
        {
            let mut counter = self.row_counter.lock().unwrap();
            for row in doc.children.values_mut().flatten() {
                if !row.is_persisted() {
                    *counter += 1;
                    row.identity = RowIdentity::Persisted {
                        name: format!("row-{counter}"),
                    };
                }
            }
        }
        let outcome =
            outcome_from_wire(doc.doc_type, Value::Object(doc.to_wire())).expect("outcome");
        let name = outcome.name.to_string();
        self.store.lock().unwrap().insert(name, doc);
        outcome
    }
}

#[async_trait]
impl ResourceClient for FakeResources {
    async fn fetch_by_identity(
        &self,
        doc_type: DocumentType,
        name: &DocName,
    ) -> Result<Document, ResourceError> {
        self.enter(format!("fetch:{name}")).await?;
        if self.unreachable.lock().unwrap().contains(name.as_str()) {
            return Err(ResourceError::network());
        }
        self.store
            .lock()
            .unwrap()
            .get(name.as_str())
            .filter(|doc| doc.doc_type == doc_type)
            .cloned()
            .ok_or(ResourceError::NotFound)
    }

    async fn save(
        &self,
        doc_type: DocumentType,
        payload: Fields,
    ) -> Result<SaveOutcome, ResourceError> {
        self.payloads.lock().unwrap().push(payload.clone());
        let mut doc = Document::from_wire(doc_type, Value::Object(payload)).expect("payload");
        let label = doc
            .name
            .as_ref()
            .map(|name| name.to_string())
            .unwrap_or_else(|| "new".to_string());
        self.enter(format!("save:{label}")).await?;
        if doc.name.is_none() {
            doc.name = Some(self.assign_name());
        }
        Ok(self.persist(doc))
    }

    async fn submit(
        &self,
        doc_type: DocumentType,
        payload: Fields,
    ) -> Result<SaveOutcome, ResourceError> {
        self.payloads.lock().unwrap().push(payload.clone());
        let mut doc = Document::from_wire(doc_type, Value::Object(payload)).expect("payload");
        let name = doc.name.clone().expect("submit payload carries a name");
        self.enter(format!("submit:{name}")).await?;
        doc.doc_status = DocStatus::Submitted;
        Ok(self.persist(doc))
    }

    async fn cancel(
        &self,
        _doc_type: DocumentType,
        name: &DocName,
    ) -> Result<CancelOutcome, ResourceError> {
        self.enter(format!("cancel:{name}")).await?;
        let mut store = self.store.lock().unwrap();
        let doc = store.get_mut(name.as_str()).ok_or(ResourceError::NotFound)?;
        doc.doc_status = DocStatus::Cancelled;
        Ok(CancelOutcome {
            doc_status: DocStatus::Cancelled,
        })
    }

    async fn amend(
        &self,
        _doc_type: DocumentType,
        name: &DocName,
    ) -> Result<AmendOutcome, ResourceError> {
        self.enter(format!("amend:{name}")).await?;
        let mut copy = self
            .store
            .lock()
            .unwrap()
            .get(name.as_str())
            .cloned()
            .ok_or(ResourceError::NotFound)?;
        copy.name = Some(self.assign_name());
        copy.doc_status = DocStatus::Draft;
        copy.amended_from = Some(name.clone());
        for row in copy.children.values_mut().flatten() {
            row.detach();
        }
        let outcome = self.persist(copy);
        Ok(AmendOutcome { name: outcome.name })
    }
}

fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("object")
}

fn drain(events: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn maint_0001() -> Value {
    json!({
        "name": "MAINT-0001",
        "docstatus": 0,
        "license_plate": "KA-01-1234",
        "posting_date": "2024-03-09",
        "employee": "EMP-0001",
        "work_done": [{"name": "wd-1", "description": "Oil change"}]
    })
}

fn refuel_0007() -> Value {
    json!({
        "name": "REFUEL-0007",
        "docstatus": 1,
        "license_plate": "KA-05-7777",
        "employee": "EMP-0002",
        "odometer_reading": 48211,
        "fuel_entries": [{"name": "fe-1", "litres": 42.5, "rate": 101.2}]
    })
}

async fn wait_for_calls(resources: &FakeResources, count: usize) {
    for _ in 0..1000 {
        if resources.calls().len() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("fake backend never saw {count} call(s)");
}

#[tokio::test]
async fn load_blank_starts_a_fresh_draft_without_network() {
    let resources = Arc::new(FakeResources::new());
    let controller =
        DocumentLifecycleController::new(DocumentType::MaintenanceLog, resources.clone());
    let mut events = controller.subscribe();

    controller
        .load_blank(fields(json!({"date": "2024-03-09", "company": "Acme Fleet"})))
        .await
        .expect("blank");

    let state = controller.state().await;
    assert_eq!(state.name, None);
    assert_eq!(state.doc_status, DocStatus::Draft);
    assert_eq!(state.fields.get("company"), Some(&json!("Acme Fleet")));
    assert!(state.children["parts_used"].is_empty());
    assert!(!state.busy);
    assert_eq!(state.last_error, None);
    assert!(resources.calls().is_empty());
    assert_eq!(
        drain(&mut events),
        vec![LifecycleEvent::Loaded {
            name: None,
            doc_status: DocStatus::Draft
        }]
    );
}

#[tokio::test]
async fn maint_0001_submit_moves_to_submitted_and_closes_the_editor() {
    let resources = Arc::new(
        FakeResources::new().with_document(DocumentType::MaintenanceLog, maint_0001()),
    );
    let controller =
        DocumentLifecycleController::new(DocumentType::MaintenanceLog, resources.clone());
    let mut events = controller.subscribe();

    controller
        .load_existing(&DocName::from("MAINT-0001"))
        .await
        .expect("load");
    let loaded = controller.state().await;
    assert_eq!(loaded.fields.get("vehicle"), Some(&json!("KA-01-1234")));
    assert_eq!(loaded.fields.get("mechanic"), Some(&json!("EMP-0001")));
    assert!(loaded.children["work_done"][0].is_persisted());

    controller.submit().await.expect("submit");

    let state = controller.state().await;
    assert_eq!(state.name, Some(DocName::from("MAINT-0001")));
    assert_eq!(state.doc_status, DocStatus::Submitted);
    assert_eq!(
        resources.calls(),
        vec!["fetch:MAINT-0001".to_string(), "submit:MAINT-0001".to_string()]
    );

    let submitted = &resources.payloads()[0];
    assert_eq!(submitted.get("license_plate"), Some(&json!("KA-01-1234")));
    assert!(!submitted.contains_key("vehicle"));
    assert_eq!(submitted["work_done"][0]["name"], json!("wd-1"));

    assert_eq!(
        drain(&mut events),
        vec![
            LifecycleEvent::Loaded {
                name: Some(DocName::from("MAINT-0001")),
                doc_status: DocStatus::Draft
            },
            LifecycleEvent::Submitted {
                name: DocName::from("MAINT-0001")
            },
            LifecycleEvent::CloseEditor,
        ]
    );
}

#[tokio::test]
async fn refuel_0007_cancel_then_submit_is_rejected_without_network() {
    let resources = Arc::new(
        FakeResources::new().with_document(DocumentType::RefuelingRecord, refuel_0007()),
    );
    let controller =
        DocumentLifecycleController::new(DocumentType::RefuelingRecord, resources.clone());

    controller
        .load_existing(&DocName::from("REFUEL-0007"))
        .await
        .expect("load");
    controller.cancel().await.expect("cancel");
    assert_eq!(controller.state().await.doc_status, DocStatus::Cancelled);

    let mut events = controller.subscribe();
    let err = controller.submit().await.expect_err("submit on cancelled");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(
        resources.calls(),
        vec!["fetch:REFUEL-0007".to_string(), "cancel:REFUEL-0007".to_string()]
    );

    let state = controller.state().await;
    assert_eq!(state.doc_status, DocStatus::Cancelled);
    assert_eq!(state.last_error, None);
    assert_eq!(
        drain(&mut events),
        vec![LifecycleEvent::Failed {
            operation: Operation::Submit,
            error: err,
        }]
    );
}

#[tokio::test]
async fn refuel_0007_amend_yields_a_fresh_draft_linked_to_the_original() {
    let resources = Arc::new(
        FakeResources::new()
            .with_document(DocumentType::RefuelingRecord, refuel_0007())
            .with_next_name("REFUEL-0008"),
    );
    let controller =
        DocumentLifecycleController::new(DocumentType::RefuelingRecord, resources.clone());
    let mut events = controller.subscribe();

    controller
        .load_existing(&DocName::from("REFUEL-0007"))
        .await
        .expect("load");
    controller.cancel().await.expect("cancel");
    controller.amend().await.expect("amend");

    let state = controller.state().await;
    assert_eq!(state.name, Some(DocName::from("REFUEL-0008")));
    assert_eq!(state.doc_status, DocStatus::Draft);
    assert_eq!(state.amended_from, Some(DocName::from("REFUEL-0007")));
    assert_eq!(state.fields.get("vehicle"), Some(&json!("KA-05-7777")));
    assert_eq!(state.fields.get("odometer"), Some(&json!(48211)));
    let rows = &state.children["fuel_entries"];
    assert_eq!(rows.len(), 1);
    assert_ne!(rows[0].server_name(), Some("fe-1"));

    assert_eq!(
        resources.stored("REFUEL-0007").doc_status,
        DocStatus::Cancelled
    );
    assert_eq!(
        resources.calls(),
        vec![
            "fetch:REFUEL-0007".to_string(),
            "cancel:REFUEL-0007".to_string(),
            "amend:REFUEL-0007".to_string(),
            "fetch:REFUEL-0008".to_string(),
        ]
    );
    assert!(drain(&mut events).contains(&LifecycleEvent::Amended {
        previous: DocName::from("REFUEL-0007"),
        name: DocName::from("REFUEL-0008"),
    }));

    controller
        .set_field("remarks", json!("corrected litres"))
        .await
        .expect("amended draft is editable");
}

#[tokio::test]
async fn amend_keeps_a_local_copy_when_the_reload_fails() {
    let resources = Arc::new(
        FakeResources::new()
            .with_document(DocumentType::RefuelingRecord, refuel_0007())
            .with_next_name("REFUEL-0008"),
    );
    resources.make_unreachable("REFUEL-0008");
    let controller =
        DocumentLifecycleController::new(DocumentType::RefuelingRecord, resources.clone());

    controller
        .load_existing(&DocName::from("REFUEL-0007"))
        .await
        .expect("load");
    controller.cancel().await.expect("cancel");
    let before = controller.state().await;
    controller.amend().await.expect("amend");

    let state = controller.state().await;
    assert_eq!(state.name, Some(DocName::from("REFUEL-0008")));
    assert_eq!(state.doc_status, DocStatus::Draft);
    assert_eq!(state.amended_from, Some(DocName::from("REFUEL-0007")));
    assert_eq!(state.fields, before.fields);
    assert!(state
        .children
        .values()
        .flatten()
        .all(|row| !row.is_persisted()));
}

#[tokio::test]
async fn saving_twice_keeps_document_and_row_identities() {
    let resources = Arc::new(FakeResources::new().with_next_name("REFUEL-0001"));
    let controller =
        DocumentLifecycleController::new(DocumentType::RefuelingRecord, resources.clone());

    controller
        .load_blank(fields(json!({"vehicle": "KA-05-7777"})))
        .await
        .expect("blank");
    let row_id = controller
        .add_child("fuel_entries", fields(json!({"litres": 30})))
        .await
        .expect("row");

    controller.save().await.expect("first save");
    let first = controller.state().await;
    assert_eq!(first.name, Some(DocName::from("REFUEL-0001")));
    let row = &first.children["fuel_entries"][0];
    assert_eq!(row.local_id, row_id);
    let row_name = row.server_name().map(str::to_string);
    assert!(row_name.is_some());

    controller.save().await.expect("second save");
    let second = controller.state().await;
    assert_eq!(second.name, first.name);
    assert_eq!(second.children["fuel_entries"].len(), 1);
    assert_eq!(
        second.children["fuel_entries"][0].server_name(),
        row_name.as_deref()
    );

    let payloads = resources.payloads();
    assert!(payloads[0].get("name").is_none());
    assert!(payloads[0]["fuel_entries"][0].get("name").is_none());
    assert_eq!(payloads[1]["name"], json!("REFUEL-0001"));
    assert_eq!(
        payloads[1]["fuel_entries"][0]["name"],
        json!(row_name.expect("row name"))
    );
    assert_eq!(
        resources.calls(),
        vec!["save:new".to_string(), "save:REFUEL-0001".to_string()]
    );
    assert_eq!(resources.stored("REFUEL-0001").child_count(), 1);
}

#[tokio::test]
async fn operations_and_edits_are_rejected_while_busy() {
    let gate = Arc::new(Notify::new());
    let resources =
        Arc::new(FakeResources::gated(Arc::clone(&gate)).with_next_name("REFUEL-0001"));
    let controller = Arc::new(DocumentLifecycleController::new(
        DocumentType::RefuelingRecord,
        resources.clone(),
    ));
    controller
        .load_blank(fields(json!({"vehicle": "KA-05-7777"})))
        .await
        .expect("blank");

    let pending = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.save().await }
    });
    wait_for_calls(&resources, 1).await;
    assert!(controller.is_busy().await);

    let err = controller.save().await.expect_err("second save");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    let err = controller.submit().await.expect_err("submit while busy");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    let err = controller
        .set_field("remarks", json!("late edit"))
        .await
        .expect_err("edit while busy");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(resources.calls(), vec!["save:new".to_string()]);

    gate.notify_one();
    pending.await.expect("join").expect("save");

    let state = controller.state().await;
    assert!(!state.busy);
    assert_eq!(state.name, Some(DocName::from("REFUEL-0001")));
    assert!(!state.fields.contains_key("remarks"));
}

#[tokio::test]
async fn responses_arriving_after_close_are_discarded() {
    let gate = Arc::new(Notify::new());
    let resources =
        Arc::new(FakeResources::gated(Arc::clone(&gate)).with_next_name("REFUEL-0001"));
    let controller = Arc::new(DocumentLifecycleController::new(
        DocumentType::RefuelingRecord,
        resources.clone(),
    ));
    controller
        .load_blank(fields(json!({"vehicle": "KA-05-7777"})))
        .await
        .expect("blank");
    let mut events = controller.subscribe();

    let pending = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.save().await }
    });
    wait_for_calls(&resources, 1).await;
    controller.close().await;
    gate.notify_one();

    let err = pending.await.expect("join").expect_err("discarded");
    assert_eq!(err.kind(), ErrorKind::Precondition);

    let state = controller.state().await;
    assert!(state.closed);
    assert!(!state.busy);
    assert_eq!(state.name, None);
    assert!(drain(&mut events).is_empty());

    let err = controller.save().await.expect_err("closed editor");
    assert_eq!(err.kind(), ErrorKind::Precondition);

    controller.load_blank(Fields::new()).await.expect("reopen");
    assert!(!controller.state().await.closed);
}

#[tokio::test]
async fn load_failure_is_fatal_and_closes_the_editor() {
    let resources = Arc::new(FakeResources::new());
    let controller =
        DocumentLifecycleController::new(DocumentType::UtilizationReport, resources.clone());
    let mut events = controller.subscribe();

    let err = controller
        .load_existing(&DocName::from("UTIL-0404"))
        .await
        .expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
    assert!(err.message().contains("UTIL-0404"));

    let state = controller.state().await;
    assert!(!state.busy);
    assert_eq!(state.name, None);
    assert_eq!(state.last_error, Some(err.clone()));
    assert_eq!(
        drain(&mut events),
        vec![
            LifecycleEvent::Failed {
                operation: Operation::LoadExisting,
                error: err,
            },
            LifecycleEvent::CloseEditor,
        ]
    );
}

#[tokio::test]
async fn server_rejection_leaves_the_document_unchanged() {
    let resources = Arc::new(FakeResources::new().with_next_name("REFUEL-0001"));
    let controller =
        DocumentLifecycleController::new(DocumentType::RefuelingRecord, resources.clone());
    controller
        .load_blank(fields(json!({"vehicle": "KA-05-7777", "odometer": 100})))
        .await
        .expect("blank");
    controller
        .add_child("fuel_entries", fields(json!({"litres": 12})))
        .await
        .expect("row");
    let before = controller.state().await;

    resources.fail_next(ResourceError::Rejected(ApiError::new(
        ErrorCode::Validation,
        "Odometer reading cannot go backwards",
    )));
    let err = controller.save().await.expect_err("rejected");
    assert_eq!(
        err,
        LifecycleError::Validation("Odometer reading cannot go backwards".to_string())
    );

    let state = controller.state().await;
    assert_eq!(state.name, None);
    assert_eq!(state.fields, before.fields);
    assert_eq!(state.children, before.children);
    assert_eq!(state.last_error, Some(err));
    assert!(!state.busy);

    controller.save().await.expect("retry succeeds");
    assert_eq!(controller.state().await.last_error, None);
}

#[tokio::test]
async fn network_failure_on_submit_keeps_the_draft() {
    let resources = Arc::new(
        FakeResources::new().with_document(DocumentType::MaintenanceLog, maint_0001()),
    );
    let controller =
        DocumentLifecycleController::new(DocumentType::MaintenanceLog, resources.clone());
    controller
        .load_existing(&DocName::from("MAINT-0001"))
        .await
        .expect("load");

    resources.fail_next(ResourceError::network());
    let err = controller.submit().await.expect_err("offline");
    assert_eq!(err.kind(), ErrorKind::Network);

    let state = controller.state().await;
    assert_eq!(state.doc_status, DocStatus::Draft);
    assert_eq!(state.last_error, Some(err));
}

#[tokio::test]
async fn submit_precondition_from_the_mapper_blocks_the_round_trip() {
    let resources = Arc::new(FakeResources::new().with_next_name("MAINT-0002"));
    let controller =
        DocumentLifecycleController::new(DocumentType::MaintenanceLog, resources.clone());
    controller
        .load_blank(fields(json!({"vehicle": "KA-01-1234"})))
        .await
        .expect("blank");

    let err = controller.submit().await.expect_err("unsaved");
    assert_eq!(err.kind(), ErrorKind::Precondition);

    controller.save().await.expect("save");
    let err = controller.submit().await.expect_err("no rows");
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(controller.state().await.last_error, Some(err));
    assert_eq!(resources.calls(), vec!["save:new".to_string()]);
}

#[tokio::test]
async fn wrong_state_operations_are_preconditions() {
    let resources = Arc::new(FakeResources::new());
    let controller =
        DocumentLifecycleController::new(DocumentType::RefuelingRecord, resources.clone());
    controller.load_blank(Fields::new()).await.expect("blank");

    for err in [
        controller.cancel().await.expect_err("cancel draft"),
        controller.amend().await.expect_err("amend draft"),
    ] {
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }
    assert!(resources.calls().is_empty());
}

#[tokio::test]
async fn out_of_order_transitions_are_preconditions_without_network() {
    let resources = Arc::new(
        FakeResources::new()
            .with_document(DocumentType::MaintenanceLog, maint_0001())
            .with_document(DocumentType::RefuelingRecord, refuel_0007()),
    );

    let draft = DocumentLifecycleController::new(DocumentType::MaintenanceLog, resources.clone());
    draft
        .load_existing(&DocName::from("MAINT-0001"))
        .await
        .expect("load draft");
    let before = draft.state().await;
    let err = draft.cancel().await.expect_err("cancel saved draft");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(draft.state().await, before);

    let controller =
        DocumentLifecycleController::new(DocumentType::RefuelingRecord, resources.clone());
    controller
        .load_existing(&DocName::from("REFUEL-0007"))
        .await
        .expect("load submitted");
    let before = controller.state().await;
    for err in [
        controller.submit().await.expect_err("double submit"),
        controller.amend().await.expect_err("amend submitted"),
    ] {
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }
    assert_eq!(controller.state().await, before);

    controller.cancel().await.expect("cancel");
    let before = controller.state().await;
    for err in [
        controller.cancel().await.expect_err("cancel twice"),
        controller.submit().await.expect_err("submit cancelled"),
        controller.save().await.expect_err("save cancelled"),
    ] {
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }
    let after = controller.state().await;
    assert_eq!(after, before);
    assert_eq!(after.name, Some(DocName::from("REFUEL-0007")));
    assert_eq!(after.doc_status, DocStatus::Cancelled);

    assert_eq!(
        resources.calls(),
        vec![
            "fetch:MAINT-0001".to_string(),
            "fetch:REFUEL-0007".to_string(),
            "cancel:REFUEL-0007".to_string(),
        ]
    );
}

#[tokio::test]
async fn submitted_documents_reject_edits_and_saves() {
    let resources = Arc::new(
        FakeResources::new().with_document(DocumentType::RefuelingRecord, refuel_0007()),
    );
    let controller =
        DocumentLifecycleController::new(DocumentType::RefuelingRecord, resources.clone());
    controller
        .load_existing(&DocName::from("REFUEL-0007"))
        .await
        .expect("load");

    let err = controller
        .set_field("odometer", json!(1))
        .await
        .expect_err("submitted");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    let err = controller.save().await.expect_err("submitted");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(resources.calls(), vec!["fetch:REFUEL-0007".to_string()]);
}

#[tokio::test]
async fn child_rows_can_be_edited_and_removed_by_local_id() {
    let resources = Arc::new(FakeResources::new());
    let controller =
        DocumentLifecycleController::new(DocumentType::MaintenanceLog, resources.clone());
    controller.load_blank(Fields::new()).await.expect("blank");

    let keep = controller
        .add_child("parts_used", fields(json!({"item_code": "OIL-FILTER", "qty": 1})))
        .await
        .expect("row");
    let drop_me = controller
        .add_child("parts_used", fields(json!({"item_code": "AIR-FILTER", "qty": 1})))
        .await
        .expect("row");
    controller
        .update_child("parts_used", keep, fields(json!({"qty": 2})))
        .await
        .expect("update");
    controller
        .remove_child("parts_used", drop_me)
        .await
        .expect("remove");

    let rows = controller.state().await.children["parts_used"].clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].local_id, keep);
    assert_eq!(rows[0].fields.get("qty"), Some(&json!(2)));
    assert_eq!(rows[0].fields.get("item_code"), Some(&json!("OIL-FILTER")));
    assert!(!rows[0].is_persisted());

    let err = controller
        .remove_child("parts_used", drop_me)
        .await
        .expect_err("already removed");
    assert_eq!(err.kind(), ErrorKind::Precondition);
    let err = controller
        .add_child("fuel_entries", Fields::new())
        .await
        .expect_err("wrong table");
    assert_eq!(err.kind(), ErrorKind::Precondition);
}
