//! Per-document-type field renaming between the form model and the wire model,
//! plus the client-side submit precondition.

use chrono::NaiveDate;
use serde_json::Value;
use shared::domain::{Document, DocumentType, Fields};

pub trait PayloadMapper: Send + Sync {
    fn to_wire(&self, document: &Document) -> Document;
    fn from_wire(&self, document: Document) -> Document;
    /// Cheap local check run before a submit round trip. `Err` carries the reason.
    fn check_submittable(&self, document: &Document) -> Result<(), String>;
}

/// Table-driven mapper: `(form field, wire field)` pairs plus submit requirements.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapper {
    pub renames: &'static [(&'static str, &'static str)],
    /// Form fields that must hold a value before submit.
    pub required_fields: &'static [&'static str],
    /// At least one row must exist across these child tables before submit.
    pub required_rows_in: &'static [&'static str],
}

const MAINTENANCE_LOG: FieldMapper = FieldMapper {
    renames: &[
        ("vehicle", "license_plate"),
        ("date", "posting_date"),
        ("odometer", "odometer_reading"),
        ("mechanic", "employee"),
        ("workshop", "warehouse"),
    ],
    required_fields: &["vehicle"],
    required_rows_in: &["problems", "work_done", "parts_used", "lubes_used"],
};

const REFUELING_RECORD: FieldMapper = FieldMapper {
    renames: &[
        ("vehicle", "license_plate"),
        ("date", "posting_date"),
        ("odometer", "odometer_reading"),
        ("driver", "employee"),
        ("fuel_station", "warehouse"),
    ],
    required_fields: &["vehicle"],
    required_rows_in: &["fuel_entries"],
};

const UTILIZATION_REPORT: FieldMapper = FieldMapper {
    renames: &[
        ("vehicle", "license_plate"),
        ("driver", "employee"),
        ("period_start", "from_date"),
        ("period_end", "to_date"),
    ],
    required_fields: &["vehicle", "driver"],
    required_rows_in: &["trips"],
};

pub fn mapper_for(doc_type: DocumentType) -> FieldMapper {
    match doc_type {
        DocumentType::MaintenanceLog => MAINTENANCE_LOG,
        DocumentType::RefuelingRecord => REFUELING_RECORD,
        DocumentType::UtilizationReport => UTILIZATION_REPORT,
    }
}

/// Form defaults for a new draft: today's date (or reporting period) and the company.
pub fn blank_defaults(doc_type: DocumentType, today: NaiveDate, company: Option<&str>) -> Fields {
    let today = Value::String(today.format("%Y-%m-%d").to_string());
    let mut fields = Fields::new();
    match doc_type {
        DocumentType::MaintenanceLog | DocumentType::RefuelingRecord => {
            fields.insert("date".to_string(), today);
        }
        DocumentType::UtilizationReport => {
            fields.insert("period_start".to_string(), today.clone());
            fields.insert("period_end".to_string(), today);
        }
    }
    if let Some(company) = company.filter(|company| !company.trim().is_empty()) {
        fields.insert("company".to_string(), Value::String(company.to_string()));
    }
    fields
}

fn rename_keys(fields: &Fields, pairs: impl Iterator<Item = (&'static str, &'static str)>) -> Fields {
    let mut out = fields.clone();
    for (from, to) in pairs {
        if let Some(value) = out.remove(from) {
            out.insert(to.to_string(), value);
        }
    }
    out
}

fn is_populated(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(_) => true,
    }
}

impl PayloadMapper for FieldMapper {
    fn to_wire(&self, document: &Document) -> Document {
        Document {
            fields: rename_keys(&document.fields, self.renames.iter().copied()),
            ..document.clone()
        }
    }

    fn from_wire(&self, mut document: Document) -> Document {
        document.fields = rename_keys(
            &document.fields,
            self.renames.iter().map(|(form, wire)| (*wire, *form)),
        );
        document
    }

    fn check_submittable(&self, document: &Document) -> Result<(), String> {
        let missing: Vec<&str> = self
            .required_fields
            .iter()
            .copied()
            .filter(|field| !is_populated(document.fields.get(*field)))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required field(s): {}", missing.join(", ")));
        }

        let has_rows = self
            .required_rows_in
            .iter()
            .any(|table| document.children.get(*table).is_some_and(|rows| !rows.is_empty()));
        if !self.required_rows_in.is_empty() && !has_rows {
            return Err(format!(
                "add at least one row to {}",
                self.required_rows_in.join(" or ")
            ));
        }
        Ok(())
    }
}
