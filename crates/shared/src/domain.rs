use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Field bag used for document and child-row payloads.
pub type Fields = Map<String, Value>;

macro_rules! name_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

name_newtype!(DocName);

const DOCUMENT_META_KEYS: &[&str] = &["name", "doctype", "docstatus", "amended_from"];
const CHILD_META_KEYS: &[&str] = &[
    "name",
    "doctype",
    "docstatus",
    "parent",
    "parentfield",
    "parenttype",
    "owner",
    "creation",
    "modified",
    "modified_by",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("document payload must be a JSON object")]
    NotAnObject,
    #[error("unknown docstatus value {0}")]
    InvalidDocStatus(i64),
    #[error("child table `{0}` must be an array of objects")]
    InvalidChildTable(String),
    #[error("unknown document type `{0}`")]
    UnknownDocumentType(String),
    #[error("unknown lookup entity `{0}`")]
    UnknownEntity(String),
}

/// Frappe `docstatus`: 0 draft, 1 submitted, 2 cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DocStatus {
    #[default]
    Draft,
    Submitted,
    Cancelled,
}

impl DocStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Draft => 0,
            Self::Submitted => 1,
            Self::Cancelled => 2,
        }
    }
}

impl TryFrom<i64> for DocStatus {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Draft),
            1 => Ok(Self::Submitted),
            2 => Ok(Self::Cancelled),
            other => Err(DomainError::InvalidDocStatus(other)),
        }
    }
}

impl From<DocStatus> for i64 {
    fn from(value: DocStatus) -> Self {
        value.code()
    }
}

impl fmt::Display for DocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Transactional document kinds handled by the lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    MaintenanceLog,
    RefuelingRecord,
    UtilizationReport,
}

impl DocumentType {
    pub const ALL: [DocumentType; 3] = [
        Self::MaintenanceLog,
        Self::RefuelingRecord,
        Self::UtilizationReport,
    ];

    /// Backend doctype name used in resource URLs.
    pub fn doctype(self) -> &'static str {
        match self {
            Self::MaintenanceLog => "Vehicle Maintenance Log",
            Self::RefuelingRecord => "Vehicle Refueling Record",
            Self::UtilizationReport => "Vehicle Utilization Report",
        }
    }

    /// Wire names of the child tables carried by this document type.
    pub fn child_tables(self) -> &'static [&'static str] {
        match self {
            Self::MaintenanceLog => &[
                "parts_used",
                "lubes_used",
                "problems",
                "work_done",
                "pending_jobs",
            ],
            Self::RefuelingRecord => &["fuel_entries"],
            Self::UtilizationReport => &["trips"],
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.doctype())
    }
}

impl FromStr for DocumentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maintenance" | "maintenance_log" => Ok(Self::MaintenanceLog),
            "refueling" | "refueling_record" => Ok(Self::RefuelingRecord),
            "utilization" | "utilization_report" => Ok(Self::UtilizationReport),
            _ => Self::ALL
                .into_iter()
                .find(|doc_type| doc_type.doctype().eq_ignore_ascii_case(s.trim()))
                .ok_or_else(|| DomainError::UnknownDocumentType(s.to_string())),
        }
    }
}

/// Whether a child row is already known to the server.
///
/// Set when the row is created and never derived from the shape of its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum RowIdentity {
    Local,
    Persisted { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub local_id: Uuid,
    pub identity: RowIdentity,
    pub fields: Fields,
}

impl ChildEntry {
    pub fn new(fields: Fields) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            identity: RowIdentity::Local,
            fields,
        }
    }

    pub fn from_server(name: impl Into<String>, fields: Fields) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            identity: RowIdentity::Persisted { name: name.into() },
            fields,
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self.identity, RowIdentity::Persisted { .. })
    }

    pub fn server_name(&self) -> Option<&str> {
        match &self.identity {
            RowIdentity::Persisted { name } => Some(name),
            RowIdentity::Local => None,
        }
    }

    /// Drops the server identity so the row is inserted afresh on the next save.
    pub fn detach(&mut self) {
        self.identity = RowIdentity::Local;
    }

    pub fn to_wire(&self) -> Fields {
        let mut out = self.fields.clone();
        if let RowIdentity::Persisted { name } = &self.identity {
            out.insert("name".to_string(), Value::String(name.clone()));
        }
        out
    }

    fn from_wire(value: Value, table: &str) -> Result<Self, DomainError> {
        let Value::Object(mut row) = value else {
            return Err(DomainError::InvalidChildTable(table.to_string()));
        };
        let name = match row.remove("name") {
            Some(Value::String(name)) if !name.is_empty() => Some(name),
            _ => None,
        };
        for key in CHILD_META_KEYS {
            row.remove(*key);
        }
        Ok(match name {
            Some(name) => Self::from_server(name, row),
            None => Self::new(row),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doc_type: DocumentType,
    pub name: Option<DocName>,
    pub doc_status: DocStatus,
    pub amended_from: Option<DocName>,
    pub fields: Fields,
    pub children: BTreeMap<String, Vec<ChildEntry>>,
}

impl Document {
    pub fn blank(doc_type: DocumentType, defaults: Fields) -> Self {
        let children = doc_type
            .child_tables()
            .iter()
            .map(|table| (table.to_string(), Vec::new()))
            .collect();
        Self {
            doc_type,
            name: None,
            doc_status: DocStatus::Draft,
            amended_from: None,
            fields: defaults,
            children,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }

    /// Parses a full document as returned by `GET /api/resource/{doctype}/{name}`.
    pub fn from_wire(doc_type: DocumentType, value: Value) -> Result<Self, DomainError> {
        let Value::Object(mut raw) = value else {
            return Err(DomainError::NotAnObject);
        };

        let name = match raw.get("name") {
            Some(Value::String(name)) if !name.is_empty() => Some(DocName(name.clone())),
            _ => None,
        };
        let doc_status = match raw.get("docstatus") {
            Some(value) => DocStatus::try_from(value.as_i64().unwrap_or(-1))?,
            None => DocStatus::Draft,
        };
        let amended_from = match raw.get("amended_from") {
            Some(Value::String(from)) if !from.is_empty() => Some(DocName(from.clone())),
            _ => None,
        };
        for key in DOCUMENT_META_KEYS {
            raw.remove(*key);
        }

        let mut children = BTreeMap::new();
        for table in doc_type.child_tables() {
            let rows = match raw.remove(*table) {
                Some(Value::Array(rows)) => rows
                    .into_iter()
                    .map(|row| ChildEntry::from_wire(row, table))
                    .collect::<Result<Vec<_>, _>>()?,
                Some(Value::Null) | None => Vec::new(),
                Some(_) => return Err(DomainError::InvalidChildTable(table.to_string())),
            };
            children.insert(table.to_string(), rows);
        }

        Ok(Self {
            doc_type,
            name,
            doc_status,
            amended_from,
            fields: raw,
            children,
        })
    }

    /// Serializes the document into the shape the resource API accepts on save/submit.
    pub fn to_wire(&self) -> Fields {
        let mut out = self.fields.clone();
        out.insert(
            "doctype".to_string(),
            Value::String(self.doc_type.doctype().to_string()),
        );
        if let Some(name) = &self.name {
            out.insert("name".to_string(), Value::String(name.0.clone()));
        }
        out.insert("docstatus".to_string(), Value::from(self.doc_status.code()));
        if let Some(from) = &self.amended_from {
            out.insert("amended_from".to_string(), Value::String(from.0.clone()));
        }
        for (table, rows) in &self.children {
            out.insert(
                table.clone(),
                Value::Array(
                    rows.iter()
                        .map(|row| Value::Object(row.to_wire()))
                        .collect(),
                ),
            );
        }
        out
    }
}

/// Reference data kinds served by the lookup provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Company,
    Warehouse,
    CostCenter,
    Employee,
    Vehicle,
    Item,
}

impl EntityType {
    pub fn doctype(self) -> &'static str {
        match self {
            Self::Company => "Company",
            Self::Warehouse => "Warehouse",
            Self::CostCenter => "Cost Center",
            Self::Employee => "Employee",
            Self::Vehicle => "Vehicle",
            Self::Item => "Item",
        }
    }

    pub fn display_field(self) -> &'static str {
        match self {
            Self::Company => "company_name",
            Self::Warehouse => "warehouse_name",
            Self::CostCenter => "cost_center_name",
            Self::Employee => "employee_name",
            Self::Vehicle => "license_plate",
            Self::Item => "item_name",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.doctype())
    }
}

impl FromStr for EntityType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "company" => Ok(Self::Company),
            "warehouse" => Ok(Self::Warehouse),
            "cost_center" => Ok(Self::CostCenter),
            "employee" => Ok(Self::Employee),
            "vehicle" => Ok(Self::Vehicle),
            "item" => Ok(Self::Item),
            _ => Err(DomainError::UnknownEntity(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupOption {
    pub name: String,
    pub display: String,
}

impl LookupOption {
    /// Builds an option from a list row; falls back to `name` when the display field is empty.
    pub fn from_row(entity: EntityType, row: &Fields) -> Option<Self> {
        let name = row.get("name")?.as_str()?.to_string();
        let display = row
            .get(entity.display_field())
            .and_then(Value::as_str)
            .filter(|display| !display.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| name.clone());
        Some(Self { name, display })
    }
}
