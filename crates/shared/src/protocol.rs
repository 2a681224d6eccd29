use std::collections::BTreeMap;

use serde::{ser::SerializeSeq, Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::domain::{DocName, DocStatus, Fields};

/// `/api/resource` responses wrap their payload in `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

/// `/api/method` responses wrap their payload in `message`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEnvelope<T> {
    pub message: T,
}

/// Identity and status echoed back by the server after a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub name: DocName,
    #[serde(rename = "docstatus", default)]
    pub doc_status: DocStatus,
    /// Server timestamp of this write; the next write must echo it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    /// Server names of child rows per table, in the order they were sent.
    #[serde(skip)]
    pub child_names: BTreeMap<String, Vec<String>>,
}

impl SaveOutcome {
    pub fn new(name: impl Into<DocName>, doc_status: DocStatus) -> Self {
        Self {
            name: name.into(),
            doc_status,
            modified: None,
            child_names: BTreeMap::new(),
        }
    }

    pub fn with_modified(mut self, modified: impl Into<String>) -> Self {
        self.modified = Some(modified.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    pub doc_status: DocStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmendOutcome {
    pub name: DocName,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    pub doc: Fields,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelRequest {
    pub doctype: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "like")]
    Like,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Like => "like",
        }
    }
}

/// One `[field, op, value]` triple of a list filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Like,
            value: Value::String(pattern.into()),
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.field)?;
        seq.serialize_element(self.op.as_str())?;
        seq.serialize_element(&self.value)?;
        seq.end()
    }
}
