use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Engine-assigned key of a stored document.
pub type DocId = u64;

// -----------------------
// Values
// -----------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Document(FieldBuffer),
}

impl Value {
    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}

impl From<FieldBuffer> for Value {
    fn from(v: FieldBuffer) -> Self { Value::Document(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// -----------------------
// Documents
// -----------------------

/// Read access to a document: an ordered mapping of field name to value.
///
/// Implemented both by live rows handed out by a result cursor and by the
/// detached [`FieldBuffer`].
pub trait Document {
    fn get_by_field(&self, field: &str) -> Option<&Value>;

    /// Visit every field in order, stopping at the first error.
    fn iterate(&self, f: &mut dyn FnMut(&str, &Value) -> Result<(), EngineError>) -> Result<(), EngineError>;
}

/// Owned, insertion-ordered document. Valid independently of the cursor or
/// transaction it was read from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldBuffer {
    fields: Vec<(String, Value)>,
}

impl FieldBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field without checking for duplicates.
    pub fn add(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    /// Replace the field if present, append it otherwise.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == field) {
            Some((_, v)) => *v = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    pub fn delete(&mut self, field: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(k, _)| k == field)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolve a dotted path (`a.b.0`) through nested documents and arrays.
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        let (head, rest) = path.split_first()?;
        let mut cur = self.get(head)?;
        for seg in rest {
            cur = match cur {
                Value::Document(doc) => doc.get(seg)?,
                Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Set the value at a dotted path, creating intermediate documents as needed.
    pub fn set_path(&mut self, path: &[String], value: Value) -> Result<(), EngineError> {
        let (head, rest) = path
            .split_first()
            .ok_or_else(|| EngineError::InvalidArgument("empty field path".into()))?;
        if rest.is_empty() {
            self.set(head.clone(), value);
            return Ok(());
        }
        if self.get(head).is_none() {
            self.set(head.clone(), Value::Document(FieldBuffer::new()));
        }
        let slot = self
            .fields
            .iter_mut()
            .find(|(k, _)| k == head)
            .map(|(_, v)| v)
            .ok_or_else(|| EngineError::InvalidArgument(format!("field not found: {head}")))?;
        match slot {
            Value::Document(doc) => doc.set_path(rest, value),
            other => Err(EngineError::InvalidArgument(format!(
                "cannot set {} inside {} field {head}",
                rest.join("."),
                other.type_name()
            ))),
        }
    }

    /// Replace the content of the buffer with a copy of `doc`.
    pub fn scan_document(&mut self, doc: &dyn Document) -> Result<(), EngineError> {
        let mut fields = Vec::new();
        doc.iterate(&mut |k, v| {
            fields.push((k.to_string(), v.clone()));
            Ok(())
        })?;
        self.fields = fields;
        Ok(())
    }

    /// Copy `doc` into a new detached buffer.
    pub fn from_document(doc: &dyn Document) -> Result<Self, EngineError> {
        let mut fb = FieldBuffer::new();
        fb.scan_document(doc)?;
        Ok(fb)
    }
}

impl Document for FieldBuffer {
    fn get_by_field(&self, field: &str) -> Option<&Value> {
        self.get(field)
    }

    fn iterate(&self, f: &mut dyn FnMut(&str, &Value) -> Result<(), EngineError>) -> Result<(), EngineError> {
        for (k, v) in &self.fields {
            f(k, v)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FieldBuffer {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

impl From<BTreeMap<String, Value>> for FieldBuffer {
    fn from(map: BTreeMap<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

// -----------------------
// Storage Ports
// -----------------------

/// Owned stream of stored documents. It does not borrow the transaction that
/// produced it, so a cursor can keep reading after handing the transaction back.
pub type DocumentStream = Box<dyn Iterator<Item = Result<(DocId, FieldBuffer), EngineError>> + Send>;

/// A storage engine able to hand out transactions.
pub trait StorageEngine: Send + Sync + 'static {
    /// Start a transaction. Engines allow at most one writer at a time and
    /// either block or fail `begin(true)` while one is active.
    fn begin(&self, writable: bool) -> Result<Box<dyn EngineTransaction>, EngineError>;

    /// Release engine resources. Transactions still open are the caller's problem.
    fn close(&self) -> Result<(), EngineError>;
}

/// One unit of work inside a [`StorageEngine`].
///
/// Commit and rollback are each called at most once by the façade; engines do
/// not need to guard against repeated calls.
pub trait EngineTransaction: Send {
    fn writable(&self) -> bool;
    fn commit(&mut self) -> Result<(), EngineError>;
    fn rollback(&mut self) -> Result<(), EngineError>;

    fn list_tables(&self) -> Result<Vec<String>, EngineError>;
    fn table_exists(&self, name: &str) -> Result<bool, EngineError>;
    fn create_table(&mut self, name: &str) -> Result<(), EngineError>;
    fn drop_table(&mut self, name: &str) -> Result<(), EngineError>;

    fn scan(&self, table: &str) -> Result<DocumentStream, EngineError>;
    fn get(&self, table: &str, id: DocId) -> Result<Option<FieldBuffer>, EngineError>;
    fn insert(&mut self, table: &str, doc: FieldBuffer) -> Result<DocId, EngineError>;
    fn replace(&mut self, table: &str, id: DocId, doc: FieldBuffer) -> Result<(), EngineError>;
    fn delete(&mut self, table: &str, id: DocId) -> Result<(), EngineError>;
}

// -----------------------
// Shared Errors
// -----------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("init error: {0}")]
    Init(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("expected {expected} positional parameters, got {got}")]
    ParamCount { expected: usize, got: usize },
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("transaction is read-only")]
    ReadOnly,
    #[error("transaction already closed")]
    TransactionClosed,
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),
    #[error("document not found")]
    DocumentNotFound,
    #[error("exec error: {0}")]
    Exec(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("storage io: {0}")]
    StorageIo(String),
}

pub fn validate_table_name(s: &str) -> Result<(), EngineError> {
    if s.is_empty() || s.len() > 128 {
        return Err(EngineError::InvalidArgument("table name length".into()));
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EngineError::InvalidArgument("table name charset".into()));
    }
    Ok(())
}
