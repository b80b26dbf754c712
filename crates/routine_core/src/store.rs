use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document `{0}` does not exist")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid path `{0}`")]
    InvalidPath(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Watch(#[from] notify::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl DocumentPath {
    pub fn validate(&self) -> StoreResult<()> {
        if self.id.is_empty() || self.id.contains('/') || self.id.starts_with('.') {
            return Err(StoreError::InvalidPath(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Value written to a single field. The sentinels are resolved by the store at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    ServerTimestamp,
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
}

impl FieldValue {
    pub fn of(value: impl Into<Value>) -> Self {
        FieldValue::Value(value.into())
    }

    pub fn null() -> Self {
        FieldValue::Value(Value::Null)
    }

    /// Applies the value on top of `current`, which is `None` for a missing field.
    pub fn resolve(&self, current: Option<&Value>, timestamp: &str) -> Value {
        match self {
            FieldValue::Value(value) => value.clone(),
            FieldValue::ServerTimestamp => Value::String(timestamp.to_string()),
            FieldValue::ArrayUnion(values) => {
                let mut items = current
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                Value::Array(items)
            }
            FieldValue::ArrayRemove(values) => {
                let items = current
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter(|item| !values.contains(item))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                Value::Array(items)
            }
        }
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

/// Applies `fields` to a document, creating it when `current` is `None`.
pub fn apply_fields(current: Option<&Map<String, Value>>, fields: &Fields, merge: bool, timestamp: &str) -> Map<String, Value> {
    let mut data = match (current, merge) {
        (Some(existing), true) => existing.clone(),
        _ => Map::new(),
    };
    for (name, value) in fields {
        let resolved = value.resolve(data.get(name), timestamp);
        data.insert(name.clone(), resolved);
    }
    data
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    /// Decodes into a typed record, exposing the document id as `id_field`.
    pub fn decode<T: DeserializeOwned>(&self, id_field: &str) -> StoreResult<T> {
        let mut data = self.data.clone();
        data.entry(id_field.to_string())
            .or_insert_with(|| Value::String(self.id.clone()));
        Ok(serde_json::from_value(Value::Object(data))?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Documents whose id sorts at or after the bound.
    DocumentIdAtLeast(String),
}

impl Filter {
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Filter::DocumentIdAtLeast(bound) => id >= bound.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        path: DocumentPath,
        fields: Fields,
        merge: bool,
    },
    Update {
        path: DocumentPath,
        fields: Fields,
    },
    Delete {
        path: DocumentPath,
    },
}

impl WriteOp {
    pub fn path(&self) -> &DocumentPath {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Update { path, .. } | WriteOp::Delete { path } => path,
        }
    }
}

/// Writes committed together: either all apply or none do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocumentPath, fields: Fields, merge: bool) -> &mut Self {
        self.ops.push(WriteOp::Set { path, fields, merge });
        self
    }

    pub fn update(&mut self, path: DocumentPath, fields: Fields) -> &mut Self {
        self.ops.push(WriteOp::Update { path, fields });
        self
    }

    pub fn delete(&mut self, path: DocumentPath) -> &mut Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

pub type SnapshotListener = Arc<dyn Fn(&[Document]) + Send + Sync>;

/// Keeps a live feed open. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Remote document database as seen by the core.
///
/// Each single-document call is atomic on its own; [`DocumentStore::commit`]
/// is atomic across documents. Listeners receive the complete matching
/// collection immediately on subscribe and again after every change.
pub trait DocumentStore: Send + Sync {
    fn subscribe(
        &self,
        collection: &CollectionPath,
        filter: Option<Filter>,
        listener: SnapshotListener,
    ) -> StoreResult<Subscription>;

    fn set(&self, path: &DocumentPath, fields: Fields, merge: bool) -> StoreResult<()>;

    /// Fails with [`StoreError::NotFound`] when the document is missing.
    fn update(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()>;

    fn delete(&self, path: &DocumentPath) -> StoreResult<()>;

    /// Creates a document under a generated id and returns the id.
    fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<String>;

    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}
