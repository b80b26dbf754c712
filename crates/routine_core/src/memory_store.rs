use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::store::{
    apply_fields, CollectionPath, Document, DocumentPath, DocumentStore, Fields, Filter,
    SnapshotListener, StoreError, StoreResult, Subscription, WriteBatch, WriteOp,
};

pub(crate) type Data = Map<String, Value>;
/// Next state per touched document; `None` means deleted.
pub(crate) type Staged = BTreeMap<DocumentPath, Option<Data>>;
type Collections = BTreeMap<CollectionPath, BTreeMap<String, Data>>;

struct ListenerEntry {
    id: u64,
    collection: CollectionPath,
    filter: Option<Filter>,
    listener: SnapshotListener,
}

struct Inner {
    collections: RwLock<Collections>,
    listeners: RwLock<Vec<ListenerEntry>>,
    next_listener: AtomicU64,
    next_id: AtomicU64,
    clock: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    offline: AtomicBool,
}

/// Document store held entirely in memory. Cloning shares the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// `clock` resolves server timestamps.
    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(BTreeMap::new()),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                next_id: AtomicU64::new(0),
                clock: Box::new(clock),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// While offline every write fails with [`StoreError::Unavailable`]. Reads keep working.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn get(&self, path: &DocumentPath) -> Option<Data> {
        self.inner
            .collections
            .read()
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
            .cloned()
    }

    pub fn documents(&self, collection: &CollectionPath) -> Vec<Document> {
        self.snapshot(collection, None)
    }

    pub fn collections(&self) -> Vec<CollectionPath> {
        self.inner.collections.read().keys().cloned().collect()
    }

    /// Installs the given state for one document, bypassing write checks.
    /// Returns `false` when nothing changed, in which case no listener fires.
    pub fn replace_document(&self, path: &DocumentPath, data: Option<Data>) -> bool {
        {
            let mut collections = self.inner.collections.write();
            let docs = collections.entry(path.collection.clone()).or_default();
            let changed = match &data {
                Some(data) => docs.get(&path.id) != Some(data),
                None => docs.contains_key(&path.id),
            };
            if !changed {
                return false;
            }
            match data {
                Some(data) => {
                    docs.insert(path.id.clone(), data);
                }
                None => {
                    docs.remove(&path.id);
                }
            }
        }
        self.publish(&path.collection);
        true
    }

    pub fn generate_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        let counter = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{:016x}{:04x}", nanos, counter & 0xffff)
    }

    fn timestamp(&self) -> String {
        (self.inner.clock)().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    /// Applies every op against a staged overlay and only then installs the
    /// result, so a failing op leaves the store untouched.
    fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let timestamp = self.preflight(&ops)?;
        let staged = {
            let mut collections = self.inner.collections.write();
            let staged = stage_ops(&collections, ops, &timestamp)?;
            install_staged(&mut collections, &staged);
            staged
        };
        self.publish_staged(&staged);
        Ok(())
    }

    /// Resolves the ops into the document states they would produce without
    /// changing anything. Pair with [`MemoryStore::install`].
    pub(crate) fn stage(&self, ops: Vec<WriteOp>) -> StoreResult<Staged> {
        let timestamp = self.preflight(&ops)?;
        stage_ops(&self.inner.collections.read(), ops, &timestamp)
    }

    pub(crate) fn install(&self, staged: &Staged) {
        install_staged(&mut self.inner.collections.write(), staged);
        self.publish_staged(staged);
    }

    fn preflight(&self, ops: &[WriteOp]) -> StoreResult<String> {
        self.ensure_online()?;
        for op in ops {
            op.path().validate()?;
        }
        Ok(self.timestamp())
    }

    fn publish_staged(&self, staged: &Staged) {
        let changed: BTreeSet<&CollectionPath> = staged.keys().map(|path| &path.collection).collect();
        for collection in changed {
            self.publish(collection);
        }
    }

    fn snapshot(&self, collection: &CollectionPath, filter: Option<&Filter>) -> Vec<Document> {
        self.inner
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(id, _)| filter.map_or(true, |filter| filter.matches(id)))
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn publish(&self, collection: &CollectionPath) {
        let targets: Vec<(Option<Filter>, SnapshotListener)> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|entry| &entry.collection == collection)
            .map(|entry| (entry.filter.clone(), entry.listener.clone()))
            .collect();
        for (filter, listener) in targets {
            let docs = self.snapshot(collection, filter.as_ref());
            listener(&docs);
        }
    }
}

fn stage_ops(collections: &Collections, ops: Vec<WriteOp>, timestamp: &str) -> StoreResult<Staged> {
    let mut staged = Staged::new();
    for op in ops {
        let path = op.path().clone();
        let current: Option<Data> = match staged.get(&path) {
            Some(next) => next.clone(),
            None => collections
                .get(&path.collection)
                .and_then(|docs| docs.get(&path.id))
                .cloned(),
        };
        let next = match op {
            WriteOp::Set { fields, merge, .. } => Some(apply_fields(current.as_ref(), &fields, merge, timestamp)),
            WriteOp::Update { fields, .. } => {
                let Some(existing) = current.as_ref() else {
                    return Err(StoreError::NotFound(path.to_string()));
                };
                Some(apply_fields(Some(existing), &fields, true, timestamp))
            }
            WriteOp::Delete { .. } => None,
        };
        staged.insert(path, next);
    }
    Ok(staged)
}

fn install_staged(collections: &mut Collections, staged: &Staged) {
    for (path, data) in staged {
        let docs = collections.entry(path.collection.clone()).or_default();
        match data {
            Some(data) => {
                docs.insert(path.id.clone(), data.clone());
            }
            None => {
                docs.remove(&path.id);
            }
        }
    }
}

fn remove_listener(inner: &Weak<Inner>, id: u64) {
    if let Some(inner) = inner.upgrade() {
        inner.listeners.write().retain(|entry| entry.id != id);
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe(
        &self,
        collection: &CollectionPath,
        filter: Option<Filter>,
        listener: SnapshotListener,
    ) -> StoreResult<Subscription> {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push(ListenerEntry {
            id,
            collection: collection.clone(),
            filter: filter.clone(),
            listener: listener.clone(),
        });
        listener(&self.snapshot(collection, filter.as_ref()));

        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || remove_listener(&weak, id)))
    }

    fn set(&self, path: &DocumentPath, fields: Fields, merge: bool) -> StoreResult<()> {
        self.apply(vec![WriteOp::Set {
            path: path.clone(),
            fields,
            merge,
        }])
    }

    fn update(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()> {
        self.apply(vec![WriteOp::Update {
            path: path.clone(),
            fields,
        }])
    }

    fn delete(&self, path: &DocumentPath) -> StoreResult<()> {
        self.apply(vec![WriteOp::Delete { path: path.clone() }])
    }

    fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<String> {
        let id = self.generate_id();
        self.apply(vec![WriteOp::Set {
            path: collection.doc(id.clone()),
            fields,
            merge: false,
        }])?;
        Ok(id)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.apply(batch.into_ops())
    }
}
