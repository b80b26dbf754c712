use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde_json::Value;
use walkdir::WalkDir;

use crate::memory_store::{Data, MemoryStore, Staged};
use crate::store::{
    CollectionPath, DocumentPath, DocumentStore, Fields, Filter, SnapshotListener, StoreError,
    StoreResult, Subscription, WriteBatch, WriteOp,
};

/// Last state this process wrote for each document, `None` for a removal.
type Persisted = Mutex<BTreeMap<DocumentPath, Option<Data>>>;

/// Documents stored as `<root>/<collection>/<id>.json`, mirrored in memory.
///
/// A write is staged, flushed file by file and only then installed in memory,
/// so subscribers never see a state that failed to reach disk. When one file of
/// a batch fails, the files already written are put back.
pub struct FileStore {
    root: PathBuf,
    memory: MemoryStore,
    persisted: Arc<Persisted>,
    writes: Mutex<()>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_memory(root, MemoryStore::new())
    }

    pub fn with_memory(root: impl AsRef<Path>, memory: MemoryStore) -> StoreResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = fs::canonicalize(root.as_ref())?;
        let store = Self {
            root,
            memory,
            persisted: Arc::new(Mutex::new(BTreeMap::new())),
            writes: Mutex::new(()),
            watcher: Mutex::new(None),
        };
        store.reload_all()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Re-reads every document under the root and drops ones whose file is gone.
    pub fn reload_all(&self) -> StoreResult<()> {
        let mut seen: BTreeSet<DocumentPath> = BTreeSet::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = document_path(&self.root, entry.path()) else {
                continue;
            };
            match read_document(entry.path()) {
                Ok(data) => {
                    self.memory.replace_document(&path, Some(data));
                    seen.insert(path);
                }
                Err(err) => {
                    tracing::warn!(file = %entry.path().display(), %err, "skipping unreadable document");
                }
            }
        }
        for collection in self.memory.collections() {
            for doc in self.memory.documents(&collection) {
                let path = collection.doc(doc.id);
                if !seen.contains(&path) {
                    self.memory.replace_document(&path, None);
                }
            }
        }
        Ok(())
    }

    /// Starts publishing edits made to the files by other processes.
    pub fn watch(&self) -> StoreResult<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }
        let root = self.root.clone();
        let memory = self.memory.clone();
        let persisted = Arc::clone(&self.persisted);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    tracing::debug!(?event, "filesystem change detected");
                    for file in &event.paths {
                        reload_file(&root, &memory, &persisted, file);
                    }
                }
                Err(err) => tracing::warn!(%err, "file watcher error"),
            }
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        *slot = Some(watcher);
        Ok(())
    }

    pub fn file_path(&self, path: &DocumentPath) -> PathBuf {
        let mut file = self.root.clone();
        for segment in path.collection.as_str().split('/') {
            file.push(segment);
        }
        file.push(format!("{}.json", path.id));
        file
    }

    fn write_through(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let _serial = self.writes.lock();
        let staged = self.memory.stage(ops)?;
        self.persist(&staged)?;
        self.memory.install(&staged);
        Ok(())
    }

    fn persist(&self, staged: &Staged) -> StoreResult<()> {
        let mut written: Vec<&DocumentPath> = Vec::new();
        for (path, data) in staged {
            if let Err(err) = self.write_file(path, data.as_ref()) {
                self.restore(&written);
                return Err(err);
            }
            written.push(path);
        }
        Ok(())
    }

    /// Puts back the in-memory state of documents a failed batch already wrote.
    fn restore(&self, written: &[&DocumentPath]) {
        for path in written {
            let previous = self.memory.get(path);
            if let Err(err) = self.write_file(path, previous.as_ref()) {
                tracing::warn!(%path, %err, "could not restore document after failed write");
            }
        }
    }

    fn write_file(&self, path: &DocumentPath, data: Option<&Data>) -> StoreResult<()> {
        let file = self.file_path(path);
        match data {
            Some(data) => write_atomic(&file, data)?,
            None => {
                if file.exists() {
                    fs::remove_file(&file)?;
                }
            }
        }
        self.persisted.lock().insert(path.clone(), data.cloned());
        Ok(())
    }
}

impl DocumentStore for FileStore {
    fn subscribe(
        &self,
        collection: &CollectionPath,
        filter: Option<Filter>,
        listener: SnapshotListener,
    ) -> StoreResult<Subscription> {
        self.memory.subscribe(collection, filter, listener)
    }

    fn set(&self, path: &DocumentPath, fields: Fields, merge: bool) -> StoreResult<()> {
        self.write_through(vec![WriteOp::Set {
            path: path.clone(),
            fields,
            merge,
        }])
    }

    fn update(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()> {
        self.write_through(vec![WriteOp::Update {
            path: path.clone(),
            fields,
        }])
    }

    fn delete(&self, path: &DocumentPath) -> StoreResult<()> {
        self.write_through(vec![WriteOp::Delete { path: path.clone() }])
    }

    fn add(&self, collection: &CollectionPath, fields: Fields) -> StoreResult<String> {
        let id = self.memory.generate_id();
        self.write_through(vec![WriteOp::Set {
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
        self.write_through(batch.into_ops())
    }
}

/// Applies the current content of `file` to memory. Content equal to what
/// this process last wrote there is skipped; the writer installs it itself.
fn reload_file(root: &Path, memory: &MemoryStore, persisted: &Persisted, file: &Path) -> bool {
    let Some(path) = document_path(root, file) else {
        return false;
    };
    let data = if file.exists() {
        match read_document(file) {
            Ok(data) => Some(data),
            Err(err) => {
                tracing::warn!(file = %file.display(), %err, "ignoring unreadable document");
                return false;
            }
        }
    } else {
        None
    };
    if persisted.lock().get(&path) == Some(&data) {
        tracing::trace!(%path, "skipping our own write");
        return false;
    }
    let changed = memory.replace_document(&path, data);
    if changed {
        tracing::debug!(%path, "document reloaded from disk");
    }
    changed
}

/// Maps `<root>/a/b/<id>.json` to collection `a/b`, document `<id>`.
fn document_path(root: &Path, file: &Path) -> Option<DocumentPath> {
    if file.extension().and_then(|ext| ext.to_str()) != Some("json") {
        return None;
    }
    let id = file.file_stem()?.to_str()?;
    if id.starts_with('.') {
        return None;
    }
    let relative = file.parent()?.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?.to_string()),
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(CollectionPath::new(segments.join("/")).doc(id))
}

fn read_document(file: &Path) -> StoreResult<Data> {
    let raw = fs::read_to_string(file)?;
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(data) => Ok(data),
        _ => Err(StoreError::InvalidPath(file.display().to_string())),
    }
}

fn write_atomic(file: &Path, data: &Data) -> StoreResult<()> {
    let parent = file
        .parent()
        .ok_or_else(|| StoreError::InvalidPath(file.display().to_string()))?;
    fs::create_dir_all(parent)?;
    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StoreError::InvalidPath(file.display().to_string()))?;
    let temp = parent.join(format!(".{name}.tmp"));
    {
        let mut handle = fs::File::create(&temp)?;
        handle.write_all(&serde_json::to_vec_pretty(data)?)?;
        handle.sync_all()?;
    }
    fs::rename(&temp, file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn name(value: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::of(value));
        fields
    }

    #[test]
    fn persists_and_reloads_documents() {
        let temp = tempdir().expect("tempdir");
        let habits = CollectionPath::new("artifacts/app/users/u1/habits");

        let id = {
            let store = FileStore::open(temp.path()).expect("open store");
            let id = store.add(&habits, name("Read")).expect("add");
            store.set(&habits.doc("h2"), name("Walk"), false).expect("set");
            store.delete(&habits.doc("h2")).expect("delete");
            assert!(store.file_path(&habits.doc(id.clone())).exists());
            assert!(!store.file_path(&habits.doc("h2")).exists());
            id
        };

        let reopened = FileStore::open(temp.path()).expect("reopen");
        let docs = reopened.memory().documents(&habits);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert_eq!(docs[0].data["name"], json!("Read"));
    }

    #[test]
    fn reload_picks_up_external_edits_and_skips_temp_files() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        let groups = CollectionPath::new("u/routine_groups");
        store.set(&groups.doc("g1"), name("Morning"), false).unwrap();

        let file = store.file_path(&groups.doc("g1"));
        fs::write(&file, r#"{"name": "Evening"}"#).unwrap();
        fs::write(file.with_file_name(".g2.json.tmp"), "{}").unwrap();
        fs::write(file.with_file_name("broken.json"), "not json").unwrap();
        store.reload_all().unwrap();

        let docs = store.memory().documents(&groups);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].data["name"], json!("Evening"));

        fs::remove_file(&file).unwrap();
        store.reload_all().unwrap();
        assert!(store.memory().documents(&groups).is_empty());
    }

    #[test]
    fn failed_disk_write_leaves_memory_untouched() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        let habits = CollectionPath::new("u/habits");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _subscription = store
            .subscribe(
                &habits,
                None,
                Arc::new(move |_: &[crate::store::Document]| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        fs::create_dir_all(temp.path().join("u")).unwrap();
        fs::write(temp.path().join("u").join("habits"), "not a directory").unwrap();
        assert!(store.set(&habits.doc("a"), name("Read"), false).is_err());
        assert!(store.memory().get(&habits.doc("a")).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        fs::remove_file(temp.path().join("u").join("habits")).unwrap();
        store.set(&habits.doc("a"), name("Read"), false).unwrap();
        assert_eq!(store.memory().get(&habits.doc("a")).unwrap()["name"], json!("Read"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_batch_puts_back_files_already_written() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        let kept = CollectionPath::new("a/ok").doc("doc1");
        let blocked = CollectionPath::new("b/blocked").doc("doc2");
        store.set(&kept, name("Old"), false).unwrap();

        fs::create_dir_all(temp.path().join("b")).unwrap();
        fs::write(temp.path().join("b").join("blocked"), "").unwrap();
        let mut batch = WriteBatch::new();
        batch.set(kept.clone(), name("New"), false).set(blocked.clone(), name("Other"), false);
        assert!(store.commit(batch).is_err());

        let on_disk = read_document(&store.file_path(&kept)).unwrap();
        assert_eq!(on_disk["name"], json!("Old"));
        assert_eq!(store.memory().get(&kept).unwrap()["name"], json!("Old"));
        assert!(store.memory().get(&blocked).is_none());
    }

    #[test]
    fn watcher_skips_content_this_store_wrote() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        let path = CollectionPath::new("u/routine_groups").doc("g1");
        store.set(&path, name("Morning"), false).unwrap();
        store.set(&path, name("Evening"), false).unwrap();
        let file = store.file_path(&path);

        // Memory lagging behind our own write must not be overwritten by its echo.
        store.memory().replace_document(&path, None);
        assert!(!reload_file(&store.root, &store.memory, &store.persisted, &file));
        assert!(store.memory().get(&path).is_none());

        fs::write(&file, r#"{"name": "Night"}"#).unwrap();
        assert!(reload_file(&store.root, &store.memory, &store.persisted, &file));
        assert_eq!(store.memory().get(&path).unwrap()["name"], json!("Night"));
    }

    #[test]
    fn maps_files_back_to_document_paths() {
        let root = Path::new("/data");
        let path = document_path(root, Path::new("/data/a/b/doc1.json")).unwrap();
        assert_eq!(path.collection.as_str(), "a/b");
        assert_eq!(path.id, "doc1");
        assert!(document_path(root, Path::new("/data/top.json")).is_none());
        assert!(document_path(root, Path::new("/data/a/.doc1.json.tmp")).is_none());
        assert!(document_path(root, Path::new("/data/a/notes.txt")).is_none());
    }
}
