use std::cell::RefCell;
use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::Utc;
use optrack_core::Record;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{LockOptions, RecordSet, StoreError, StoreLock};

/// Handle to the records of one kind.
///
/// `write` is the critical section: it loads, runs the closure and persists
/// the result only when the closure succeeds and changed something. A failing
/// closure leaves the store exactly as it was.
pub trait Store<R: Record> {
    fn read<T>(&self, f: impl FnOnce(&RecordSet<R>) -> T) -> Result<T, StoreError>;

    fn write<T>(
        &self,
        f: impl FnOnce(&mut RecordSet<R>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError>;

    /// Sets an unreadable backing document aside; see [`JsonStore::quarantine_if_corrupt`].
    fn repair(&self) -> Result<Option<PathBuf>, StoreError> {
        Ok(None)
    }
}

/// File-backed store: `<data_dir>/<kind>.json` plus a sibling `.lock` file.
#[derive(Debug, Clone)]
pub struct JsonStore<R> {
    path: PathBuf,
    lock_path: PathBuf,
    options: LockOptions,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> JsonStore<R> {
    pub fn open(data_dir: impl AsRef<Path>, options: LockOptions) -> Self {
        let path = data_dir
            .as_ref()
            .join(format!("{}.json", R::KIND.file_stem()));
        Self::at_path(path, options)
    }

    pub fn at_path(path: impl Into<PathBuf>, options: LockOptions) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            options,
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// A missing file is an empty store; anything unparsable is corrupt.
    pub fn load(&self) -> Result<RecordSet<R>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(store = %self.path.display(), "no store file yet, starting empty");
                return Ok(RecordSet::new());
            }
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                return Err(StoreError::corrupt(&self.path, "file is not valid UTF-8"));
            }
            Err(source) => return Err(StoreError::io(&self.path, source)),
        };
        RecordSet::from_json(&text).map_err(|reason| StoreError::corrupt(&self.path, reason))
    }

    pub fn save(&self, set: &RecordSet<R>) -> Result<(), StoreError> {
        let text = set
            .to_json()
            .map_err(|err| StoreError::corrupt(&self.path, format!("serializing records: {err}")))?;
        write_atomic(&self.path, text.as_bytes())?;
        debug!(store = %self.path.display(), records = set.len(), "store saved");
        Ok(())
    }

    /// Moves an unreadable store file aside so the next write starts empty.
    /// Returns the new location, or `None` when the store loads fine.
    pub fn quarantine_if_corrupt(&self) -> Result<Option<PathBuf>, StoreError> {
        self.ensure_parent()?;
        let _lock = StoreLock::acquire(&self.lock_path, &self.options)?;
        match self.load() {
            Ok(_) => Ok(None),
            Err(StoreError::Corrupt { reason, .. }) => {
                let mut aside = self.path.clone().into_os_string();
                aside.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%SZ")));
                let aside = PathBuf::from(aside);
                fs::rename(&self.path, &aside).map_err(|source| StoreError::io(&self.path, source))?;
                warn!(
                    store = %self.path.display(),
                    moved_to = %aside.display(),
                    %reason,
                    "corrupt store quarantined"
                );
                Ok(Some(aside))
            }
            Err(err) => Err(err),
        }
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|source| StoreError::io(parent, source))
            }
            _ => Ok(()),
        }
    }
}

impl<R: Record> Store<R> for JsonStore<R> {
    /// Reads need no lock: saves replace the file by rename, so a reader
    /// always sees one complete document.
    fn read<T>(&self, f: impl FnOnce(&RecordSet<R>) -> T) -> Result<T, StoreError> {
        let set = self.load()?;
        Ok(f(&set))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut RecordSet<R>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.ensure_parent()?;
        let _lock = StoreLock::acquire(&self.lock_path, &self.options)?;
        let mut set = self.load()?;
        let out = f(&mut set)?;
        if set.is_dirty() {
            self.save(&set)?;
        }
        Ok(out)
    }

    fn repair(&self) -> Result<Option<PathBuf>, StoreError> {
        self.quarantine_if_corrupt()
    }
}

/// Write bytes to `path` via a temp file in the same directory and a rename,
/// so readers never observe a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|source| StoreError::io(&parent, source))?;

    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .map_err(|source| StoreError::io(&temp_path, source))?;
    let written = file
        .write_all(bytes)
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_all());
    drop(file);
    if let Err(source) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::io(&temp_path, source));
    }

    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::io(path, source));
    }
    Ok(())
}

/// Store kept entirely in memory, with the same commit-on-success semantics.
#[derive(Debug)]
pub struct MemoryStore<R> {
    set: RefCell<RecordSet<R>>,
}

impl<R: Record> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> MemoryStore<R> {
    pub fn new() -> Self {
        Self::with_records(RecordSet::new())
    }

    pub fn with_records(set: RecordSet<R>) -> Self {
        Self {
            set: RefCell::new(set),
        }
    }

    pub fn snapshot(&self) -> RecordSet<R> {
        self.set.borrow().clone()
    }
}

impl<R: Record> Store<R> for MemoryStore<R> {
    fn read<T>(&self, f: impl FnOnce(&RecordSet<R>) -> T) -> Result<T, StoreError> {
        Ok(f(&self.set.borrow()))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut RecordSet<R>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut working = self.set.borrow().clone();
        let out = f(&mut working)?;
        if working.is_dirty() {
            *self.set.borrow_mut() = working;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use optrack_core::{Opportunity, OpportunityDraft, Priority, Prospect, ProspectDraft};
    use std::time::Duration;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn fast_options() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(100),
            ..LockOptions::default()
        }
    }

    fn draft(name: &str) -> OpportunityDraft {
        OpportunityDraft {
            name: name.into(),
            url: Some(format!("https://{}.example", name.to_lowercase())),
            priority: Some(Priority::High),
            ..Default::default()
        }
    }

    #[test]
    fn missing_file_loads_empty_and_lock_path_is_sibling() {
        let dir = tempdir().expect("tempdir");
        let store = JsonStore::<Opportunity>::open(dir.path(), fast_options());
        assert_eq!(store.path(), dir.path().join("opportunities.json"));
        assert_eq!(store.lock_path(), dir.path().join("opportunities.json.lock"));
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn write_persists_and_releases_lock() {
        let dir = tempdir().expect("tempdir");
        let store = JsonStore::<Opportunity>::open(dir.path().join("nested"), fast_options());
        let id = store
            .write(|set| Ok(set.upsert(draft("Devcon"), now())?.record.id))
            .expect("write");

        assert!(!store.lock_path().exists());
        let reloaded = store.load().expect("reload");
        assert_eq!(reloaded.get(id).expect("record").name, "Devcon");
        assert_eq!(reloaded.last_updated(), Some(now()));
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = JsonStore::<Prospect>::open(dir.path(), fast_options());
        fs::write(
            store.path(),
            r#"{
              "schema_version": 1,
              "next_id": 2,
              "stats": {"total": 1, "contacted": 0},
              "records": [{
                "id": 1, "name": "Ana", "role": "CEO", "company": "Acme",
                "email": null, "telegram_handle": "ana", "notes": "", "priority": "high",
                "status": "contacted", "created_at": "2026-04-01T00:00:00Z",
                "updated_at": "2026-04-01T00:00:00Z", "linkedin": "in/ana"
              }]
            }"#,
        )
        .expect("seed");

        let loaded = store.load().expect("load");
        store.save(&loaded).expect("save");
        let again = store.load().expect("reload");
        assert_eq!(loaded, again);
        assert_eq!(again.extra()["stats"]["total"], 1);
        assert_eq!(again.records()[0].extra["linkedin"], "in/ana");

        store
            .write(|set| {
                set.upsert(
                    ProspectDraft {
                        name: "Bo".into(),
                        ..Default::default()
                    },
                    now(),
                )
            })
            .expect("write");
        let after = store.load().expect("after write");
        assert_eq!(after.extra()["stats"]["contacted"], 0);
        assert_eq!(after.records()[0].extra["linkedin"], "in/ana");
    }

    #[test]
    fn corrupt_file_is_reported_and_left_untouched() {
        let dir = tempdir().expect("tempdir");
        let store = JsonStore::<Opportunity>::open(dir.path(), fast_options());
        fs::write(store.path(), "{\"records\": [").expect("seed");

        let err = store
            .write(|set| set.upsert(draft("Devcon"), now()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert_eq!(fs::read_to_string(store.path()).expect("read"), "{\"records\": [");
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn failing_closure_leaves_file_byte_identical() {
        let dir = tempdir().expect("tempdir");
        let store = JsonStore::<Opportunity>::open(dir.path(), fast_options());
        store
            .write(|set| set.upsert(draft("Devcon"), now()))
            .expect("seed write");
        let before = fs::read(store.path()).expect("before");

        let err = store
            .write(|set| {
                set.upsert(draft("Zuzalu"), now())?;
                set.set_status(1, "won-ish", now()).map(|_| ())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(_)));
        assert_eq!(fs::read(store.path()).expect("after"), before);
    }

    #[test]
    fn held_lock_makes_writers_busy() {
        let dir = tempdir().expect("tempdir");
        let store = JsonStore::<Opportunity>::open(dir.path(), fast_options());
        let _held = StoreLock::acquire(store.lock_path(), &fast_options()).expect("hold");
        let err = store
            .write(|set| set.upsert(draft("Devcon"), now()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Busy { .. }));
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_store_can_be_quarantined() {
        let dir = tempdir().expect("tempdir");
        let store = JsonStore::<Opportunity>::open(dir.path(), fast_options());
        assert_eq!(store.quarantine_if_corrupt().expect("healthy"), None);

        fs::write(store.path(), "not json").expect("seed");
        let aside = store
            .quarantine_if_corrupt()
            .expect("quarantine")
            .expect("moved");
        assert!(aside.exists());
        assert!(!store.path().exists());
        assert!(store.load().expect("empty again").is_empty());
    }

    #[test]
    fn memory_store_discards_failed_writes() {
        let store = MemoryStore::<Opportunity>::new();
        store
            .write(|set| set.upsert(draft("Devcon"), now()))
            .expect("write");
        let _ = store.write(|set| {
            set.upsert(draft("Zuzalu"), now())?;
            set.delete(42, now())
        });
        assert_eq!(store.read(|set| set.len()).expect("read"), 1);
    }
}
