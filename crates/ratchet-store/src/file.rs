//! JSON snapshot store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::lock::{Mutex, MutexGuard};
use parking_lot::RwLock;
use ratchet_types::{
    AggregationTask, Bar, BarKey, BarSource, DerivedBar, RegistryEntry, Symbol, TaskKey,
    Timeframe, Window, WorkerId,
};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::memory::Snapshot;
use crate::{
    BarStore, MemoryStore, QualityCounters, ReconcilePlanner, ReconcileReport, RegistryStore,
    Result, StoreError, TaskStore, UpsertOutcome,
};

/// Store backend that persists every table to a single JSON file.
///
/// Several processes may share one file. A mutation takes an exclusive lock
/// on a sidecar `.lock` file, applies the change to a copy of the latest
/// snapshot on disk, and swaps the copy in only after it has been written.
/// The file is rewritten through a temporary sibling and a rename, so a
/// crash or a concurrent reader sees either the old or the new snapshot.
/// Reads reload the snapshot whenever the file changed since it was last
/// seen.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    loaded: RwLock<Loaded>,
    /// Serializes this process's mutations.
    writer: Mutex<()>,
}

/// Tables as of one version of the file.
#[derive(Debug, Default)]
struct Loaded {
    memory: Arc<MemoryStore>,
    /// `None` while the file does not exist.
    stamp: Option<Stamp>,
}

/// Identifies one version of the snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

impl Stamp {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            len: metadata.len(),
        }
    }
}

/// A mutation in progress. Dropping it without committing discards the
/// staged tables and releases both locks.
struct Transaction<'a> {
    store: &'a FileStore,
    staged: MemoryStore,
    _writer: MutexGuard<'a, ()>,
    _lock: File,
}

impl Transaction<'_> {
    /// Writes the staged tables to disk, then makes them current.
    fn commit(self) -> Result<()> {
        let store = self.store;
        let stamp = store.write_snapshot(&self.staged)?;
        *store.loaded.write() = Loaded {
            memory: Arc::new(self.staged),
            stamp: Some(stamp),
        };
        Ok(())
    }
}

impl FileStore {
    /// Opens the store at `path`, loading it if the file exists.
    ///
    /// Creates the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let loaded = load(&path)?;
        tracing::debug!(path = %path.display(), "opened file store");

        Ok(Self {
            lock_path: path.with_extension("json.lock"),
            path,
            loaded: RwLock::new(loaded),
            writer: Mutex::new(()),
        })
    }

    /// Returns the snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores raw bars as the ingestion pipeline would and persists them.
    /// Returns how many bars were new.
    ///
    /// # Errors
    ///
    /// Returns an error if a bar violates the base-timeframe gate or the
    /// snapshot cannot be written.
    pub async fn import_raw_bars(&self, bars: impl IntoIterator<Item = Bar>) -> Result<usize> {
        let bars: Vec<Bar> = bars.into_iter().collect();
        let txn = self.begin().await?;
        let inserted = txn.staged.insert_raw_bars(bars)?;
        if inserted > 0 {
            txn.commit()?;
        }
        Ok(inserted)
    }

    /// Tables matching the file on disk, reloaded if another writer replaced
    /// it.
    fn current(&self) -> Result<Arc<MemoryStore>> {
        let on_disk = stamp_of(&self.path)?;
        {
            let loaded = self.loaded.read();
            if loaded.stamp == on_disk {
                return Ok(Arc::clone(&loaded.memory));
            }
        }

        let fresh = load(&self.path)?;
        tracing::debug!(path = %self.path.display(), "store file changed, reloaded");
        let memory = Arc::clone(&fresh.memory);
        *self.loaded.write() = fresh;
        Ok(memory)
    }

    /// Takes both locks and stages a copy of the latest tables.
    async fn begin(&self) -> Result<Transaction<'_>> {
        let writer = self.writer.lock().await;
        let lock = self.lock_exclusive()?;
        let staged = self.current()?.fork();
        Ok(Transaction {
            store: self,
            staged,
            _writer: writer,
            _lock: lock,
        })
    }

    /// Blocks until this process holds the exclusive lock on the sidecar
    /// file. The lock is released when the returned handle is dropped.
    fn lock_exclusive(&self) -> Result<File> {
        let lock_error = |e: std::io::Error| StoreError::Lock {
            path: self.lock_path.clone(),
            source: e,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(lock_error)?;
        file.lock().map_err(lock_error)?;
        Ok(file)
    }

    fn write_snapshot(&self, memory: &MemoryStore) -> Result<Stamp> {
        let json = serde_json::to_vec(&memory.snapshot())?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;

        let metadata = fs::metadata(&self.path).map_err(|e| StoreError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(Stamp::of(&metadata))
    }
}

/// Stamp of the file at `path`, or `None` if it does not exist.
fn stamp_of(path: &Path) -> Result<Option<Stamp>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(Stamp::of(&metadata))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn load(path: &Path) -> Result<Loaded> {
    let read_error = |e: std::io::Error| StoreError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    };
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Loaded::default()),
        Err(e) => return Err(read_error(e)),
    };
    // Stamp the handle that is read so a concurrent rename cannot pair new
    // contents with an old stamp.
    let metadata = file.metadata().map_err(read_error)?;
    let snapshot: Snapshot =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| StoreError::ParseJson {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(Loaded {
        memory: Arc::new(MemoryStore::from_snapshot(snapshot)),
        stamp: Some(Stamp::of(&metadata)),
    })
}

#[async_trait]
impl BarStore for FileStore {
    async fn source_bars(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: Window,
    ) -> Result<Vec<Bar>> {
        self.current()?
            .source_bars(source, symbol, timeframe, window)
            .await
    }

    async fn latest_start(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        self.current()?.latest_start(source, symbol, timeframe).await
    }

    async fn next_start(
        &self,
        source: BarSource,
        symbol: &Symbol,
        timeframe: Timeframe,
        from: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.current()?
            .next_start(source, symbol, timeframe, from)
            .await
    }

    async fn derived_bar(&self, key: &BarKey) -> Result<Option<DerivedBar>> {
        self.current()?.derived_bar(key).await
    }

    async fn upsert_derived(&self, bar: DerivedBar) -> Result<UpsertOutcome> {
        let txn = self.begin().await?;
        let outcome = txn.staged.upsert_derived(bar).await?;
        if outcome != UpsertOutcome::Unchanged {
            txn.commit()?;
        }
        Ok(outcome)
    }

    async fn soft_delete_derived(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let txn = self.begin().await?;
        let retired = txn
            .staged
            .soft_delete_derived(symbol, timeframe, window, now)
            .await?;
        if retired > 0 {
            txn.commit()?;
        }
        Ok(retired)
    }

    async fn quality_summary(&self, symbol: Option<&Symbol>) -> Result<Vec<QualityCounters>> {
        self.current()?.quality_summary(symbol).await
    }
}

#[async_trait]
impl TaskStore for FileStore {
    async fn list_tasks(&self) -> Result<Vec<AggregationTask>> {
        self.current()?.list_tasks().await
    }

    async fn get_task(&self, key: &TaskKey) -> Result<Option<AggregationTask>> {
        self.current()?.get_task(key).await
    }

    async fn insert_task(&self, task: AggregationTask) -> Result<AggregationTask> {
        let txn = self.begin().await?;
        let stored = txn.staged.insert_task(task).await?;
        txn.commit()?;
        Ok(stored)
    }

    async fn compare_and_swap(
        &self,
        task: AggregationTask,
        expected_version: u64,
    ) -> Result<AggregationTask> {
        let txn = self.begin().await?;
        let stored = txn.staged.compare_and_swap(task, expected_version).await?;
        txn.commit()?;
        Ok(stored)
    }

    async fn checkpoint_cursor(
        &self,
        key: &TaskKey,
        holder: WorkerId,
        cursor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let txn = self.begin().await?;
        txn.staged
            .checkpoint_cursor(key, holder, cursor, now)
            .await?;
        txn.commit()
    }
}

#[async_trait]
impl RegistryStore for FileStore {
    async fn registry(&self) -> Result<Vec<RegistryEntry>> {
        self.current()?.registry().await
    }

    async fn put_registry_entry(&self, entry: RegistryEntry) -> Result<()> {
        let txn = self.begin().await?;
        txn.staged.put_registry_entry(entry).await?;
        txn.commit()
    }

    async fn paused_symbols(&self) -> Result<BTreeSet<Symbol>> {
        self.current()?.paused_symbols().await
    }

    async fn set_paused(&self, symbol: &Symbol, paused: bool) -> Result<bool> {
        let txn = self.begin().await?;
        let changed = txn.staged.set_paused(symbol, paused).await?;
        if changed {
            txn.commit()?;
        }
        Ok(changed)
    }

    async fn reconcile(
        &self,
        planner: &dyn ReconcilePlanner,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let txn = self.begin().await?;
        let report = txn.staged.reconcile(planner, now).await?;
        if !report.is_noop() {
            txn.commit()?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ratchet_types::{Provenance, QualityTier};
    use tempfile::TempDir;

    fn symbol() -> Symbol {
        Symbol::new("XAUUSD").unwrap()
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn bar(minute: u32) -> Bar {
        Bar::new(
            symbol(),
            Timeframe::Minute1,
            at(minute),
            2000.0,
            2001.0,
            1999.5,
            2000.5,
            3.0,
        )
    }

    fn derived(minute: u32) -> DerivedBar {
        let mut bar = Bar::new(
            symbol(),
            Timeframe::Minute5,
            at(minute),
            2000.0,
            2002.0,
            1999.0,
            2001.0,
            15.0,
        );
        bar.provenance = Provenance::Aggregated;
        DerivedBar {
            bar,
            source_count: 5,
            expected_count: 5,
            quality: QualityTier::Full,
            quality_score: 2,
            derivation_version: 1,
            soft_deleted_at: None,
            created_at: at(30),
            updated_at: at(30),
        }
    }

    fn derived_key(minute: u32) -> BarKey {
        BarKey {
            symbol: symbol(),
            timeframe: Timeframe::Minute5,
            window_start: at(minute),
        }
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("store.json");
        let store = FileStore::open(&path).unwrap();

        assert!(path.parent().unwrap().exists());
        assert!(!path.exists());
        assert!(store.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();

        {
            let store = FileStore::open(&path).unwrap();
            store
                .put_registry_entry(RegistryEntry::active(symbol(), Timeframe::Minute1))
                .await
                .unwrap();
            assert_eq!(store.import_raw_bars([bar(0), bar(1)]).await.unwrap(), 2);
            store
                .insert_task(
                    AggregationTask::new(
                        TaskKey::new(symbol(), Timeframe::Minute5),
                        Timeframe::Minute1,
                        BarSource::Raw,
                        now,
                        now,
                    )
                    .unwrap(),
                )
                .await
                .unwrap();
            store.set_paused(&symbol(), true).await.unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.registry().await.unwrap().len(), 1);
        assert_eq!(reopened.list_tasks().await.unwrap().len(), 1);
        assert!(reopened.paused_symbols().await.unwrap().contains(&symbol()));
        assert_eq!(
            reopened
                .latest_start(BarSource::Raw, &symbol(), Timeframe::Minute1)
                .await
                .unwrap(),
            Some(at(1))
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_handles_on_one_file_see_each_others_writes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        let cli = FileStore::open(&path).unwrap();
        let daemon = FileStore::open(&path).unwrap();

        assert!(cli.set_paused(&symbol(), true).await.unwrap());
        let other = Symbol::new("GBPUSD").unwrap();
        daemon
            .put_registry_entry(RegistryEntry::active(other, Timeframe::Minute1))
            .await
            .unwrap();

        // The second writer built on the first one's pause.
        assert!(daemon.paused_symbols().await.unwrap().contains(&symbol()));
        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.paused_symbols().await.unwrap().contains(&symbol()));
        assert_eq!(reopened.registry().await.unwrap().len(), 1);

        // Raw bars imported through one handle reach the other.
        cli.put_registry_entry(RegistryEntry::active(symbol(), Timeframe::Minute1))
            .await
            .unwrap();
        assert_eq!(cli.import_raw_bars([bar(0), bar(1)]).await.unwrap(), 2);
        assert_eq!(
            daemon
                .latest_start(BarSource::Raw, &symbol(), Timeframe::Minute1)
                .await
                .unwrap(),
            Some(at(1))
        );
        assert_eq!(daemon.registry().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_tables_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store
            .put_registry_entry(RegistryEntry::active(symbol(), Timeframe::Minute1))
            .await
            .unwrap();

        // A directory in the way of the temporary file makes every write fail.
        let tmp = path.with_extension("json.tmp");
        fs::create_dir(&tmp).unwrap();
        let err = store.upsert_derived(derived(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteFile { .. }));
        assert!(store.derived_bar(&derived_key(0)).await.unwrap().is_none());
        assert!(store.set_paused(&symbol(), true).await.is_err());
        assert!(store.paused_symbols().await.unwrap().is_empty());

        fs::remove_dir(&tmp).unwrap();
        assert_eq!(
            store.upsert_derived(derived(0)).await.unwrap(),
            UpsertOutcome::Inserted
        );
        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.derived_bar(&derived_key(0)).await.unwrap().is_some());
        assert!(reopened.paused_symbols().await.unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();

        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::ParseJson { .. }));
    }
}
