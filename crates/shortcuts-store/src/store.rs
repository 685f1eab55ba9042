//! Commit pipeline and the public `Store` handle.
//!
//! A single writer task owns the WAL and the master state. Units of work are
//! sent to it over a bounded channel and run one at a time against a clone of
//! the state; a non-empty result is appended to the WAL and, only once that
//! succeeds, swapped in as the new snapshot and published to observers.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use shortcuts_types::{
    AppLock, Base, Category, CategoryId, EntityKind, LayoutType, Shortcut, ShortcutId, Variable,
    VariableId,
};

use crate::clock::{Clock, MonotonicClock};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::metrics::StoreMetrics;
use crate::record::WalRecord;
use crate::router::{EntityRef, Observed, Observer, ObserverRouter};
use crate::state::StoreState;
use crate::txn::Transaction;
use crate::wal::{IntegrityReport, WriteAheadLog};

/// Suffix appended to the name of a duplicated shortcut.
pub const COPY_SUFFIX: &str = " (copy)";

/// Outcome of a committed unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    /// WAL sequence of the record, or the current sequence when nothing changed.
    pub sequence: u64,
    pub mutations: usize,
}

impl CommitReceipt {
    pub fn changed(&self) -> bool {
        self.mutations > 0
    }
}

type Completion = Box<dyn FnOnce(StoreResult<CommitReceipt>) + Send>;

enum Settle {
    Accepted(Completion),
    /// The unit returned an error and has already reported it to its caller.
    Rejected,
}

type UnitOfWork = Box<dyn FnOnce(&mut Transaction<'_>) -> Settle + Send>;

fn unit_of_work<F>(f: F) -> UnitOfWork
where
    F: FnOnce(&mut Transaction<'_>) -> Settle + Send + 'static,
{
    Box::new(f)
}

enum Command {
    Commit(UnitOfWork),
    Compact(oneshot::Sender<StoreResult<u64>>),
    Shutdown(oneshot::Sender<StoreResult<()>>),
}

struct Writer {
    state: Arc<StoreState>,
    wal: Arc<WriteAheadLog>,
    snapshot: watch::Sender<Arc<StoreState>>,
    router: Arc<ObserverRouter>,
    clock: Arc<dyn Clock>,
    compact_every: Option<u64>,
    commits_since_compaction: u64,
}

impl Writer {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Commit(unit) => self.commit(unit).await,
                Command::Compact(reply) => {
                    let _ = reply.send(self.compact().await);
                }
                Command::Shutdown(reply) => {
                    let _ = reply.send(self.wal.close().await);
                    break;
                }
            }
        }
        info!("Store writer stopped");
    }

    async fn commit(&mut self, unit: UnitOfWork) {
        let mut working = StoreState::clone(&self.state);
        let clock = self.clock.clone();
        let (settle, mutations) = {
            let mut tx = Transaction::new(&mut working, clock.as_ref());
            let settle = unit(&mut tx);
            (settle, tx.into_mutations())
        };

        let complete = match settle {
            Settle::Accepted(complete) => complete,
            Settle::Rejected => {
                debug!(discarded = mutations.len(), "Unit of work failed, changes discarded");
                return;
            }
        };

        if mutations.is_empty() {
            complete(Ok(CommitReceipt {
                sequence: self.wal.latest_sequence(),
                mutations: 0,
            }));
            return;
        }

        let count = mutations.len();
        let record = WalRecord::transaction(clock.now(), mutations);
        match self.wal.append(&record).await {
            Ok(sequence) => {
                let state = Arc::new(working);
                self.state = state.clone();
                self.snapshot.send_replace(state.clone());
                let notified = self.router.publish(sequence, state).await;
                debug!(sequence, mutations = count, notified, "Commit applied");
                complete(Ok(CommitReceipt {
                    sequence,
                    mutations: count,
                }));
                self.commits_since_compaction += 1;
                self.maybe_compact().await;
            }
            Err(e) => {
                error!(error = %e, "WAL append failed, commit discarded");
                complete(Err(e));
            }
        }
    }

    async fn maybe_compact(&mut self) {
        let Some(every) = self.compact_every else {
            return;
        };
        if self.commits_since_compaction < every {
            return;
        }
        if let Err(e) = self.compact().await {
            warn!(error = %e, "Automatic compaction failed");
        }
    }

    async fn compact(&mut self) -> StoreResult<u64> {
        let record = WalRecord::snapshot(self.clock.now(), self.state.to_image());
        let sequence = self.wal.compact(&record).await?;
        self.commits_since_compaction = 0;
        Ok(sequence)
    }
}

struct StoreInner {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Arc<StoreState>>,
    router: Arc<ObserverRouter>,
    wal: Arc<WriteAheadLog>,
    config: StoreConfig,
}

/// Handle to an open store. Cheap to clone; all clones share one writer.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open the store described by `config`, replaying its WAL.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_clock(config, Arc::new(MonotonicClock::new())).await
    }

    pub async fn open_with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        config.validate()?;
        let wal = match &config.data_dir {
            Some(dir) => WriteAheadLog::open_file(config.wal.clone(), dir.clone()).await?,
            None => WriteAheadLog::open_memory(config.wal.clone()).await?,
        };
        Self::open_with_wal(config, wal, clock).await
    }

    pub async fn open_with_wal(
        config: StoreConfig,
        wal: WriteAheadLog,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let wal = Arc::new(wal);

        let mut state = StoreState::default();
        let replayed = wal
            .replay(1, |_, record| {
                state.apply_record(&record);
                Ok(())
            })
            .await?;
        state.rebuild_index();
        if state.base().is_some() {
            for problem in state.invariant_violations() {
                warn!(problem = %problem, "Inconsistent state after replay");
            }
        }

        let sequence = wal.latest_sequence();
        let state = Arc::new(state);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.clone());
        let router = Arc::new(ObserverRouter::new(
            state.clone(),
            sequence,
            config.observer_buffer,
        ));
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer);

        let writer = Writer {
            state,
            wal: wal.clone(),
            snapshot: snapshot_tx,
            router: router.clone(),
            clock,
            compact_every: config.compact_every,
            commits_since_compaction: replayed,
        };
        tokio::spawn(writer.run(commands_rx));

        let store = Store {
            inner: Arc::new(StoreInner {
                commands: commands_tx,
                snapshot: snapshot_rx,
                router,
                wal,
                config,
            }),
        };

        let default_name = store.inner.config.default_category_name.clone();
        let name = default_name.clone();
        if store.commit(move |tx| Ok(tx.ensure_base(&name))).await? {
            info!(category = %default_name, "Initialized empty store");
        }

        info!(
            sequence = store.inner.wal.latest_sequence(),
            replayed,
            "Store opened"
        );
        Ok(store)
    }

    /// Run `work` as one atomic unit of work.
    ///
    /// Either every change it makes becomes durable and visible together, or,
    /// when it returns an error or the WAL append fails, none does.
    pub async fn commit<R, F>(&self, work: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> StoreResult<R> + Send + 'static,
    {
        self.commit_with_receipt(work).await.map(|(value, _)| value)
    }

    pub async fn commit_with_receipt<R, F>(&self, work: F) -> StoreResult<(R, CommitReceipt)>
    where
        R: Send + 'static,
        F: FnOnce(&mut Transaction<'_>) -> StoreResult<R> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let unit = unit_of_work(move |tx| match work(tx) {
            Ok(value) => Settle::Accepted(Box::new(move |receipt: StoreResult<CommitReceipt>| {
                let _ = reply.send(receipt.map(|receipt| (value, receipt)));
            })),
            Err(e) => {
                let _ = reply.send(Err(e));
                Settle::Rejected
            }
        });
        self.inner
            .commands
            .send(Command::Commit(unit))
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| StoreError::Closed)?
    }

    /// Consistent read-only view of the latest committed state.
    pub fn snapshot(&self) -> Arc<StoreState> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ---- Observation ----

    pub async fn observe(&self, entity: EntityRef) -> Observer<Observed> {
        self.inner.router.subscribe_ref(entity).await
    }

    /// Observe an arbitrary projection of the committed state.
    pub async fn observe_with<T, F>(&self, project: F) -> Observer<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(&StoreState) -> T + Send + Sync + 'static,
    {
        self.inner.router.subscribe(project).await
    }

    pub async fn observe_shortcut(&self, id: ShortcutId) -> Observer<Option<Shortcut>> {
        self.observe_with(move |state| state.shortcut(id).cloned()).await
    }

    pub async fn observe_categories(&self) -> Observer<Vec<Category>> {
        self.observe_with(|state| state.categories().into_iter().cloned().collect())
            .await
    }

    // ---- Queries ----

    pub fn base(&self) -> Option<Base> {
        self.snapshot().base().cloned()
    }

    pub fn shortcut(&self, id: ShortcutId) -> Option<Shortcut> {
        self.snapshot().shortcut(id).cloned()
    }

    pub fn shortcut_by_name(&self, name: &str) -> Option<Shortcut> {
        self.snapshot().shortcut_by_name(name).cloned()
    }

    pub fn shortcuts(&self) -> Vec<Shortcut> {
        self.snapshot().shortcuts().into_iter().cloned().collect()
    }

    pub fn category(&self, id: CategoryId) -> Option<Category> {
        self.snapshot().category(id).cloned()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.snapshot().categories().into_iter().cloned().collect()
    }

    pub fn variable(&self, id: VariableId) -> Option<Variable> {
        self.snapshot().variable(id).cloned()
    }

    pub fn variable_by_key(&self, key: &str) -> Option<Variable> {
        self.snapshot().variable_by_key(key).cloned()
    }

    pub fn variables(&self) -> Vec<Variable> {
        self.snapshot().variables().into_iter().cloned().collect()
    }

    pub fn is_locked(&self) -> bool {
        self.snapshot().is_locked()
    }

    // ---- Identifiers and ordering ----

    pub async fn allocate_id(&self, kind: EntityKind) -> StoreResult<u64> {
        self.commit(move |tx| Ok(tx.allocate_id(kind))).await
    }

    pub async fn move_shortcut(
        &self,
        shortcut_id: ShortcutId,
        target: Option<CategoryId>,
        position: Option<usize>,
    ) -> StoreResult<bool> {
        self.commit(move |tx| Ok(tx.move_shortcut(shortcut_id, target, position)))
            .await
    }

    pub async fn move_category(&self, id: CategoryId, position: Option<usize>) -> StoreResult<bool> {
        self.commit(move |tx| Ok(tx.move_category(id, position))).await
    }

    pub async fn move_variable(&self, id: VariableId, position: Option<usize>) -> StoreResult<bool> {
        self.commit(move |tx| Ok(tx.move_variable(id, position))).await
    }

    // ---- Entity management ----

    pub async fn create_category(&self, name: &str, layout_type: LayoutType) -> StoreResult<CategoryId> {
        let name = name.to_string();
        self.commit(move |tx| Ok(tx.create_category(&name, layout_type)))
            .await
    }

    pub async fn rename_category(&self, id: CategoryId, name: &str) -> StoreResult<()> {
        let name = name.to_string();
        self.commit(move |tx| tx.rename_category(id, &name)).await
    }

    pub async fn set_category_layout(&self, id: CategoryId, layout_type: LayoutType) -> StoreResult<()> {
        self.commit(move |tx| tx.set_category_layout(id, layout_type))
            .await
    }

    pub async fn delete_category(&self, id: CategoryId) -> StoreResult<bool> {
        self.commit(move |tx| tx.delete_category(id)).await
    }

    pub async fn update_shortcut<F>(&self, id: ShortcutId, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Shortcut) + Send + 'static,
    {
        self.commit(move |tx| tx.update_shortcut(id, update)).await
    }

    pub async fn delete_shortcut(&self, id: ShortcutId) -> StoreResult<bool> {
        self.commit(move |tx| Ok(tx.delete_shortcut(id))).await
    }

    pub async fn duplicate_shortcut(&self, id: ShortcutId) -> StoreResult<ShortcutId> {
        self.commit(move |tx| tx.duplicate_shortcut(id, COPY_SUFFIX))
            .await
    }

    pub async fn update_variable<F>(&self, id: VariableId, update: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Variable) + Send + 'static,
    {
        self.commit(move |tx| tx.update_variable(id, update)).await
    }

    pub async fn delete_variable(&self, id: VariableId) -> StoreResult<bool> {
        self.commit(move |tx| Ok(tx.delete_variable(id))).await
    }

    // ---- App lock ----

    /// Lock the app. Callers hash the password with `AppLock::hash_password`.
    pub async fn lock(&self, password_hash: impl Into<String>) -> StoreResult<()> {
        let lock = AppLock::new(password_hash);
        self.commit(move |tx| {
            tx.set_app_lock(Some(lock));
            Ok(())
        })
        .await
    }

    /// Remove the lock when `password` matches. Unlocking an unlocked app
    /// succeeds.
    pub async fn unlock(&self, password: &str) -> StoreResult<bool> {
        let password = password.to_string();
        let unlocked = self
            .commit(move |tx| {
                let matches = tx.state().app_lock().map(|lock| lock.matches(&password));
                match matches {
                    Some(false) => Ok(false),
                    _ => {
                        tx.set_app_lock(None);
                        Ok(true)
                    }
                }
            })
            .await?;
        if !unlocked {
            warn!("Unlock rejected, password mismatch");
        }
        Ok(unlocked)
    }

    // ---- Maintenance ----

    /// Write a snapshot record and drop the WAL history before it.
    pub async fn compact(&self) -> StoreResult<u64> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Compact(reply))
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| StoreError::Closed)?
    }

    pub async fn verify(&self) -> StoreResult<IntegrityReport> {
        self.inner.wal.verify_integrity().await
    }

    pub async fn metrics(&self) -> StoreMetrics {
        let state = self.snapshot();
        StoreMetrics {
            latest_sequence: self.inner.wal.latest_sequence(),
            wal_size_bytes: self.inner.wal.size_bytes().await,
            wal_segments: self.inner.wal.segment_count().await as u32,
            categories: state.categories().len(),
            shortcuts: state.shortcut_count(),
            variables: state.variables().len(),
            pending_executions: state.pending_executions().len(),
            observers_active: self.inner.router.subscription_count().await as u32,
            staging_active: state.staged_shortcut().is_some() || state.staged_variable().is_some(),
            locked: state.is_locked(),
        }
    }

    /// Sync the WAL and stop the writer. Later commits on any clone fail with
    /// `StoreError::Closed`.
    pub async fn close(&self) -> StoreResult<()> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Shutdown(reply))
            .await
            .map_err(|_| StoreError::Closed)?;
        response.await.map_err(|_| StoreError::Closed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{FaultyStorage, MemoryStorage};
    use std::sync::atomic::Ordering;

    async fn open() -> Store {
        Store::open(StoreConfig::in_memory()).await.unwrap()
    }

    fn new_shortcut(tx: &mut Transaction<'_>, name: &str) -> StoreResult<ShortcutId> {
        let id = ShortcutId(tx.allocate_id(EntityKind::Shortcut));
        let mut shortcut = Shortcut::create_new(id);
        shortcut.name = name.to_string();
        tx.put_shortcut(shortcut)?;
        let category = tx
            .state()
            .first_category()
            .ok_or_else(|| StoreError::rejected("no category"))?;
        tx.move_shortcut(id, Some(category), None);
        Ok(id)
    }

    #[tokio::test]
    async fn first_open_creates_default_category() {
        let store = open().await;
        let categories = store.categories();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Shortcuts");
        assert_eq!(store.snapshot().invariant_violations(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn failed_unit_changes_nothing() {
        let store = open().await;
        let before = store.snapshot();
        let sequence = store.metrics().await.latest_sequence;

        let err = store
            .commit(|tx| {
                new_shortcut(tx, "half-done")?;
                Err::<(), _>(StoreError::rejected("changed my mind"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ValidationRejected(_)));
        assert_eq!(*store.snapshot(), *before);
        assert_eq!(store.metrics().await.latest_sequence, sequence);
    }

    #[tokio::test]
    async fn empty_unit_writes_no_record() {
        let store = open().await;
        let sequence = store.metrics().await.latest_sequence;
        let (_, receipt) = store.commit_with_receipt(|_| Ok(())).await.unwrap();
        assert!(!receipt.changed());
        assert_eq!(receipt.sequence, sequence);
        assert!(!store.move_shortcut(ShortcutId(77), None, None).await.unwrap());
        assert_eq!(store.metrics().await.latest_sequence, sequence);
    }

    #[tokio::test]
    async fn observers_see_commits_in_order() {
        let store = open().await;
        let mut obs = store.observe_with(|s| s.shortcut_count()).await;
        assert_eq!(obs.recv().await, Some(0));

        for i in 0..3 {
            let name = format!("s{i}");
            store.commit(move |tx| new_shortcut(tx, &name)).await.unwrap();
        }
        assert_eq!(obs.recv().await, Some(1));
        assert_eq!(obs.recv().await, Some(2));
        assert_eq!(obs.recv().await, Some(3));
    }

    async fn open_faulty(storage: MemoryStorage) -> (Store, crate::wal::Faults) {
        let mut config = StoreConfig::in_memory();
        config.wal.max_segment_size = 64;
        let (faulty, faults) = FaultyStorage::new(storage);
        let wal = WriteAheadLog::open(config.wal.clone(), Box::new(faulty))
            .await
            .unwrap();
        let store = Store::open_with_wal(config, wal, Arc::new(MonotonicClock::new()))
            .await
            .unwrap();
        (store, faults)
    }

    async fn reopen_categories(storage: MemoryStorage) -> Vec<Category> {
        let config = StoreConfig::in_memory();
        let wal = WriteAheadLog::open(config.wal.clone(), Box::new(storage))
            .await
            .unwrap();
        Store::open_with_wal(config, wal, Arc::new(MonotonicClock::new()))
            .await
            .unwrap()
            .categories()
    }

    #[tokio::test]
    async fn commit_survives_failed_segment_rotation() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        let (store, faults) = open_faulty(storage).await;

        faults.fail_create.store(true, Ordering::SeqCst);
        store
            .create_category("Ghost", LayoutType::Linear)
            .await
            .unwrap();
        assert_eq!(store.categories().len(), 2);

        let categories = reopen_categories(handle).await;
        assert_eq!(categories.len(), 2);
        assert!(categories.iter().any(|c| c.name == "Ghost"));
    }

    #[tokio::test]
    async fn failed_write_leaves_no_trace() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        let (store, faults) = open_faulty(storage).await;

        faults.fail_writes.store(true, Ordering::SeqCst);
        assert!(store.create_category("Ghost", LayoutType::Linear).await.is_err());
        assert_eq!(store.categories().len(), 1);

        faults.fail_writes.store(false, Ordering::SeqCst);
        store.create_category("Real", LayoutType::Linear).await.unwrap();

        let names: Vec<String> = reopen_categories(handle)
            .await
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Real".to_string()));
        assert!(!names.contains(&"Ghost".to_string()));
    }

    #[tokio::test]
    async fn slow_observer_ends_on_final_state_when_idle() {
        let mut config = StoreConfig::in_memory();
        config.observer_buffer = 1;
        let store = Store::open(config).await.unwrap();
        let mut obs = store.observe_with(|s| s.categories().len()).await;

        for name in ["Two", "Three", "Four"] {
            store.create_category(name, LayoutType::Linear).await.unwrap();
        }
        // No further commits: the final count must still be observable.
        assert_eq!(obs.recv().await, Some(1));
        let next = tokio::time::timeout(std::time::Duration::from_secs(1), obs.recv())
            .await
            .expect("observer stalled on a stale value");
        assert_eq!(next, Some(4));
        assert_eq!(obs.latest(), None);
    }

    #[tokio::test]
    async fn lock_and_unlock() {
        let store = open().await;
        let mut obs = store.observe(EntityRef::AppLock).await;
        assert_eq!(obs.recv().await, Some(Observed::AppLock(false)));

        store.lock(AppLock::hash_password("secret")).await.unwrap();
        assert!(store.is_locked());
        assert_eq!(obs.recv().await, Some(Observed::AppLock(true)));

        assert!(!store.unlock("guess").await.unwrap());
        assert!(store.is_locked());
        assert!(store.unlock("secret").await.unwrap());
        assert!(!store.is_locked());
        assert!(store.unlock("anything").await.unwrap());
    }

    #[tokio::test]
    async fn closed_store_rejects_commits() {
        let store = open().await;
        let clone = store.clone();
        store.close().await.unwrap();
        let err = clone.allocate_id(EntityKind::Shortcut).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[tokio::test]
    async fn duplicate_and_rename() {
        let store = open().await;
        let id = store.commit(|tx| new_shortcut(tx, "Ping")).await.unwrap();
        let copy = store.duplicate_shortcut(id).await.unwrap();
        assert_eq!(store.shortcut(copy).unwrap().name, "Ping (copy)");
        assert_eq!(store.shortcut_by_name("ping (COPY)").unwrap().id, copy);

        store
            .update_shortcut(copy, |s| s.name = "Pong".into())
            .await
            .unwrap();
        assert!(store.shortcut_by_name("ping (copy)").is_none());
        assert_eq!(store.shortcuts().len(), 2);
    }
}
