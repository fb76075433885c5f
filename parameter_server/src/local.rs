use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::{debug, info};
use parking_lot::RwLock;
use tokio::sync::{Barrier, watch};

use crate::{
    error::{Result, StoreErr},
    store::{DenseUpdate, FactorStore, RowKind, TableId, TableSpec},
    table::DenseTable,
};

/// An in-process `FactorStore` shared by worker tasks of the same process.
///
/// Every read is served from the latest state, which satisfies any staleness bound.
#[derive(Debug, Clone)]
pub struct LocalStore {
    workers: usize,
    registered: Arc<AtomicUsize>,
    closed: Arc<watch::Sender<bool>>,
    row_kinds: Arc<RwLock<HashSet<RowKind>>>,
    tables: Arc<RwLock<HashMap<TableId, Arc<DenseTable>>>>,
    barrier: Arc<Barrier>,
}

impl LocalStore {
    /// Creates a new `LocalStore`.
    ///
    /// # Arguments
    /// * `workers` - The amount of workers that take part in every barrier.
    ///
    /// # Returns
    /// A new `LocalStore` instance.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            registered: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(watch::Sender::new(false)),
            row_kinds: Arc::new(RwLock::new(HashSet::new())),
            tables: Arc::new(RwLock::new(HashMap::new())),
            barrier: Arc::new(Barrier::new(workers)),
        }
    }

    /// Returns the amount of currently registered workers.
    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    /// Stops serving requests, every later call and every pending barrier fails with `Unavailable`.
    pub fn shut_down(&self) {
        self.closed.send_replace(true);
        info!("store shut down");
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.borrow() {
            return Err(shut_down_err());
        }

        Ok(())
    }

    fn table(&self, id: TableId) -> Result<Arc<DenseTable>> {
        self.ensure_open()?;

        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreErr::UnknownTable(id))
    }
}

impl FactorStore for LocalStore {
    fn register_row_kind(&self, kind: RowKind) {
        self.row_kinds.write().insert(kind);
    }

    fn create_table(&self, id: TableId, spec: TableSpec) -> Result<()> {
        self.ensure_open()?;

        if !self.row_kinds.read().contains(&spec.row_kind) {
            return Err(StoreErr::UnknownRowKind(spec.row_kind));
        }

        let mut tables = self.tables.write();
        if tables.contains_key(&id) {
            return Err(StoreErr::DuplicateTable(id));
        }

        tables.insert(id, Arc::new(DenseTable::new(id, spec)));
        debug!(table = id, capacity = spec.row_capacity, staleness = spec.staleness; "created table");
        Ok(())
    }

    fn register_worker_thread(&self) -> Result<()> {
        self.ensure_open()?;

        let workers = self.workers;
        self.registered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < workers).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| StoreErr::TooManyWorkers { workers })
    }

    fn deregister_worker_thread(&self) -> Result<()> {
        self.registered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| StoreErr::NotRegistered)
    }

    async fn get_row(&self, table: TableId, row: usize) -> Result<Vec<f32>> {
        Ok(self.table(table)?.get(row))
    }

    async fn increment_row(&self, table: TableId, row: usize, delta: &DenseUpdate) -> Result<()> {
        self.table(table)?.increment(row, delta)
    }

    async fn barrier(&self) -> Result<()> {
        tokio::select! {
            biased;
            _ = wait_closed(self.closed.subscribe()) => Err(shut_down_err()),
            _ = self.barrier.wait() => Ok(()),
        }
    }
}

/// Resolves once the store is shut down.
async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

fn shut_down_err() -> StoreErr {
    StoreErr::Unavailable("the store was shut down".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_table(workers: usize, capacity: usize) -> LocalStore {
        let store = LocalStore::new(workers);
        store.register_row_kind(RowKind::DenseF32);
        store.create_table(0, TableSpec::dense(capacity, 0)).unwrap();
        store
    }

    #[test]
    fn table_needs_registered_row_kind() {
        let store = LocalStore::new(1);

        let err = store.create_table(0, TableSpec::dense(3, 0)).unwrap_err();
        assert_eq!(err, StoreErr::UnknownRowKind(RowKind::DenseF32));
    }

    #[test]
    fn duplicate_table() {
        let store = store_with_table(1, 3);

        let err = store.create_table(0, TableSpec::dense(3, 0)).unwrap_err();
        assert_eq!(err, StoreErr::DuplicateTable(0));
    }

    #[test]
    fn registration_is_bounded() {
        let store = LocalStore::new(2);

        store.register_worker_thread().unwrap();
        store.register_worker_thread().unwrap();
        assert_eq!(
            store.register_worker_thread().unwrap_err(),
            StoreErr::TooManyWorkers { workers: 2 }
        );

        store.deregister_worker_thread().unwrap();
        store.deregister_worker_thread().unwrap();
        assert_eq!(
            store.deregister_worker_thread().unwrap_err(),
            StoreErr::NotRegistered
        );
    }

    #[tokio::test]
    async fn unknown_table() {
        let store = store_with_table(1, 3);

        let err = store.get_row(1, 0).await.unwrap_err();
        assert_eq!(err, StoreErr::UnknownTable(1));
    }

    #[tokio::test]
    async fn increments_are_visible_after_barrier() {
        let store = store_with_table(1, 3);

        store
            .increment_row(0, 2, &DenseUpdate::new(0, vec![1., 2., 3.]))
            .await
            .unwrap();
        store.barrier().await.unwrap();

        assert_eq!(store.get_row(0, 2).await.unwrap(), vec![1., 2., 3.]);
    }

    #[tokio::test]
    async fn shut_down_store_is_unavailable() {
        let store = store_with_table(1, 3);
        store.shut_down();

        assert!(matches!(
            store.get_row(0, 0).await,
            Err(StoreErr::Unavailable(_))
        ));
        assert!(matches!(store.barrier().await, Err(StoreErr::Unavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shut_down_releases_pending_barriers() {
        let store = store_with_table(2, 3);

        let waiting = tokio::spawn({
            let store = store.clone();
            async move { store.barrier().await }
        });

        tokio::task::yield_now().await;
        store.shut_down();

        assert!(matches!(waiting.await.unwrap(), Err(StoreErr::Unavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_sum_up() {
        const WORKERS: usize = 4;
        let store = store_with_table(WORKERS, 8);

        let mut tasks = Vec::new();
        for id in 0..WORKERS {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.register_worker_thread().unwrap();

                let delta = DenseUpdate::new(id * 2, vec![1., 1.]);
                for _ in 0..10 {
                    store.increment_row(0, 0, &delta).await.unwrap();
                    store.increment_row(0, 1, &DenseUpdate::new(0, vec![1.; 8])).await.unwrap();
                }

                store.barrier().await.unwrap();
                let row = store.get_row(0, 1).await.unwrap();
                store.deregister_worker_thread().unwrap();
                row
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), vec![40.; 8]);
        }

        assert_eq!(store.get_row(0, 0).await.unwrap(), vec![10.; 8]);
        assert_eq!(store.registered(), 0);
    }
}
