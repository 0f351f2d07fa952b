//! Worker-owned transport connections.
//!
//! Each pool worker gets its own slot, filled lazily on that worker's first
//! call and kept for the lifetime of the table. Slots are indexed by the
//! worker's index within the owning pool, so a worker only ever touches its
//! own connection. Any other thread (another rayon pool included) gets a
//! connection of its own keyed by thread id.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::{self, ThreadId};

use lambdapool_core::{ConnectionContext, TransportError};

use crate::adapters::transport::{Connector, Transport};

type Slot = Arc<dyn Transport>;

pub struct ConnectionTable {
    context: Arc<ConnectionContext>,
    connector: Arc<dyn Connector>,
    pool: Option<Weak<rayon::ThreadPool>>,
    workers: Vec<OnceLock<Slot>>,
    callers: Mutex<HashMap<ThreadId, Slot>>,
}

impl ConnectionTable {
    /// Table with no pool; every calling thread gets its own connection.
    pub fn new(context: Arc<ConnectionContext>, connector: Arc<dyn Connector>) -> Self {
        Self {
            context,
            connector,
            pool: None,
            workers: Vec::new(),
            callers: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_pool(
        context: Arc<ConnectionContext>,
        connector: Arc<dyn Connector>,
        pool: &Arc<rayon::ThreadPool>,
    ) -> Self {
        Self {
            pool: Some(Arc::downgrade(pool)),
            workers: (0..pool.current_num_threads())
                .map(|_| OnceLock::new())
                .collect(),
            ..Self::new(context, connector)
        }
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }

    /// Index of the calling worker within the owning pool, or `None` for any
    /// other thread.
    pub fn current_worker(&self) -> Option<usize> {
        self.pool
            .as_ref()
            .and_then(Weak::upgrade)
            .and_then(|pool| pool.current_thread_index())
            .filter(|index| *index < self.workers.len())
    }

    /// Connection owned by the calling thread, created on first use.
    pub fn connection(&self) -> Result<Slot, TransportError> {
        match self.current_worker() {
            Some(index) => self.worker_connection(index),
            None => self.caller_connection(),
        }
    }

    fn worker_connection(&self, index: usize) -> Result<Slot, TransportError> {
        let slot = &self.workers[index];
        if let Some(transport) = slot.get() {
            return Ok(Arc::clone(transport));
        }

        // Only worker `index` reaches this slot, so initialisation cannot race.
        let transport = self.open(Some(index))?;
        Ok(Arc::clone(slot.get_or_init(|| transport)))
    }

    fn caller_connection(&self) -> Result<Slot, TransportError> {
        let id = thread::current().id();
        if let Some(transport) = self.callers().get(&id) {
            return Ok(Arc::clone(transport));
        }

        let transport = self.open(None)?;
        Ok(Arc::clone(self.callers().entry(id).or_insert(transport)))
    }

    fn open(&self, worker: Option<usize>) -> Result<Slot, TransportError> {
        let transport = self.connector.connect(&self.context)?;
        tracing::debug!(
            component = "connections",
            endpoint = self.context.target(),
            worker = ?worker,
            "connection_opened"
        );
        Ok(Arc::from(transport))
    }

    fn callers(&self) -> MutexGuard<'_, HashMap<ThreadId, Slot>> {
        self.callers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_connections(&self) -> usize {
        self.workers.iter().filter(|slot| slot.get().is_some()).count() + self.callers().len()
    }
}

impl fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("target", &self.context.target())
            .field("workers", &self.workers.len())
            .field("open", &self.open_connections())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lambdapool_core::{catalog, Agent};

    use super::*;
    use crate::adapters::transport::{LocalConnector, Reply};

    struct Tracked {
        inner: Box<dyn Transport>,
        threads: Arc<Mutex<HashSet<ThreadId>>>,
    }

    impl Transport for Tracked {
        fn send(&self, payload: &[u8]) -> Result<Reply, TransportError> {
            self.threads
                .lock()
                .expect("thread set")
                .insert(thread::current().id());
            self.inner.send(payload)
        }
    }

    #[derive(Default)]
    struct TrackingConnector {
        connects: AtomicUsize,
        connections: Mutex<Vec<Arc<Mutex<HashSet<ThreadId>>>>>,
    }

    impl TrackingConnector {
        fn threads_per_connection(&self) -> Vec<usize> {
            self.connections
                .lock()
                .expect("connection list")
                .iter()
                .map(|threads| threads.lock().expect("thread set").len())
                .collect()
        }
    }

    impl Connector for TrackingConnector {
        fn connect(
            &self,
            context: &ConnectionContext,
        ) -> Result<Box<dyn Transport>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let threads = Arc::new(Mutex::new(HashSet::new()));
            self.connections
                .lock()
                .expect("connection list")
                .push(Arc::clone(&threads));
            let inner = LocalConnector::new(Agent::new(catalog::builtin_registry()))
                .connect(context)?;
            Ok(Box::new(Tracked { inner, threads }))
        }
    }

    fn context() -> Arc<ConnectionContext> {
        Arc::new(ConnectionContext::new("test-function").expect("context should build"))
    }

    fn send_once(table: &ConnectionTable) {
        table
            .connection()
            .expect("connection should open")
            .send(b"{}")
            .expect("send should succeed");
    }

    #[test]
    fn foreign_rayon_threads_do_not_borrow_worker_slots() {
        let connector = Arc::new(TrackingConnector::default());
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(2)
                .build()
                .expect("pool"),
        );
        let table = ConnectionTable::for_pool(context(), connector.clone(), &pool);

        pool.broadcast(|_| send_once(&table));
        let foreign = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .expect("foreign pool");
        foreign.broadcast(|_| {
            assert_eq!(table.current_worker(), None);
            send_once(&table);
        });

        assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
        assert_eq!(connector.threads_per_connection(), vec![1, 1, 1, 1]);
        assert_eq!(table.open_connections(), 4);
    }

    #[test]
    fn plain_threads_each_get_their_own_connection() {
        let connector = Arc::new(TrackingConnector::default());
        let table = ConnectionTable::new(context(), connector.clone());

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    send_once(&table);
                    send_once(&table);
                });
            }
        });

        assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
        assert_eq!(connector.threads_per_connection(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn worker_reuses_its_connection() {
        let connector = Arc::new(TrackingConnector::default());
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(1)
                .build()
                .expect("pool"),
        );
        let table = ConnectionTable::for_pool(context(), connector.clone(), &pool);

        for _ in 0..3 {
            pool.install(|| send_once(&table));
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }
}
