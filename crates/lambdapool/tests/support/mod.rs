#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use lambdapool::adapters::transport::{Connector, LocalConnector, Reply, Transport};
use lambdapool::{catalog, Agent, CallArgs, ConnectionContext, LambdaPool, Module, TransportError};

/// Tracks how many `testing.measured` calls run at once.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builtin modules plus a `testing` module with slow, failing and panicking
/// functions. `executed` counts calls to `testing.reject_first`.
pub fn test_agent(gauge: Arc<ConcurrencyGauge>, executed: Arc<AtomicUsize>) -> Agent {
    let testing = Module::new()
        .function("sleep", |call: &CallArgs| {
            let millis: u64 = call.get(0, "ms")?;
            thread::sleep(Duration::from_millis(millis));
            Ok(millis)
        })
        .function("fail", |_: &CallArgs| -> Result<(), String> {
            Err("bad input".to_string())
        })
        .function("explode", |_: &CallArgs| -> Result<(), String> {
            panic!("exploded on purpose")
        })
        .function("measured", move |call: &CallArgs| {
            let value: u64 = call.get(0, "value")?;
            gauge.enter();
            thread::sleep(Duration::from_millis(20));
            gauge.exit();
            Ok(value)
        })
        .function("reject_first", move |call: &CallArgs| {
            let value: u64 = call.get(0, "value")?;
            executed.fetch_add(1, Ordering::SeqCst);
            if value == 0 {
                return Err("first input rejected".to_string());
            }
            thread::sleep(Duration::from_millis(5));
            Ok(value)
        });

    Agent::new(catalog::builtin_registry().module("testing", testing))
}

/// Local connector that counts opened connections and records which threads
/// send on each of them.
pub struct CountingConnector {
    inner: LocalConnector,
    connections: Mutex<Vec<Arc<Mutex<HashSet<ThreadId>>>>>,
}

impl CountingConnector {
    pub fn new(agent: Agent) -> Self {
        Self {
            inner: LocalConnector::new(agent),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn connects(&self) -> usize {
        self.connections.lock().expect("connection list").len()
    }

    pub fn threads_per_connection(&self) -> Vec<usize> {
        self.connections
            .lock()
            .expect("connection list")
            .iter()
            .map(|threads| threads.lock().expect("thread set").len())
            .collect()
    }
}

struct RecordingTransport {
    inner: Box<dyn Transport>,
    threads: Arc<Mutex<HashSet<ThreadId>>>,
}

impl Transport for RecordingTransport {
    fn send(&self, payload: &[u8]) -> Result<Reply, TransportError> {
        self.threads
            .lock()
            .expect("thread set")
            .insert(thread::current().id());
        self.inner.send(payload)
    }
}

impl Connector for CountingConnector {
    fn connect(&self, context: &ConnectionContext) -> Result<Box<dyn Transport>, TransportError> {
        let threads = Arc::new(Mutex::new(HashSet::new()));
        self.connections
            .lock()
            .expect("connection list")
            .push(Arc::clone(&threads));
        Ok(Box::new(RecordingTransport {
            inner: self.inner.connect(context)?,
            threads,
        }))
    }
}

pub fn context() -> ConnectionContext {
    ConnectionContext::new("test-function").expect("context should build")
}

pub struct Harness {
    pub pool: LambdaPool,
    pub gauge: Arc<ConcurrencyGauge>,
    pub executed: Arc<AtomicUsize>,
    pub connector: Arc<CountingConnector>,
}

pub fn harness(workers: usize) -> Harness {
    harness_with_context(workers, context())
}

pub fn harness_with_context(workers: usize, context: ConnectionContext) -> Harness {
    let gauge = Arc::new(ConcurrencyGauge::default());
    let executed = Arc::new(AtomicUsize::new(0));
    let connector = Arc::new(CountingConnector::new(test_agent(
        Arc::clone(&gauge),
        Arc::clone(&executed),
    )));
    let pool = LambdaPool::new(workers, context, connector.clone()).expect("pool should start");
    Harness {
        pool,
        gauge,
        executed,
        connector,
    }
}
