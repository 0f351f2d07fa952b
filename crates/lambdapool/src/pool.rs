//! Bounded pool of OS-thread workers dispatching calls to one deployed function.
//!
//! The pool owns exactly `workers` rayon threads, so at most `workers` calls
//! are in flight at any time; further submissions queue. Each worker keeps its
//! own transport connection (see [`crate::connections`]). The pool keeps no
//! record of finished calls and never retries.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use lambdapool_core::{
    CallArgs, ConfigError, ConnectionContext, FunctionPath, InvokeError, TransportError,
};
use rayon::prelude::*;
use serde_json::Value;

use crate::adapters::lambda::LambdaConnector;
use crate::adapters::transport::Connector;
use crate::call::AsyncResult;
use crate::connections::ConnectionTable;
use crate::invoker::Invoker;

pub struct LambdaPool {
    workers: usize,
    threads: Arc<rayon::ThreadPool>,
    connections: Arc<ConnectionTable>,
    in_flight: Arc<InFlight>,
    wait_on_drop: bool,
}

impl LambdaPool {
    pub fn new(
        workers: usize,
        context: ConnectionContext,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::InvalidWorkers(workers));
        }

        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("lambdapool-worker-{index}"))
            .build()
            .map_err(|error| ConfigError::Startup {
                component: "worker pool".to_string(),
                reason: error.to_string(),
            })?;
        let threads = Arc::new(threads);

        let connections = Arc::new(ConnectionTable::for_pool(
            Arc::new(context),
            connector,
            &threads,
        ));
        tracing::info!(
            component = "pool",
            endpoint = connections.context().target(),
            workers,
            "pool_started"
        );

        Ok(Self {
            workers,
            threads,
            connections,
            in_flight: Arc::new(InFlight::default()),
            wait_on_drop: true,
        })
    }

    /// Pool whose workers talk to AWS Lambda.
    pub fn lambda(workers: usize, context: ConnectionContext) -> Result<Self, ConfigError> {
        let connector = LambdaConnector::new()?;
        Self::new(workers, context, Arc::new(connector))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn context(&self) -> &ConnectionContext {
        self.connections.context()
    }

    /// Invoker for `function` sharing this pool's worker connections.
    pub fn invoker(&self, function: &str) -> Result<Invoker, InvokeError> {
        let path = FunctionPath::parse(function)?;
        Ok(Invoker::with_connections(path, Arc::clone(&self.connections)))
    }

    /// Calls `function` once per input, each input being the single positional
    /// argument. Results come back in input order.
    ///
    /// Fails fast: after the first observed failure no further inputs are
    /// started, calls already running are allowed to finish, and that failure
    /// is returned.
    pub fn map<I, T>(&self, function: &str, inputs: I) -> Result<Vec<Value>, InvokeError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        let calls = inputs
            .into_iter()
            .map(|input| CallArgs::from(input.into()))
            .collect();
        self.starmap(function, calls)
    }

    /// Like [`LambdaPool::map`] with full positional and keyword arguments per call.
    pub fn starmap(&self, function: &str, calls: Vec<CallArgs>) -> Result<Vec<Value>, InvokeError> {
        let invoker = self.invoker(function)?;
        let in_flight = &self.in_flight;
        let total = calls.len();

        let outcome = self.threads.install(|| {
            calls
                .into_par_iter()
                .with_max_len(1)
                .map(|args| {
                    let _guard = in_flight.enter();
                    invoker.invoke(args)
                })
                .collect::<Result<Vec<_>, _>>()
        });

        match &outcome {
            Ok(_) => tracing::info!(
                component = "pool",
                function = %invoker.function(),
                calls = total,
                "map_completed"
            ),
            Err(error) => tracing::warn!(
                component = "pool",
                function = %invoker.function(),
                calls = total,
                %error,
                "map_failed"
            ),
        }
        outcome
    }

    /// Runs one call on a pool worker and blocks until it finishes.
    pub fn apply(&self, function: &str, args: CallArgs) -> Result<Value, InvokeError> {
        let invoker = self.invoker(function)?;
        let _guard = self.in_flight.enter();
        self.threads.install(|| invoker.invoke(args))
    }

    /// Queues one call and returns immediately.
    pub fn apply_async(&self, function: &str, args: CallArgs) -> AsyncResult {
        let invoker = match self.invoker(function) {
            Ok(invoker) => invoker,
            Err(error) => return AsyncResult::completed(Err(error)),
        };

        let handle = AsyncResult::pending();
        let slot = handle.slot();
        let guard = self.in_flight.enter();
        self.threads.spawn(move || {
            let _guard = guard;
            slot.dispatched();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| invoker.invoke(args)))
                .unwrap_or_else(|_| {
                    Err(InvokeError::Transport(TransportError::Connection(
                        "worker panicked while sending the call".to_string(),
                    )))
                });
            slot.complete(outcome);
        });
        handle
    }

    /// Calls currently queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Waits for every queued and running call, then releases the workers.
    pub fn shutdown(self) {
        drop(self);
    }

    /// Releases the pool without waiting. Queued calls still run to completion
    /// in the background and their handles still resolve.
    pub fn abandon(mut self) {
        self.wait_on_drop = false;
        tracing::info!(
            component = "pool",
            pending = self.in_flight.count(),
            "pool_abandoned"
        );
    }
}

impl Drop for LambdaPool {
    fn drop(&mut self) {
        if self.wait_on_drop {
            self.in_flight.wait_idle();
            tracing::info!(component = "pool", workers = self.workers, "pool_shutdown");
        }
    }
}

impl std::fmt::Debug for LambdaPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaPool")
            .field("workers", &self.workers)
            .field("connections", &self.connections)
            .field("in_flight", &self.in_flight.count())
            .finish()
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        InFlightGuard(Arc::clone(self))
    }

    fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}
