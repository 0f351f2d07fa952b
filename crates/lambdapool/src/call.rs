//! Deferred results for calls submitted with `LambdaPool::apply_async`.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lambdapool_core::{FailureKind, InvokeError};
use serde_json::Value;

/// Lifecycle of one submitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Queued behind busy workers.
    Pending,
    /// Running on a worker.
    Dispatched,
    Succeeded,
    Failed(FailureKind),
}

#[derive(Debug)]
enum Stage {
    Pending,
    Dispatched,
    Done(Result<Value, InvokeError>),
}

#[derive(Debug)]
pub(crate) struct CallSlot {
    stage: Mutex<Stage>,
    finished: Condvar,
}

impl CallSlot {
    fn lock(&self) -> MutexGuard<'_, Stage> {
        self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dispatched(&self) {
        let mut stage = self.lock();
        if matches!(*stage, Stage::Pending) {
            *stage = Stage::Dispatched;
        }
    }

    pub(crate) fn complete(&self, outcome: Result<Value, InvokeError>) {
        *self.lock() = Stage::Done(outcome);
        self.finished.notify_all();
    }

    fn wait_outcome(&self) -> Result<Value, InvokeError> {
        let mut stage = self.lock();
        loop {
            if let Stage::Done(outcome) = &*stage {
                return outcome.clone();
            }
            stage = self
                .finished
                .wait(stage)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Handle to a call running (or queued) on a pool.
#[derive(Debug, Clone)]
pub struct AsyncResult {
    slot: Arc<CallSlot>,
}

impl AsyncResult {
    pub(crate) fn pending() -> Self {
        Self {
            slot: Arc::new(CallSlot {
                stage: Mutex::new(Stage::Pending),
                finished: Condvar::new(),
            }),
        }
    }

    pub(crate) fn completed(outcome: Result<Value, InvokeError>) -> Self {
        let handle = Self::pending();
        handle.slot.complete(outcome);
        handle
    }

    pub(crate) fn slot(&self) -> Arc<CallSlot> {
        Arc::clone(&self.slot)
    }

    /// Whether the call has reached a terminal state.
    pub fn ready(&self) -> bool {
        matches!(*self.slot.lock(), Stage::Done(_))
    }

    pub fn state(&self) -> CallState {
        match &*self.slot.lock() {
            Stage::Pending => CallState::Pending,
            Stage::Dispatched => CallState::Dispatched,
            Stage::Done(Ok(_)) => CallState::Succeeded,
            Stage::Done(Err(error)) => {
                CallState::Failed(error.kind().unwrap_or(FailureKind::Transport))
            }
        }
    }

    /// Blocks until the call finishes.
    pub fn wait(&self) {
        let _ = self.slot.wait_outcome();
    }

    /// Blocks for at most `timeout`; returns whether the call finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stage = self.slot.lock();
        while !matches!(*stage, Stage::Done(_)) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stage = self
                .slot
                .finished
                .wait_timeout(stage, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Blocks until the call finishes and returns its result or raises its error.
    pub fn get(&self) -> Result<Value, InvokeError> {
        self.slot.wait_outcome()
    }
}
