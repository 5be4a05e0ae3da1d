//! Suspendable computations
//!
//! A `Continuation` is a unit of handler logic that can park mid-execution
//! and be resumed with a value by the scheduler. `TaskContinuation` backs it
//! with a tokio task parked on a channel: the task signals every suspension
//! and completion through a yield channel, and the scheduler answers with a
//! `Resume` value on the resume channel.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::types::{ComputationStatus, Resume};

/// Final output of a terminated computation
///
/// `Ok(Value::Null)` means the computation returned nothing to deliver.
pub type Output = Result<serde_json::Value>;

/// A resumable unit of handler logic owned by the scheduler
#[async_trait]
pub trait Continuation: Send {
    /// Current lifecycle state
    fn status(&self) -> ComputationStatus;

    /// Resume a suspended computation with `value`
    ///
    /// Returns once the computation has parked again or terminated.
    async fn resume(&mut self, value: Resume) -> Result<()>;

    /// Take the final output of a terminated computation (once)
    fn take_output(&mut self) -> Option<Output>;
}

enum Yielded {
    Suspended,
    Completed(Output),
}

/// Handle given to a computation body for parking itself
pub struct Suspender {
    yield_tx: mpsc::UnboundedSender<Yielded>,
    resume_rx: mpsc::UnboundedReceiver<Resume>,
}

impl Suspender {
    /// Park until the scheduler resumes this computation
    ///
    /// Fails with `TransportError::Abandoned` when the owning session was
    /// torn down while parked.
    pub async fn suspend(&mut self) -> Result<Resume> {
        self.yield_tx
            .send(Yielded::Suspended)
            .map_err(|_| TransportError::Abandoned)?;
        self.resume_rx.recv().await.ok_or(TransportError::Abandoned)
    }
}

/// Continuation backed by a spawned tokio task
pub struct TaskContinuation {
    resume_tx: mpsc::UnboundedSender<Resume>,
    yield_rx: mpsc::UnboundedReceiver<Yielded>,
    status: ComputationStatus,
    output: Option<Output>,
}

impl TaskContinuation {
    /// Spawn `body` and run it until it first suspends or finishes
    pub async fn start<F, Fut, T>(body: F) -> Self
    where
        F: FnOnce(Suspender) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let (yield_tx, yield_rx) = mpsc::unbounded_channel();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();

        let suspender = Suspender {
            yield_tx: yield_tx.clone(),
            resume_rx,
        };
        let fut = body(suspender);

        tokio::spawn(async move {
            let output = fut
                .await
                .and_then(|value| serde_json::to_value(value).map_err(TransportError::from));
            // Receiver is gone when the session was abandoned
            let _ = yield_tx.send(Yielded::Completed(output));
        });

        let mut continuation = Self {
            resume_tx,
            yield_rx,
            status: ComputationStatus::Running,
            output: None,
        };
        continuation.wait_for_yield().await;
        continuation
    }

    async fn wait_for_yield(&mut self) {
        match self.yield_rx.recv().await {
            Some(Yielded::Suspended) => self.status = ComputationStatus::Suspended,
            Some(Yielded::Completed(output)) => {
                self.status = ComputationStatus::Terminated;
                self.output = Some(output);
            }
            None => {
                self.status = ComputationStatus::Terminated;
                self.output = Some(Err(TransportError::Computation(
                    "task exited without producing a result".to_string(),
                )));
            }
        }
    }
}

#[async_trait]
impl Continuation for TaskContinuation {
    fn status(&self) -> ComputationStatus {
        self.status
    }

    async fn resume(&mut self, value: Resume) -> Result<()> {
        if self.status != ComputationStatus::Suspended {
            return Err(TransportError::Computation(format!(
                "cannot resume a computation in state {:?}",
                self.status
            )));
        }

        self.status = ComputationStatus::Running;
        if self.resume_tx.send(value).is_err() {
            self.status = ComputationStatus::Terminated;
            self.output = Some(Err(TransportError::Computation(
                "task dropped its suspender".to_string(),
            )));
            return Ok(());
        }
        self.wait_for_yield().await;
        Ok(())
    }

    fn take_output(&mut self) -> Option<Output> {
        self.output.take()
    }
}
