//! # Task Application Pipeline
//!
//! A single worker applies committed batches to the application state
//! machine, one [`Task`] at a time, and reports each outcome on the task's
//! completion channel.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use coord_core::shutdown;
use coord_core::state_machine::StateMachine;
use coord_core::{LogEntry, Result, Snapshot};

/// Receives the outcome of one submitted [`Task`].
pub type TaskCompletion = oneshot::Receiver<Result<()>>;

/// One committed batch to apply.
#[derive(Debug)]
pub struct Task {
    pub entries: Vec<LogEntry>,
    pub snapshot: Option<Snapshot>,
    done: oneshot::Sender<Result<()>>,
}

impl Task {
    pub fn new(entries: Vec<LogEntry>, snapshot: Option<Snapshot>) -> (Self, TaskCompletion) {
        let (done, completion) = oneshot::channel();
        (
            Self {
                entries,
                snapshot,
                done,
            },
            completion,
        )
    }

    /// Reports the outcome to the submitter.
    pub fn complete(self, result: Result<()>) {
        if self.done.send(result).is_err() {
            debug!("Task submitter went away before completion");
        }
    }
}

/// Worker owning the state machine.
pub struct TaskRunner<M: StateMachine> {
    state_machine: M,
    tasks: mpsc::Receiver<Task>,
    shutdown: watch::Receiver<bool>,
}

impl<M: StateMachine> TaskRunner<M> {
    /// Starts the worker. Returns the submission queue and a handle that
    /// yields the state machine back once the worker stopped.
    pub fn spawn(
        state_machine: M,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Sender<Task>, JoinHandle<M>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let runner = Self {
            state_machine,
            tasks: rx,
            shutdown,
        };
        (tx, tokio::spawn(runner.run()))
    }

    async fn run(mut self) -> M {
        loop {
            let task = tokio::select! {
                _ = shutdown::requested(&mut self.shutdown) => break,
                task = self.tasks.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            // Not raced against shutdown: an accepted task is always finished.
            let result = self
                .state_machine
                .apply(&task.entries, task.snapshot.as_ref())
                .await;
            if let Err(e) = &result {
                error!("Failed to apply {} committed entries: {}", task.entries.len(), e);
            }
            task.complete(result);
        }

        debug!("Task pipeline stopped");
        self.state_machine
    }
}
