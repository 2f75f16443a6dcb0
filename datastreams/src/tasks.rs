//! Background writes requested by [`crate::writers::AsyncWriter`].
//!
//! A [`TaskQueue`] dispatches every job to its own tokio task. Jobs are independent and only
//! report their outcome through the logs and the [`TaskReport`] returned when the queue stops.

use datastreams_config::shared::ComponentConfig;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, EtlResult};
use crate::factories::DataStreamFactory;
use crate::types::StreamEntry;
use crate::{bail, etl_error};

#[derive(Debug)]
enum Task {
    WriteEntry {
        writer: ComponentConfig,
        entry: StreamEntry,
    },
    WriteManyEntries {
        writer: ComponentConfig,
        entries: Vec<StreamEntry>,
    },
}

impl Task {
    fn entry_count(&self) -> usize {
        match self {
            Task::WriteEntry { .. } => 1,
            Task::WriteManyEntries { entries, .. } => entries.len(),
        }
    }
}

/// Counters aggregated over all jobs run by a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub jobs: usize,
    pub succeeded: usize,
    pub errored: usize,
}

impl TaskReport {
    fn job(succeeded: usize, errored: usize) -> Self {
        Self {
            jobs: 1,
            succeeded,
            errored,
        }
    }

    fn merge(&mut self, other: TaskReport) {
        self.jobs += other.jobs;
        self.succeeded += other.succeeded;
        self.errored += other.errored;
    }
}

/// Sending side of the queue, cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    /// Starts the dispatcher. Writers of the jobs are built with `factory`.
    ///
    /// `factory` must not itself hand out async writers bound to this queue.
    pub fn start(factory: DataStreamFactory) -> (TaskQueue, TaskQueueHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let handle = tokio::spawn(dispatch(Arc::new(factory), rx, shutdown_rx));

        (TaskQueue { tx }, TaskQueueHandle { shutdown_tx, handle })
    }

    /// Queues writing a single entry with the writer described by `writer`.
    pub fn write_entry(&self, writer: ComponentConfig, entry: StreamEntry) -> EtlResult<()> {
        self.send(Task::WriteEntry { writer, entry })
    }

    /// Queues writing a group of entries with one `write_many` call.
    pub fn write_many_entries(
        &self,
        writer: ComponentConfig,
        entries: Vec<StreamEntry>,
    ) -> EtlResult<()> {
        self.send(Task::WriteManyEntries { writer, entries })
    }

    fn send(&self, task: Task) -> EtlResult<()> {
        if self.tx.send(task).is_err() {
            bail!(ErrorKind::InvalidState, "Task queue is stopped");
        }

        Ok(())
    }
}

/// Handle on the dispatcher of a [`TaskQueue`].
#[derive(Debug)]
pub struct TaskQueueHandle {
    shutdown_tx: ShutdownTx,
    handle: JoinHandle<TaskReport>,
}

impl TaskQueueHandle {
    /// Stops accepting new jobs, waits for the queued and running ones and returns their report.
    pub async fn wait(self) -> EtlResult<TaskReport> {
        // The dispatcher may already be gone if every sender was dropped.
        let _ = self.shutdown_tx.shutdown();

        self.handle
            .await
            .map_err(|err| etl_error!(ErrorKind::InvalidState, "Task queue dispatcher failed", err))
    }
}

async fn dispatch(
    factory: Arc<DataStreamFactory>,
    mut rx: mpsc::UnboundedReceiver<Task>,
    mut shutdown_rx: ShutdownRx,
) -> TaskReport {
    let mut jobs = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            task = rx.recv() => match task {
                Some(task) => {
                    spawn_job(&mut jobs, factory.clone(), task);
                }
                None => break,
            },
            _ = shutdown_rx.changed() => {
                rx.close();
                while let Some(task) = rx.recv().await {
                    spawn_job(&mut jobs, factory.clone(), task);
                }
                break;
            }
        }
    }

    let mut report = TaskReport::default();
    while let Some(outcome) = jobs.join_next().await {
        match outcome {
            Ok(outcome) => report.merge(outcome),
            Err(err) => {
                error!(%err, "write job was cancelled");
                report.merge(TaskReport::job(0, 0));
            }
        }
    }

    info!(
        jobs = report.jobs,
        succeeded = report.succeeded,
        errored = report.errored,
        "task queue stopped"
    );

    report
}

/// Spawns `task` so that a panic in its writer counts all of its entries as errored.
fn spawn_job(jobs: &mut JoinSet<TaskReport>, factory: Arc<DataStreamFactory>, task: Task) {
    let entries = task.entry_count();
    jobs.spawn(async move {
        match AssertUnwindSafe(run(factory, task)).catch_unwind().await {
            Ok(report) => report,
            Err(_) => {
                error!(entries, "write job panicked");
                TaskReport::job(0, entries)
            }
        }
    });
}

async fn run(factory: Arc<DataStreamFactory>, task: Task) -> TaskReport {
    match task {
        Task::WriteEntry { writer, entry } => write_entry(&factory, &writer, entry).await,
        Task::WriteManyEntries { writer, entries } => {
            write_many_entries(&factory, &writer, entries).await
        }
    }
}

async fn write_entry(
    factory: &DataStreamFactory,
    config: &ComponentConfig,
    entry: StreamEntry,
) -> TaskReport {
    let writer = match factory.writer(config) {
        Ok(writer) => writer,
        Err(err) => {
            error!(writer = %config.type_, %err, "failed to create writer");
            return TaskReport::job(0, 1);
        }
    };

    match writer.write(&entry).await {
        Ok(written) if !written.has_errors() => {
            info!(entry = %written.entry, "entry written");
            TaskReport::job(1, 0)
        }
        Ok(written) => {
            error!(entry = %written.entry, errors = ?written.errors, "error writing entry");
            TaskReport::job(0, 1)
        }
        Err(err) => {
            error!(entry = %entry.entry, %err, "error writing entry");
            TaskReport::job(0, 1)
        }
    }
}

async fn write_many_entries(
    factory: &DataStreamFactory,
    config: &ComponentConfig,
    entries: Vec<StreamEntry>,
) -> TaskReport {
    let total = entries.len();
    let writer = match factory.writer(config) {
        Ok(writer) => writer,
        Err(err) => {
            error!(writer = %config.type_, %err, "failed to create writer");
            return TaskReport::job(0, total);
        }
    };

    match writer.write_many(entries).await {
        Ok(written) => {
            let errored: Vec<_> = written.iter().filter(|entry| entry.has_errors()).collect();
            let succeeded = written.len() - errored.len();
            info!(succeeded, "entries written");
            for entry in &errored {
                error!(entry = %entry.entry, errors = ?entry.errors, "error writing entry");
            }

            TaskReport::job(succeeded, errored.len())
        }
        // A failed batch counts every entry as errored.
        Err(err) => {
            error!(entries = total, %err, "error writing batch");
            TaskReport::job(0, total)
        }
    }
}
