//! Stream thread event loop.
//!
//! ```text
//! loop until shutdown {
//!     batch = broker.poll(positions of assigned tasks, poll.ms)
//!     for record in batch (per partition, offset order) {
//!         task.process(record)          // panics caught per record
//!         on error: fail() and exit
//!     }
//!     every commit.interval.ms: commit positions
//! }
//! final commit
//! ```

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::broker::Broker;
use crate::config::StreamsConfig;
use crate::error::StreamsError;
use crate::types::{Offset, RawRecord, TopicPartition};

use super::task::StreamTask;
use super::{RuntimeState, Shared, ThreadState, UncaughtExceptionHandler};

const MAX_POLL_RECORDS: usize = 500;

pub(super) struct StreamThread {
    name: String,
    tasks: Vec<StreamTask>,
    broker: Arc<Broker>,
    shared: Arc<Shared>,
    state: Arc<RwLock<ThreadState>>,
    handler: Option<Arc<dyn UncaughtExceptionHandler>>,
    poll_timeout: Duration,
    commit_interval: Duration,
}

impl StreamThread {
    pub(super) fn new(
        name: String,
        tasks: Vec<StreamTask>,
        broker: Arc<Broker>,
        shared: Arc<Shared>,
        state: Arc<RwLock<ThreadState>>,
        handler: Option<Arc<dyn UncaughtExceptionHandler>>,
        config: &StreamsConfig,
    ) -> Self {
        Self {
            name,
            tasks,
            broker,
            shared,
            state,
            handler,
            poll_timeout: config.poll_timeout,
            commit_interval: config.commit_interval,
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    pub(super) fn run(mut self) {
        *self.state.write() = ThreadState::Running;
        tracing::info!(thread = %self.name, tasks = self.tasks.len(), "stream thread started");

        let mut last_commit = Instant::now();
        while !self.shutdown_requested() {
            if let Err(error) = self.run_once() {
                self.fail(error);
                return;
            }
            if last_commit.elapsed() >= self.commit_interval {
                self.commit();
                last_commit = Instant::now();
            }
        }

        self.commit();
        *self.state.write() = ThreadState::Stopped;
        tracing::info!(thread = %self.name, "stream thread stopped");
    }

    /// Poll once and process what came back.
    fn run_once(&mut self) -> Result<(), StreamsError> {
        if self.tasks.is_empty() {
            std::thread::sleep(self.poll_timeout);
            return Ok(());
        }
        let positions: Vec<(TopicPartition, Offset)> = self
            .tasks
            .iter()
            .map(|t| (t.id().clone(), t.position()))
            .collect();

        let batches = match self
            .broker
            .poll(&positions, MAX_POLL_RECORDS, self.poll_timeout)
        {
            Ok(batches) => batches,
            Err(e) if e.is_transient() => {
                tracing::warn!(thread = %self.name, error = %e, "poll failed, backing off");
                std::thread::sleep(self.poll_timeout);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for (tp, records) in batches {
            let Some(index) = self.tasks.iter().position(|t| *t.id() == tp) else {
                continue;
            };
            for record in &records {
                // Finish the record in hand, leave the rest for the next run.
                if self.shutdown_requested() {
                    return Ok(());
                }
                process_guarded(&mut self.tasks[index], record)?;
            }
        }
        Ok(())
    }

    fn commit(&mut self) {
        let offsets: Vec<_> = self
            .tasks
            .iter()
            .filter_map(StreamTask::pending_commit)
            .collect();
        self.shared.commit(&self.broker, &offsets);
        for task in &mut self.tasks {
            let position = task.position();
            task.mark_committed(position);
        }
    }

    fn fail(&mut self, error: StreamsError) {
        tracing::error!(thread = %self.name, %error, "stream thread failed");
        *self.state.write() = ThreadState::Error;
        self.commit();
        match &self.handler {
            Some(handler) => handler.uncaught_exception(&self.name, &error),
            None => tracing::warn!(
                thread = %self.name,
                "no uncaught exception handler set, error is only logged"
            ),
        }
        self.shared.transition(RuntimeState::Error);
    }
}

/// Process one record, turning a panic inside user code into an error.
fn process_guarded(task: &mut StreamTask, record: &RawRecord) -> Result<(), StreamsError> {
    let id = task.id().clone();
    match catch_unwind(AssertUnwindSafe(|| task.process(record))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(StreamsError::Processing { task, message })) => {
            Err(StreamsError::Processing { task, message })
        }
        Ok(Err(e)) => Err(StreamsError::Processing {
            task: id,
            message: format!("offset {}: {e}", record.offset),
        }),
        Err(payload) => Err(StreamsError::Processing {
            task: id,
            message: format!("offset {}: panicked: {}", record.offset, panic_message(payload.as_ref())),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
