//! # Streams runtime
//!
//! Executes a [`Topology`] against a [`Broker`] with a fixed pool of stream
//! threads.
//!
//! ```text
//!            start()                       all threads up
//! Created ───────────▶ Rebalancing ─────────────────────▶ Running
//!    ▲                     │                                │  │
//!    │ (config error:      │ spawn failure                  │  │ fatal error
//!    │  state unchanged)   ▼                                │  ▼ on any thread
//!                       Stopped ◀──────── stop() ───────────┘ Error
//!                          │  ▲                                │
//!                          │  └──────────── stop() ────────────┘
//!                          └──── start() ──▶ Rebalancing ...
//! ```
//!
//! Every source topic-partition becomes one task; tasks are dealt round-robin
//! to `num.stream.threads` threads. A task owns the window stores of its
//! sub-topology, so each key's windows are only ever touched by one thread.
//!
//! State transitions, listener callbacks and offset commits are serialized by
//! one coordination lock. Listeners run on the thread that caused the
//! transition and must not call back into [`StreamsRuntime::start`] or
//! [`StreamsRuntime::stop`].

mod task;
mod thread;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::broker::Broker;
use crate::config::StreamsConfig;
use crate::error::{Result, StreamsError};
use crate::topology::Topology;
use crate::types::{Offset, TopicPartition};

use self::task::{StreamTask, TaskPlan};
use self::thread::StreamThread;

/// Lifecycle state of a [`StreamsRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeState {
    Created,
    Rebalancing,
    Running,
    Error,
    Stopped,
}

impl RuntimeState {
    pub fn can_transition_to(&self, next: RuntimeState) -> bool {
        use RuntimeState::{Created, Error, Rebalancing, Running, Stopped};
        matches!(
            (self, next),
            (Created, Rebalancing)
                | (Rebalancing, Running | Error | Stopped)
                | (Running, Rebalancing | Error | Stopped)
                | (Error, Stopped)
                | (Stopped, Rebalancing)
        )
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuntimeState::Created => "CREATED",
            RuntimeState::Rebalancing => "REBALANCING",
            RuntimeState::Running => "RUNNING",
            RuntimeState::Error => "ERROR",
            RuntimeState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of one stream thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    Created,
    Running,
    Error,
    Stopped,
}

/// Observer of runtime state transitions.
pub trait StateListener: Send + Sync {
    fn on_change(&self, new_state: RuntimeState, old_state: RuntimeState);
}

impl<F> StateListener for F
where
    F: Fn(RuntimeState, RuntimeState) + Send + Sync,
{
    fn on_change(&self, new_state: RuntimeState, old_state: RuntimeState) {
        self(new_state, old_state)
    }
}

/// Receives the fatal error that terminated a stream thread.
pub trait UncaughtExceptionHandler: Send + Sync {
    fn uncaught_exception(&self, thread_name: &str, error: &StreamsError);
}

impl<F> UncaughtExceptionHandler for F
where
    F: Fn(&str, &StreamsError) + Send + Sync,
{
    fn uncaught_exception(&self, thread_name: &str, error: &StreamsError) {
        self(thread_name, error)
    }
}

/// Snapshot of one stream thread.
#[derive(Clone)]
pub struct ThreadMetadata {
    pub name: String,
    pub state: ThreadState,
    pub assigned: Vec<TopicPartition>,
    /// The handler this thread reports fatal errors to.
    pub uncaught_exception_handler: Option<Arc<dyn UncaughtExceptionHandler>>,
}

impl std::fmt::Debug for ThreadMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadMetadata")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("assigned", &self.assigned)
            .field(
                "uncaught_exception_handler",
                &self.uncaught_exception_handler.is_some(),
            )
            .finish()
    }
}

/// Counters accumulated over the lifetime of a runtime, across restarts.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    processed: AtomicU64,
    dropped_late: AtomicU64,
    commits: AtomicU64,
}

impl RuntimeMetrics {
    pub fn processed_records(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Records dropped because their window was already evicted.
    pub fn dropped_late_records(&self) -> u64 {
        self.dropped_late.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

/// State shared between the runtime handle and its stream threads.
struct Shared {
    application_id: String,
    state: RwLock<RuntimeState>,
    /// Serializes transitions, listener notification and commits.
    coordination: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
    handler: RwLock<Option<Arc<dyn UncaughtExceptionHandler>>>,
    shutdown: AtomicBool,
    metrics: Arc<RuntimeMetrics>,
}

impl Shared {
    fn state(&self) -> RuntimeState {
        *self.state.read()
    }

    /// Move to `next` and notify listeners. Invalid transitions are ignored.
    fn transition(&self, next: RuntimeState) -> bool {
        let _guard = self.coordination.lock();
        let previous = {
            let mut state = self.state.write();
            let current = *state;
            if !current.can_transition_to(next) {
                tracing::debug!(from = %current, to = %next, "ignoring state transition");
                return false;
            }
            std::mem::replace(&mut *state, next)
        };
        tracing::info!(
            application_id = %self.application_id,
            from = %previous,
            to = %next,
            "state transition"
        );
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_change(next, previous);
        }
        true
    }

    /// Store offsets for the application's group under the coordination lock.
    fn commit(&self, broker: &Broker, offsets: &[(TopicPartition, Offset)]) {
        if offsets.is_empty() {
            return;
        }
        let _guard = self.coordination.lock();
        broker.commit(&self.application_id, offsets);
        self.metrics.commits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(count = offsets.len(), "committed offsets");
    }

    fn check_configurable(&self, what: &str) -> Result<()> {
        match self.state() {
            RuntimeState::Created | RuntimeState::Stopped => Ok(()),
            other => Err(StreamsError::IllegalState(format!(
                "{what} can only be set in CREATED or STOPPED, current state is {other}"
            ))),
        }
    }
}

struct StreamThreadHandle {
    name: String,
    state: Arc<RwLock<ThreadState>>,
    assigned: Vec<TopicPartition>,
    handler: Option<Arc<dyn UncaughtExceptionHandler>>,
    join: JoinHandle<()>,
}

/// A runnable streams application.
pub struct StreamsRuntime {
    topology: Arc<Topology>,
    config: StreamsConfig,
    broker: Arc<Broker>,
    shared: Arc<Shared>,
    /// Live threads of the current run. Also serializes start and stop.
    threads: Mutex<Vec<StreamThreadHandle>>,
}

impl StreamsRuntime {
    pub fn new(topology: Topology, config: StreamsConfig, broker: Arc<Broker>) -> Self {
        let shared = Arc::new(Shared {
            application_id: config.application_id.clone(),
            state: RwLock::new(RuntimeState::Created),
            coordination: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            handler: RwLock::new(None),
            shutdown: AtomicBool::new(false),
            metrics: Arc::new(RuntimeMetrics::default()),
        });
        Self {
            topology: Arc::new(topology),
            config,
            broker,
            shared,
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.shared.state()
    }

    pub fn config(&self) -> &StreamsConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.shared.metrics
    }

    pub fn describe(&self) -> String {
        self.topology.describe()
    }

    /// Replace all state listeners with `listener`.
    pub fn set_state_listener(&self, listener: impl StateListener + 'static) -> Result<()> {
        self.shared.check_configurable("state listener")?;
        *self.shared.listeners.write() = vec![Arc::new(listener)];
        Ok(())
    }

    /// Register an additional listener; listeners run in registration order.
    pub fn add_state_listener(&self, listener: impl StateListener + 'static) -> Result<()> {
        self.shared.check_configurable("state listener")?;
        self.shared.listeners.write().push(Arc::new(listener));
        Ok(())
    }

    /// Handler for fatal stream-thread errors. Applies from the next `start()`.
    pub fn set_uncaught_exception_handler(
        &self,
        handler: Arc<dyn UncaughtExceptionHandler>,
    ) -> Result<()> {
        self.shared.check_configurable("uncaught exception handler")?;
        *self.shared.handler.write() = Some(handler);
        Ok(())
    }

    /// Start processing.
    ///
    /// Configuration and topology problems are reported before any state
    /// change. Only valid in `Created` or `Stopped`.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();
        let state = self.state();
        if !matches!(state, RuntimeState::Created | RuntimeState::Stopped) {
            return Err(StreamsError::IllegalState(format!(
                "cannot start from {state}"
            )));
        }

        self.config.validate(self.broker.address())?;
        let plan = Arc::new(TaskPlan::resolve(&self.topology, &self.config, &self.broker)?);
        for topic in plan.internal_topics() {
            self.broker.ensure_topic(topic, plan.internal_partitions())?;
        }
        let tasks = plan.create_tasks(&self.config, &self.broker, &self.shared.metrics)?;

        self.shared.shutdown.store(false, Ordering::SeqCst);
        self.shared.transition(RuntimeState::Rebalancing);

        let thread_count = self.config.num_stream_threads;
        let mut assignments: Vec<Vec<StreamTask>> = (0..thread_count).map(|_| Vec::new()).collect();
        for (index, task) in tasks.into_iter().enumerate() {
            assignments[index % thread_count].push(task);
        }

        let handler = self.shared.handler.read().clone();
        for (index, tasks) in assignments.into_iter().enumerate() {
            let name = format!("{}-StreamThread-{}", self.shared.application_id, index + 1);
            let assigned: Vec<TopicPartition> = tasks.iter().map(|t| t.id().clone()).collect();
            tracing::info!(thread = %name, tasks = ?assigned, "assigned tasks");

            let state = Arc::new(RwLock::new(ThreadState::Created));
            let stream_thread = StreamThread::new(
                name.clone(),
                tasks,
                Arc::clone(&self.broker),
                Arc::clone(&self.shared),
                Arc::clone(&state),
                handler.clone(),
                &self.config,
            );
            let spawned = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || stream_thread.run());
            match spawned {
                Ok(join) => threads.push(StreamThreadHandle {
                    name,
                    state,
                    assigned,
                    handler: handler.clone(),
                    join,
                }),
                Err(e) => {
                    self.shared.shutdown.store(true, Ordering::SeqCst);
                    join_all(&mut threads);
                    self.shared.transition(RuntimeState::Stopped);
                    return Err(StreamsError::Thread(format!("spawn {name}: {e}")));
                }
            }
        }

        self.shared.transition(RuntimeState::Running);
        Ok(())
    }

    /// Stop all stream threads and wait for them to exit.
    ///
    /// Each thread finishes the record in hand and commits what it processed.
    /// A no-op in `Created` or `Stopped`.
    pub fn stop(&self) {
        let mut threads = self.threads.lock();
        if matches!(self.state(), RuntimeState::Created | RuntimeState::Stopped) {
            return;
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        join_all(&mut threads);
        self.shared.transition(RuntimeState::Stopped);
    }

    /// Metadata of the threads of the current run.
    pub fn threads(&self) -> Vec<ThreadMetadata> {
        self.threads
            .lock()
            .iter()
            .map(|t| ThreadMetadata {
                name: t.name.clone(),
                state: *t.state.read(),
                assigned: t.assigned.clone(),
                uncaught_exception_handler: t.handler.clone(),
            })
            .collect()
    }
}

fn join_all(threads: &mut Vec<StreamThreadHandle>) {
    for handle in threads.drain(..) {
        if handle.join.join().is_err() {
            tracing::error!(thread = %handle.name, "stream thread panicked");
        }
    }
}

impl Drop for StreamsRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
