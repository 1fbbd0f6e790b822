//! # Rivulet Core
//!
//! Engine components for the Rivulet stream processor.
//!
//! - [`types`] — Records, topic-partitions and the type-erased
//!   [`BoxedValue`](types::BoxedValue) that flows between processors.
//! - [`broker`] — In-process partitioned, append-only topic logs with
//!   blocking polls and per-group committed offsets.
//! - [`codec`] — [`Serde`](codec::Serde) implementations and default serde selection.
//! - [`partitioner`] — Key-hash routing of records to partitions.
//! - [`producer`] / [`consumer`] — Clients used to feed and observe topologies.
//! - [`time`] — Timestamp extractors.
//! - [`window`] / [`state`] — Time windows and the per-task window store.
//! - [`topology`] — The processor graph compiled by the DSL.
//! - [`runtime`] — [`StreamsRuntime`](runtime::StreamsRuntime): worker threads,
//!   lifecycle, commits and error reporting.

pub mod broker;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod partitioner;
pub mod producer;
pub mod runtime;
pub mod state;
pub mod time;
pub mod topology;
pub mod types;
pub mod window;

pub use error::{Result, StreamsError};
