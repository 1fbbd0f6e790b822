//! # Rivulet API
//!
//! Typed DSL for building stream processing topologies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rivulet_api::StreamsBuilder;
//! use rivulet_api::options::Produced;
//! use rivulet_core::broker::Broker;
//! use rivulet_core::codec::{IntegerSerde, StringSerde};
//! use rivulet_core::config::StreamsConfig;
//! use rivulet_core::runtime::StreamsRuntime;
//! use rivulet_core::window::TimeWindows;
//!
//! let broker = Arc::new(Broker::new("localhost:9092"));
//! broker.create_topic("in", 2).unwrap();
//! broker.create_topic("out", 2).unwrap();
//!
//! let builder = StreamsBuilder::new();
//! builder
//!     .stream::<i32, String>("in")
//!     .map_values(|v: String| v.to_uppercase())
//!     .group_by_key()
//!     .windowed_by(TimeWindows::of(Duration::from_millis(1_000)))
//!     .reduce(|a: &String, b: &String| format!("{a}{b}"), "concat")
//!     .to_stream()
//!     .map(|k, v| (k.into_key(), v))
//!     .to_with("out", Produced::with(IntegerSerde, StringSerde));
//!
//! let config = StreamsConfig::from_props([
//!     ("application.id", "demo"),
//!     ("bootstrap.servers", "localhost:9092"),
//!     ("default.key.serde", "integer"),
//!     ("default.value.serde", "string"),
//! ])
//! .unwrap();
//! let runtime = StreamsRuntime::new(builder.build(), config, broker);
//! runtime.start().unwrap();
//! runtime.stop();
//! ```
//!
//! - [`builder`] — [`StreamsBuilder`]: entry point that adds source topics and
//!   yields the finished [`Topology`](rivulet_core::topology::Topology).
//! - [`kstream`] — [`KStream`](kstream::KStream): per-record operations, topic
//!   writes and grouping.
//! - [`grouped`] — grouped and windowed streams, windowed `reduce` and [`KTable`](grouped::KTable).
//! - [`options`] — [`Consumed`](options::Consumed), [`Produced`](options::Produced)
//!   and [`Grouped`](options::Grouped) serde choices.

pub mod builder;
pub mod grouped;
pub mod kstream;
pub mod options;

pub use builder::StreamsBuilder;
pub use rivulet_core;
