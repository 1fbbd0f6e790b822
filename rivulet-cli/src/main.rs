use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use rivulet_api::StreamsBuilder;
use rivulet_api::options::Produced;
use rivulet_core::broker::Broker;
use rivulet_core::codec::{IntegerSerde, JsonSerde, StringSerde};
use rivulet_core::config::StreamsConfig;
use rivulet_core::consumer::{Consumer, ConsumerConfig, ListenerContainer};
use rivulet_core::producer::{Producer, ProducerConfig};
use rivulet_core::runtime::{RuntimeState, StreamsRuntime};
use rivulet_core::time::current_time_ms;
use rivulet_core::topology::Topology;
use rivulet_core::types::Record;
use rivulet_core::window::TimeWindows;

const INPUT_TOPIC: &str = "streamingTopic1";
const THROUGH_TOPIC: &str = "foos";
const OUTPUT_TOPIC: &str = "streamingTopic2";
const STORE: &str = "windowStore";
const MIN_OUTPUT_LEN: usize = 40;

#[derive(Parser, Debug)]
#[command(name = "rivulet")]
#[command(about = "Rivulet reference pipeline runner", long_about = None)]
struct Cli {
    /// JSON object of streams properties.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Property override, `key=value`. Repeatable; applied after `--config`.
    #[arg(long = "prop", global = true, value_parser = parse_prop)]
    props: Vec<(String, String)>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed messages through the upper-case / window-concatenate pipeline.
    Run {
        #[arg(long, default_value_t = 2)]
        partitions: u32,
        /// Message sent with key 0. Repeatable.
        #[arg(long = "message", default_values_t = default_messages())]
        messages: Vec<String>,
        #[arg(long, default_value_t = 1_000)]
        window_ms: u64,
        /// How long to wait for pipeline output before stopping.
        #[arg(long, default_value_t = 2_000)]
        wait_ms: u64,
    },
    /// Print the reference topology.
    Describe {
        #[arg(long, default_value_t = 1_000)]
        window_ms: u64,
    },
    /// Print the effective streams properties.
    Config,
}

/// A property value in the JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PropValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl std::fmt::Display for PropValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropValue::Text(s) => f.write_str(s),
            PropValue::Number(n) => write!(f, "{n}"),
            PropValue::Flag(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Foo {
    name: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), &cli.props)?;
    match cli.command {
        Commands::Run {
            partitions,
            messages,
            window_ms,
            wait_ms,
        } => run(
            config,
            partitions,
            &messages,
            Duration::from_millis(window_ms),
            Duration::from_millis(wait_ms),
        )?,
        Commands::Describe { window_ms } => {
            print!("{}", reference_topology(Duration::from_millis(window_ms)).describe());
        }
        Commands::Config => {
            for (key, value) in config.to_props() {
                println!("{key}={value}");
            }
        }
    }
    Ok(())
}

fn default_messages() -> Vec<String> {
    vec![
        "foo1".to_string(),
        "foo2".to_string(),
        "the quick brown fox jumps over".to_string(),
        " the lazy dog".to_string(),
    ]
}

fn parse_prop(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn load_config(path: Option<&Path>, overrides: &[(String, String)]) -> anyhow::Result<StreamsConfig> {
    let mut props: BTreeMap<String, String> = BTreeMap::from([
        ("application.id".to_string(), "rivulet-reference".to_string()),
        ("bootstrap.servers".to_string(), "localhost:9092".to_string()),
        ("default.key.serde".to_string(), "integer".to_string()),
        ("default.value.serde".to_string(), "string".to_string()),
        ("default.timestamp.extractor".to_string(), "wallclock".to_string()),
    ]);
    if let Some(path) = path {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let file: BTreeMap<String, PropValue> = serde_json::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        props.extend(file.into_iter().map(|(k, v)| (k, v.to_string())));
    }
    props.extend(overrides.iter().cloned());
    Ok(StreamsConfig::from_props(props)?)
}

/// streamingTopic1 → upper-case → Foo → foos → name → windowed concatenation
/// per key → values longer than 40 characters → streamingTopic2
///
/// Input records are also printed as they arrive.
fn reference_topology(window: Duration) -> Topology {
    let builder = StreamsBuilder::new();
    let input = builder.stream::<i32, String>(INPUT_TOPIC);
    input.print("input");
    input
        .map_values(|value: String| value.to_uppercase())
        .map(|key: i32, value: String| (key, Foo { name: value }))
        .through(
            THROUGH_TOPIC,
            Produced::with(IntegerSerde, JsonSerde::<Foo>::new()),
        )
        .map(|key: i32, foo: Foo| (key, foo.name))
        .group_by_key()
        .windowed_by(TimeWindows::of(window))
        .reduce(|acc: &String, value: &String| format!("{acc}{value}"), STORE)
        .to_stream()
        .map(|key, value: String| (key.into_key(), value))
        .filter(|_key: &i32, value: &String| value.len() > MIN_OUTPUT_LEN)
        .to(OUTPUT_TOPIC);
    builder.build()
}

fn run(
    config: StreamsConfig,
    partitions: u32,
    messages: &[String],
    window: Duration,
    wait: Duration,
) -> anyhow::Result<()> {
    let address = config
        .bootstrap_servers
        .first()
        .cloned()
        .context("bootstrap.servers is empty")?;
    let broker = Arc::new(Broker::new(address));
    for topic in [INPUT_TOPIC, THROUGH_TOPIC, OUTPUT_TOPIC] {
        broker.create_topic(topic, partitions)?;
    }

    let runtime = StreamsRuntime::new(reference_topology(window), config, Arc::clone(&broker));
    runtime.set_state_listener(|new: RuntimeState, old: RuntimeState| {
        tracing::info!(%old, %new, "streams state changed");
    })?;
    runtime.set_uncaught_exception_handler(Arc::new(|thread: &str, error: &rivulet_core::StreamsError| {
        tracing::error!(thread, %error, "stream thread died");
    }))?;

    let mut consumer = Consumer::new(
        Arc::clone(&broker),
        IntegerSerde,
        StringSerde,
        ConsumerConfig::new("rivulet-cli-listener"),
    );
    consumer.subscribe(OUTPUT_TOPIC)?;
    let (tx, rx) = unbounded::<Record<i32, String>>();
    let mut listener = ListenerContainer::start(
        "rivulet-listener",
        consumer,
        Duration::from_millis(100),
        move |record: Record<i32, String>| {
            let _ = tx.send(record);
        },
    )?;

    runtime.start()?;

    let producer = Producer::new(
        Arc::clone(&broker),
        IntegerSerde,
        StringSerde,
        ProducerConfig::default(),
    )?;
    let started = current_time_ms();
    for message in messages {
        producer.send_at(INPUT_TOPIC, &0, message, started)?;
    }
    producer.flush();

    let deadline = Instant::now() + wait;
    let mut received = 0usize;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(record) => {
                received += 1;
                println!(
                    "{OUTPUT_TOPIC}[{}@{}] {} => {}",
                    record.partition, record.offset, record.key, record.value
                );
            }
            Err(_) => break,
        }
    }

    runtime.stop();
    listener.stop();
    println!(
        "processed={} dropped_late={} commits={} output_records={received}",
        runtime.metrics().processed_records(),
        runtime.metrics().dropped_late_records(),
        runtime.metrics().commits(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use rivulet_core::time::TimestampExtractorKind;

    use super::*;

    #[test]
    fn test_default_config_uses_wallclock_timestamps() {
        let config = load_config(None, &[]).unwrap();
        assert_eq!(config.application_id, "rivulet-reference");
        assert_eq!(config.timestamp_extractor, TimestampExtractorKind::Wallclock);

        let overridden = load_config(
            None,
            &[("default.timestamp.extractor".to_string(), "record".to_string())],
        )
        .unwrap();
        assert_eq!(overridden.timestamp_extractor, TimestampExtractorKind::Record);
    }

    #[test]
    fn test_reference_topology_prints_the_input_stream() {
        let description = reference_topology(Duration::from_secs(1)).describe();
        let lines: Vec<&str> = description.lines().collect();
        let second = lines
            .iter()
            .position(|l| l.trim_start().starts_with("Sub-topology 1"))
            .unwrap();
        let first_sub_topology = &lines[..second];

        assert!(first_sub_topology[2].contains(INPUT_TOPIC), "{description}");
        let printers: Vec<&&str> = first_sub_topology
            .iter()
            .filter(|l| l.contains("KSTREAM-PRINTER"))
            .collect();
        assert_eq!(printers.len(), 1, "{description}");
        // a direct child of the source
        assert!(printers[0].starts_with("      Processor: "), "{description}");
        assert!(!description[description.find("Sub-topology 1").unwrap()..].contains("PRINTER"));
    }

    #[test]
    fn test_parse_prop() {
        assert_eq!(
            parse_prop("poll.ms = 10").unwrap(),
            ("poll.ms".to_string(), "10".to_string())
        );
        assert!(parse_prop("poll.ms").is_err());
    }
}
