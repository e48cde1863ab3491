//! Message store load test.
//!
//! Runs `operations` store or retrieve calls split across `threads` worker
//! threads against an in-memory cluster and reports throughput and latency
//! percentiles. Receivers and message bodies are derived from the Murmur3
//! hash of a per-call counter, so runs are reproducible.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, ensure, Context};
use clap::builder::RangedU64ValueParser;
use clap::{Args, ValueEnum};
use corelib::memory::MemoryCluster;
use corelib::token::murmur3_x64_128;
use corelib::{Router, RouterConfig};
use store::{Message, MessageStore};
use tracing::{debug, info};

type MemoryStore = MessageStore<MemoryCluster, MemoryCluster>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    Insert,
    Select,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => f.write_str("insert"),
            Operation::Select => f.write_str("select"),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct StressArgs {
    /// Worker threads.
    #[arg(long, default_value_t = 1, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub threads: usize,
    /// Total operations, split across threads.
    #[arg(long, default_value_t = 10_000)]
    pub operations: usize,
    #[arg(long, value_enum, default_value_t = Operation::Insert)]
    pub operation: Operation,
    /// Comma-separated hosts of the simulated cluster.
    #[arg(long, value_delimiter = ',', default_value = "127.0.0.1")]
    pub hosts: Vec<String>,
    /// Replicas per range.
    #[arg(long, default_value_t = 3)]
    pub replication: usize,
    /// JSON router configuration to start from. Flags override its fields.
    #[arg(long)]
    pub router_config: Option<PathBuf>,
    /// Connections seeded per host pool.
    #[arg(long)]
    pub connections: Option<usize>,
    /// Distinct receivers messages are spread over.
    #[arg(long, default_value_t = 1_000, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub receivers: usize,
    #[arg(long)]
    pub keyspace: Option<String>,
}

impl StressArgs {
    /// Router settings: the config file if given, else defaults seeded at
    /// the first host, with flag overrides applied.
    pub fn router_config(&self) -> anyhow::Result<RouterConfig> {
        let mut config = match &self.router_config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading router config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing router config {}", path.display()))?
            }
            None => RouterConfig {
                seed_node: self.hosts[0].clone(),
                ..RouterConfig::default()
            },
        };
        if let Some(connections) = self.connections {
            config.connections_per_pool = connections;
        }
        if let Some(keyspace) = &self.keyspace {
            config.keyspace = keyspace.clone();
        }
        Ok(config)
    }
}

/// Outcome of one stress run.
#[derive(Debug, Clone)]
pub struct StressReport {
    pub operation: Operation,
    pub threads: usize,
    pub elapsed: Duration,
    pub hits: usize,
    pub errors: usize,
    /// Per-call latencies, sorted ascending.
    pub latencies: Vec<Duration>,
}

impl StressReport {
    pub fn new(
        operation: Operation,
        threads: usize,
        elapsed: Duration,
        samples: Vec<WorkerSamples>,
    ) -> Self {
        let mut report = Self {
            operation,
            threads,
            elapsed,
            hits: 0,
            errors: 0,
            latencies: Vec::new(),
        };
        for sample in samples {
            report.hits += sample.hits;
            report.errors += sample.errors;
            report.latencies.extend(sample.latencies);
        }
        report.latencies.sort_unstable();
        report
    }

    pub fn operations(&self) -> usize {
        self.latencies.len()
    }

    pub fn qps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.operations() as f64 / secs
        }
    }

    /// Nearest-rank percentile, `p` in `(0, 1]`.
    pub fn percentile(&self, p: f64) -> Duration {
        let n = self.latencies.len();
        if n == 0 {
            return Duration::ZERO;
        }
        let rank = (n as f64 * p).ceil() as usize;
        self.latencies[rank.clamp(1, n) - 1]
    }

    pub fn average(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let nanos: u128 = self.latencies.iter().map(Duration::as_nanos).sum();
        Duration::from_nanos((nanos / self.latencies.len() as u128) as u64)
    }

    pub fn min(&self) -> Duration {
        self.latencies.first().copied().unwrap_or_default()
    }

    pub fn max(&self) -> Duration {
        self.latencies.last().copied().unwrap_or_default()
    }
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Operation: {}", self.operation)?;
        writeln!(f, "Thread count: {}", self.threads)?;
        writeln!(f, "Operations: {} (errors: {})", self.operations(), self.errors)?;
        writeln!(f, "Hits: {}", self.hits)?;
        writeln!(f, "Elapsed: {:?}", self.elapsed)?;
        writeln!(f, "QPS: {:.1}", self.qps())?;
        writeln!(
            f,
            "Latency avg/min/max: {:?} / {:?} / {:?}",
            self.average(),
            self.min(),
            self.max()
        )?;
        writeln!(
            f,
            "Latency .95/.99/.999: {:?} / {:?} / {:?}",
            self.percentile(0.95),
            self.percentile(0.99),
            self.percentile(0.999)
        )
    }
}

/// What one worker thread measured.
#[derive(Debug, Default, Clone)]
pub struct WorkerSamples {
    pub latencies: Vec<Duration>,
    pub hits: usize,
    pub errors: usize,
}

pub fn run(args: &StressArgs) -> anyhow::Result<StressReport> {
    ensure!(
        args.hosts.iter().all(|h| !h.trim().is_empty()),
        "host list contains an empty entry"
    );
    let cluster = MemoryCluster::with_ring(MemoryCluster::evenly_split(&args.hosts, args.replication));
    let config = args.router_config()?;
    let router = Router::new(config, cluster.clone(), cluster).context("starting router")?;
    let store = MessageStore::new(Arc::new(router));

    if args.operation == Operation::Select {
        preload(&store, args.receivers)?;
    }

    info!(
        threads = args.threads,
        operations = args.operations,
        operation = %args.operation,
        "starting stress run"
    );
    let started = Instant::now();
    let samples = thread::scope(|s| {
        let handles: Vec<_> = (0..args.threads)
            .map(|t| {
                let store = store.clone();
                let count = share(args.operations, args.threads, t);
                s.spawn(move || worker(&store, args, t, count))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join())
            .collect::<Result<Vec<_>, _>>()
    })
    .map_err(|_| anyhow!("stress worker panicked"))?;
    let elapsed = started.elapsed();

    store.router().shutdown();
    Ok(StressReport::new(args.operation, args.threads, elapsed, samples))
}

/// Operations run by worker `thread`. The first `operations % threads`
/// workers take one extra so the shares add up to `operations`.
fn share(operations: usize, threads: usize, thread: usize) -> usize {
    operations / threads + usize::from(thread < operations % threads)
}

/// Stores one message for every receiver so selects have something to hit.
fn preload(store: &MemoryStore, receivers: usize) -> anyhow::Result<()> {
    for r in 0..receivers {
        let receiver = receiver_id(r as u64);
        let (high, low) = murmur3_x64_128(receiver.as_bytes());
        store
            .store(&message(receiver, high, low))
            .context("preloading receivers")?;
    }
    debug!(receivers, "preloaded receivers");
    Ok(())
}

fn worker(store: &MemoryStore, args: &StressArgs, thread: usize, count: usize) -> WorkerSamples {
    let mut samples = WorkerSamples {
        latencies: Vec::with_capacity(count),
        ..WorkerSamples::default()
    };
    for i in 0..count {
        let (high, low) = murmur3_x64_128(format!("{thread}:{i}").as_bytes());
        let receiver = receiver_id(high as u64 % args.receivers as u64);

        let started = Instant::now();
        let outcome = match args.operation {
            Operation::Insert => store.store(&message(receiver, high, low)).map(|()| true),
            Operation::Select => store.retrieve(&receiver).map(|found| !found.is_empty()),
        };
        samples.latencies.push(started.elapsed());

        match outcome {
            Ok(true) => samples.hits += 1,
            Ok(false) => {}
            Err(err) => {
                samples.errors += 1;
                debug!(thread, error = %err, "operation failed");
            }
        }
    }
    samples
}

fn receiver_id(n: u64) -> String {
    format!("receiver-{n}")
}

fn message(receiver_id: String, high: i64, low: i64) -> Message {
    Message {
        receiver_id,
        timestamp: (low as u64 >> 32).to_string(),
        msg_id: format!("{:016x}", high as u64),
        group_id: format!("group-{}", low as u64 % 16),
        msg: format!("{:016x}{:016x}", low as u64, high as u64),
        sender_id: format!("sender-{}", high as u64 % 1024),
    }
}
