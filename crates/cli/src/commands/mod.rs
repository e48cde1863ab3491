//! CLI subcommands.

pub mod stress;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;
use corelib::token::{murmur3_x64_128, Murmur3Token};
use corelib::{Host, RingSnapshot, Token, TokenRangeDescription};
use tracing::warn;

pub use stress::{Operation, StressArgs, StressReport};

pub type CommandResult = anyhow::Result<()>;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the ring token of a row key.
    Token {
        key: String,
    },
    /// Show a ring description and where keys route on it.
    Ring {
        /// JSON array of `{start_token, end_token, endpoints}` objects.
        #[arg(long)]
        ring_file: PathBuf,
        /// Keys to locate.
        keys: Vec<String>,
    },
    /// Load-test the message store against an in-memory cluster.
    Stress(StressArgs),
}

impl Command {
    pub fn execute(self, out: &mut dyn Write) -> CommandResult {
        match self {
            Command::Token { key } => token(&key, out),
            Command::Ring { ring_file, keys } => ring(&ring_file, &keys, out),
            Command::Stress(args) => {
                let report = stress::run(&args)?;
                write!(out, "{report}")?;
                Ok(())
            }
        }
    }
}

fn token(key: &str, out: &mut dyn Write) -> CommandResult {
    let (high, low) = murmur3_x64_128(key.as_bytes());
    writeln!(out, "key:   {key}")?;
    writeln!(out, "token: {high}")?;
    writeln!(out, "high:  {:#018x}", high as u64)?;
    writeln!(out, "low:   {:#018x}", low as u64)?;
    Ok(())
}

fn ring(ring_file: &Path, keys: &[String], out: &mut dyn Write) -> CommandResult {
    let raw = fs::read_to_string(ring_file)
        .with_context(|| format!("reading ring file {}", ring_file.display()))?;
    let descriptions: Vec<TokenRangeDescription> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing ring file {}", ring_file.display()))?;
    let ring = RingSnapshot::from_descriptions(&descriptions)?;

    if !ring.covers_ring() {
        warn!(file = %ring_file.display(), "ring has gaps");
        writeln!(out, "warning: ranges leave part of the ring uncovered")?;
    }
    writeln!(out, "{} ranges, {} hosts", ring.range_count(), ring.hosts().len())?;
    for view in ring.ranges() {
        writeln!(
            out,
            "{:<45} {:>7.3}%  {}",
            view.range.to_string(),
            view.range.ownership() * 100.0,
            join(view.replicas.iter().copied())
        )?;
    }

    for key in keys {
        let token = Murmur3Token::from_key(key).value();
        match ring.find_range(token) {
            Some(id) => writeln!(out, "{key} -> {token} -> {}", join(ring.replicas(id)))?,
            None => writeln!(out, "{key} -> {token} -> unrouted")?,
        }
    }
    Ok(())
}

fn join<'a>(hosts: impl Iterator<Item = &'a Host>) -> String {
    hosts.map(Host::as_str).collect::<Vec<_>>().join(", ")
}
