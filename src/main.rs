//! envelope-stream: encrypt record payloads, or consume and decrypt them
//!
//! `encrypt` turns plaintext lines on stdin into ciphertext lines.
//! `consume` treats ciphertext lines on stdin as one shard of a stream and
//! runs them through the processor named by the environment configuration.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use envelope_stream::bootstrap::build_processor;
use envelope_stream::config::parse_encryption_context;
use envelope_stream::{
    CryptoCodec, InMemoryKeyProvider, InitialPosition, ManagedConsumer, ProcessorRegistry, Record, SecureKey, ShardFeed,
    WorkerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "envelope-stream")]
#[command(about = "Envelope-encrypt stream records and decrypt them in front of a record processor")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt each stdin line, printing one ciphertext per line
    Encrypt {
        /// Master key identifier
        #[arg(long, env = "KMS_DECRYPTION_KEY_ARN")]
        key_id: String,

        /// Encryption context as a relaxed JSON object
        #[arg(long, env = "KMS_ENCRYPTION_CONTEXT_HJSON")]
        context: Option<String>,

        /// Base64 seed the master key is derived from
        #[arg(long, env = "MASTER_KEY_SEED_BASE64")]
        seed: String,
    },
    /// Consume ciphertext lines from stdin as a single shard
    Consume {
        #[arg(long, default_value = "shardId-000000000000")]
        shard: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_target(true)
        .init();

    match Args::parse().command {
        Command::Encrypt { key_id, context, seed } => encrypt(key_id, context, &seed),
        Command::Consume { shard } => consume(shard),
    }
}

fn encrypt(key_id: String, context: Option<String>, seed: &str) -> Result<()> {
    let seed = SecureKey::new(STANDARD.decode(seed.trim()).context("seed is not valid base64")?);
    let provider = InMemoryKeyProvider::from_seed(&seed, [key_id.as_str()])?;

    let mut builder = CryptoCodec::builder(key_id).key_provider(Arc::new(provider));
    if let Some(raw) = context {
        builder = builder.encryption_context(parse_encryption_context(&raw)?);
    }
    let codec = builder.build()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut count = 0usize;
    for line in io::stdin().lock().lines() {
        let line = line?;
        writeln!(out, "{}", codec.encrypt_value(&line)?)?;
        count += 1;
    }
    out.flush()?;
    info!(count, key_id = codec.key_id(), "encrypted lines");
    Ok(())
}

fn consume(shard: String) -> Result<()> {
    let mut config = WorkerConfig::from_env()?;
    if config.initial_position == InitialPosition::Latest {
        // stdin is a finished backlog; LATEST would deliver nothing
        info!("reading stdin from the start of the shard");
        config.initial_position = InitialPosition::TrimHorizon;
    }
    let registry = ProcessorRegistry::with_builtins();
    let processor = build_processor(&config, &registry, None)?;

    let records = io::stdin()
        .lock()
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(Ok(Record::new(format!("{:020}", i + 1), shard.clone(), line.into_bytes()))),
            Err(e) => Some(Err(e)),
        })
        .collect::<io::Result<Vec<_>>>()?;

    let consumer = ManagedConsumer::new(config, processor);
    for summary in consumer.run(vec![ShardFeed::new(shard, records)])? {
        info!(
            shard_id = %summary.shard_id,
            batches = summary.batches,
            records = summary.records,
            errors = summary.errors,
            checkpoint = summary.checkpoint.as_deref().unwrap_or("-"),
            "shard summary"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_encrypt_requires_seed() {
        std::env::remove_var("MASTER_KEY_SEED_BASE64");
        let err = Args::try_parse_from(["envelope-stream", "encrypt", "--key-id", "alias/k"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let args = Args::try_parse_from(["envelope-stream", "encrypt", "--key-id", "alias/k", "--seed", "c2VlZA=="]).unwrap();
        assert!(matches!(args.command, Command::Encrypt { ref seed, .. } if seed == "c2VlZA=="));
    }
}
