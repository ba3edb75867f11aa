//! Operator CLI for the linkgate cache and rate limiter.
//!
//! Talks to the same Redis as the service, using the same key prefix and
//! limiter policies, so what it reports is what the service sees.
//!
//! # Usage
//!
//! ```bash
//! # Check Redis connectivity
//! cargo run --bin cachectl -- ping
//!
//! # Consume one unit of a limiter quota
//! cargo run --bin cachectl -- check password 203.0.113.7
//!
//! # Drop cached entries
//! cargo run --bin cachectl -- invalidate "links:*"
//!
//! # Inspect a cached value
//! cargo run --bin cachectl -- get links abc123
//!
//! # Seed a value (TTL defaults to CACHE_TTL_SECONDS)
//! cargo run --bin cachectl -- set links abc123 '{"original_url":"https://x.com"}' --ttl 600
//!
//! # Show effective limiter policies
//! cargo run --bin cachectl -- policies
//! ```
//!
//! # Environment Variables
//!
//! Same as the server; see `linkgate::config`.

use linkgate::config::{self, Config};
use linkgate::domain::{ConnectionState, LimiterClass};
use linkgate::infrastructure::cache::{
    CacheInfrastructure, KeyValueStore, RedisConnector, RedisStore, StoreConnector, mask_url,
};
use linkgate::infrastructure::clock::SystemClock;
use linkgate::server::build_rate_limiter;
use linkgate::utils::client_ip::hash_identifier;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use std::sync::Arc;
use std::time::Instant;

/// CLI tool for inspecting and managing the linkgate cache.
#[derive(Parser)]
#[command(name = "cachectl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check Redis connectivity and latency
    Ping,

    /// Run one rate limit check (consumes quota)
    Check {
        /// Limiter class: api, auth, shorten, password, bulk
        class: LimiterClass,

        /// Client identifier, usually an IP address
        identifier: String,

        /// Use the identifier as-is instead of hashing it like the HTTP layer
        #[arg(long)]
        raw: bool,
    },

    /// Delete every cached key matching a glob (e.g. "links:*")
    Invalidate {
        pattern: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Print a cached value as JSON
    Get { namespace: String, key: String },

    /// Store a value; anything that is not valid JSON is stored as a string
    Set {
        namespace: String,
        key: String,
        value: String,

        /// Seconds to live, 0 for no expiry (default: CACHE_TTL_SECONDS)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Show effective rate limit policies
    Policies,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = config::load_from_env()?;

    match cli.command {
        Commands::Ping => ping(&config).await?,
        Commands::Check {
            class,
            identifier,
            raw,
        } => check(&config, class, identifier, raw).await?,
        Commands::Invalidate { pattern, yes } => invalidate(&config, &pattern, yes).await?,
        Commands::Get { namespace, key } => get(&config, &namespace, &key).await?,
        Commands::Set {
            namespace,
            key,
            value,
            ttl,
        } => set(&config, &namespace, &key, value, ttl).await?,
        Commands::Policies => policies(&config),
    }

    Ok(())
}

/// Connects to Redis (one cycle, honouring the configured backoff) and
/// reports which backend later commands will use.
async fn connect(config: &Config) -> Result<CacheInfrastructure> {
    let connector: Option<Arc<dyn StoreConnector>> = match config.cache.distributed_url() {
        Some(url) => Some(Arc::new(RedisConnector::new(url)?)),
        None => None,
    };

    let infra = CacheInfrastructure::from_parts(
        connector,
        config.cache.connection.clone(),
        Arc::new(SystemClock),
        config.cache.key_prefix.clone(),
        config.cache.max_local_entries,
    );
    infra.connection.connect().await;

    match infra.connection.state() {
        ConnectionState::Connected => {
            println!("{} {}", "Backend:".bright_white(), "redis".green().bold());
        }
        state => {
            println!(
                "{} {} ({})",
                "Backend:".bright_white(),
                "local (this process only)".yellow().bold(),
                state
            );
        }
    }
    println!();

    Ok(infra)
}

async fn ping(config: &Config) -> Result<()> {
    println!("{}", "Redis connectivity".bright_blue().bold());
    println!();

    let Some(url) = config.cache.distributed_url() else {
        println!("{}", "  Redis is not configured or CACHE_ENABLED=false".yellow());
        return Ok(());
    };

    println!("  Target: {}", mask_url(url).cyan());

    let store = tokio::time::timeout(
        config.cache.connection.connect_timeout,
        RedisStore::connect(url),
    )
    .await
    .context("Connection timed out")??;

    let started = Instant::now();
    store.ping().await?;
    let elapsed = started.elapsed();

    println!(
        "  {} PONG in {} ms",
        "✓".green().bold(),
        elapsed.as_millis().to_string().bright_white().bold()
    );
    println!();

    Ok(())
}

async fn check(config: &Config, class: LimiterClass, identifier: String, raw: bool) -> Result<()> {
    let infra = connect(config).await?;
    let limiter = build_rate_limiter(config, &infra);

    let id = if raw {
        identifier
    } else {
        hash_identifier(&identifier)
    };
    let decision = limiter.check(class, &id).await;

    println!("  Class:      {}", class.to_string().cyan());
    println!("  Identifier: {}", id.bright_black());
    if decision.allowed {
        println!("  Decision:   {}", "ALLOWED".green().bold());
        println!("  Remaining:  {}", decision.remaining.to_string().bright_white());
    } else {
        println!("  Decision:   {}", "DENIED".red().bold());
        println!(
            "  Retry in:   {}s",
            decision.retry_after_seconds.to_string().bright_white()
        );
    }
    println!();

    infra.shutdown().await;
    Ok(())
}

async fn invalidate(config: &Config, pattern: &str, skip_confirm: bool) -> Result<()> {
    let infra = connect(config).await?;

    println!(
        "  Pattern: {}{}",
        infra.key_prefix.bright_black(),
        pattern.cyan()
    );
    println!();

    if !skip_confirm {
        let confirmed = Confirm::new()
            .with_prompt("Delete all matching keys?")
            .default(false)
            .interact()?;

        if !confirmed {
            println!("{}", "Cancelled".red());
            infra.shutdown().await;
            return Ok(());
        }
    }

    let ok = infra.cache.invalidate_pattern(pattern).await;
    infra.shutdown().await;

    if ok {
        println!("{}", "✓ Invalidated".green().bold());
        Ok(())
    } else {
        anyhow::bail!("Invalidation failed, see logs")
    }
}

async fn get(config: &Config, namespace: &str, key: &str) -> Result<()> {
    let infra = connect(config).await?;
    let value: Option<serde_json::Value> = infra.cache.get(namespace, key).await;
    infra.shutdown().await;

    match value {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("{}", "  (miss)".yellow()),
    }

    Ok(())
}

async fn set(
    config: &Config,
    namespace: &str,
    key: &str,
    value: String,
    ttl: Option<u64>,
) -> Result<()> {
    let ttl_seconds = ttl.unwrap_or(config.cache.ttl_seconds);
    let value = serde_json::from_str::<serde_json::Value>(&value)
        .unwrap_or(serde_json::Value::String(value));

    let infra = connect(config).await?;
    let ok = infra.cache.set(namespace, key, &value, ttl_seconds).await;
    infra.shutdown().await;

    if !ok {
        anyhow::bail!("Write failed, see logs");
    }

    let expiry = if ttl_seconds == 0 {
        "no expiry".to_string()
    } else {
        format!("{}s", ttl_seconds)
    };
    println!("{} {}:{} ({})", "✓ Stored".green().bold(), namespace.cyan(), key.cyan(), expiry);
    Ok(())
}

fn policies(config: &Config) {
    println!("{}", "Rate limit policies".bright_blue().bold());
    println!();
    println!(
        "  {:<10} {:>8} {:>10} {:>10}",
        "Class".bright_white().bold(),
        "Quota".bright_white().bold(),
        "Window".bright_white().bold(),
        "Block".bright_white().bold()
    );
    println!("  {}", "-".repeat(41).bright_black());

    for class in LimiterClass::ALL {
        let policy = config.rate_limits.get(class);
        println!(
            "  {:<10} {:>8} {:>9}s {:>9}s",
            class.to_string().cyan(),
            policy.quota,
            policy.window_seconds,
            policy.effective_block_seconds()
        );
    }
    println!();
}
