//! ctfindex CLI: ingest exchange trades and inspect the local index.
//!
//! # Commands
//! ```text
//! ctfindex run     [--from-block N] [--to-block N] [--continuous] --rpc-url URL --db PATH
//! ctfindex status  --db PATH
//! ctfindex derive  --condition-id 0x… [--collateral 0x…]
//! ctfindex market add --condition-id 0x… --slug SLUG --db PATH
//! ctfindex enrich  --db PATH [--limit N]
//! ctfindex decode  --tx-hash 0x… --rpc-url URL [--output FILE]
//! ctfindex trades  --token-id N --db PATH [--limit N]
//! ```
//!
//! Command output (JSON) goes to stdout, logs to stderr.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use ctfindex_core::checkpoint::CheckpointStore;
use ctfindex_core::ctf::{self, USDC_E};
use ctfindex_core::decoder::TradeLogDecoder;
use ctfindex_core::enricher::MarketEnricher;
use ctfindex_core::store::TradeStore;
use ctfindex_core::types::{to_hex_0x, Market};
use ctfindex_evm::client::HttpClientConfig;
use ctfindex_evm::{ChainClient, HttpChainClient, ScannerBuilder};
use ctfindex_storage::SqliteStorage;

mod logging;

#[derive(Parser)]
#[command(
    name = "ctfindex",
    about = "Index OrderFilled trades from the conditional-token exchanges on Polygon",
    long_about = "
ctfindex: checkpointed ingestion of OrderFilled events from the CTF Exchange and
NegRisk CTF Exchange into a local SQLite database.

ENVIRONMENT VARIABLES:
  RPC_URL    Polygon JSON-RPC endpoint (run, decode)
  DB_PATH    SQLite database path
  RUST_LOG   Log filter, e.g. ctfindex_evm=debug
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the chain for trades
    Run {
        /// First block to scan (default: resume after the checkpoint)
        #[arg(long)]
        from_block: Option<u64>,
        /// Last block to scan (default: current head)
        #[arg(long)]
        to_block: Option<u64>,
        /// Keep following the head until interrupted
        #[arg(long, conflicts_with = "to_block")]
        continuous: bool,
        /// JSON-RPC endpoint
        #[arg(long, env = "RPC_URL")]
        rpc_url: String,
        /// SQLite database path
        #[arg(long, env = "DB_PATH", default_value = "./ctfindex.db")]
        db: String,
        /// Blocks per eth_getLogs call
        #[arg(long, default_value_t = 1000)]
        batch_size: u64,
        /// Blocks behind the head to start from on an empty database
        #[arg(long, default_value_t = 1000)]
        initial_offset: u64,
        /// Head polling interval in continuous mode
        #[arg(long, default_value_t = 12_000)]
        poll_interval_ms: u64,
        /// Pause before retrying a failed batch
        #[arg(long, default_value_t = 5_000)]
        retry_delay_ms: u64,
        /// Retries per batch before a bounded run aborts
        #[arg(long, default_value_t = 3)]
        max_batch_retries: u32,
        /// Skip market enrichment during ingestion
        #[arg(long)]
        no_enrich: bool,
    },

    /// Print the sync checkpoint and table counts
    Status {
        #[arg(long, env = "DB_PATH", default_value = "./ctfindex.db")]
        db: String,
    },

    /// Derive the YES/NO position ids of a binary condition
    Derive {
        /// Condition id (0x-prefixed, 32 bytes)
        #[arg(long)]
        condition_id: String,
        /// Collateral token (default: USDC.e)
        #[arg(long)]
        collateral: Option<String>,
    },

    /// Market metadata management
    Market {
        #[command(subcommand)]
        action: MarketAction,
    },

    /// Attach market identity to stored trades that have none
    Enrich {
        #[arg(long, env = "DB_PATH", default_value = "./ctfindex.db")]
        db: String,
        /// Maximum trades to examine
        #[arg(long, default_value_t = 10_000)]
        limit: usize,
    },

    /// Decode the exchange fills of a single transaction
    Decode {
        /// Transaction hash (0x-prefixed, 32 bytes)
        #[arg(long)]
        tx_hash: String,
        /// JSON-RPC endpoint
        #[arg(long, env = "RPC_URL")]
        rpc_url: String,
        /// Write the trades to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List stored trades of one outcome token, oldest first
    Trades {
        /// Outcome token id (decimal)
        #[arg(long)]
        token_id: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, env = "DB_PATH", default_value = "./ctfindex.db")]
        db: String,
    },
}

#[derive(Subcommand)]
enum MarketAction {
    /// Insert or update a market whose token ids are derived from its condition
    Add {
        #[arg(long)]
        condition_id: String,
        #[arg(long)]
        slug: String,
        /// Oracle address (default: zero)
        #[arg(long)]
        oracle: Option<String>,
        /// Collateral token (default: USDC.e)
        #[arg(long)]
        collateral: Option<String>,
        #[arg(long, env = "DB_PATH", default_value = "./ctfindex.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_tracing(&logging::LogConfig {
        level: if cli.verbose { "debug" } else { "info" }.into(),
        json: cli.log_json,
    });

    match cli.command {
        Commands::Run {
            from_block,
            to_block,
            continuous,
            rpc_url,
            db,
            batch_size,
            initial_offset,
            poll_interval_ms,
            retry_delay_ms,
            max_batch_retries,
            no_enrich,
        } => {
            let opts = RunOptions {
                from_block,
                to_block,
                continuous,
                batch_size,
                initial_offset,
                poll_interval_ms,
                retry_delay_ms,
                max_batch_retries,
                enrich: !no_enrich,
            };
            cmd_run(&rpc_url, &db, opts).await
        }

        Commands::Status { db } => cmd_status(&db).await,

        Commands::Derive { condition_id, collateral } => {
            cmd_derive(&condition_id, collateral.as_deref())
        }

        Commands::Market { action } => match action {
            MarketAction::Add {
                condition_id,
                slug,
                oracle,
                collateral,
                db,
            } => {
                cmd_market_add(&db, &condition_id, &slug, oracle.as_deref(), collateral.as_deref())
                    .await
            }
        },

        Commands::Enrich { db, limit } => cmd_enrich(&db, limit).await,

        Commands::Decode { tx_hash, rpc_url, output } => {
            cmd_decode(&rpc_url, &tx_hash, output.as_deref()).await
        }

        Commands::Trades { token_id, limit, db } => cmd_trades(&db, &token_id, limit).await,
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

struct RunOptions {
    from_block: Option<u64>,
    to_block: Option<u64>,
    continuous: bool,
    batch_size: u64,
    initial_offset: u64,
    poll_interval_ms: u64,
    retry_delay_ms: u64,
    max_batch_retries: u32,
    enrich: bool,
}

async fn cmd_run(rpc_url: &str, db: &str, opts: RunOptions) -> Result<()> {
    // Configuration problems surface before any storage or network work.
    let client = HttpChainClient::new(rpc_url, HttpClientConfig::default())?;
    let storage = Arc::new(
        SqliteStorage::open(db)
            .await
            .with_context(|| format!("open database '{db}'"))?,
    );

    let mut builder = ScannerBuilder::new()
        .batch_size(opts.batch_size)
        .initial_offset(opts.initial_offset)
        .poll_interval_ms(opts.poll_interval_ms)
        .retry_delay_ms(opts.retry_delay_ms)
        .max_batch_retries(opts.max_batch_retries);
    if opts.enrich {
        builder = builder.market_lookup(storage.clone());
    }
    let mut scanner = builder.build(client, storage.clone(), storage.clone())?;

    let summary = if opts.continuous {
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received; stopping after the current batch");
                    cancel.cancel();
                }
            }
        });
        scanner.run_continuous(opts.from_block, cancel).await?
    } else {
        scanner.run_bounded(opts.from_block, opts.to_block).await?
    };

    if let Some(cp) = scanner.checkpoint() {
        tracing::info!(
            last_block = cp.last_block,
            total_trades = cp.total_trades,
            "Checkpoint"
        );
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn cmd_status(db: &str) -> Result<()> {
    let storage = SqliteStorage::open(db)
        .await
        .with_context(|| format!("open database '{db}'"))?;

    let checkpoint = storage.load().await?;
    let status = json!({
        "last_block": checkpoint.map(|c| c.last_block),
        "total_trades": checkpoint.map(|c| c.total_trades),
        "updated_at": checkpoint.map(|c| c.updated_at),
        "trades_stored": storage.trade_count().await?,
        "markets": storage.market_count().await?,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn cmd_derive(condition_id: &str, collateral: Option<&str>) -> Result<()> {
    let condition = parse_condition(condition_id)?;
    let collateral = parse_address_or(collateral, USDC_E, "collateral")?;

    let positions = ctf::derive_binary_positions(collateral, condition);
    let out = json!({
        "condition_id": to_hex_0x(condition.as_slice()),
        "collateral": to_hex_0x(collateral.as_slice()),
        "yes": {
            "index_set": ctf::INDEX_SET_YES,
            "collection_id": to_hex_0x(positions.collection_id_yes.as_slice()),
            "position_id": positions.position_yes.to_string(),
        },
        "no": {
            "index_set": ctf::INDEX_SET_NO,
            "collection_id": to_hex_0x(positions.collection_id_no.as_slice()),
            "position_id": positions.position_no.to_string(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn cmd_market_add(
    db: &str,
    condition_id: &str,
    slug: &str,
    oracle: Option<&str>,
    collateral: Option<&str>,
) -> Result<()> {
    let condition = parse_condition(condition_id)?;
    let oracle = parse_address_or(oracle, Address::ZERO, "oracle")?;
    let collateral = parse_address_or(collateral, USDC_E, "collateral")?;

    let storage = SqliteStorage::open(db)
        .await
        .with_context(|| format!("open database '{db}'"))?;
    let market = Market::derive(condition, slug, oracle, collateral);
    storage.upsert_market(&market).await?;

    let out = json!({
        "condition_id": to_hex_0x(market.condition_id.as_slice()),
        "slug": market.slug,
        "yes_token_id": market.yes_token_id.to_string(),
        "no_token_id": market.no_token_id.to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn cmd_enrich(db: &str, limit: usize) -> Result<()> {
    let storage = Arc::new(
        SqliteStorage::open(db)
            .await
            .with_context(|| format!("open database '{db}'"))?,
    );
    let enricher = MarketEnricher::new(storage.clone());
    let report = enricher.backfill(storage.as_ref(), limit).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_decode(rpc_url: &str, tx_hash: &str, output: Option<&Path>) -> Result<()> {
    let hash = B256::from_str(tx_hash)
        .with_context(|| format!("invalid transaction hash '{tx_hash}'"))?;
    let client = HttpChainClient::new(rpc_url, HttpClientConfig::default())?;

    let trades = match client.transaction_logs(hash).await? {
        Some(logs) => {
            let batch = TradeLogDecoder::polymarket()
                .decode_receipt(&logs, chrono::Utc::now().timestamp());
            if batch.rejected > 0 {
                tracing::warn!(tx_hash, rejected = batch.rejected, "Some fills failed to decode");
            }
            batch.trades
        }
        None => {
            tracing::warn!(tx_hash, "No receipt for transaction");
            Vec::new()
        }
    };

    let json = serde_json::to_string_pretty(&trades)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("write '{}'", path.display()))?;
            tracing::info!(path = %path.display(), trades = trades.len(), "Wrote decoded trades");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_trades(db: &str, token_id: &str, limit: usize) -> Result<()> {
    let token = parse_token_id(token_id)?;
    let storage = SqliteStorage::open(db)
        .await
        .with_context(|| format!("open database '{db}'"))?;
    let trades = storage.trades_by_token(token, limit).await?;
    println!("{}", serde_json::to_string_pretty(&trades)?);
    Ok(())
}

// ─── Argument parsing ────────────────────────────────────────────────────────

fn parse_condition(s: &str) -> Result<B256> {
    B256::from_str(s).with_context(|| format!("invalid condition id '{s}'"))
}

fn parse_token_id(s: &str) -> Result<U256> {
    U256::from_str_radix(s, 10).with_context(|| format!("invalid token id '{s}'"))
}

fn parse_address_or(s: Option<&str>, default: Address, what: &str) -> Result<Address> {
    match s {
        Some(s) => Address::from_str(s).with_context(|| format!("invalid {what} address '{s}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "ctfindex",
            "run",
            "--from-block",
            "1000",
            "--to-block",
            "1000",
            "--rpc-url",
            "http://localhost:8545",
            "--db",
            "/tmp/x.db",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                from_block,
                to_block,
                continuous,
                retry_delay_ms,
                max_batch_retries,
                ..
            } => {
                assert_eq!(from_block, Some(1000));
                assert_eq!(to_block, Some(1000));
                assert!(!continuous);
                assert_eq!(retry_delay_ms, 5_000);
                assert_eq!(max_batch_retries, 3);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn continuous_conflicts_with_to_block() {
        let res = Cli::try_parse_from([
            "ctfindex",
            "run",
            "--continuous",
            "--to-block",
            "5",
            "--rpc-url",
            "http://localhost:8545",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn condition_and_address_parsing() {
        assert!(parse_condition("0x1234").is_err());
        let c = parse_condition(
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        )
        .unwrap();
        assert_eq!(c, B256::repeat_byte(0xaa));
        assert_eq!(parse_address_or(None, USDC_E, "collateral").unwrap(), USDC_E);
        assert!(parse_address_or(Some("0xzz"), USDC_E, "collateral").is_err());
    }

    #[test]
    fn token_ids_are_decimal() {
        assert_eq!(parse_token_id("42").unwrap(), U256::from(42u64));
        assert!(parse_token_id("0x2a").is_err());
        assert!(parse_token_id("").is_err());
    }

    #[test]
    fn decode_flags_parse() {
        let cli = Cli::try_parse_from([
            "ctfindex",
            "decode",
            "--tx-hash",
            "0x0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f",
            "--rpc-url",
            "http://localhost:8545",
            "-o",
            "/tmp/fills.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Decode { tx_hash, output, .. } => {
                assert!(tx_hash.starts_with("0x0f"));
                assert_eq!(output, Some(PathBuf::from("/tmp/fills.json")));
            }
            _ => panic!("expected decode"),
        }
    }

    #[tokio::test]
    async fn decode_rejects_bad_hash_before_network() {
        let err = cmd_decode("http://localhost:1", "0x1234", None).await.unwrap_err();
        assert!(err.to_string().contains("invalid transaction hash"));
    }
}
