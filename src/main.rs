use aemet_harvest::{DatasetKind, Entity, HarvestConfig, Harvester};
use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aemet-harvest")]
#[command(about = "Harvest AEMET observations, climatology and forecasts into Parquet datasets", long_about = None)]
struct Cli {
    /// JSON config file. Pools may also come from AEMET_HARVEST_POOL_<NAME>.
    #[arg(long, env = "AEMET_HARVEST_CONFIG")]
    config: Option<PathBuf>,
    /// Overrides the configured data directory.
    #[arg(long, env = "AEMET_HARVEST_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DatasetArgs {
    /// observation, daily_climatology or forecast.
    #[arg(long)]
    dataset: DatasetKind,
    /// Entity reference list: a CSV path or URL, optionally gzipped.
    #[arg(long)]
    entities: String,
    /// Id column in the reference list. Defaults to indicativo or CUMUN.
    #[arg(long)]
    id_column: Option<String>,
}

#[derive(Args)]
struct RangeArgs {
    #[arg(long)]
    start: Option<NaiveDate>,
    #[arg(long)]
    end: Option<NaiveDate>,
    /// Request periods older than the deep-history cutoff.
    #[arg(long, default_value_t = false)]
    force_backfill: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest one shard, or one shard per pool when several are given.
    Run {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        range: RangeArgs,
        /// Credential pool. Repeat to split this shard's share across
        /// several pools, one in-process sub-shard per pool.
        #[arg(long = "pool", env = "AEMET_HARVEST_POOL", value_delimiter = ',', required = true)]
        pools: Vec<String>,
        #[arg(long, env = "AEMET_HARVEST_SHARD_INDEX", default_value_t = 0)]
        shard_index: usize,
        #[arg(long, env = "AEMET_HARVEST_SHARD_COUNT", default_value_t = 1)]
        shard_count: usize,
        /// Fetch the whole range instead of only the missing periods.
        #[arg(long, default_value_t = false)]
        full_range: bool,
    },
    /// Print the windows a dataset is missing.
    Gaps {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[command(flatten)]
        range: RangeArgs,
        /// Print the full report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Compare the reference list with the entities a dataset holds.
    Audit {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
    /// Print row counts, ranges and recent per-day coverage of a dataset.
    Summary {
        #[arg(long)]
        dataset: DatasetKind,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

async fn load_entities(harvester: &Harvester, args: &DatasetArgs) -> anyhow::Result<Vec<Entity>> {
    harvester
        .entities()
        .dataset(args.dataset)
        .source(&args.entities)
        .maybe_id_column(args.id_column.as_deref())
        .call()
        .await
        .with_context(|| format!("loading entities from {}", args.entities))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarvestConfig::load(path)?,
        None => HarvestConfig::from_env(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    let harvester = Harvester::with_config(config).await?;
    info!("Data directory: {}", harvester.data_dir().display());

    match cli.command {
        Command::Run {
            dataset,
            range,
            pools,
            shard_index,
            shard_count,
            full_range,
        } => {
            let entities = load_entities(&harvester, &dataset).await?;
            let exit_code = if pools.len() > 1 {
                let outcomes = harvester
                    .run_shards()
                    .dataset(dataset.dataset)
                    .entities(entities)
                    .pools(pools)
                    .shard_index(shard_index)
                    .shard_count(shard_count)
                    .maybe_start(range.start)
                    .maybe_end(range.end)
                    .gaps_only(!full_range)
                    .force_backfill(range.force_backfill)
                    .call()
                    .await?;
                let mut worst = 0;
                for outcome in outcomes {
                    match outcome {
                        Ok(report) => {
                            println!("{report}");
                            worst = worst.max(report.exit_code());
                        }
                        Err(e) if e.is_config() => return Err(e.into()),
                        Err(e) => {
                            error!("Shard failed: {e}");
                            worst = 1;
                        }
                    }
                }
                worst
            } else {
                let report = harvester
                    .run_shard()
                    .dataset(dataset.dataset)
                    .entities(&entities)
                    .pool(&pools[0])
                    .shard_index(shard_index)
                    .shard_count(shard_count)
                    .maybe_start(range.start)
                    .maybe_end(range.end)
                    .gaps_only(!full_range)
                    .force_backfill(range.force_backfill)
                    .call()
                    .await?;
                println!("{report}");
                report.exit_code()
            };
            std::process::exit(exit_code);
        }
        Command::Gaps {
            dataset,
            range,
            json,
        } => {
            let entities = load_entities(&harvester, &dataset).await?;
            let report = harvester
                .gaps()
                .dataset(dataset.dataset)
                .entities(&entities)
                .maybe_start(range.start)
                .maybe_end(range.end)
                .force_backfill(range.force_backfill)
                .call()
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for window in &report.windows {
                    println!("{window}");
                }
                println!(
                    "{} windows, {} entity-days missing across {} entities",
                    report.windows.len(),
                    report.missing_days(),
                    report.entities()
                );
            }
        }
        Command::Audit { dataset } => {
            let entities = load_entities(&harvester, &dataset).await?;
            let audit = harvester
                .audit()
                .dataset(dataset.dataset)
                .reference(&entities)
                .call()
                .await?;
            println!(
                "{} reference entities, {} in dataset, {:.1}% covered",
                audit.reference_count,
                audit.dataset_count,
                audit.coverage_ratio() * 100.0
            );
            for id in &audit.missing {
                println!("missing: {id}");
            }
            for id in &audit.unexpected_present {
                println!("not in reference list: {id}");
            }
        }
        Command::Summary { dataset, days } => {
            let summary = harvester
                .summary()
                .dataset(dataset)
                .recent_days(days)
                .call()
                .await?;
            print!("{summary}");
        }
    }
    Ok(())
}
