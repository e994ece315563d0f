use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use keyprobe::{
    config::load_config,
    proxy::{
        fetcher::dedup_descriptors, Classifier, DescriptorParser, Engine, RunReport, SourceTag,
        VerdictCache,
    },
    EngineConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "keyprobe.toml";

/// Liveness checker for proxy key lists
#[derive(Parser)]
#[command(name = "keyprobe")]
#[command(about = "Probe proxy keys, cache verdicts and publish ranked key lists")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML configuration file (defaults to ./keyprobe.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Probe timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Number of concurrent probes
    #[arg(short = 'n', long, global = true)]
    concurrency: Option<usize>,

    /// Maximum descriptors considered per run
    #[arg(long, global = true)]
    max_descriptors: Option<usize>,

    /// Verdict cache file
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Directory for published key files
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch configured sources, probe and publish (default)
    Run,
    /// Probe keys from a local file and publish
    Check {
        /// Input file containing keys, one per line
        input: PathBuf,
        /// Source tag for the keys (general, whitelist)
        #[arg(short = 't', long, default_value = "general")]
        tag: String,
    },
    /// Parse keys from a file and print what was understood
    Parse {
        /// Input file containing keys, one per line
        input: PathBuf,
    },
    /// Drop cache entries older than the retention window
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()));
    let config = apply_overrides(load_config(config_path.as_deref())?, &cli);
    config.validate()?;

    match cli.command {
        Some(Commands::Run) | None => {
            let engine = Engine::from_config(config)?;
            let report = engine.run().await?;
            print_summary(&report);
        }
        Some(Commands::Check { input, tag }) => {
            let tag = parse_source_tag(&tag)?;
            let descriptors = DescriptorParser::parse_file(&input, tag)?;
            println!("Loaded {} keys from {:?}", descriptors.len(), input);

            let engine = Engine::from_config(config)?;
            let report = engine.run_batch(descriptors).await?;
            print_summary(&report);
        }
        Some(Commands::Parse { input }) => {
            let parsed = DescriptorParser::parse_file(&input, SourceTag::General)?;
            let mut descriptors = dedup_descriptors(parsed);
            Classifier::from_mmdb_path(config.mmdb_path.as_deref()).classify_all(&mut descriptors);

            for descriptor in &descriptors {
                let endpoint = descriptor
                    .endpoint
                    .as_ref()
                    .map_or_else(|| "unprobeable".to_string(), |e| e.to_string());
                let country = descriptor.country.as_deref().unwrap_or("--");
                println!("{}  {}  {}", country, endpoint, descriptor.id);
            }
            let unprobeable = descriptors.iter().filter(|d| !d.is_probeable()).count();
            println!(
                "\nParsed {} unique keys ({} unprobeable)",
                descriptors.len(),
                unprobeable
            );
        }
        Some(Commands::Prune) => {
            let mut cache = VerdictCache::load(&config.cache_path);
            let before = cache.len();
            let kept = cache.save(config.retention_window(), Utc::now())?;
            println!("Cache {:?}: kept {}, dropped {}", config.cache_path, kept, before - kept);
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn apply_overrides(mut config: EngineConfig, cli: &Cli) -> EngineConfig {
    if let Some(timeout_ms) = cli.timeout_ms {
        config = config.with_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(concurrency) = cli.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(cap) = cli.max_descriptors {
        config = config.with_max_descriptors(cap);
    }
    if let Some(cache) = &cli.cache {
        config = config.with_cache_path(cache.clone());
    }
    if let Some(dir) = &cli.output_dir {
        config = config.with_output_dir(dir.clone());
    }
    config
}

fn print_summary(report: &RunReport) {
    let stats = &report.stats;
    println!("Unique keys: {}", report.fetched);
    if stats.dropped_by_cap > 0 {
        println!("Dropped by cap: {}", stats.dropped_by_cap);
    }
    println!("Unprobeable: {}", stats.unprobeable);
    println!("Real checks: {} ({} failed)", stats.probed, stats.failed);
    println!("Skipped (cached): {}", stats.cached);
    println!("Valid: {}", report.entries.len());
    match report.cache_saved {
        Some(saved) => println!("Cache entries saved: {}", saved),
        None => println!("Cache was not saved"),
    }
    if let Some(index) = &report.publish.index {
        println!(
            "Wrote {} chunk files, index at {:?}",
            report.publish.chunks.len(),
            index
        );
    }
}

fn parse_source_tag(s: &str) -> Result<SourceTag> {
    match s.to_lowercase().as_str() {
        "general" => Ok(SourceTag::General),
        "whitelist" => Ok(SourceTag::Whitelist),
        _ => Err(anyhow!("Invalid source tag: {}. Use: general, whitelist", s)),
    }
}
