use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "humdex", version, about = "Query-by-snippet MIDI retrieval")]
struct Cli {
    /// Directory for intermediate JSON artifacts
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract per-channel histogram features for every MIDI file in a corpus
    Extract {
        /// Corpus folder (defaults to config file corpus_dir)
        corpus: Option<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Match a query MIDI snippet against a corpus and report the best song
    Query {
        /// The query MIDI file
        query: PathBuf,

        /// Corpus folder (defaults to config file corpus_dir)
        corpus: Option<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Reuse cached corpus artifacts instead of re-extracting
        #[arg(long)]
        cached: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = humdex::config::AppConfig::load();

    // Resolve artifact directory: CLI > config > XDG default
    let cache_dir = cli
        .cache_dir
        .or(config.cache_dir.clone())
        .unwrap_or_else(humdex::config::default_cache_dir);
    log::info!("Artifacts: {}", cache_dir.display());

    match cli.command {
        Commands::Extract { corpus, jobs } => {
            let corpus = resolve_corpus(corpus, &config)?;
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };

            let index = humdex::features::extract_features(&corpus, &config.pipeline, workers)
                .context("Feature extraction failed")?;

            for cf in &index.channels {
                humdex::cache::write_channel(&cache_dir, cf).with_context(|| {
                    format!("Failed to write artifacts for channel {}", cf.channel)
                })?;
            }

            println!(
                "Extraction complete: {} files scanned, {} skipped, {} songs, {} segments",
                index.files_scanned,
                index.files_failed,
                index.song_count(),
                index.segment_count()
            );
            for cf in &index.channels {
                println!("  channel {:>2}: {} songs", cf.channel, cf.songs.len());
            }
        }

        Commands::Query { query, corpus, jobs, cached, json } => {
            let corpus = resolve_corpus(corpus, &config)?;
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let cache = cached.then_some(cache_dir.as_path());

            let result =
                humdex::engine::run_query(&query, &corpus, &config.pipeline, workers, cache)
                    .context("Query failed")?;

            if json {
                println!("{}", serde_json::to_string(&result)?);
            } else {
                match &result.song {
                    Some(song) => println!(
                        "Best match: {} ({:.2}% similarity)",
                        song, result.similarity_percentage
                    ),
                    None => println!("No match — the corpus produced no data on any channel."),
                }
            }
        }
    }

    Ok(())
}

/// Resolve the corpus folder: CLI arg > config corpus_dir.
fn resolve_corpus(arg: Option<PathBuf>, config: &humdex::config::AppConfig) -> Result<PathBuf> {
    arg.or(config.corpus_dir.clone()).ok_or_else(|| {
        anyhow::anyhow!("No corpus folder. Pass it as an argument or set corpus_dir in config.")
    })
}
