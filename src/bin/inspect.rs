//! Pillar Inspection Binary
//!
//! Lists the segments, blocks and column versions of a data directory and
//! runs dedup probes against its sealed blocks.

use clap::{Parser, Subcommand};
use pillar::index::BlockIndex;
use pillar::{Config, Engine, Key, PillarError, Schema};
use tracing_subscriber::{fmt, EnvFilter};

/// Pillar inspector
#[derive(Parser, Debug)]
#[command(name = "pillar-inspect")]
#[command(about = "Inspect a Pillar data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./pillar_data")]
    data_dir: String,

    /// Comma-separated column names, in ordinal order
    #[arg(short, long, default_value = "id")]
    columns: String,

    /// Ordinal of the primary-key column
    #[arg(short, long, default_value = "0")]
    pk: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List segments and their block counts
    Segments,

    /// List the blocks of a segment with their column versions
    Blocks {
        /// Segment id
        segment: u64,
    },

    /// Probe a key against every sealed block (`123`, `u:123` or `s:text`)
    Dedup {
        key: String,

        /// Also print per-block bloom probe counts
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let names: Vec<&str> = args.columns.split(',').map(str::trim).collect();
    let schema = match Schema::with_columns(&names, args.pk) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Invalid schema: {}", e);
            std::process::exit(2);
        }
    };

    let config = Config::builder().data_dir(&args.data_dir).build();
    let engine = match Engine::open(config, schema) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open {}: {}", args.data_dir, e);
            std::process::exit(1);
        }
    };

    let code = match run(&engine, &args.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    };

    if let Err(e) = engine.close() {
        tracing::error!("Failed to close engine: {}", e);
    }
    std::process::exit(code);
}

fn run(engine: &Engine, command: &Commands) -> pillar::Result<i32> {
    match command {
        Commands::Segments => {
            for id in engine.segment_ids() {
                let segment = engine.segment(id)?;
                println!(
                    "{}\t{}\tblocks={}",
                    id,
                    segment.dir().display(),
                    segment.block_count()
                );
            }
            Ok(0)
        }

        Commands::Blocks { segment } => {
            let segment = engine.segment(*segment)?;
            for block in segment.blocks() {
                let sealed = if block.has_index_meta() { "sealed" } else { "open" };
                println!("block {}\t{}\tts={}", block.id(), sealed, block.read_ts());
                for col in 0..block.column_count() {
                    let column = block.open_column(col)?;
                    println!(
                        "  col {}\tversions={}\t{}",
                        col,
                        column.version_count(),
                        column.version_names().join(",")
                    );
                }
            }
            Ok(0)
        }

        Commands::Dedup { key, verbose } => {
            let key = Key::parse(key);
            let result = engine.dedup(&key);

            if *verbose {
                for seg in engine.segment_ids() {
                    for block in engine.segment(seg)?.blocks() {
                        if !block.has_index_meta() {
                            continue;
                        }
                        let index = engine.block_index(seg, block.id())?;
                        println!(
                            "segment {} block {}\t{}\tbloom_probes={}",
                            seg,
                            block.id(),
                            if index.dedup(&key).is_ok() { "absent" } else { "maybe" },
                            index.bloom_probes()
                        );
                    }
                }
            }

            match result {
                Ok(()) => {
                    println!("{}: absent", key);
                    Ok(0)
                }
                Err(PillarError::PossibleDuplicate) => {
                    println!("{}: possible duplicate", key);
                    Ok(3)
                }
                Err(e) => Err(e),
            }
        }
    }
}
