//! AtlasStore Inspector
//!
//! Read-only tool for looking into segment files and record folders.

use std::path::{Path, PathBuf};
use std::process;

use atlasstore::{FileStore, FolderStore, ScanStats, SegmentFile};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasStore Inspector
#[derive(Parser, Debug)]
#[command(name = "atlasstore-inspect")]
#[command(about = "Inspect AtlasStore segment files and record folders")]
#[command(version)]
struct Args {
    /// Store layout (default: folder for directories, segment otherwise)
    #[arg(short, long, value_enum)]
    layout: Option<Layout>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    Segment,
    Folder,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every key in the store
    Keys {
        /// Segment file or record folder
        path: PathBuf,
    },

    /// Print one record as JSON
    Get {
        /// Segment file or record folder
        path: PathBuf,

        /// The key to print
        key: String,
    },

    /// Read back every record and report anything unreadable
    Verify {
        /// Segment file or record folder
        path: PathBuf,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlasstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let code = match run(&args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    };
    process::exit(code);
}

fn run(args: &Args) -> atlasstore::Result<i32> {
    match &args.command {
        Commands::Keys { path } => {
            let (store, _) = open(path, args.layout)?;
            let mut keys: Vec<String> = store.key_set().into_iter().collect();
            keys.sort();
            for key in keys {
                println!("{}", key);
            }
            Ok(0)
        }
        Commands::Get { path, key } => {
            let (store, _) = open(path, args.layout)?;
            match store.load(key)? {
                Some(document) => {
                    println!("{}", serde_json::to_string_pretty(&document)?);
                    Ok(0)
                }
                None => {
                    tracing::warn!(%key, "Key not found");
                    Ok(1)
                }
            }
        }
        Commands::Verify { path } => {
            let (store, stats) = open(path, args.layout)?;

            let mut keys: Vec<String> = store.key_set().into_iter().collect();
            keys.sort();

            let mut unreadable = 0u64;
            for key in &keys {
                if let Err(e) = store.load(key) {
                    tracing::warn!(%key, error = %e, "Unreadable record");
                    unreadable += 1;
                }
            }

            println!(
                "records: {}  readable: {}  unreadable: {}  skipped entries: {}  truncated tail: {}",
                keys.len(),
                keys.len() as u64 - unreadable,
                unreadable,
                stats.entries_skipped,
                stats.truncated_tail
            );

            let clean = unreadable == 0 && stats.entries_skipped == 0 && !stats.truncated_tail;
            Ok(if clean { 0 } else { 1 })
        }
    }
}

/// Open and index an existing store without creating anything
fn open(path: &Path, layout: Option<Layout>) -> atlasstore::Result<(Box<dyn FileStore>, ScanStats)> {
    if !path.exists() {
        return Err(atlasstore::AtlasError::Config(format!(
            "{} does not exist",
            path.display()
        )));
    }

    let layout = layout.unwrap_or(if path.is_dir() { Layout::Folder } else { Layout::Segment });
    let store: Box<dyn FileStore> = match layout {
        Layout::Segment => Box::new(SegmentFile::new(path)),
        Layout::Folder => Box::new(FolderStore::new(path)),
    };
    let stats = store.read_file()?;
    Ok((store, stats))
}
