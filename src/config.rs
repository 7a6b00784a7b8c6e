use crate::services::transfer::DEFAULT_SEGMENT_SIZE;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub storage_dir: String,
    pub database_url: String,
    pub container: String,
    pub segment_size: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Segmented transfer and sync client for Swift-style object stores")]
pub struct Args {
    /// Directory where object payloads are stored (overrides OBJECT_SYNC_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_SYNC_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Container to operate on (overrides OBJECT_SYNC_CONTAINER)
    #[arg(long, short, global = true)]
    pub container: Option<String>,

    /// Segment size in bytes (overrides OBJECT_SYNC_SEGMENT_SIZE)
    #[arg(long, global = true)]
    pub segment_size: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the metadata schema and exit
    Migrate,
    /// Upload a file or directory
    Upload {
        path: PathBuf,
        /// Object key (file) or key prefix (directory); defaults to the file name
        #[arg(long)]
        key: Option<String>,
        /// Replace remote objects whose content differs
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download an object, or everything under a prefix with --recursive
    Download {
        key: String,
        target: PathBuf,
        #[arg(long, short)]
        recursive: bool,
    },
    /// Compare a local directory with a remote prefix
    Diff {
        local: PathBuf,
        remote_root: String,
        /// Print the comparison as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the container's keys as a tree
    Tree {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete an object (segments included), or a whole prefix with --recursive
    Delete {
        key: String,
        #[arg(long, short)]
        recursive: bool,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();
        let cfg = Self::merge(&args, |name| env::var(name).ok())?;
        Ok((cfg, args.command))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_segment = match lookup("OBJECT_SYNC_SEGMENT_SIZE") {
            Some(value) => Some(
                value
                    .parse::<u64>()
                    .with_context(|| format!("parsing OBJECT_SYNC_SEGMENT_SIZE value `{}`", value))?,
            ),
            None => None,
        };
        let segment_size = args
            .segment_size
            .or(env_segment)
            .unwrap_or(DEFAULT_SEGMENT_SIZE);
        if segment_size == 0 {
            bail!("segment size must be positive");
        }

        Ok(Self {
            storage_dir: args
                .storage_dir
                .clone()
                .or_else(|| lookup("OBJECT_SYNC_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .clone()
                .or_else(|| lookup("OBJECT_SYNC_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/object_sync.db".into()),
            container: args
                .container
                .clone()
                .or_else(|| lookup("OBJECT_SYNC_CONTAINER"))
                .unwrap_or_else(|| "default".into()),
            segment_size,
        })
    }
}
