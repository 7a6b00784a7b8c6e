use anyhow::{Context, Result};
use object_sync::{
    DiffEngine, NamespaceTree, TransferEngine,
    config::{AppConfig, Command},
    models::{comparison::ComparisonItem, entry::last_segment},
    services::{
        progress::{CollectErrors, ProgressSink},
        remote::{RemoteStore, list_all},
        storage_service::{StorageService, run_migrations},
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, path::Path, str::FromStr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Logs progress at segment / chunk boundaries.
struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, overall: f64, overall_message: &str, item: f64, item_message: &str) {
        tracing::debug!(
            "{:5.1}% {} | {:5.1}% {}",
            overall * 100.0,
            overall_message,
            item * 100.0,
            item_message
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting object-sync with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    // --- Handle migration mode ---
    if command == Command::Migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let store = StorageService::new(db, cfg.storage_dir.clone());
    let mut engine = TransferEngine::new(store, cfg.segment_size)?;
    run(&mut engine, &cfg, command).await
}

async fn run(
    engine: &mut TransferEngine<StorageService>,
    cfg: &AppConfig,
    command: Command,
) -> Result<()> {
    let container = cfg.container.as_str();
    let errors = CollectErrors::new();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current object");
                cancel.cancel();
            }
        });
    }

    match command {
        Command::Migrate => {}
        Command::Upload {
            path,
            key,
            overwrite,
            content_type,
        } => {
            if path.is_dir() {
                let prefix = key.unwrap_or_default();
                let summary = engine
                    .upload_directory(&path, container, &prefix, overwrite, &LogProgress, &errors, &cancel)
                    .await?;
                println!("{summary:?}");
            } else {
                let key = match key {
                    Some(key) => key,
                    None => path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .context("upload path has no file name")?,
                };
                let outcome = engine
                    .upload_file(container, &key, &path, content_type.as_deref(), overwrite, &LogProgress)
                    .await?;
                println!("{outcome:?}");
            }
        }
        Command::Download {
            key,
            target,
            recursive,
        } => {
            if recursive {
                let summary = engine
                    .download_prefix(container, &key, &target, &LogProgress, &errors, &cancel)
                    .await?;
                println!("{summary:?}");
            } else {
                let entry = engine
                    .store()
                    .head(container, &key)
                    .await?
                    .with_context(|| format!("object `{}` not found", key))?;
                let written = engine.download(container, &entry, &target, &LogProgress).await?;
                println!("wrote {} bytes to {}", written, target.display());
            }
        }
        Command::Diff {
            local,
            remote_root,
            json,
        } => {
            let result = DiffEngine::new(engine)
                .reconcile(&local, container, &remote_root)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for item in &result.local_only {
                    println!("+ {}", describe(item));
                }
                for item in &result.remote_only {
                    println!("- {}", describe(item));
                }
                for pair in &result.differing {
                    println!("~ {}", describe(&pair.local));
                }
                println!("{} identical", result.identical);
            }
        }
        Command::Tree { prefix } => {
            let entries = list_all(engine.store(), container, prefix.as_deref().unwrap_or("")).await?;
            let tree = NamespaceTree::build(container, entries);
            for (depth, node) in tree.walk() {
                let suffix = if node.is_root || tree.is_leaf(node) { "" } else { "/" };
                let kind = if node.is_virtual() && !node.is_root { " (virtual)" } else { "" };
                println!("{}{}{}{}", "  ".repeat(depth), node.display_name, suffix, kind);
            }
        }
        Command::Delete { key, recursive } => {
            if recursive {
                let summary = engine.delete_prefix(container, &key, &errors, &cancel).await?;
                println!("{summary:?}");
            } else {
                engine.delete_object(container, &key).await?;
                println!("deleted {}", last_segment(&key));
            }
        }
    }

    for (key, message) in errors.take() {
        eprintln!("error: {key}: {message}");
    }
    Ok(())
}

fn describe(item: &ComparisonItem) -> String {
    match item.hash() {
        Some(hash) => format!("{} ({} bytes, {})", item.remote_full_name(), item.size(), hash),
        None => format!("{} ({} bytes)", item.remote_full_name(), item.size()),
    }
}
