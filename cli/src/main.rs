//! # Teddy CLI (`teddy`)
//!
//! Semantic row search over CSV, TSV and Excel files.
//!
//! ```bash
//! # See what a file contains
//! teddy inspect products.xlsx
//!
//! # Embed two columns of the first sheet and print the corpus fingerprint
//! teddy index products.xlsx --columns name,description
//!
//! # Ask a question against the cached corpus
//! teddy query <FINGERPRINT> "waterproof hiking boots" --top-k 3
//! ```
//!
//! Log output goes to stderr and is controlled with `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use teddy_corpus::{
    CacheStore, CorpusBuilder, CorpusFingerprint, ExtractionConfig, RecordMatch, SourceFile,
    TeddyConfig, export_results, load_config,
};
use teddy_embeddings::{HttpProviderFactory, ModelRegistry};

/// Semantic search over the rows of tabular files.
#[derive(Debug, Parser)]
#[command(name = "teddy", version)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `<config dir>/teddy/config.toml`; a missing file means
    /// built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the sheets and columns of a file.
    Inspect {
        file: PathBuf,
    },

    /// Embed the selected columns of a file and print the corpus fingerprint.
    ///
    /// Re-running with the same file, columns, sheet and model reuses the
    /// cached corpus.
    Index {
        file: PathBuf,

        /// Columns to embed, comma separated. Order matters.
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        /// Sheet to read (workbooks only; defaults to the first sheet).
        #[arg(long)]
        sheet: Option<String>,

        /// Model key; defaults to the configured default model.
        #[arg(long)]
        model: Option<String>,
    },

    /// Rank the rows of a cached corpus against a query.
    Query {
        fingerprint: String,

        text: String,

        #[arg(long, short = 'k', default_value_t = 5)]
        top_k: usize,

        /// Model key; defaults to the model the corpus was built with.
        #[arg(long)]
        model: Option<String>,

        /// Also write the results to this file (.csv, .txt or .json).
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// List cached corpora.
    List,

    /// Delete a cached corpus.
    Delete {
        fingerprint: String,
    },

    /// List supported model keys.
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref()).await?;
    let builder = corpus_builder(&config).await?;

    match cli.command {
        Command::Inspect { file } => {
            let source = read_source(&file).await?;
            let overview = builder.inspect(&source)?;
            if let Some(sheets) = overview.sheets {
                println!("sheets: {}", sheets.join(", "));
            }
            println!("columns: {}", overview.columns.join(", "));
        }
        Command::Index {
            file,
            columns,
            sheet,
            model,
        } => {
            let source = read_source(&file).await?;
            let mut selection = ExtractionConfig::new(columns);
            if let Some(sheet) = sheet {
                selection = selection.with_sheet(sheet);
            }
            let model = model.unwrap_or_else(|| config.default_model.clone());
            let fingerprint = builder
                .prepare_corpus(&source, &selection, &model)
                .await
                .with_context(|| format!("failed to index {}", file.display()))?;
            println!("{fingerprint}");
        }
        Command::Query {
            fingerprint,
            text,
            top_k,
            model,
            export,
        } => {
            let fingerprint = CorpusFingerprint::from_hex(fingerprint);
            let model = match model {
                Some(model) => model,
                None => {
                    builder
                        .store()
                        .load_metadata(fingerprint.as_str())
                        .await?
                        .model_key
                }
            };
            let results = builder
                .query_corpus(&text, &fingerprint, &model, top_k)
                .await
                .with_context(|| format!("query against {fingerprint} failed"))?;
            print_results(&results);
            if let Some(path) = export {
                export_results(&results, &path)
                    .await
                    .with_context(|| format!("failed to export to {}", path.display()))?;
                info!("Wrote {} results to {}", results.len(), path.display());
            }
        }
        Command::List => {
            for corpus in builder.list_cached().await? {
                println!(
                    "{}  {}  model={}  columns={}  rows={}  created={}",
                    corpus.identity,
                    corpus.file_name,
                    corpus.model_key,
                    corpus.columns.join(","),
                    corpus.record_count,
                    corpus.created_at.to_rfc3339()
                );
            }
        }
        Command::Delete { fingerprint } => {
            let fingerprint = CorpusFingerprint::from_hex(fingerprint);
            if builder.store().exists(fingerprint.as_str()).await {
                builder.delete(&fingerprint).await?;
                println!("deleted {fingerprint}");
            } else {
                println!("{fingerprint} is not cached");
            }
        }
        Command::Models => {
            for spec in builder.registry().specs() {
                let marker = if spec.key == config.default_model {
                    " (default)"
                } else {
                    ""
                };
                println!("{}  {}{marker}", spec.key, spec.model);
            }
        }
    }

    Ok(())
}

async fn resolve_config(explicit: Option<&Path>) -> Result<TeddyConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("teddy")
            .join("config.toml"),
    };
    let mut config = load_config(&path)
        .await
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

async fn corpus_builder(config: &TeddyConfig) -> Result<CorpusBuilder> {
    let store = CacheStore::new(&config.cache_root)
        .await
        .with_context(|| format!("failed to open cache at {}", config.cache_root.display()))?;
    let factory = HttpProviderFactory::new(&config.embedding.base_url)
        .with_api_key(config.embedding.api_key())
        .with_batch_size(config.embedding.batch_size);
    let registry = ModelRegistry::new(config.model_specs(), factory);

    Ok(CorpusBuilder::new(store, Arc::new(registry))
        .with_embed_timeout(config.embedding.timeout()))
}

async fn read_source(path: &Path) -> Result<SourceFile> {
    SourceFile::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn print_results(results: &[RecordMatch]) {
    for (rank, hit) in results.iter().enumerate() {
        let fields: Vec<String> = hit
            .record
            .iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={other}"),
            })
            .collect();
        println!(
            "{}. [{:.4}] row {}: {}",
            rank + 1,
            hit.score,
            hit.index,
            fields.join("  ")
        );
    }
}
