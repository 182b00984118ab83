mod flags;
mod report;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use finrag_retrieval::{RetrievalConfig, RetrievalService};
use finrag_vector_store::NewDocument;
use flags::{parse_threshold_arg, BackendFlag, DurabilityFlag, EmbedModeFlag};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "finrag")]
#[command(about = "Semantic document index for the finance assistant", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// TOML config file (FINRAG_* env vars and flags override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the persisted index and metadata
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Vector index backend
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendFlag>,

    /// Override embedding backend in this process
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedModeFlag>,

    /// Override embedding model id
    #[arg(long, global = true)]
    embed_model: Option<String>,

    /// Model directory (overrides FINRAG_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Confidence threshold in [0, 1]
    #[arg(long, global = true, value_parser = parse_threshold_arg)]
    threshold: Option<f32>,

    /// What a failed write to disk means for an add
    #[arg(long, global = true, value_enum)]
    durability: Option<DurabilityFlag>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed and store documents
    Add(AddArgs),

    /// Semantic search over stored documents
    Search(SearchArgs),

    /// Search and group the hits by document type
    Context(ContextArgs),

    /// Show index statistics
    Stats(StatsArgs),
}

#[derive(Args)]
struct AddArgs {
    /// JSON documents file: `[{content, type, ticker?}]` or `{"documents": [...]}`; `-` is stdin
    #[arg(long, conflicts_with = "content", required_unless_present = "content")]
    file: Option<PathBuf>,

    /// Content of a single document
    #[arg(long)]
    content: Option<String>,

    /// Type of the single document
    #[arg(long = "type", default_value = finrag_vector_store::GENERAL_DOC_TYPE)]
    doc_type: String,

    /// Ticker of the single document
    #[arg(long, requires = "content")]
    ticker: Option<String>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Maximum number of results
    #[arg(short = 'k', long, default_value_t = 5)]
    top_k: usize,

    /// Only return documents of this type
    #[arg(long = "type")]
    filter_type: Option<String>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ContextArgs {
    /// Search query
    query: String,

    /// Buckets to keep, comma separated (e.g. earnings,news)
    #[arg(long, value_delimiter = ',')]
    types: Vec<String>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StatsArgs {
    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentsInput {
    List(Vec<NewDocument>),
    Wrapped { documents: Vec<NewDocument> },
}

#[derive(Serialize)]
struct AddOutput {
    success: bool,
    documents_added: usize,
}

pub async fn main_entry() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout parseable when JSON is requested.
    let json_output = match &cli.command {
        Commands::Add(args) => args.json,
        Commands::Search(args) => args.json,
        Commands::Context(args) => args.json,
        Commands::Stats(args) => args.json,
    };
    if json_output && !cli.verbose {
        cli.quiet = true;
    }
    init_logging(&cli)?;

    let config = build_config(&cli)?;
    let service = RetrievalService::open(&config).await.with_context(|| {
        format!(
            "Failed to open document index at {}",
            config.data_dir.display()
        )
    })?;

    match cli.command {
        Commands::Add(args) => run_add(&service, args).await,
        Commands::Search(args) => run_search(&service, args).await,
        Commands::Context(args) => run_context(&service, args).await,
        Commands::Stats(args) => run_stats(&service, &args).await,
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ORT is extremely noisy
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        None => {
            builder.target(env_logger::Target::Stderr);
        }
    }
    builder.init();
    Ok(())
}

/// Config file, then `FINRAG_*` environment, then flags.
fn build_config(cli: &Cli) -> Result<RetrievalConfig> {
    let mut config =
        RetrievalConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    config
        .apply_env()
        .context("Invalid FINRAG_* environment override")?;

    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    if let Some(backend) = cli.backend {
        config.backend = backend.as_domain();
    }
    if let Some(mode) = cli.embed_mode {
        config.embedding.mode = mode.as_domain();
    }
    if let Some(model) = &cli.embed_model {
        config.embedding.model_id.clone_from(model);
    }
    if let Some(dir) = &cli.model_dir {
        config.embedding.model_dir.clone_from(dir);
    }
    if let Some(threshold) = cli.threshold {
        config.confidence_threshold = threshold;
    }
    if let Some(durability) = cli.durability {
        config.durability = durability.as_domain();
    }

    config.validate().context("Invalid configuration")?;
    log::debug!(
        "Config: data_dir={}, backend={}, embedding={} ({})",
        config.data_dir.display(),
        config.backend.as_str(),
        config.embedding.model_id,
        config.embedding.mode.as_str()
    );
    Ok(config)
}

async fn run_add(service: &RetrievalService, args: AddArgs) -> Result<()> {
    let documents = match (&args.file, args.content) {
        (Some(path), _) => read_documents(path)?,
        (None, Some(content)) => {
            let mut document = NewDocument::new(content, args.doc_type);
            document.ticker = args.ticker;
            vec![document]
        }
        (None, None) => bail!("Either --file or --content is required"),
    };

    let requested = documents.len();
    let success = service.add_documents(documents).await;
    let output = AddOutput {
        success,
        documents_added: if success { requested } else { 0 },
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", report::render_add(output.success, output.documents_added));
    }
    if !success {
        bail!("Adding {requested} documents failed");
    }
    Ok(())
}

fn read_documents(path: &Path) -> Result<Vec<NewDocument>> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read documents from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    let input: DocumentsInput = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON list of documents", path.display()))?;
    Ok(match input {
        DocumentsInput::List(documents) | DocumentsInput::Wrapped { documents } => documents,
    })
}

async fn run_search(service: &RetrievalService, args: SearchArgs) -> Result<()> {
    let response = service
        .search(&args.query, args.top_k, args.filter_type.as_deref())
        .await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", report::render_search(&response));
    }
    Ok(())
}

async fn run_context(service: &RetrievalService, args: ContextArgs) -> Result<()> {
    let types: HashSet<String> = args
        .types
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let response = service
        .get_context(&args.query, (!types.is_empty()).then_some(&types))
        .await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", report::render_context(&response));
    }
    Ok(())
}

async fn run_stats(service: &RetrievalService, args: &StatsArgs) -> Result<()> {
    let stats = service.stats().await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", report::render_stats(&stats));
    }
    Ok(())
}
