use anyhow::{Context, Result};
use knowbase::cli::{Cli, Commands, ConfigAction, NotesAction};
use knowbase::config::{Config, ConfigValidator};
use knowbase::notes::NoteStore;
use knowbase::retrieval::{previews, Query};
use knowbase::storage::Database;
use knowbase::ResearchContext;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Index { force } => cmd_index(cli.config, force).await?,
        Commands::Search {
            query,
            k,
            fetch_k,
            lambda,
            json,
        } => cmd_search(cli.config, query, k, fetch_k, lambda, json).await?,
        Commands::Add { files } => cmd_add(cli.config, files).await?,
        Commands::Reset => cmd_reset(cli.config).await?,
        Commands::Stats { json } => cmd_stats(cli.config, json).await?,
        Commands::Notes { action } => cmd_notes(cli.config, action)?,
        Commands::Config { action } => cmd_config(cli.config, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("knowbase=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("knowbase=info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    Config::load_or_default(config_path.as_deref()).context("Failed to load configuration")
}

fn open_context(config_path: Option<PathBuf>) -> Result<ResearchContext> {
    let config = load_config(config_path)?;
    ResearchContext::from_config(config).context("Failed to open the knowledge base")
}

async fn cmd_index(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let ctx = open_context(config_path)?;
    let status = ctx
        .manager()
        .initialize(force)
        .await
        .context("Indexing failed")?;

    println!("✓ Index {}", status.state);
    println!("  Entries: {}", status.entries);
    if status.documents_indexed > 0 || status.documents_skipped > 0 {
        println!("  Documents indexed: {}", status.documents_indexed);
        println!("  Documents skipped: {}", status.documents_skipped);
    }
    Ok(())
}

async fn cmd_search(
    config_path: Option<PathBuf>,
    text: String,
    k: Option<usize>,
    fetch_k: Option<usize>,
    lambda: Option<f32>,
    json: bool,
) -> Result<()> {
    let ctx = open_context(config_path)?;
    let defaults = ctx.retriever().defaults();
    let query = Query::new(
        text,
        k.unwrap_or(defaults.k),
        fetch_k.unwrap_or(defaults.fetch_k),
        lambda.unwrap_or(defaults.lambda),
    );

    let results = ctx
        .retriever()
        .retrieve_query(&query)
        .await
        .context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No relevant information found in local documents.");
        return Ok(());
    }

    for (rank, (result, (source, preview))) in results.iter().zip(previews(&results)).enumerate() {
        println!("{}. {} (score {:.3})", rank + 1, source, result.score);
        println!("   {}", preview.replace('\n', " "));
    }
    Ok(())
}

async fn cmd_add(config_path: Option<PathBuf>, files: Vec<PathBuf>) -> Result<()> {
    let ctx = open_context(config_path)?;
    let status = ctx
        .manager()
        .add_files(&files)
        .await
        .context("Adding documents failed")?;

    println!("✓ Added {} documents", status.documents_indexed);
    if status.documents_skipped > 0 {
        println!("  Skipped: {}", status.documents_skipped);
    }
    println!("  Entries: {}", status.entries);
    Ok(())
}

async fn cmd_reset(config_path: Option<PathBuf>) -> Result<()> {
    let ctx = open_context(config_path)?;
    ctx.manager().reset().await.context("Reset failed")?;
    println!("✓ Index cleared");
    Ok(())
}

async fn cmd_stats(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let ctx = open_context(config_path)?;
    let stats = ctx.manager().stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Documents: {}", stats.documents_dir.display());
    println!("  Eligible files: {}", stats.eligible_files);
    println!("  PDF files (not indexed): {}", stats.pdf_files);
    println!("  Total files: {}", stats.total_files);
    println!("Index: {}", stats.index_path.display());
    println!("  Exists: {}", stats.index_exists);
    println!(
        "  Size: {:.2} MB",
        stats.index_size_bytes as f64 / (1024.0 * 1024.0)
    );
    println!("  Entries: {}", stats.entries);
    println!("  State: {}", stats.state);
    Ok(())
}

fn cmd_notes(config_path: Option<PathBuf>, action: NotesAction) -> Result<()> {
    // Notes never touch the embedding model
    let config = load_config(config_path)?;
    let paths = config.storage_paths()?;
    paths.bootstrap(&config.ingest.extensions)?;
    let database = Arc::new(Database::new(&paths.database_path())?);
    let notes = NoteStore::new(database);

    match action {
        NotesAction::Save { title, content } => {
            let id = notes.save(&title, &content)?;
            println!("✓ Note saved: {}", id);
        }
        NotesAction::List => {
            let all = notes.list()?;
            if all.is_empty() {
                println!("No notes saved");
            }
            for note in all {
                println!(
                    "{}  {}  {}",
                    note.created_at.format("%Y-%m-%d %H:%M:%S"),
                    note.id,
                    note.title
                );
            }
        }
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}
