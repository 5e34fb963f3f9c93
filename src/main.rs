use docent::chat::{ChatRequest, ChatService, EventStatus, StreamEvent};
use docent::chunker::{ChunkLimits, Chunker, DataType};
use docent::cli::{Cli, Commands, ConfigAction, KbAction};
use docent::config::{expand_path, Config};
use docent::embedding::HnswParams;
use docent::error::{DocentError, Result};
use docent::ingest::{IngestReport, Ingestor};
use docent::retrieval::{SearchRequest, Searcher, SourceTree};
use docent::store::KnowledgeBaseStore;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Kb { action } => {
            let config = load_config(cli.config, cli.profile)?;
            runtime()?.block_on(cmd_kb(&config, action))?;
        }
        Commands::Chunk { file, max_bytes } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_chunk(&config, &file, max_bytes)?;
        }
        Commands::Query {
            query,
            knowledge_bases,
            limit,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            runtime()?.block_on(cmd_query(&config, query, knowledge_bases, limit, json))?;
        }
        Commands::Chat {
            question,
            knowledge_bases,
            thinking,
            model,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            let mut request = ChatRequest::new(question, knowledge_bases);
            request.thinking = thinking;
            request.model = model;
            runtime()?.block_on(cmd_chat(&config, request))?;
        }
        Commands::Serve { bind } => {
            let config = load_config(cli.config, cli.profile)?;
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            runtime()?.block_on(docent::server::run_server(&config, &bind))?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "docent=debug" } else { "docent=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| DocentError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn open_store(config: &Config) -> Result<Arc<KnowledgeBaseStore>> {
    let root = expand_path(&config.storage.knowledge_dir)?;
    Ok(Arc::new(KnowledgeBaseStore::open(
        root,
        HnswParams::from(&config.retrieval),
    )?))
}

fn data_type(structured: bool) -> DataType {
    if structured {
        DataType::Structured
    } else {
        DataType::Unstructured
    }
}

async fn cmd_kb(config: &Config, action: KbAction) -> Result<()> {
    let store = open_store(config)?;

    match action {
        KbAction::Create {
            name,
            categories,
            structured,
        } => {
            let ingestor = Ingestor::from_config(config, Arc::clone(&store))?;
            let report = ingestor
                .create_from_categories(&name, &categories, data_type(structured))
                .await?;
            println!("✓ Created knowledge base {} ({})", name, report.knowledge_base_id);
            print_ingest_report(&report);
        }
        KbAction::Add {
            id,
            paths,
            category,
            structured,
        } => {
            let ingestor = Ingestor::from_config(config, Arc::clone(&store))?;
            let report = ingestor
                .add_files(&id, &paths, &category, data_type(structured))
                .await?;
            println!("✓ Added files to {}", id);
            print_ingest_report(&report);
        }
        KbAction::List => {
            let manifests = store.list()?;
            if manifests.is_empty() {
                println!("No knowledge bases. Create one with 'docent kb create'.");
            }
            for manifest in manifests {
                println!(
                    "{}  {}  {} vectors  [{}]",
                    manifest.id,
                    manifest.name,
                    manifest.vector_count,
                    manifest.categories.join(", ")
                );
            }
        }
        KbAction::Info { id } => {
            let manifest = store.manifest(&id)?;
            let json = serde_json::to_string_pretty(&manifest).map_err(|e| DocentError::Json {
                source: e,
                context: "Failed to serialize manifest".to_string(),
            })?;
            println!("{}", json);
        }
        KbAction::Delete { id } => {
            store.delete(&id).await?;
            println!("✓ Deleted knowledge base {}", id);
        }
    }

    Ok(())
}

fn print_ingest_report(report: &IngestReport) {
    println!(
        "  Files: {}  Chunks: {}  Vectors: {}",
        report.files_indexed, report.chunks_indexed, report.vector_count
    );
    if !report.skipped.is_empty() {
        println!("  Skipped {} files:", report.skipped.len());
        for skipped in &report.skipped {
            println!("    {} ({})", skipped.path.display(), skipped.reason);
        }
    }
}

fn cmd_chunk(config: &Config, file: &Path, max_bytes: Option<usize>) -> Result<()> {
    let text = std::fs::read_to_string(file).map_err(|e| DocentError::Io {
        source: e,
        context: format!("Failed to read {}", file.display()),
    })?;

    let chunker = match max_bytes {
        Some(max) => Chunker::new(ChunkLimits::for_max(max)),
        None => Chunker::from_config(&config.chunking),
    };

    let pieces = chunker.split(&text);
    for (i, piece) in pieces.iter().enumerate() {
        println!("──── chunk {} ({} bytes) ────", i + 1, piece.len());
        println!("{}", piece);
    }
    println!("\n{} chunks from {} bytes", pieces.len(), text.len());
    Ok(())
}

async fn cmd_query(
    config: &Config,
    query: String,
    knowledge_bases: Vec<String>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let searcher = Searcher::from_config(config, store)?;

    let mut request = SearchRequest::new(query, knowledge_bases);
    request.top_k_per_kb = config.retrieval.top_k_per_kb;
    request.final_n = limit.unwrap_or(config.chat.final_n);

    let results = searcher.search(&request).await?;

    if json {
        let out = serde_json::to_string_pretty(&results).map_err(|e| DocentError::Json {
            source: e,
            context: "Failed to serialize results".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results");
    }
    for result in &results {
        let chunk = &result.chunk;
        println!(
            "#{} {:.3} ({:?})  {}/{}/{}",
            result.rank,
            result.relevance_score,
            result.scored_by,
            chunk.knowledge_base_id,
            chunk.category,
            chunk.file_name
        );
        println!("{}\n", chunk.text);
    }
    Ok(())
}

async fn cmd_chat(config: &Config, request: ChatRequest) -> Result<()> {
    let store = open_store(config)?;
    let searcher = Arc::new(Searcher::from_config(config, store)?);
    let service = Arc::new(ChatService::from_config(config, searcher)?);

    let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamEvent>(64);
    let session = service.session(request);
    let task = tokio::spawn(session.run(tx));

    let mut stdout = std::io::stdout();
    let mut reasoning_started = false;
    let mut failure = None;

    while let Some(event) = rx.recv().await {
        match event.status {
            EventStatus::Chunks => {
                let count = event.sources.as_ref().map(SourceTree::len).unwrap_or(0);
                tracing::info!("Grounding answer in {} passages", count);
                tracing::debug!("Retrieved passages:\n{}", event.content);
            }
            EventStatus::Reasoning => {
                if !reasoning_started {
                    println!("Thinking:");
                    reasoning_started = true;
                }
                print!("{}", event.content);
            }
            EventStatus::Content | EventStatus::Tokens => {
                if reasoning_started {
                    println!("\n\nAnswer:");
                    reasoning_started = false;
                }
                print!("{}", event.content);
            }
            EventStatus::End => {
                println!("\n");
                let sources = event.sources.unwrap_or_default();
                println!("{}", sources.render_citations());
            }
            EventStatus::Error => {
                failure = Some(event.content);
            }
        }
        stdout.flush().ok();
    }

    let outcome = task
        .await
        .map_err(|e| DocentError::Other(anyhow::anyhow!("Chat session task failed: {}", e)))?;
    tracing::debug!("Chat session finished: {:?}", outcome);

    match failure {
        Some(message) => Err(DocentError::Other(anyhow::anyhow!(message))),
        None => Ok(()),
    }
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| DocentError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
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

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| DocentError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'docent config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
