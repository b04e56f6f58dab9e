use std::path::{Path, PathBuf};
use std::time::Duration;

use trawl::cli::{Cli, CollectionsAction, Commands, ConfigAction, ConversationsAction};
use trawl::config::Config;
use trawl::context::AppContext;
use trawl::error::{Result, TrawlError};
use trawl::pipeline::IndexOptions;
use trawl::records::{RawImageRecord, RawRecord};
use trawl::search::{self, SearchFilters, SearchHit, SearchRequest};
use trawl::store::{MetaValue, SearchMode};
use trawl::tasks::{TaskEvent, TaskId};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Index {
            input,
            tag,
            reset,
            images,
        } => {
            let ctx = load_context(cli.config)?;
            cmd_index(&ctx, &input, tag, reset, images).await?;
        }
        Commands::Search {
            query,
            collections,
            k,
            mode,
            exclude_noise,
            start,
            end,
            direction,
            contact,
            app,
            record_type,
            lat,
            lon,
            radius_km,
            max_distance,
            json,
        } => {
            let ctx = load_context(cli.config)?;
            let filters = SearchFilters {
                timestamp_start: start,
                timestamp_end: end,
                direction,
                contact,
                app,
                record_type,
                gps_lat: lat,
                gps_lon: lon,
                radius_km,
            };
            let mode = match mode {
                Some(raw) => Some(SearchMode::parse(&raw).ok_or_else(|| {
                    TrawlError::Config(format!("Unknown search mode '{}'", raw))
                })?),
                None => None,
            };
            let request = SearchRequest {
                collection: String::new(),
                query,
                k,
                filters,
                mode,
                exclude_noise: exclude_noise.then_some(true),
                distance_ceiling: max_distance,
            };
            cmd_search(&ctx, &collections, &request, json)?;
        }
        Commands::Context {
            collection,
            message_id,
            before,
            after,
            json,
        } => {
            let ctx = load_context(cli.config)?;
            cmd_context(&ctx, &collection, &message_id, before, after, json)?;
        }
        Commands::Conversations { action } => {
            let ctx = load_context(cli.config)?;
            cmd_conversations(&ctx, action)?;
        }
        Commands::Collections { action } => {
            let ctx = load_context(cli.config)?;
            cmd_collections(&ctx, action)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "trawl=debug" } else { "trawl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_context(config_path: Option<PathBuf>) -> Result<AppContext> {
    let path = config_path.unwrap_or_else(|| Config::default_path().unwrap());

    let config = if path.exists() {
        Config::load(&path)?
    } else {
        tracing::warn!("Config file not found, using defaults. Run 'trawl config init' to create one.");
        Config::default()
    };

    AppContext::from_config(config)
}

async fn cmd_index(
    ctx: &AppContext,
    input: &Path,
    tag: Option<String>,
    reset: bool,
    images: bool,
) -> Result<()> {
    let indexer = ctx.indexer()?;

    // A directory ingests every record file in it, tagged per file stem
    let inputs: Vec<(PathBuf, String)> = if input.is_dir() {
        let mut files = Vec::new();
        let entries = std::fs::read_dir(input).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to read input directory: {:?}", input),
        })?;
        for entry in entries {
            let path = entry
                .map_err(|e| TrawlError::Io {
                    source: e,
                    context: "Failed to read directory entry".to_string(),
                })?
                .path();
            let is_record_file = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "jsonl" || e == "json");
            if is_record_file {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("batch")
                    .to_string();
                let file_tag = match &tag {
                    Some(tag) => format!("{}_{}", tag, stem),
                    None => stem,
                };
                files.push((path, file_tag));
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(TrawlError::Config(format!(
                "No .jsonl or .json record files in {:?}",
                input
            )));
        }
        files
    } else {
        vec![(input.to_path_buf(), tag.unwrap_or_default())]
    };

    for (path, batch_tag) in inputs {
        println!("Indexing {:?} (tag: '{}')", path, batch_tag);
        let options = IndexOptions {
            batch_tag,
            reset,
        };

        let task_id = if images {
            let rows: Vec<RawImageRecord> = read_record_file(&path)?;
            indexer.spawn_images(rows, options)
        } else {
            let rows: Vec<RawRecord> = read_record_file(&path)?;
            indexer.spawn_messages(rows, options)
        };

        watch_task(ctx, &task_id).await?;
    }

    Ok(())
}

/// Follow a task's progress events until it reaches a terminal state
async fn watch_task(ctx: &AppContext, task_id: &TaskId) -> Result<()> {
    let (snapshot, mut rx) = ctx.tasks.subscribe(task_id)?;
    if snapshot.state.is_terminal() {
        return print_task_outcome(ctx, task_id);
    }

    loop {
        match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Ok(TaskEvent::Progress {
                progress,
                stage,
                message,
                ..
            })) => {
                println!("  [{:>5.1}%] {:<10} {}", progress, stage, message);
            }
            Ok(Ok(TaskEvent::Complete { statistics, .. })) => {
                println!("  Done.");
                if let Some(messages) = statistics.get("messages_indexed") {
                    println!(
                        "  messages: {}, chunks: {}, images: {}",
                        messages,
                        statistics.get("chunks_indexed").unwrap_or(&0.into()),
                        statistics.get("images_indexed").unwrap_or(&0.into()),
                    );
                }
                return Ok(());
            }
            Ok(Ok(TaskEvent::Error { error, .. })) => {
                return Err(TrawlError::Config(format!("Indexing failed: {}", error)));
            }
            // Missed events or a quiet channel: fall back to the snapshot
            Ok(Err(_)) | Err(_) => {
                let snapshot = ctx.tasks.get(task_id)?;
                if snapshot.state.is_terminal() {
                    return print_task_outcome(ctx, task_id);
                }
            }
        }
    }
}

fn print_task_outcome(ctx: &AppContext, task_id: &TaskId) -> Result<()> {
    let snapshot = ctx.tasks.get(task_id)?;
    match snapshot.error {
        Some(error) => Err(TrawlError::Config(format!("Indexing failed: {}", error))),
        None => {
            println!("  Done.");
            Ok(())
        }
    }
}

fn cmd_search(
    ctx: &AppContext,
    collections: &[String],
    request: &SearchRequest,
    json: bool,
) -> Result<()> {
    let engine = ctx.engine()?;

    let hits = if collections.len() == 1 {
        let mut request = request.clone();
        request.collection = collections[0].clone();
        engine.search(&request)?
    } else {
        engine.search_many(collections, request)?
    };

    if json {
        println!("{}", to_json(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        print_hit(rank + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    let timestamp = hit
        .metadata
        .get("timestamp")
        .and_then(MetaValue::as_f64)
        .and_then(|ts| chrono::DateTime::from_timestamp(ts as i64, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let contact = hit
        .metadata
        .get("contact")
        .and_then(MetaValue::as_str)
        .unwrap_or("-");

    let mut doc = hit.document.replace('\n', " | ");
    if doc.len() > 120 {
        let mut end = 120;
        while !doc.is_char_boundary(end) {
            end -= 1;
        }
        doc.truncate(end);
        doc.push_str("...");
    }

    println!(
        "{:>3}. [{:.3}] {} {} ({}) {}",
        rank, hit.score, hit.collection, hit.id, contact, timestamp
    );
    println!("     {}", doc);
}

fn cmd_context(
    ctx: &AppContext,
    collection: &str,
    message_id: &str,
    before: usize,
    after: usize,
    json: bool,
) -> Result<()> {
    let window = search::reconstruct(&ctx.store, collection, message_id, before, after)?;

    if json {
        println!("{}", to_json(&window)?);
        return Ok(());
    }

    for entry in &window {
        let marker = if entry.is_target { ">" } else { " " };
        let direction = entry
            .row
            .metadata
            .get("direction")
            .and_then(MetaValue::as_str)
            .unwrap_or("unknown");
        println!(
            "{} [{}] {}: {}",
            marker, entry.row.id, direction, entry.row.document
        );
    }
    Ok(())
}

fn cmd_conversations(ctx: &AppContext, action: ConversationsAction) -> Result<()> {
    match action {
        ConversationsAction::List { collection } => {
            let summaries = search::list_conversations(&ctx.store, &collection)?;
            println!("{} conversation(s) in '{}'", summaries.len(), collection);
            for summary in summaries {
                let name = summary.contact_name.as_deref().unwrap_or(&summary.contact);
                println!(
                    "  {} ({} messages) - {}",
                    name, summary.message_count, summary.last_message
                );
            }
        }
        ConversationsAction::Show {
            collection,
            contact,
        } => {
            let rows = search::conversation_messages(&ctx.store, &collection, &contact)?;
            for row in rows {
                let direction = row
                    .metadata
                    .get("direction")
                    .and_then(MetaValue::as_str)
                    .unwrap_or("unknown");
                println!("[{}] {}: {}", row.id, direction, row.document);
            }
        }
        ConversationsAction::Grep {
            collection,
            contact,
            term,
        } => {
            let rows = search::grep_conversation(&ctx.store, &collection, &contact, &term)?;
            println!("{} match(es)", rows.len());
            for row in rows {
                println!("[{}] {}", row.id, row.document);
            }
        }
    }
    Ok(())
}

fn cmd_collections(ctx: &AppContext, action: CollectionsAction) -> Result<()> {
    match action {
        CollectionsAction::List => {
            let infos = ctx.store.list_collections()?;
            if infos.is_empty() {
                println!("No collections.");
            }
            for info in infos {
                println!(
                    "{:<30} {:<9} {:>7} rows  dim={} model={}",
                    info.name, info.kind, info.record_count, info.embedding_dim, info.embedding_model
                );
            }
        }
        CollectionsAction::Count { name } => {
            println!("{}", ctx.store.count(&name)?);
        }
        CollectionsAction::Delete { name } => {
            ctx.store.delete_collection(&name)?;
            println!("Deleted '{}'", name);
        }
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let path = config_path.unwrap_or_else(|| Config::default_path().unwrap());
            let config = if path.exists() {
                Config::load(&path)?
            } else {
                Config::default()
            };
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            let path = config_path
                .map(Ok)
                .unwrap_or_else(Config::default_path)?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| TrawlError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;
            println!("Configuration initialized at: {}", path.display());

            // Install the default noise rule set next to the config
            if let Some(parent) = path.parent() {
                let noise_path = parent.join("noise.toml");
                if force || !noise_path.exists() {
                    let noise_content = include_str!("../config-templates/noise.toml");
                    std::fs::write(&noise_path, noise_content).map_err(|e| TrawlError::Io {
                        source: e,
                        context: format!("Failed to write noise rules: {:?}", noise_path),
                    })?;
                    println!("Noise rules installed at: {}", noise_path.display());
                }
            }
        }
        ConfigAction::Validate { file } => {
            let path = file
                .or(config_path)
                .map(Ok)
                .unwrap_or_else(Config::default_path)?;
            let config = Config::load(&path)?;
            println!("Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
    }
    Ok(())
}

/// Read a record file: JSON lines, or a single JSON array
fn read_record_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path).map_err(|e| TrawlError::Io {
        source: e,
        context: format!("Failed to read record file: {:?}", path),
    })?;

    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| TrawlError::Json {
            source: e,
            context: format!("Failed to parse JSON array: {:?}", path),
        });
    }

    let mut rows = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: T = serde_json::from_str(line).map_err(|e| TrawlError::Json {
            source: e,
            context: format!("Failed to parse line {} of {:?}", lineno + 1, path),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| TrawlError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}
