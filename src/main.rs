mod llm_client;
mod orchestrator;
mod rag;
mod store;
mod tools;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use llm_client::build_chat_client;
use orchestrator::{ChatSession, ExchangeController, ExchangeEvent};
use rag::types::IngestSummary;
use rag::{
    build_retriever_from_env, ContextRetriever, Extracted, Metadata, MetadataFilter,
    PineconeClient, PlainTextExtractor, RagConfig, TextExtractor, VectorIndexConfig,
};
use serde_json::json;
use store::{Conversation, InMemoryStore};
use tools::ToolDispatcher;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "jarvis-cortex",
    about = "Personal assistant backend: streamed chat with retrieval and task/calendar tools"
)]
struct Cli {
    /// Optional one-shot prompt; if omitted the CLI enters interactive mode.
    #[arg(short, long)]
    prompt: Option<String>,

    /// Use the stubbed echo model instead of an OpenAI-compatible endpoint.
    #[arg(long, default_value_t = false)]
    echo: bool,

    /// Keep vectors in process with hashed embeddings instead of Pinecone.
    #[arg(long, default_value_t = false)]
    memory_index: bool,

    /// Scope the chat session to a project; retrieval is filtered to its files.
    #[arg(long)]
    project: Option<String>,

    /// Core memory injected into the system prompt (repeatable).
    #[arg(long = "remember", value_name = "CATEGORY=TEXT", value_parser = parse_memory)]
    remember: Vec<(String, String)>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk, embed and upsert a text file into the vector index.
    Ingest {
        path: PathBuf,
        /// Attach the file to a project so project sessions can retrieve it.
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = RagConfig::DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Run a retrieval query and print the matching snippets.
    Query {
        text: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = RagConfig::DEFAULT_TOP_K)]
        top_k: usize,
        #[arg(long, default_value = RagConfig::DEFAULT_NAMESPACE)]
        namespace: String,
    },
    /// Print Pinecone index statistics to verify connectivity.
    IndexStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let rag_config = RagConfig::from_env();
    let store = Arc::new(InMemoryStore::new());

    if let Some(command) = cli.command {
        match command {
            Commands::IndexStats => run_index_stats(&rag_config).await?,
            Commands::Ingest {
                path,
                project,
                namespace,
            } => {
                let retriever = build_retriever_from_env(&rag_config, cli.memory_index).await;
                if !retriever.is_enabled() {
                    bail!("Vector index not configured; set PINECONE_API_KEY or pass --memory-index");
                }
                let summary =
                    run_ingest(&retriever, &store, &path, project.as_deref(), &namespace).await?;
                println!(
                    "✔ {}: {} chunks, {} embedded, {} upserted",
                    path.display(),
                    summary.chunks,
                    summary.embedded,
                    summary.upserted
                );
            }
            Commands::Query {
                text,
                project,
                top_k,
                namespace,
            } => {
                let retriever = build_retriever_from_env(&rag_config, cli.memory_index).await;
                run_query(&retriever, &store, &text, project.as_deref(), top_k, &namespace)
                    .await?;
            }
        }
        return Ok(());
    }

    let chat_client = build_chat_client(cli.echo);
    let retriever = Arc::new(build_retriever_from_env(&rag_config, cli.memory_index).await);
    if retriever.is_enabled() {
        info!("Retrieval enabled");
    } else {
        warn!("Retrieval disabled; answers will not use file or memory context");
    }

    for (category, content) in cli.remember {
        store.add_memory(category, content)?;
    }

    let title = match cli.project.as_deref() {
        Some(name) => {
            store.create_project(name, None)?;
            Conversation::project_title(name)
        }
        None => "CLI session".to_string(),
    };
    let conversation = store.create_conversation(title)?;

    let controller = Arc::new(
        ExchangeController::new(
            store.clone(),
            retriever.clone(),
            Arc::new(ToolDispatcher::new(store.clone())),
            chat_client,
        )
        .with_retrieval_scope(rag_config.namespace.clone(), rag_config.top_k),
    );
    let mut session = ChatSession::open(controller, conversation.id)
        .await
        .context("Failed to open chat session")?;
    info!(
        conversation_id = session.conversation_id(),
        project_scoped = session.filter().is_some(),
        "Chat session opened"
    );
    debug!(system_prompt = %session.system_prompt(), "Session system prompt");

    if let Some(prompt) = cli.prompt {
        run_single(&mut session, prompt).await?;
        return Ok(());
    }

    let repl = ReplContext {
        retriever: &retriever,
        store: &store,
        project: cli.project.as_deref(),
        namespace: &rag_config.namespace,
    };
    run_repl(&mut session, repl).await
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn parse_memory(raw: &str) -> Result<(String, String), String> {
    let (category, content) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected CATEGORY=TEXT, got '{raw}'"))?;
    let (category, content) = (category.trim(), content.trim());
    if category.is_empty() || content.is_empty() {
        return Err(format!("expected CATEGORY=TEXT, got '{raw}'"));
    }

    Ok((category.to_string(), content.to_string()))
}

async fn run_single(session: &mut ChatSession, prompt: String) -> anyhow::Result<()> {
    let mut events = session.submit(prompt).await;
    println!("\nJarvis:");

    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        match event {
            ExchangeEvent::Content { text } => {
                print!("{text}");
                io::stdout().flush()?;
            }
            ExchangeEvent::ToolInvoked {
                name,
                result,
                is_error,
            } => {
                if is_error {
                    warn!(tool = %name, %result, "Tool reported an error");
                }
                println!("\n[{name}] {result}");
            }
            ExchangeEvent::TurnComplete => println!("\n"),
            ExchangeEvent::Error { message } => {
                error!(%message, "Exchange failed");
                bail!("Exchange failed: {message}");
            }
        }
        if terminal {
            break;
        }
    }

    Ok(())
}

struct ReplContext<'a> {
    retriever: &'a ContextRetriever,
    store: &'a InMemoryStore,
    project: Option<&'a str>,
    namespace: &'a str,
}

async fn run_repl(session: &mut ChatSession, repl: ReplContext<'_>) -> anyhow::Result<()> {
    println!("Jarvis CLI ready. Type '/ingest <path>' to add a file, 'exit' to quit.\n");
    let stdin = io::stdin();

    loop {
        print!("You > ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }
        let trimmed = buffer.trim();

        if trimmed.eq_ignore_ascii_case("exit") {
            info!("User exited CLI");
            break;
        }

        if trimmed.is_empty() {
            continue;
        }

        if let Some(path) = trimmed.strip_prefix("/ingest ") {
            let path = Path::new(path.trim());
            match run_ingest(repl.retriever, repl.store, path, repl.project, repl.namespace).await
            {
                Ok(summary) => println!("✔ Ingested {} chunks\n", summary.upserted),
                Err(err) => println!("⚠️  {err:#}\n"),
            }
            continue;
        }

        run_single(session, trimmed.to_owned()).await?;
    }

    Ok(())
}

/// Project-scoped metadata for a file; ids come from the store so sessions can filter on them.
fn file_metadata(
    store: &InMemoryStore,
    filename: &str,
    project: Option<&str>,
) -> anyhow::Result<Metadata> {
    let mut metadata = Metadata::new();
    metadata.insert("filename".into(), json!(filename));
    match project {
        Some(name) => {
            let project = store.create_project(name, None)?;
            metadata.insert("project_id".into(), json!(project.id));
            metadata.insert("type".into(), json!("project_file"));
        }
        None => {
            metadata.insert("type".into(), json!("file"));
        }
    }
    Ok(metadata)
}

async fn run_ingest(
    retriever: &ContextRetriever,
    store: &InMemoryStore,
    path: &Path,
    project: Option<&str>,
    namespace: &str,
) -> anyhow::Result<IngestSummary> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("Path has no file name")?;

    let text = match PlainTextExtractor.extract(filename, &bytes) {
        Extracted::Text(text) => text,
        Extracted::Unsupported => {
            warn!(%filename, "Unsupported file format; nothing ingested");
            return Ok(IngestSummary::default());
        }
    };

    let metadata = file_metadata(store, filename, project)?;
    Ok(retriever.ingest(&text, metadata, namespace).await)
}

async fn run_query(
    retriever: &ContextRetriever,
    store: &InMemoryStore,
    text: &str,
    project: Option<&str>,
    top_k: usize,
    namespace: &str,
) -> anyhow::Result<()> {
    if !retriever.is_enabled() {
        bail!("Vector index not configured; set PINECONE_API_KEY or pass --memory-index");
    }

    let filter = match project {
        Some(name) => Some(MetadataFilter::equals(
            "project_id",
            store.create_project(name, None)?.id,
        )),
        None => None,
    };

    let snippets = retriever
        .query(text, namespace, top_k, filter.as_ref())
        .await;
    if snippets.is_empty() {
        println!("No matching context.");
        return Ok(());
    }

    for snippet in &snippets {
        println!(
            "- [{:.3}] {}: {}",
            snippet.score,
            snippet.source(),
            snippet.text.replace('\n', " ")
        );
    }
    Ok(())
}

async fn run_index_stats(rag_config: &RagConfig) -> anyhow::Result<()> {
    let index_config = VectorIndexConfig::from_env()?;
    println!(
        "Checking Pinecone index '{}' (dimension {})...",
        index_config.index_name, rag_config.vector_dim
    );

    let client = PineconeClient::connect(index_config, rag_config.vector_dim).await?;
    let stats = client
        .describe_index_stats()
        .await
        .context("describe_index_stats failed")?;

    println!(
        "✔ dimension={} total_vectors={}",
        stats
            .dimension
            .map_or_else(|| "unknown".to_string(), |d| d.to_string()),
        stats.total_vector_count
    );
    for (namespace, summary) in &stats.namespaces {
        let count = summary
            .get("vectorCount")
            .and_then(|value| value.as_u64())
            .unwrap_or(0);
        println!("  - {namespace}: {count} vectors");
    }

    Ok(())
}
