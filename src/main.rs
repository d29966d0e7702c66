//! # mnemex CLI
//!
//! Thin demonstration harness over the `mnemex` library's four subsystems.
//! This binary is explicitly NOT the "outer agent runtime" spec.md scopes
//! out (§1): it has no tool-confirmation state machine, no OAuth, no bridge
//! protocol. It wires configuration, the provider ladder, the vector store,
//! and the manager together the way `graves-awful_aj`'s `aj` binary wires
//! its own `config`/`api`/`vector_store` modules together.

use std::error::Error;
use std::io::Read as _;
use std::sync::{Arc, OnceLock};

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
    CreateChatCompletionRequestArgs,
};
use clap::Parser;
use mnemex::commands::{Cli, Commands};
use mnemex::config::{self, MemoryConfig};
use mnemex::manager::{MemoryManager, RetrievalRequest, RetrieveOptions, SearchOptionsInput};
use mnemex::provider::ProviderFactory;
use mnemex::relevance::{LlmCall, LlmCallFuture};
use mnemex::search_tool::{SearchTool, SearchToolRequest};
use mnemex::types::{EmbeddingSpace, MemoryEntry, MemoryError, Scope, now_ms};
use mnemex::vector_store::VectorStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

static TRACING: OnceLock<()> = OnceLock::new();

fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Initialize the global tracing subscriber. Safe to call repeatedly
/// (mirrors `graves-awful_aj::main`'s `TRACING` once-cell, `OnceLock`
/// standing in for `once_cell::sync::OnceCell` — see DESIGN.md).
fn initialize_tracing() {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            debug!("Initializing embedding space store");
            handle_init().await?;
        }
        Commands::Upsert { id, scope, text, source, tags } => {
            debug!(id = %id, "Upserting memory entry");
            handle_upsert(id, scope, text, source, tags).await?;
        }
        Commands::Core => {
            debug!("Printing static curated memory");
            handle_core().await?;
        }
        Commands::Search { query, scope, limit } => {
            debug!(query = %query, "Running tool-access search");
            handle_search(query, scope, limit).await?;
        }
        Commands::Ask { query, scope, top_k, with_llm_filter } => {
            debug!(query = %query, "Running dynamic retrieval");
            handle_ask(query, scope, top_k, with_llm_filter).await?;
        }
    }

    Ok(())
}

fn parse_scope(scope: &str) -> Result<Scope, Box<dyn Error>> {
    Scope::parse(scope).ok_or_else(|| format!("invalid scope: {scope}").into())
}

async fn handle_init() -> Result<(), Box<dyn Error>> {
    let config = config::load_config()?;
    let (store, space) = open_store(&config).await?;
    store.init()?;
    info!(space = %space.canonical(), db_path = %config.db_path.display(), "store initialized");
    println!("Initialized store for embedding space {} at {}", space.canonical(), config.db_path.display());
    store.close();
    Ok(())
}

async fn handle_upsert(
    id: String,
    scope: String,
    text: Option<String>,
    source: Option<String>,
    tags: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    let scope = parse_scope(&scope)?;
    let text = match text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    if text.trim().is_empty() {
        return Err("entry text must not be empty".into());
    }

    let config = config::load_config()?;
    let provider = ProviderFactory::select(&config).await?;
    let space = EmbeddingSpace::new(provider.active_provider(), provider.active_model(), provider.active_dimension());
    let store = VectorStore::new(&config.db_path, space)?;
    store.init()?;

    let embedding = provider.client().embed_one(&text, CancellationToken::new()).await;
    let mut entry = MemoryEntry::new(id.clone(), scope, text, now_ms());
    if let Some(source) = source {
        entry = entry.with_source(source);
    }
    if !tags.is_empty() {
        entry = entry.with_tags(tags);
    }
    entry.embedding = embedding;

    store.upsert(&[entry])?;
    store.close();
    println!("Upserted entry {id}");
    Ok(())
}

async fn open_store(config: &MemoryConfig) -> Result<(VectorStore, EmbeddingSpace), Box<dyn Error>> {
    let provider = ProviderFactory::select(config).await?;
    let space = EmbeddingSpace::new(provider.active_provider(), provider.active_model(), provider.active_dimension());
    let store = VectorStore::new(&config.db_path, space.clone())?;
    Ok((store, space))
}

async fn build_manager() -> Result<MemoryManager, Box<dyn Error>> {
    let config = config::load_config()?;
    let manager = MemoryManager::new(config);
    manager.init().await;
    Ok(manager)
}

async fn handle_core() -> Result<(), Box<dyn Error>> {
    let manager = build_manager().await?;
    let core = manager.get_project_core(&CancellationToken::new());
    if core.is_empty() {
        println!("(no curated project memory)");
    } else {
        println!("{core}");
    }
    manager.close();
    Ok(())
}

async fn handle_search(query: String, scope: String, limit: usize) -> Result<(), Box<dyn Error>> {
    let manager = build_manager().await?;
    let tool = SearchTool::new(&manager);
    let render = tool
        .invoke(
            SearchToolRequest { query, scope: Some(scope), limit: Some(limit) },
            CancellationToken::new(),
        )
        .await;
    println!("{}", render.text);
    manager.close();
    Ok(())
}

async fn handle_ask(query: String, scope: String, top_k: usize, with_llm_filter: bool) -> Result<(), Box<dyn Error>> {
    let scope = parse_scope(&scope)?;
    let config = config::load_config()?;
    let llm_call = if with_llm_filter { build_llm_call(&config) } else { None };
    if with_llm_filter && llm_call.is_none() {
        eprintln!("warning: --with-llm-filter requires OPENAI_API_KEY; falling back to top-8-by-score");
    }

    let manager = MemoryManager::new(config);
    manager.init().await;

    let options = RetrieveOptions { cancel: CancellationToken::new(), scope, top_k, llm_call };
    let hits = manager.retrieve_relevant(RetrievalRequest::Query(query.clone()), options).await;

    match mnemex::format::format_memory_hits(&hits) {
        Some(framed) => println!("{framed}"),
        None => println!("No relevant memory found for query: \"{query}\""),
    }

    manager.close();
    Ok(())
}

/// Build the relevance filter's LLM call from an OpenAI-compatible chat
/// model, the same client crate `graves-awful_aj::api::create_client` uses
/// for chat completions.
fn build_llm_call(config: &MemoryConfig) -> Option<LlmCall> {
    let api_key = config.openai_api_key.clone()?;
    let openai_config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
    let client = async_openai::Client::with_config(openai_config);

    Some(Arc::new(move |prompt: String, cancel: CancellationToken| {
        let client = client.clone();
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(MemoryError::Config("cancelled before llm call".to_string()));
            }
            let request = CreateChatCompletionRequestArgs::default()
                .model("gpt-4o-mini")
                .messages(vec![ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(prompt),
                    name: None,
                })])
                .build()
                .map_err(|e| MemoryError::Config(e.to_string()))?;

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MemoryError::Config("cancelled during llm call".to_string())),
                r = client.chat().create(request) => r,
            };
            let response = response.map_err(|e| MemoryError::Config(e.to_string()))?;
            Ok(response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default())
        }) as LlmCallFuture
    }))
}
