//! # Memory manager
//!
//! `MemoryManager` orchestrates the embedding client, vector store, and
//! relevance filter behind the three surfaces an outer agent calls:
//!
//! 1. [`MemoryManager::get_project_core`] — the static curated set, rendered
//!    once per call for system-prompt injection.
//! 2. [`MemoryManager::retrieve_relevant`] — the dynamic, over-retrieve-then-
//!    filter recall pipeline used per conversational turn.
//! 3. [`MemoryManager::search`] — a plain top-k similarity search with no
//!    LLM filter, for direct tool invocation.
//!
//! ## Architecture
//!
//! ```text
//!           ┌──────────────────┐
//!  init() ─▶│ ProviderFactory   │──▶ EmbeddingSpace ──▶ VectorStore::init()
//!           │ ::select()        │
//!           └──────────────────┘
//!                    │
//!                    ▼
//!            Arc<Initialized> (provider + store), cached in a OnceCell
//!                    │
//!      ┌─────────────┼──────────────┐
//!      ▼              ▼              ▼
//! get_project_core  retrieve_relevant  search
//! ```
//!
//! ## Degraded state
//!
//! Grounded in `graves-awful_aj::api`'s "build a client, hold it for the
//! process lifetime" posture, generalized here with an explicit state
//! machine (`Constructed` → `Initializing` → `Ready`/`Closed`) since this
//! manager — unlike the teacher's single `create_client` call — must
//! support idempotent concurrent `init()` and a *documented* degraded state
//! (spec §4.6): if provider selection or store opening fails, `init()`
//! leaves the manager in `Constructed`/non-`Ready` state and every
//! retrieval method thereafter returns its empty sentinel rather than an
//! error. Nothing panics or propagates a failure to the caller after
//! `init()` returns.
//!
//! ## See also
//! - [`crate::provider::ProviderFactory`] for the embedding client ladder.
//! - [`crate::vector_store::VectorStore`] for on-disk storage.
//! - [`crate::relevance::RelevanceFilter`] for the LLM-filter stage.

use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::provider::ProviderFactory;
use crate::relevance::{FilterOptions, LlmCall, RelevanceFilter};
use crate::types::{EmbeddingSpace, MemoryError, MemoryHit, ParsedCandidate, Scope, ScoredEntry, SearchOptions};
use crate::vector_store::VectorStore;
use crate::config::MemoryConfig;

const DYNAMIC_TOP_K_DEFAULT: usize = 50;
const DYNAMIC_FALLBACK_COUNT: usize = 8;
const SEARCH_LIMIT_DEFAULT: usize = 8;

/// The query shape [`MemoryManager::retrieve_relevant`] accepts: a bare
/// string, or the parts of a multi-part turn joined with a space before
/// embedding (spec §4.6).
#[derive(Debug, Clone)]
pub enum RetrievalRequest {
    Query(String),
    Parts(Vec<String>),
}

impl RetrievalRequest {
    fn extract_query(&self) -> String {
        match self {
            RetrievalRequest::Query(q) => q.clone(),
            RetrievalRequest::Parts(parts) => parts.join(" "),
        }
    }
}

/// Options for [`MemoryManager::retrieve_relevant`].
#[derive(Clone)]
pub struct RetrieveOptions {
    pub cancel: CancellationToken,
    pub scope: Scope,
    /// How many candidates to over-retrieve by similarity before filtering.
    pub top_k: usize,
    /// `(prompt, cancel) -> response`. `None` skips the LLM filter and
    /// takes the top 8 candidates by score instead (spec §4.6).
    pub llm_call: Option<LlmCall>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            scope: Scope::Project,
            top_k: DYNAMIC_TOP_K_DEFAULT,
            llm_call: None,
        }
    }
}

/// Options for [`MemoryManager::search`].
#[derive(Clone)]
pub struct SearchOptionsInput {
    pub cancel: CancellationToken,
    pub scope: Scope,
    /// Top-k cap; there is no LLM filter downstream of this, so it's also
    /// the result count.
    pub limit: usize,
}

impl Default for SearchOptionsInput {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            scope: Scope::Project,
            limit: SEARCH_LIMIT_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerState {
    Constructed,
    Initializing,
    Ready,
    Closed,
}

struct Initialized {
    #[allow(dead_code)]
    provider: ProviderFactory,
    store: VectorStore,
}

/// Orchestrates the pipeline. One instance per process, held for the
/// process lifetime (Design Note "Global process-wide state").
pub struct MemoryManager {
    config: MemoryConfig,
    state: Mutex<ManagerState>,
    initialized: OnceCell<Result<Arc<Initialized>, String>>,
}

impl MemoryManager {
    /// Builds a manager in the `Constructed` state. No I/O happens until
    /// [`Self::init`] is called — `new` never touches disk or the network.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ManagerState::Constructed),
            initialized: OnceCell::new(),
        }
    }

    /// Selects an embedding provider, opens (creating if needed) the
    /// corresponding vector store, and transitions the manager to `Ready`.
    ///
    /// Idempotent and concurrency-safe: concurrent callers share a single
    /// in-flight initialization via [`tokio::sync::OnceCell::get_or_init`],
    /// and repeat calls after success are a cheap no-op. Never surfaces a
    /// failure to the caller — a failed provider selection or store open
    /// leaves the manager degraded, logs a warning, and every retrieval
    /// method thereafter returns its empty sentinel (spec §4.6).
    ///
    /// # Notes
    /// A call after [`Self::close`] is a no-op (logged at `warn`) rather
    /// than re-opening a closed store.
    pub async fn init(&self) {
        {
            let mut state = self.state.lock().expect("manager state mutex poisoned");
            if *state == ManagerState::Closed {
                warn!("memory manager: init called after close, ignoring");
                return;
            }
            if *state == ManagerState::Constructed {
                *state = ManagerState::Initializing;
            }
        }

        let result = self
            .initialized
            .get_or_init(|| async {
                let provider = ProviderFactory::select(&self.config)
                    .await
                    .map_err(|e| e.to_string())?;
                let space = EmbeddingSpace::new(
                    provider.active_provider().to_string(),
                    provider.active_model().to_string(),
                    provider.active_dimension(),
                );
                let store = VectorStore::new(&self.config.db_path, space).map_err(|e| e.to_string())?;
                store.init().map_err(|e| e.to_string())?;
                info!(
                    provider = provider.active_provider(),
                    model = provider.active_model(),
                    "memory manager: initialized"
                );
                Ok(Arc::new(Initialized { provider, store }))
            })
            .await;

        let mut state = self.state.lock().expect("manager state mutex poisoned");
        if *state == ManagerState::Closed {
            return;
        }
        match result {
            Ok(_) => *state = ManagerState::Ready,
            Err(msg) => {
                warn!(error = %msg, "memory manager: initialization failed, manager is degraded");
            }
        }
    }

    fn ready_store(&self) -> Option<Arc<Initialized>> {
        let state = self.state.lock().expect("manager state mutex poisoned");
        if *state != ManagerState::Ready {
            return None;
        }
        drop(state);
        self.initialized.get().and_then(|r| r.as_ref().ok()).cloned()
    }

    /// Layer 1 static surface: every `project`-scope entry, unranked,
    /// rendered as a markdown bullet list (`- text _(source)_` when a
    /// source is present, `- text` otherwise).
    ///
    /// # Returns
    /// `""` on a cancelled token, a store read failure, or before `init`
    /// has succeeded — callers inject this string verbatim into a system
    /// prompt, so an empty string degrades gracefully to "no core memory"
    /// rather than surfacing an error (spec §4.6).
    pub fn get_project_core(&self, cancel: &CancellationToken) -> String {
        if cancel.is_cancelled() {
            return String::new();
        }
        let Some(initialized) = self.ready_store() else {
            warn!("memory manager: get_project_core called before manager is ready");
            return String::new();
        };

        match initialized.store.list_by_scope(Scope::Project) {
            Ok(entries) => {
                if cancel.is_cancelled() {
                    return String::new();
                }
                entries
                    .iter()
                    .map(|e| match &e.source {
                        Some(source) => format!("- {} _({source})_", e.text),
                        None => format!("- {}", e.text),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Err(e) => {
                warn!(error = %e, "memory manager: get_project_core failed, returning empty");
                String::new()
            }
        }
    }

    /// Layer 2 dynamic surface: embed the query once, over-retrieve
    /// `options.top_k` candidates by vector similarity, filter down to a
    /// relevant subset (via `options.llm_call` if set, else the top
    /// [`DYNAMIC_FALLBACK_COUNT`] by score), then map the selected ids back
    /// to hits in the original ranked order.
    ///
    /// # Parameters
    /// - `request`: a bare query or multi-part turn (joined with spaces).
    /// - `options`: see [`RetrieveOptions`]; `options.cancel` is checked
    ///   before embedding, after search, and after filtering.
    ///
    /// # Returns
    /// An empty vec on a blank query, a cancelled token at any checkpoint,
    /// a search failure, or before the manager is `Ready` — this method
    /// never panics or propagates an error (spec §4.6, §5).
    pub async fn retrieve_relevant(&self, request: RetrievalRequest, options: RetrieveOptions) -> Vec<MemoryHit> {
        if options.cancel.is_cancelled() {
            return Vec::new();
        }
        let Some(initialized) = self.ready_store() else {
            warn!("memory manager: retrieve_relevant called before manager is ready");
            return Vec::new();
        };

        let query = request.extract_query();
        if query.trim().is_empty() {
            return Vec::new();
        }

        let query_vec = initialized.provider.client().embed_one(&query, options.cancel.clone()).await;
        if options.cancel.is_cancelled() {
            return Vec::new();
        }

        let search_options = SearchOptions {
            top_k: options.top_k,
            scope: Some(options.scope),
            min_score: None,
        };
        let scored = match initialized.store.vector_search(&query_vec, search_options, options.cancel.clone()) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "memory manager: vector_search failed, returning empty");
                return Vec::new();
            }
        };
        if options.cancel.is_cancelled() {
            return Vec::new();
        }

        let selected_ids: Vec<String> = if let Some(llm_call) = &options.llm_call {
            let candidates: Vec<ParsedCandidate> = scored
                .iter()
                .map(|s| ParsedCandidate {
                    id: s.entry.id.clone(),
                    score: s.score,
                    snippet: ParsedCandidate::snippet_from(&s.entry.text),
                    source: s.entry.source.clone(),
                })
                .collect();
            let filter_options = FilterOptions {
                max_select: 10,
                fallback_count: DYNAMIC_FALLBACK_COUNT,
                cancel: options.cancel.clone(),
            };
            RelevanceFilter::filter(&query, &candidates, llm_call, filter_options).await.selected_ids
        } else {
            scored.iter().take(DYNAMIC_FALLBACK_COUNT).map(|s| s.entry.id.clone()).collect()
        };

        if options.cancel.is_cancelled() {
            return Vec::new();
        }

        hits_in_store_order(&scored, &selected_ids)
    }

    /// Layer 3 tool-access surface: no LLM filter, just the top
    /// `options.limit` hits by vector similarity. Intended for direct
    /// invocation by an agent tool call rather than per-turn injection
    /// (spec §4.6); see [`crate::search_tool`] for the validated wrapper.
    ///
    /// # Returns
    /// An empty vec on a blank query, a cancelled token, a search failure,
    /// or before the manager is `Ready`.
    pub async fn search(&self, query: &str, options: SearchOptionsInput) -> Vec<MemoryHit> {
        if options.cancel.is_cancelled() {
            return Vec::new();
        }
        let Some(initialized) = self.ready_store() else {
            warn!("memory manager: search called before manager is ready");
            return Vec::new();
        };
        if query.trim().is_empty() {
            return Vec::new();
        }

        let query_vec = initialized.provider.client().embed_one(query, options.cancel.clone()).await;
        if options.cancel.is_cancelled() {
            return Vec::new();
        }

        let search_options = SearchOptions {
            top_k: options.limit,
            scope: Some(options.scope),
            min_score: None,
        };
        match initialized.store.vector_search(&query_vec, search_options, options.cancel.clone()) {
            Ok(rows) => rows.into_iter().map(scored_entry_to_hit).collect(),
            Err(e) => {
                warn!(error = %e, "memory manager: search failed, returning empty");
                Vec::new()
            }
        }
    }

    /// Forwards to the store and transitions to `closed`. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("manager state mutex poisoned");
        if *state == ManagerState::Closed {
            return;
        }
        if let Some(Ok(initialized)) = self.initialized.get() {
            initialized.store.close();
        }
        *state = ManagerState::Closed;
    }
}

fn scored_entry_to_hit(scored: ScoredEntry) -> MemoryHit {
    MemoryHit {
        id: scored.entry.id,
        token_estimate: Some(MemoryHit::estimate_tokens(&scored.entry.text)),
        text: scored.entry.text,
        score: scored.score,
        source: scored.entry.source,
    }
}

/// Map validated ids back to hits in `scored`'s own (already ranked) order.
fn hits_in_store_order(scored: &[ScoredEntry], selected_ids: &[String]) -> Vec<MemoryHit> {
    scored
        .iter()
        .filter(|s| selected_ids.contains(&s.entry.id))
        .map(|s| scored_entry_to_hit(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn test_config(db_path: PathBuf) -> MemoryConfig {
        MemoryConfig {
            embed_provider: "fastembed".to_string(),
            embed_model: Some("fast-bge-small-en-v1.5".to_string()),
            embed_base_url: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_api_key: None,
            db_path,
        }
    }

    #[tokio::test]
    async fn retrieval_before_init_returns_empty() {
        let dir = tempdir().unwrap();
        let manager = MemoryManager::new(test_config(dir.path().join("db.sqlite")));
        let hits = manager
            .retrieve_relevant(RetrievalRequest::Query("hello".to_string()), RetrieveOptions::default())
            .await;
        assert!(hits.is_empty());
        assert_eq!(manager.get_project_core(&CancellationToken::new()), "");
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits_without_store_access() {
        let dir = tempdir().unwrap();
        let manager = MemoryManager::new(test_config(dir.path().join("db.sqlite")));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = RetrieveOptions { cancel, ..RetrieveOptions::default() };
        let hits = manager.retrieve_relevant(RetrievalRequest::Query("hello".to_string()), options).await;
        assert!(hits.is_empty());
    }

    #[test]
    fn extract_query_joins_parts_with_space() {
        let request = RetrievalRequest::Parts(vec!["hello".to_string(), "world".to_string()]);
        assert_eq!(request.extract_query(), "hello world");
    }

    #[test]
    fn close_before_init_does_not_panic() {
        let dir = tempdir().unwrap();
        let manager = MemoryManager::new(test_config(dir.path().join("db.sqlite")));
        manager.close();
        manager.close();
    }
}
