//! SearchTool: thin, agent-callable wrapper around `MemoryManager::search`
//! (spec §4.7).
//!
//! Parameter validation and text rendering live here rather than in
//! `manager.rs` so the manager's programmatic surface stays free of
//! display-formatting concerns — the same separation `graves-awful_aj`
//! draws between `vector_store.rs` (data) and `pretty.rs` (rendering).

use tokio_util::sync::CancellationToken;

use crate::manager::{MemoryManager, SearchOptionsInput};
use crate::types::{MemoryError, Scope};

const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 50;
const DEFAULT_LIMIT: usize = 8;

pub struct SearchToolRequest {
    pub query: String,
    pub scope: Option<String>,
    pub limit: Option<usize>,
}

/// A rendered tool result: the text an agent host forwards as the tool's
/// output, plus a short display line for UI surfaces that show a one-line
/// summary instead.
pub struct ToolRender {
    pub text: String,
    pub display: String,
}

pub struct SearchTool<'a> {
    manager: &'a MemoryManager,
}

impl<'a> SearchTool<'a> {
    pub fn new(manager: &'a MemoryManager) -> Self {
        Self { manager }
    }

    /// Validate, search, and render — in the exact wording of spec §4.7.
    pub async fn invoke(&self, request: SearchToolRequest, cancel: CancellationToken) -> ToolRender {
        match Self::validate(&request) {
            Ok((scope, limit)) => {
                let options = SearchOptionsInput { cancel, scope, limit };
                let hits = self.manager.search(&request.query, options).await;
                if hits.is_empty() {
                    ToolRender {
                        text: format!("No relevant memory found for query: \"{}\"", request.query),
                        display: "No results".to_string(),
                    }
                } else {
                    let lines: Vec<String> = hits
                        .iter()
                        .map(|h| match &h.source {
                            Some(source) => format!("\u{2022} [{:.2}] {} (source: {source})", h.score, h.text),
                            None => format!("\u{2022} [{:.2}] {}", h.score, h.text),
                        })
                        .collect();
                    ToolRender {
                        text: format!("Found {} relevant memories:\n\n{}", hits.len(), lines.join("\n")),
                        display: format!("Found {} memories", hits.len()),
                    }
                }
            }
            Err(e) => ToolRender {
                text: e.to_string(),
                display: "Search failed".to_string(),
            },
        }
    }

    fn validate(request: &SearchToolRequest) -> Result<(Scope, usize), MemoryError> {
        if request.query.trim().is_empty() {
            return Err(MemoryError::EmptyQuery);
        }
        let scope = match &request.scope {
            Some(s) => Scope::parse(s).ok_or_else(|| MemoryError::InvalidScope(s.clone()))?,
            None => Scope::Project,
        };
        let limit = request.limit.unwrap_or(DEFAULT_LIMIT);
        if limit < MIN_LIMIT || limit > MAX_LIMIT {
            return Err(MemoryError::InvalidLimit { min: MIN_LIMIT, max: MAX_LIMIT, actual: limit });
        }
        Ok((scope, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use tempfile::tempdir;

    fn test_manager() -> (tempfile::TempDir, MemoryManager) {
        let dir = tempdir().unwrap();
        let config = MemoryConfig {
            embed_provider: "fastembed".to_string(),
            embed_model: Some("fast-bge-small-en-v1.5".to_string()),
            embed_base_url: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_api_key: None,
            db_path: dir.path().join("db.sqlite"),
        };
        (dir, MemoryManager::new(config))
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_search() {
        let (_dir, manager) = test_manager();
        let tool = SearchTool::new(&manager);
        let result = tool
            .invoke(
                SearchToolRequest { query: "   ".to_string(), scope: None, limit: None },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result.display, "Search failed");
        assert!(result.text.contains("query must not be empty"));
    }

    #[tokio::test]
    async fn unknown_scope_is_rejected() {
        let (_dir, manager) = test_manager();
        let tool = SearchTool::new(&manager);
        let result = tool
            .invoke(
                SearchToolRequest { query: "hello".to_string(), scope: Some("universe".to_string()), limit: None },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result.display, "Search failed");
    }

    #[tokio::test]
    async fn limit_out_of_range_is_rejected() {
        let (_dir, manager) = test_manager();
        let tool = SearchTool::new(&manager);
        let result = tool
            .invoke(
                SearchToolRequest { query: "hello".to_string(), scope: None, limit: Some(51) },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result.display, "Search failed");
    }

    #[tokio::test]
    async fn manager_not_ready_renders_no_results() {
        let (_dir, manager) = test_manager();
        let tool = SearchTool::new(&manager);
        let result = tool
            .invoke(
                SearchToolRequest { query: "hello".to_string(), scope: None, limit: None },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(result.display, "No results");
    }
}
