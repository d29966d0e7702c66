//! LLM-driven relevance filtering: shrink an over-retrieved candidate list
//! down to a small, context-appropriate set.
//!
//! The LLM call itself is caller-supplied (spec §1: "the concrete LLM client
//! ... enter[s] the core through narrow callback/client interfaces"), so this
//! module never talks to a network client directly — tests inject a fake
//! closure the way `graves-awful_aj`'s own test modules favor plain closures
//! and `tempfile` fixtures over mocking frameworks.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::types::{MemoryError, ParsedCandidate};

pub type LlmCallFuture = Pin<Box<dyn Future<Output = Result<String, MemoryError>> + Send>>;

/// `(prompt, cancel) -> response text`, the filter's only external dependency.
pub type LlmCall = Arc<dyn Fn(String, CancellationToken) -> LlmCallFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub max_select: usize,
    pub fallback_count: usize,
    pub cancel: CancellationToken,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            max_select: 10,
            fallback_count: 8,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterResult {
    pub selected_ids: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawFilterResponse {
    selected: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    notes: String,
}

pub struct RelevanceFilter;

impl RelevanceFilter {
    /// Reduce `candidates` to a relevant subset, per spec §4.4.
    pub async fn filter(
        query: &str,
        candidates: &[ParsedCandidate],
        llm_call: &LlmCall,
        options: FilterOptions,
    ) -> FilterResult {
        if candidates.is_empty() {
            return FilterResult {
                selected_ids: Vec::new(),
                reasoning: "no candidates".to_string(),
            };
        }

        if candidates.len() <= options.max_select {
            return FilterResult {
                selected_ids: candidates.iter().map(|c| c.id.clone()).collect(),
                reasoning: "all within limit".to_string(),
            };
        }

        if options.cancel.is_cancelled() {
            return Self::fallback(candidates, options.fallback_count, "cancelled");
        }

        let prompt = build_prompt(query, candidates, options.max_select);
        let response = llm_call(prompt, options.cancel.clone()).await;

        if options.cancel.is_cancelled() {
            return Self::fallback(candidates, options.fallback_count, "cancelled");
        }

        let response = match response {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "relevance filter: llm_call failed, falling back to top scores");
                return Self::fallback(candidates, options.fallback_count, "fallback to top scores");
            }
        };

        let Some(parsed) = parse_response(&response) else {
            warn!("relevance filter: unparseable llm response, falling back to top scores");
            return Self::fallback(candidates, options.fallback_count, "fallback to top scores");
        };

        let candidate_ids: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let total_selected = parsed.len();
        let validated: Vec<String> = parsed
            .into_iter()
            .filter(|id| candidate_ids.contains(id.as_str()))
            .collect();

        let dropped = total_selected - validated.len();
        if dropped > 0 {
            warn!(dropped, "relevance filter: llm selected ids not present in candidates");
        }

        FilterResult {
            selected_ids: validated,
            reasoning: "llm selection".to_string(),
        }
    }

    fn fallback(candidates: &[ParsedCandidate], fallback_count: usize, reasoning: &str) -> FilterResult {
        let mut sorted: Vec<&ParsedCandidate> = candidates.iter().collect();
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        FilterResult {
            selected_ids: sorted.into_iter().take(fallback_count).map(|c| c.id.clone()).collect(),
            reasoning: reasoning.to_string(),
        }
    }
}

/// Build the deterministic filter prompt (spec §4.4 — "treat the prompt
/// template as a public contract with tests").
fn build_prompt(query: &str, candidates: &[ParsedCandidate], max_select: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a relevance filter selecting the most useful memory entries for the query below.\n\n");
    prompt.push_str(&format!("Query: {query}\n\n"));
    prompt.push_str("Candidates:\n");
    for c in candidates {
        let source = c.source.as_deref().unwrap_or("unknown");
        prompt.push_str(&format!(
            "- ID: {} | Score: {:.2} | Source: {}\n  Snippet: {}\n",
            c.id, c.score, source, c.snippet
        ));
    }
    prompt.push_str(&format!(
        "\nSelect between 0 and {max_select} of the most relevant candidate IDs. \
         If none are relevant, select none. \
         Respond with exactly one JSON object and nothing else: \
         {{\"selected\": [\"id1\", \"id2\"], \"notes\": \"brief rationale, or 'nothing relevant' if empty\"}}\n"
    ));
    prompt
}

/// Tolerant parse: strip optional ```/```json fences, trim, parse as JSON,
/// require `selected: string[]`. Anything else → `None` (triggers fallback).
fn parse_response(response: &str) -> Option<Vec<String>> {
    let mut text = response.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    let text = text.trim();

    let parsed: RawFilterResponse = serde_json::from_str(text).ok()?;
    Some(parsed.selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f32) -> ParsedCandidate {
        ParsedCandidate {
            id: id.to_string(),
            score,
            snippet: format!("snippet for {id}"),
            source: None,
        }
    }

    fn make_llm_call(response: &'static str) -> LlmCall {
        Arc::new(move |_prompt, _cancel| Box::pin(async move { Ok(response.to_string()) }))
    }

    #[tokio::test]
    async fn empty_candidates_short_circuits() {
        let llm_call = make_llm_call("{}");
        let result = RelevanceFilter::filter("q", &[], &llm_call, FilterOptions::default()).await;
        assert!(result.selected_ids.is_empty());
        assert_eq!(result.reasoning, "no candidates");
    }

    #[tokio::test]
    async fn below_max_select_returns_all_without_calling_llm() {
        let llm_call: LlmCall = Arc::new(|_, _| Box::pin(async { panic!("should not be called") }));
        let candidates = vec![candidate("a", 0.9), candidate("b", 0.5)];
        let result = RelevanceFilter::filter("q", &candidates, &llm_call, FilterOptions::default()).await;
        assert_eq!(result.selected_ids, vec!["a", "b"]);
        assert_eq!(result.reasoning, "all within limit");
    }

    #[tokio::test]
    async fn unparseable_response_falls_back_to_top_scores() {
        let candidates: Vec<ParsedCandidate> = (0..12).map(|i| candidate(&format!("c{i}"), i as f32 / 10.0)).collect();
        let llm_call = make_llm_call("I picked 1 and 3");
        let options = FilterOptions { max_select: 10, fallback_count: 3, cancel: CancellationToken::new() };
        let result = RelevanceFilter::filter("q", &candidates, &llm_call, options).await;
        assert_eq!(result.reasoning, "fallback to top scores");
        assert_eq!(result.selected_ids, vec!["c11", "c10", "c9"]);
    }

    #[tokio::test]
    async fn fenced_json_response_parses_and_drops_unknown_ids() {
        let candidates: Vec<ParsedCandidate> = (0..12).map(|i| candidate(&format!("c{i}"), i as f32 / 10.0)).collect();
        let llm_call = make_llm_call("```json\n{\"selected\": [\"c0\", \"ghost\"], \"notes\": \"ok\"}\n```");
        let options = FilterOptions { max_select: 10, fallback_count: 3, cancel: CancellationToken::new() };
        let result = RelevanceFilter::filter("q", &candidates, &llm_call, options).await;
        assert_eq!(result.selected_ids, vec!["c0"]);
    }

    #[tokio::test]
    async fn cancelled_token_falls_back_without_calling_llm() {
        let llm_call: LlmCall = Arc::new(|_, _| Box::pin(async { panic!("should not be called") }));
        let candidates: Vec<ParsedCandidate> = (0..12).map(|i| candidate(&format!("c{i}"), i as f32)).collect();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = FilterOptions { max_select: 10, fallback_count: 2, cancel };
        let result = RelevanceFilter::filter("q", &candidates, &llm_call, options).await;
        assert_eq!(result.reasoning, "cancelled");
        assert_eq!(result.selected_ids.len(), 2);
    }
}
