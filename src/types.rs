//! Shared types: scopes, entries, hits, options, and the error kinds every
//! other module speaks.
//!
//! These are deliberately small and serializable, the way
//! [`crate::brain::Memory`] was in the teacher crate this was built from —
//! plain data that flows between the vector store, the provider ladder, the
//! relevance filter, and the formatter without any of them owning more than
//! their slice of it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A coarse partition of memory entries used as a `WHERE` predicate.
///
/// Closed on purpose (spec §3): adding a third scope is a breaking change to
/// every store's on-disk predicate logic, not an enum addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Project,
    Global,
}

impl Scope {
    /// Parse a scope from a CLI/tool-call string. Used by [`crate::search_tool::SearchTool`]
    /// validation, which must reject unknown scopes rather than default silently.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Scope::Project),
            "global" => Some(Scope::Global),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vector normalization applied before storage. `None` means raw embedding
/// output is stored as-is; `L2` means the client (or the store) has already
/// normalized to unit length, which is what makes `min_score` meaningful
/// (Design Note "Score semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    None,
    L2,
}

impl Norm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Norm::None => "none",
            Norm::L2 => "l2",
        }
    }
}

impl fmt::Display for Norm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity of a vector family: `(provider, model, dimension, norm, version)`.
///
/// Two vectors are only ever comparable if they came from the same
/// `EmbeddingSpace`. The store derives its table name from this tuple and
/// never mixes rows across spaces (spec §3 invariant, §9 Design Note
/// "No silent space mixing").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub norm: Norm,
    pub version: String,
}

impl EmbeddingSpace {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dimension,
            norm: Norm::None,
            version: "v1".to_string(),
        }
    }

    pub fn with_norm(mut self, norm: Norm) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Canonical string form: `provider|model|dim|norm|version`.
    pub fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.provider, self.model, self.dimension, self.norm, self.version
        )
    }

    /// Lowercased, non-alphanumerics-to-`_` form used as the table-name
    /// suffix: `memory_entries__<provider>__<model>__<dim>__<norm>__<version>`.
    pub fn table_name(&self) -> String {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
                .collect()
        };
        format!(
            "memory_entries__{}__{}__{}__{}__{}",
            sanitize(&self.provider),
            sanitize(&self.model),
            self.dimension,
            sanitize(self.norm.as_str()),
            sanitize(&self.version),
        )
    }
}

/// The unit of storage (spec §3).
///
/// `declared_provider`/`declared_model` are the caller's optional lineage
/// claim for this entry — e.g. an entry copied over from another store, or
/// constructed by code that already knows which embedding space it targets.
/// [`crate::vector_store::VectorStore::upsert`] validates them against the
/// store's own space *when present* and leaves them `None` otherwise, in
/// which case the store stamps its own `(provider, model)` onto the row on
/// write (spec §3 invariant I2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub scope: Scope,
    pub text: String,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub embedding: Vec<f32>,
    pub declared_provider: Option<String>,
    pub declared_model: Option<String>,
}

impl MemoryEntry {
    /// Construct a fresh entry with `created_at == updated_at == now_ms`.
    /// `embedding` is left empty; callers fill it in via the embedding
    /// client before `upsert`, mirroring the teacher's
    /// `vs.embed_text_to_vector(text)` then `vs.add_vector_with_content(...)`
    /// two-step flow. Lineage starts absent — see [`Self::with_lineage`].
    pub fn new(id: impl Into<String>, scope: Scope, text: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            scope,
            text: text.into(),
            source: None,
            tags: Vec::new(),
            created_at: now_ms,
            updated_at: now_ms,
            embedding: Vec::new(),
            declared_provider: None,
            declared_model: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Declare the embedding space this entry's vector was produced by.
    /// `VectorStore::upsert` rejects the write (before any mutation) if this
    /// doesn't match the target store's own `(provider, model)` (spec §3
    /// invariant I2, §4.3, §8 scenario 2).
    pub fn with_lineage(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.declared_provider = Some(provider.into());
        self.declared_model = Some(model.into());
        self
    }
}

/// A single candidate/result returned from retrieval (spec §3).
///
/// `score` is the ranking-only monotone transform of L2 distance,
/// `1 / (1 + distance)`; never a calibrated probability (spec §3, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub source: Option<String>,
    pub token_estimate: Option<usize>,
}

impl MemoryHit {
    /// `ceil(len / 4)` heuristic token estimate (spec §4.5); advisory, never
    /// a budget enforcer.
    pub fn estimate_tokens(text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

/// Candidate shape handed to the [`crate::relevance::RelevanceFilter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCandidate {
    pub id: String,
    pub score: f32,
    pub snippet: String,
    pub source: Option<String>,
}

impl ParsedCandidate {
    /// Truncate `text` to the ~200-char snippet budget the filter's prompt
    /// template assumes (spec §4.4).
    pub fn snippet_from(text: &str) -> String {
        const MAX: usize = 200;
        if text.chars().count() <= MAX {
            text.to_string()
        } else {
            let truncated: String = text.chars().take(MAX).collect();
            format!("{truncated}…")
        }
    }
}

/// One row returned from [`crate::vector_store::VectorStore::vector_search`]:
/// the stored entry plus the raw distance and derived score (spec §4.3,
/// Design Note "Score semantics" — both are exposed, never just the score).
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    pub distance: f32,
    pub score: f32,
}

/// Options accepted by [`crate::vector_store::VectorStore::vector_search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: usize,
    pub scope: Option<Scope>,
    pub min_score: Option<f32>,
}

/// The error kinds the engine recognizes (spec §7). Manual `Display`/`Error`
/// impls rather than `thiserror`, matching the teacher crate, which carries
/// no derive-macro error crate and instead writes `Box<dyn Error>` with
/// `format!`-built context.
#[derive(Debug)]
pub enum MemoryError {
    /// Stored/incoming vector length didn't match the space's dimension.
    DimensionMismatch { expected: usize, actual: usize },
    /// Row's declared `(provider, model, dim)` lineage didn't match the
    /// store's space.
    LineageMismatch { expected: String, actual: String },
    InvalidScope(String),
    InvalidLimit { min: usize, max: usize, actual: usize },
    EmptyQuery,
    Io(std::io::Error),
    Db(rusqlite::Error),
    Serialization(serde_json::Error),
    Http(reqwest::Error),
    Embedding(String),
    Config(String),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: {actual} vs {expected}")
            }
            MemoryError::LineageMismatch { expected, actual } => {
                write!(f, "Lineage mismatch: row is {actual}, store is {expected}")
            }
            MemoryError::InvalidScope(s) => write!(f, "invalid scope: {s}"),
            MemoryError::InvalidLimit { min, max, actual } => {
                write!(f, "limit {actual} out of range [{min}, {max}]")
            }
            MemoryError::EmptyQuery => write!(f, "query must not be empty"),
            MemoryError::Io(e) => write!(f, "io error: {e}"),
            MemoryError::Db(e) => write!(f, "database error: {e}"),
            MemoryError::Serialization(e) => write!(f, "serialization error: {e}"),
            MemoryError::Http(e) => write!(f, "http error: {e}"),
            MemoryError::Embedding(msg) => write!(f, "embedding error: {msg}"),
            MemoryError::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for MemoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MemoryError::Io(e) => Some(e),
            MemoryError::Db(e) => Some(e),
            MemoryError::Serialization(e) => Some(e),
            MemoryError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(e: std::io::Error) -> Self {
        MemoryError::Io(e)
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::Db(e)
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e)
    }
}

impl From<reqwest::Error> for MemoryError {
    fn from(e: reqwest::Error) -> Self {
        MemoryError::Http(e)
    }
}

/// Current wall-clock time in milliseconds, the precision spec §3 asks for.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_space_table_name_is_sanitized() {
        let space = EmbeddingSpace::new("OpenAI", "text-embedding-3-small", 1536);
        assert_eq!(
            space.table_name(),
            "memory_entries__openai__text_embedding_3_small__1536__none__v1"
        );
    }

    #[test]
    fn canonical_form_round_trips_visually() {
        let space = EmbeddingSpace::new("ollama", "nomic-embed-text", 768).with_norm(Norm::L2);
        assert_eq!(space.canonical(), "ollama|nomic-embed-text|768|l2|v1");
    }

    #[test]
    fn scope_parse_rejects_unknown() {
        assert_eq!(Scope::parse("project"), Some(Scope::Project));
        assert_eq!(Scope::parse("globals"), None);
    }

    #[test]
    fn token_estimate_is_ceil_len_over_4() {
        assert_eq!(MemoryHit::estimate_tokens(""), 0);
        assert_eq!(MemoryHit::estimate_tokens("abcd"), 1);
        assert_eq!(MemoryHit::estimate_tokens("abcde"), 2);
    }

    #[test]
    fn snippet_truncates_at_200_chars() {
        let long = "a".repeat(300);
        let snippet = ParsedCandidate::snippet_from(&long);
        assert_eq!(snippet.chars().count(), 201); // 200 chars + ellipsis
    }
}
