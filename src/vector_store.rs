//! # Vector store
//!
//! Per-embedding-space, file-backed persistence and search:
//! one SQLite table per [`EmbeddingSpace`], brute-force L2 search over a
//! scope-filtered row set.
//!
//! ## Overview
//!
//! A [`VectorStore`] owns exactly one embedding space — one `(provider,
//! model, dimension, norm, version)` 5-tuple — for its entire lifetime. That
//! space is baked into the on-disk table name at construction time
//! ([`EmbeddingSpace::table_name`]), so two spaces can never collide in the
//! same database file and a single store can never accidentally mix rows
//! from two spaces. A migration to a new embedding space is a new
//! `VectorStore` pointed at a new table, never an `ALTER TABLE`.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      VectorStore                          │
//! │                                                           │
//! │   EmbeddingSpace ──▶ table_name()                         │
//! │                           │                                │
//! │                           ▼                                │
//! │           "memory_entries__<provider>__<model>__<dim>__    │
//! │                     <norm>__<version>"                     │
//! │                           │                                │
//! │        ┌──────────────────┼──────────────────┐            │
//! │        ▼                  ▼                  ▼            │
//! │    init()             upsert()          vector_search()    │
//! │  open/create     validate → delete    load rows (scope) →  │
//! │  (race-safe)      chunk → add (tx)    L2 distance → sort → │
//! │                                        truncate → min_score │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## On-disk schema
//!
//! One row per [`MemoryEntry`]: `id`, `scope`, `text`, `source`, `tags`
//! (JSON array), `createdAt`/`updatedAt` (ms epoch), `embedding` (a
//! `bincode`-encoded `Vec<f32>` blob), and the row's own lineage
//! (`embedding_provider`, `embedding_model`, `embedding_dim`) so that rows
//! surviving a future table move can still be validated independently of the
//! table they currently live in (spec §4.3).
//!
//! ## Search strategy
//!
//! Raw `rusqlite` DDL/DML replaces the teacher's Diesel/HNSW combination.
//! Diesel's compile-time-checked schema can't express a table name computed
//! at runtime from an `EmbeddingSpace`; the direct precedent for building one
//! anyway is `graves-awful_aj::main::create_database`, which already issues
//! raw `CREATE TABLE IF NOT EXISTS` through `rusqlite::Connection`. The HNSW
//! index (`hora`) is dropped for the same reason `DevsHero-CortextAST` never
//! reaches for one: the spec's column-per-row persisted layout plus a
//! per-query scope `WHERE` predicate is incompatible with an opaque ANN
//! index blob, and curated memory sets are small enough that brute-force
//! O(n·d) search is the right tool (see `DESIGN.md`).
//!
//! | Operation | Time complexity | Notes |
//! |-----------|-----------------|-------|
//! | `upsert` | O(k) delete + O(n) insert | `k` = ids per chunk (≤200) |
//! | `vector_search` | O(n·d + n log n) | `n` = scope-filtered row count |
//! | `get_by_id` | O(1) index lookup | primary-key `SELECT` |
//! | `list_by_scope` | O(n) | unbounded by design, see §9 Open Question |
//!
//! ## Errors
//!
//! Every public method returns `Result<_, MemoryError>`. Writers
//! (`upsert`) validate dimension and declared lineage *before* touching the
//! table; readers never fail on a lineage mismatch, only log a warning
//! (rows may legitimately predate a lineage-tightening change).
//!
//! ## See also
//! - [`crate::types::EmbeddingSpace`] — the identity this store is keyed on.
//! - [`crate::manager::MemoryManager`] — the only caller that owns a store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::types::{EmbeddingSpace, MemoryEntry, MemoryError, Norm, Scope, ScoredEntry, SearchOptions};

const ID_CHUNK_SIZE: usize = 200;
const PLACEHOLDER_ID: &str = "__placeholder__";

fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

pub struct VectorStore {
    conn: Mutex<Connection>,
    space: EmbeddingSpace,
    table_name: String,
}

impl VectorStore {
    /// Open (creating parent directories as needed) a connection to the
    /// store at `db_path` for `space`. Does not create the table — call
    /// [`VectorStore::init`] before any other operation.
    ///
    /// # Parameters
    /// - `db_path`: path to the SQLite database file. Parent directories are
    ///   created if missing; the file itself is created by SQLite on first
    ///   write if it doesn't already exist.
    /// - `space`: the embedding space this store is permanently bound to.
    ///   Its [`EmbeddingSpace::table_name`] becomes the table this store
    ///   reads and writes for its entire lifetime.
    ///
    /// # Errors
    /// I/O failure creating parent directories, or SQLite failing to open
    /// the connection.
    pub fn new(db_path: &Path, space: EmbeddingSpace) -> Result<Self, MemoryError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let table_name = space.table_name();
        Ok(Self {
            conn: Mutex::new(conn),
            space,
            table_name,
        })
    }

    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    /// Create or open this store's table. Idempotent — a second call after
    /// the table already exists is a single `SELECT` against
    /// `sqlite_master` and nothing else.
    ///
    /// # Concurrency
    /// Guards concurrent first-time creation with an open → create-with-
    /// placeholder → delete → open-retry sequence: if `create_table` fails
    /// because another caller's `CREATE TABLE IF NOT EXISTS` already won the
    /// race, we re-check `table_exists` and treat that as success rather
    /// than propagating the error (spec §4.3 concurrency note).
    ///
    /// # Errors
    /// Returns the underlying `MemoryError::Db` only if table creation fails
    /// *and* the table still doesn't exist afterward (a genuine failure, not
    /// a lost race).
    pub fn init(&self) -> Result<(), MemoryError> {
        if self.table_exists()? {
            return Ok(());
        }
        match self.create_table() {
            Ok(()) => {
                self.insert_placeholder()?;
                self.delete(PLACEHOLDER_ID)?;
                Ok(())
            }
            Err(e) => {
                if self.table_exists()? {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn table_exists(&self) -> Result<bool, MemoryError> {
        let conn = self.conn.lock().expect("vector store connection mutex poisoned");
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name = ?1",
                params![self.table_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn create_table(&self) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("vector store connection mutex poisoned");
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                id TEXT PRIMARY KEY NOT NULL,
                scope TEXT NOT NULL,
                text TEXT NOT NULL,
                source TEXT,
                tags TEXT NOT NULL,
                createdAt INTEGER NOT NULL,
                updatedAt INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                embedding_provider TEXT NOT NULL,
                embedding_model TEXT NOT NULL,
                embedding_dim INTEGER NOT NULL
            );",
            table = self.table_name
        ))?;
        Ok(())
    }

    fn insert_placeholder(&self) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("vector store connection mutex poisoned");
        let embedding_blob = bincode::serde::encode_to_vec(vec![0.0f32; self.space.dimension], bincode::config::standard())
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO \"{table}\" (id, scope, text, source, tags, createdAt, updatedAt, embedding, embedding_provider, embedding_model, embedding_dim) VALUES (?1, ?2, ?3, NULL, '[]', ?4, ?4, ?5, ?6, ?7, ?8)",
                table = self.table_name
            ),
            params![
                PLACEHOLDER_ID,
                Scope::Project.as_str(),
                "",
                0i64,
                embedding_blob,
                self.space.provider,
                self.space.model,
                self.space.dimension as i64,
            ],
        )?;
        Ok(())
    }

    /// Validates every entry's dimension and (if present) declared lineage
    /// against this store's space before any mutation, then applies a
    /// chunked delete-by-id followed by a single add inside one transaction
    /// (spec I4: no retrieval observes a torn write; spec §4.3: "Dimension or
    /// lineage mismatch → hard error before any write").
    ///
    /// # Errors
    /// - [`MemoryError::DimensionMismatch`] if any entry's `embedding.len()`
    ///   doesn't match the store's space.
    /// - [`MemoryError::LineageMismatch`] if any entry declares a
    ///   `declared_provider`/`declared_model` that doesn't match the store's
    ///   space. Entries with no declared lineage are unaffected — the store
    ///   stamps its own `(provider, model)` onto the row instead (I2).
    pub fn upsert(&self, entries: &[MemoryEntry]) -> Result<(), MemoryError> {
        for entry in entries {
            if entry.embedding.len() != self.space.dimension {
                return Err(MemoryError::DimensionMismatch {
                    expected: self.space.dimension,
                    actual: entry.embedding.len(),
                });
            }
            if let Some(provider) = &entry.declared_provider
                && provider != &self.space.provider
            {
                return Err(MemoryError::LineageMismatch {
                    expected: self.space.provider.clone(),
                    actual: provider.clone(),
                });
            }
            if let Some(model) = &entry.declared_model
                && model != &self.space.model
            {
                return Err(MemoryError::LineageMismatch {
                    expected: self.space.model.clone(),
                    actual: model.clone(),
                });
            }
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            self.delete_ids(chunk)?;
        }

        let mut conn = self.conn.lock().expect("vector store connection mutex poisoned");
        let tx = conn.transaction()?;
        for entry in entries {
            let tags_json = serde_json::to_string(&entry.tags)?;
            let embedding_blob = bincode::serde::encode_to_vec(&entry.embedding, bincode::config::standard())
                .map_err(|e| MemoryError::Embedding(e.to_string()))?;
            tx.execute(
                &format!(
                    "INSERT INTO \"{table}\" (id, scope, text, source, tags, createdAt, updatedAt, embedding, embedding_provider, embedding_model, embedding_dim) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    table = self.table_name
                ),
                params![
                    entry.id,
                    entry.scope.as_str(),
                    entry.text,
                    entry.source,
                    tags_json,
                    entry.created_at,
                    entry.updated_at,
                    embedding_blob,
                    self.space.provider,
                    self.space.model,
                    self.space.dimension as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_ids(&self, ids: &[&str]) -> Result<(), MemoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().expect("vector store connection mutex poisoned");
        let escaped_list = ids
            .iter()
            .map(|id| format!("'{}'", escape_sql_string(id)))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute(
            &format!("DELETE FROM \"{table}\" WHERE id IN ({escaped_list})", table = self.table_name),
            [],
        )?;
        Ok(())
    }

    /// Deletes a single row by id. A no-op, not an error, if `id` isn't
    /// present in this store's table.
    ///
    /// # Parameters
    /// - `id`: the entry id to remove.
    ///
    /// # Errors
    /// Propagates any underlying `rusqlite` error.
    pub fn delete(&self, id: &str) -> Result<(), MemoryError> {
        self.delete_ids(&[id])
    }

    /// Deletes every row in this store's table whose `scope` column matches.
    /// Used when a project or global curated set is cleared wholesale rather
    /// than entry-by-entry.
    ///
    /// # Errors
    /// Propagates any underlying `rusqlite` error.
    pub fn delete_by_scope(&self, scope: Scope) -> Result<(), MemoryError> {
        let conn = self.conn.lock().expect("vector store connection mutex poisoned");
        conn.execute(
            &format!(
                "DELETE FROM \"{table}\" WHERE scope = '{scope}'",
                table = self.table_name,
                scope = escape_sql_string(scope.as_str()),
            ),
            [],
        )?;
        Ok(())
    }

    /// Brute-force L2 distance search over a scope-filtered row set,
    /// truncated to `top_k` after sort, then post-filtered by `min_score`.
    ///
    /// Distance is converted to a `[0, 1]` ranking score via `1 / (1 +
    /// distance)` rather than cosine similarity, since embeddings here are
    /// not assumed pre-normalized (spec §5: normalization is a property of
    /// the embedding space, not guaranteed by every provider).
    ///
    /// # Parameters
    /// - `query_vec`: must be `self.space.dimension` long; mismatched length
    ///   is not checked here (callers embed the query through the same
    ///   provider/model as the store, so lengths already agree by
    ///   construction).
    /// - `options`: scope filter, `top_k` cap, optional `min_score` floor.
    /// - `cancel`: checked before and after loading rows; an already- or
    ///   newly-cancelled token short-circuits to an empty result rather than
    ///   an error (spec I5: cancellation yields no results, not a failure).
    ///
    /// # Returns
    /// Results sorted by ascending distance (descending score), truncated to
    /// `top_k` before the `min_score` filter is applied, so `min_score`
    /// cannot recover entries outside the top-k window.
    ///
    /// # Errors
    /// Propagates any underlying `rusqlite` error from loading rows.
    pub fn vector_search(
        &self,
        query_vec: &[f32],
        options: SearchOptions,
        cancel: CancellationToken,
    ) -> Result<Vec<ScoredEntry>, MemoryError> {
        if options.top_k == 0 || cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let rows = self.load_rows(options.scope)?;
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredEntry> = rows
            .into_iter()
            .map(|entry| {
                let distance = l2_distance(query_vec, &entry.embedding);
                let score = 1.0 / (1.0 + distance);
                ScoredEntry { entry, distance, score }
            })
            .collect();

        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.top_k);

        if let Some(min_score) = options.min_score {
            scored.retain(|s| s.score >= min_score);
        }

        Ok(scored)
    }

    fn load_rows(&self, scope: Option<Scope>) -> Result<Vec<MemoryEntry>, MemoryError> {
        let conn = self.conn.lock().expect("vector store connection mutex poisoned");
        let sql = match scope {
            Some(s) => format!(
                "SELECT id, scope, text, source, tags, createdAt, updatedAt, embedding, embedding_provider, embedding_model, embedding_dim FROM \"{table}\" WHERE scope = '{scope}' AND id != '{placeholder}'",
                table = self.table_name,
                scope = escape_sql_string(s.as_str()),
                placeholder = PLACEHOLDER_ID,
            ),
            None => format!(
                "SELECT id, scope, text, source, tags, createdAt, updatedAt, embedding, embedding_provider, embedding_model, embedding_dim FROM \"{table}\" WHERE id != '{placeholder}'",
                table = self.table_name,
                placeholder = PLACEHOLDER_ID,
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| self.row_to_entry(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_entry(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
        let id: String = row.get(0)?;
        let scope_str: String = row.get(1)?;
        let text: String = row.get(2)?;
        let source: Option<String> = row.get(3)?;
        let tags_json: String = row.get(4)?;
        let created_at: i64 = row.get(5)?;
        let updated_at: i64 = row.get(6)?;
        let embedding_blob: Vec<u8> = row.get(7)?;
        let row_provider: String = row.get(8)?;
        let row_model: String = row.get(9)?;
        let row_dim: i64 = row.get(10)?;

        if row_provider != self.space.provider || row_model != self.space.model || row_dim as usize != self.space.dimension {
            warn!(
                id = %id,
                expected = %self.space.canonical(),
                actual = %format!("{row_provider}|{row_model}|{row_dim}"),
                "vector store: row lineage does not match store space"
            );
        }

        let scope = Scope::parse(&scope_str).unwrap_or(Scope::Project);
        let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
        let (embedding, _): (Vec<f32>, usize) = bincode::serde::decode_from_slice(&embedding_blob, bincode::config::standard())
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Blob, Box::new(e)))?;

        Ok(MemoryEntry {
            id,
            scope,
            text,
            source,
            tags,
            created_at,
            updated_at,
            embedding,
            declared_provider: Some(row_provider),
            declared_model: Some(row_model),
        })
    }

    /// Fetches a single entry by id, or `None` if it isn't present (or is
    /// the internal placeholder row used to keep `init()` idempotent-safe).
    ///
    /// # Errors
    /// Propagates any underlying `rusqlite` error, including a decode
    /// failure on the stored embedding blob.
    pub fn get_by_id(&self, id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let conn = self.conn.lock().expect("vector store connection mutex poisoned");
        let sql = format!(
            "SELECT id, scope, text, source, tags, createdAt, updatedAt, embedding, embedding_provider, embedding_model, embedding_dim FROM \"{table}\" WHERE id = ?1",
            table = self.table_name
        );
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt
            .query_row(params![id], |row| self.row_to_entry(row))
            .optional()?;
        Ok(result)
    }

    /// Unbounded by design (spec §9 Open Question: "callers assume curated
    /// sets are small").
    pub fn list_by_scope(&self, scope: Scope) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.load_rows(Some(scope))
    }

    /// Enumerate embedding spaces present in this database by scanning
    /// `sqlite_master` for the `memory_entries__` table-name prefix. Tables
    /// whose name doesn't parse back into a 5-tuple are skipped with a
    /// warning rather than failing the whole scan (tolerant-parsing posture
    /// grounded in `DevsHero-CortextAST`'s own flat-file index metadata
    /// handling).
    ///
    /// A free function rather than a method since it's used to discover
    /// which space(s) already exist in a database *before* any
    /// `VectorStore` is constructed — e.g. to detect a stale space left
    /// behind after a provider/model change (spec §7: migration is "a new
    /// store, not a conversion").
    ///
    /// # Parameters
    /// - `db_path`: opened directly, independent of any live `VectorStore`.
    ///
    /// # Errors
    /// Propagates any underlying `rusqlite` error opening the database or
    /// scanning `sqlite_master`.
    pub fn list_embedding_spaces(db_path: &Path) -> Result<Vec<EmbeddingSpace>, MemoryError> {
        let conn = Connection::open(db_path)?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name LIKE 'memory_entries\\_\\_%' ESCAPE '\\'",
        )?;
        let names: Vec<String> = stmt.query_map([], |row| row.get(0))?.collect::<Result<_, _>>()?;

        let mut spaces = Vec::new();
        for name in names {
            match parse_table_name(&name) {
                Some(space) => spaces.push(space),
                None => warn!(table = %name, "vector store: table name does not parse as an embedding space, skipping"),
            }
        }
        Ok(spaces)
    }

    /// Releases resources held for this connection. Safe to call more than
    /// once; callers should not use the store afterward.
    pub fn close(&self) {
        let guard = self.conn.lock().expect("vector store connection mutex poisoned");
        let _ = guard.execute_batch("PRAGMA optimize;");
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

fn parse_table_name(name: &str) -> Option<EmbeddingSpace> {
    let suffix = name.strip_prefix("memory_entries__")?;
    let parts: Vec<&str> = suffix.split("__").collect();
    if parts.len() != 5 {
        return None;
    }
    let dimension: usize = parts[2].parse().ok()?;
    let norm = match parts[3] {
        "l2" => Norm::L2,
        _ => Norm::None,
    };
    Some(
        EmbeddingSpace::new(parts[0], parts[1], dimension)
            .with_norm(norm)
            .with_version(parts[4]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ms;
    use tempfile::tempdir;

    fn test_space() -> EmbeddingSpace {
        EmbeddingSpace::new("test", "m", 3)
    }

    fn entry(id: &str, scope: Scope, embedding: Vec<f32>) -> MemoryEntry {
        let now = now_ms();
        MemoryEntry {
            id: id.to_string(),
            scope,
            text: format!("text for {id}"),
            source: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            embedding,
            declared_provider: None,
            declared_model: None,
        }
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(&dir.path().join("db.sqlite"), test_space()).unwrap();
        store.init().unwrap();
        store.init().unwrap();
    }

    #[test]
    fn upsert_rejects_declared_lineage_mismatch_without_writing() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(&dir.path().join("db.sqlite"), test_space()).unwrap();
        store.init().unwrap();
        let mut bad = entry("e1", Scope::Project, vec![1.0, 0.0, 0.0]);
        bad.declared_provider = Some("x".to_string());
        let result = store.upsert(&[bad]);
        assert!(matches!(
            result,
            Err(MemoryError::LineageMismatch { ref expected, ref actual }) if expected == "test" && actual == "x"
        ));
        assert_eq!(store.list_by_scope(Scope::Project).unwrap().len(), 0);
    }

    #[test]
    fn upsert_accepts_declared_lineage_matching_the_store() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(&dir.path().join("db.sqlite"), test_space()).unwrap();
        store.init().unwrap();
        let mut good = entry("e1", Scope::Project, vec![1.0, 0.0, 0.0]);
        good.declared_provider = Some("test".to_string());
        good.declared_model = Some("m".to_string());
        store.upsert(&[good]).unwrap();
        assert_eq!(store.list_by_scope(Scope::Project).unwrap().len(), 1);
    }

    #[test]
    fn upsert_rejects_wrong_dimension_without_writing() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(&dir.path().join("db.sqlite"), test_space()).unwrap();
        store.init().unwrap();
        let bad = entry("e1", Scope::Project, vec![1.0, 0.0]);
        let result = store.upsert(&[bad]);
        assert!(matches!(result, Err(MemoryError::DimensionMismatch { expected: 3, actual: 2 })));
        assert_eq!(store.list_by_scope(Scope::Project).unwrap().len(), 0);
    }

    #[test]
    fn upsert_then_search_orders_by_distance() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(&dir.path().join("db.sqlite"), test_space()).unwrap();
        store.init().unwrap();
        store
            .upsert(&[
                entry("e1", Scope::Project, vec![1.0, 0.0, 0.0]),
                entry("e2", Scope::Project, vec![0.0, 1.0, 0.0]),
                entry("e3", Scope::Project, vec![0.0, 0.0, 1.0]),
            ])
            .unwrap();

        let results = store
            .vector_search(
                &[0.9, 0.1, 0.0],
                SearchOptions { top_k: 3, scope: None, min_score: None },
                CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].entry.id, "e1");
        assert_eq!(results[1].entry.id, "e2");
        assert_eq!(results[2].entry.id, "e3");
        assert!(results[0].score > results[1].score);
        assert!(results[1].score > results[2].score);
    }

    #[test]
    fn upsert_is_replace_by_id() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(&dir.path().join("db.sqlite"), test_space()).unwrap();
        store.init().unwrap();
        store.upsert(&[entry("e1", Scope::Project, vec![1.0, 0.0, 0.0])]).unwrap();
        let mut updated = entry("e1", Scope::Project, vec![0.0, 1.0, 0.0]);
        updated.updated_at += 1000;
        store.upsert(&[updated.clone()]).unwrap();

        let rows = store.list_by_scope(Scope::Project).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].embedding, vec![0.0, 1.0, 0.0]);
        assert_eq!(rows[0].updated_at, updated.updated_at);
    }

    #[test]
    fn vector_search_top_k_zero_returns_empty() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(&dir.path().join("db.sqlite"), test_space()).unwrap();
        store.init().unwrap();
        store.upsert(&[entry("e1", Scope::Project, vec![1.0, 0.0, 0.0])]).unwrap();
        let results = store
            .vector_search(&[1.0, 0.0, 0.0], SearchOptions { top_k: 0, scope: None, min_score: None }, CancellationToken::new())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn delete_by_scope_removes_only_that_scope() {
        let dir = tempdir().unwrap();
        let store = VectorStore::new(&dir.path().join("db.sqlite"), test_space()).unwrap();
        store.init().unwrap();
        store
            .upsert(&[
                entry("e1", Scope::Project, vec![1.0, 0.0, 0.0]),
                entry("e2", Scope::Global, vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        store.delete_by_scope(Scope::Project).unwrap();
        assert_eq!(store.list_by_scope(Scope::Project).unwrap().len(), 0);
        assert_eq!(store.list_by_scope(Scope::Global).unwrap().len(), 1);
    }

    #[test]
    fn list_embedding_spaces_parses_table_names() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db.sqlite");
        let store = VectorStore::new(&db_path, test_space()).unwrap();
        store.init().unwrap();
        drop(store);

        let spaces = VectorStore::list_embedding_spaces(&db_path).unwrap();
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].canonical(), "test|m|3|none|v1");
    }
}
