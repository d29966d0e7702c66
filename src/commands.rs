//! # Command-line interface
//!
//! Declarative CLI for the `mnemex` demonstration harness, built with
//! [`clap`](https://docs.rs/clap) the same way `graves-awful_aj::commands`
//! declares its subcommands. This binary is explicitly not an agent host —
//! it has no tool-confirmation loop, no bridge protocol — it's a thin
//! exerciser over the library's four subsystems:
//!
//! - [`init`](Commands::Init): create/open the on-disk store for the
//!   currently selected embedding space.
//! - [`upsert`](Commands::Upsert): curator-facing entry point that embeds
//!   and stores one memory entry.
//! - [`core`](Commands::Core): print the Layer 1 static curated set.
//! - [`search`](Commands::Search): run the Layer 3 tool-access search path.
//! - [`ask`](Commands::Ask): run the Layer 2 dynamic retrieval pipeline.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "mnemex – a hybrid agent-memory retrieval engine: local-first embeddings, over-retrieve-then-LLM-filter recall, and reference-only injection framing.",
    long_about = None,
    propagate_version = true,
    color = clap::ColorChoice::Always
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Create or open the on-disk table for the currently selected embedding space.
    Init,

    /// Embed and store one memory entry (curation mechanics only — policy is
    /// the caller's responsibility per spec §1's Non-goals).
    Upsert {
        /// Caller-supplied unique id. Sort-friendly ids are recommended.
        #[arg(long)]
        id: String,
        /// `project` or `global`.
        #[arg(long, default_value = "project")]
        scope: String,
        /// Entry text. Reads from stdin if omitted.
        #[arg(long)]
        text: Option<String>,
        /// Optional provenance string (file path, URL, conversation id).
        #[arg(long)]
        source: Option<String>,
        /// Comma-separated tags.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Print the Layer 1 static curated set (`project`-scope entries) as a markdown bullet list.
    Core,

    /// Layer 3 tool-access search: top-`limit` by vector similarity, no LLM filter.
    Search {
        query: String,
        #[arg(long, default_value = "project")]
        scope: String,
        #[arg(long, default_value_t = 8)]
        limit: usize,
    },

    /// Layer 2 dynamic retrieval: embed once, over-retrieve, optionally filter through an LLM.
    Ask {
        query: String,
        #[arg(long, default_value = "project")]
        scope: String,
        #[arg(long, default_value_t = 50)]
        top_k: usize,
        /// Route the over-retrieved candidates through an OpenAI-compatible
        /// chat model as the relevance filter's LLM call instead of taking
        /// the top 8 by score.
        #[arg(long)]
        with_llm_filter: bool,
    },
}
