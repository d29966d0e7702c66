//! # Provider selection
//!
//! `ProviderFactory` picks exactly one [`EmbeddingClient`](crate::embedding::EmbeddingClient)
//! at process start, following the strict, local-first ladder of spec §4.2:
//!
//! 1. If configuration pins a provider (`EMBED_PROVIDER != auto`), construct
//!    that one; failure to construct is fatal for the factory call.
//! 2. Otherwise, probe the local daemon (`GET {OLLAMA_HOST}/api/tags`, 3s
//!    timeout). On 2xx, select the local-daemon client.
//! 3. Otherwise, if `EMBED_BASE_URL` is configured, select the endpoint client.
//! 4. Otherwise, select the local-inference client (always available).
//! 5. If a hosted credential (`OPENAI_API_KEY`) is present but auto-selection
//!    reached step 4, log a visible notice that it was not used.
//!
//! Grounded in `graves-awful_aj::api::create_client`'s pattern of building an
//! `async_openai::Client` from config, generalized into the multi-step
//! selection above instead of a single hardcoded backend.
//!
//! ## Dimension resolution
//!
//! Spec §6's authoritative table gives a default `(model, dimension)` pair
//! per provider, but also requires (§6: "the factory looks up dim by model
//! and falls back to 768") that the dimension actually used always be
//! resolved from the **model string that ends up selected** — which may be
//! an `EMBED_MODEL` override rather than the provider's default. Keying
//! dimension off the provider name alone would silently mis-size the store
//! whenever a caller overrides the model (e.g. `EMBED_PROVIDER=openai` with
//! `EMBED_MODEL=text-embedding-3-large`, which is 3072-dimensional, not the
//! default model's 1536). [`dimension_for_model`] is the single source of
//! truth for this: every call site resolves the model string first, then
//! looks its dimension up in that table.
//!
//! # Errors
//! [`ProviderFactory::select`] returns [`MemoryError::Config`] only when a
//! *pinned* provider can't be constructed (missing credential, missing
//! endpoint URL, or an unrecognized `EMBED_PROVIDER` value). Auto-selection
//! never fails outright — each rung of the ladder that can't be reached is
//! logged and the next rung is tried.

use tracing::{info, warn};

use crate::config::MemoryConfig;
use crate::embedding::{EmbeddingClient, EndpointClient, HostedApiClient, LocalDaemonClient, LocalInferenceClient};
use crate::types::MemoryError;

/// This provider's default model id, used when `EMBED_MODEL` is unset
/// (spec §6 authoritative table).
fn default_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "text-embedding-3-small",
        "ollama" => "nomic-embed-text",
        "endpoint" => "nomic-embed-text",
        _ => "fast-bge-small-en-v1.5",
    }
}

/// Look up a model's embedding dimension by the model string itself, not by
/// provider — so an `EMBED_MODEL` override resolves to its *own* dimension
/// rather than silently inheriting its provider's default. Falls back to
/// `768` for any model not in this table (spec §6).
///
/// # Parameters
/// - `model`: the model id that was actually selected (default or override).
///
/// # Returns
/// The model's embedding dimension, or `768` if the model is unrecognized.
fn dimension_for_model(model: &str) -> usize {
    match model {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        "nomic-embed-text" => 768,
        "mxbai-embed-large" => 1024,
        "fast-bge-small-en-v1.5" => 384,
        "fast-bge-base-en-v1.5" => 768,
        _ => 768,
    }
}

/// Resolve the model to use for `provider` (the `EMBED_MODEL` override if
/// set, else the provider's default) and its dimension, in one step, so
/// call sites can't accidentally pair a resolved model with a stale
/// provider-keyed dimension.
fn resolve_model_and_dim(config: &MemoryConfig, provider: &str) -> (String, usize) {
    let model = config
        .embed_model
        .clone()
        .unwrap_or_else(|| default_model(provider).to_string());
    let dim = dimension_for_model(&model);
    (model, dim)
}

/// The embedding backend selected for this process, plus the observability
/// surface (`active_provider`/`active_model`/`active_dimension`) spec §4.2
/// asks the factory to expose after selection.
pub struct ProviderFactory {
    client: EmbeddingClient,
    active_provider: String,
}

impl ProviderFactory {
    /// Run the selection ladder and construct the chosen client.
    ///
    /// # Errors
    /// Only when `config.embed_provider` is pinned to a value that can't be
    /// constructed (see [`ProviderFactory::construct_pinned`]).
    pub async fn select(config: &MemoryConfig) -> Result<Self, MemoryError> {
        if config.embed_provider != "auto" {
            return Self::construct_pinned(config).map(|(client, provider)| Self {
                client,
                active_provider: provider,
            });
        }

        if LocalDaemonClient::probe(&config.ollama_host).await {
            let (model, dim) = resolve_model_and_dim(config, "ollama");
            info!(host = %config.ollama_host, model = %model, dim, "provider ladder: selected local daemon");
            return Ok(Self {
                client: EmbeddingClient::LocalDaemon(LocalDaemonClient::new(&config.ollama_host, model, dim)),
                active_provider: "ollama".to_string(),
            });
        }
        warn!(host = %config.ollama_host, "provider ladder: local daemon unreachable, falling through");

        if let Some(base_url) = &config.embed_base_url {
            let (model, dim) = resolve_model_and_dim(config, "endpoint");
            info!(base_url = %base_url, model = %model, dim, "provider ladder: selected custom endpoint");
            return Ok(Self {
                client: EmbeddingClient::Endpoint(EndpointClient::new(base_url, model, dim)),
                active_provider: "endpoint".to_string(),
            });
        }

        if config.openai_api_key.is_some() {
            warn!(
                "provider ladder: OPENAI_API_KEY is present but local-first selection reached \
                 local inference; the hosted credential was not used"
            );
        }

        let (model, dim) = resolve_model_and_dim(config, "fastembed");
        info!(model = %model, dim, "provider ladder: selected local inference");
        Ok(Self {
            client: EmbeddingClient::LocalInference(LocalInferenceClient::new(model, dim)),
            active_provider: "fastembed".to_string(),
        })
    }

    /// Construct the client for an explicitly pinned `EMBED_PROVIDER`.
    ///
    /// # Errors
    /// - `openai` without `OPENAI_API_KEY` set.
    /// - `endpoint` without `EMBED_BASE_URL` set.
    /// - Any value other than `openai`, `ollama`, `fastembed`, `endpoint`.
    fn construct_pinned(config: &MemoryConfig) -> Result<(EmbeddingClient, String), MemoryError> {
        match config.embed_provider.as_str() {
            "openai" => {
                let api_key = config
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| MemoryError::Config("OPENAI_API_KEY required for provider=openai".to_string()))?;
                let (model, dim) = resolve_model_and_dim(config, "openai");
                Ok((
                    EmbeddingClient::Hosted(HostedApiClient::new(api_key, model, dim)),
                    "openai".to_string(),
                ))
            }
            "ollama" => {
                let (model, dim) = resolve_model_and_dim(config, "ollama");
                Ok((
                    EmbeddingClient::LocalDaemon(LocalDaemonClient::new(&config.ollama_host, model, dim)),
                    "ollama".to_string(),
                ))
            }
            "fastembed" => {
                let (model, dim) = resolve_model_and_dim(config, "fastembed");
                Ok((
                    EmbeddingClient::LocalInference(LocalInferenceClient::new(model, dim)),
                    "fastembed".to_string(),
                ))
            }
            "endpoint" => {
                let base_url = config
                    .embed_base_url
                    .clone()
                    .ok_or_else(|| MemoryError::Config("EMBED_BASE_URL required for provider=endpoint".to_string()))?;
                let (model, dim) = resolve_model_and_dim(config, "endpoint");
                Ok((
                    EmbeddingClient::Endpoint(EndpointClient::new(base_url, model, dim)),
                    "endpoint".to_string(),
                ))
            }
            other => Err(MemoryError::Config(format!("unknown EMBED_PROVIDER: {other}"))),
        }
    }

    /// The selected backend. Callers go through this for every `embed`/
    /// `embed_one` call rather than holding their own reference, so there is
    /// exactly one client alive per process (Design Note "Global process-wide
    /// state").
    pub fn client(&self) -> &EmbeddingClient {
        &self.client
    }

    /// `"openai"` | `"ollama"` | `"fastembed"` | `"endpoint"` — whichever rung
    /// of the ladder was actually selected (not necessarily `EMBED_PROVIDER`,
    /// which may be `auto`).
    pub fn active_provider(&self) -> &str {
        &self.active_provider
    }

    /// The model id actually in use (default or `EMBED_MODEL` override).
    pub fn active_model(&self) -> &str {
        self.client.model()
    }

    /// The dimension actually in use, resolved from [`Self::active_model`]
    /// via [`dimension_for_model`] — never a provider-keyed guess.
    pub fn active_dimension(&self) -> usize {
        self.client.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_for_model_falls_back_to_768_for_unknown_models() {
        assert_eq!(dimension_for_model("carrier-pigeon-embed-v1"), 768);
    }

    #[test]
    fn dimension_for_model_resolves_by_model_not_provider() {
        // Same "openai" provider, two different models, two different dims -
        // proves the lookup is keyed on the model string.
        assert_eq!(dimension_for_model("text-embedding-3-small"), 1536);
        assert_eq!(dimension_for_model("text-embedding-3-large"), 3072);
    }

    #[test]
    fn resolve_model_and_dim_honors_model_override_dimension() {
        let config = MemoryConfig {
            embed_provider: "openai".to_string(),
            embed_model: Some("text-embedding-3-large".to_string()),
            embed_base_url: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_api_key: Some("sk-test".to_string()),
            db_path: std::path::PathBuf::from("/tmp/mnemex-test"),
        };
        let (model, dim) = resolve_model_and_dim(&config, "openai");
        assert_eq!(model, "text-embedding-3-large");
        assert_eq!(dim, 3072);
    }

    #[test]
    fn resolve_model_and_dim_falls_back_to_provider_default_when_unset() {
        let config = MemoryConfig {
            embed_provider: "auto".to_string(),
            embed_model: None,
            embed_base_url: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_api_key: None,
            db_path: std::path::PathBuf::from("/tmp/mnemex-test"),
        };
        let (model, dim) = resolve_model_and_dim(&config, "ollama");
        assert_eq!(model, "nomic-embed-text");
        assert_eq!(dim, 768);
    }

    #[tokio::test]
    async fn construct_pinned_openai_without_key_is_a_config_error() {
        let config = MemoryConfig {
            embed_provider: "openai".to_string(),
            embed_model: None,
            embed_base_url: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_api_key: None,
            db_path: std::path::PathBuf::from("/tmp/mnemex-test"),
        };
        let result = ProviderFactory::construct_pinned(&config);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn construct_pinned_unknown_provider_is_a_config_error() {
        let config = MemoryConfig {
            embed_provider: "carrier-pigeon".to_string(),
            embed_model: None,
            embed_base_url: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_api_key: None,
            db_path: std::path::PathBuf::from("/tmp/mnemex-test"),
        };
        assert!(ProviderFactory::construct_pinned(&config).is_err());
    }

    #[tokio::test]
    async fn construct_pinned_openai_with_model_override_uses_overrides_dimension() {
        let config = MemoryConfig {
            embed_provider: "openai".to_string(),
            embed_model: Some("text-embedding-3-large".to_string()),
            embed_base_url: None,
            ollama_host: "http://localhost:11434".to_string(),
            openai_api_key: Some("sk-test".to_string()),
            db_path: std::path::PathBuf::from("/tmp/mnemex-test"),
        };
        let (client, provider) = ProviderFactory::construct_pinned(&config).unwrap();
        assert_eq!(provider, "openai");
        assert_eq!(client.dimension(), 3072);
        assert_eq!(client.model(), "text-embedding-3-large");
    }
}
