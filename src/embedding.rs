//! # Embedding clients
//!
//! [`EmbeddingClient`]: turn text into fixed-dimension vectors.
//!
//! ## Overview
//!
//! Four concrete backends share one capability surface — "a capability set
//! `{embed, embed_one, dimension, model}` ... carr[ied] as tagged variants or
//! trait objects, not inheritance" (Design Note):
//!
//! - [`LocalInferenceClient`] — candle BERT running on CPU, no network.
//! - [`LocalDaemonClient`] — an Ollama-style local daemon over HTTP.
//! - [`EndpointClient`] — a caller-configured HTTP endpoint speaking the
//!   same wire format as the daemon.
//! - [`HostedApiClient`] — an OpenAI-compatible hosted API.
//!
//! We use a tagged enum ([`EmbeddingClient`]) rather than a `dyn` trait
//! object: none of `graves-awful_aj`'s own abstractions reach for
//! `async-trait` (it isn't a dependency), and an enum keeps async methods
//! native without needing one.
//!
//! ## Failure posture
//!
//! Every backend degrades to zero vectors of the right dimension on
//! failure (timeout, transport error, decode error, response-length
//! mismatch) rather than propagating an error up through
//! [`crate::manager::MemoryManager`] — retrieval is best-effort by design
//! (spec §4.1, §9 "Degraded embeddings are not fatal"). Every suspension
//! point races against a passed-in [`tokio_util::sync::CancellationToken`]
//! and returns an empty vec if cancelled first.
//!
//! The local-inference variant is adapted directly from
//! `graves-awful_aj::vector_store::SentenceEmbeddingsModel` (candle BERT,
//! mean pooling, L2 normalize) but parameterized on model id/dimension
//! instead of hardcoding `all-MiniLM-L6-v2`.

use std::sync::Arc;
use std::time::Duration;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::api::tokio::Api;
use hf_hub::{Repo, RepoType};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::warn;

fn zero_vectors(count: usize, dimension: usize) -> Vec<Vec<f32>> {
    (0..count).map(|_| vec![0.0; dimension]).collect()
}

/// Chunk `texts` into groups of at most `max_batch_size`, preserving order.
fn chunk_inputs(texts: &[String], max_batch_size: usize) -> Vec<&[String]> {
    if max_batch_size == 0 {
        return vec![texts];
    }
    texts.chunks(max_batch_size).collect()
}

/// One-time-loaded candle BERT model, mirroring the teacher's
/// `SentenceEmbeddingsModel::load`/`encode`/`mean_pooling`/`normalize`.
struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LoadedModel {
    async fn load(model_id: &str) -> Result<Self, String> {
        let device = Device::Cpu;
        let api = Api::new().map_err(|e| e.to_string())?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            "main".to_string(),
        ));

        let config_filename = repo.get("config.json").await.map_err(|e| e.to_string())?;
        let tokenizer_filename = repo.get("tokenizer.json").await.map_err(|e| e.to_string())?;
        let weights_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| e.to_string())?;

        let config = std::fs::read_to_string(config_filename).map_err(|e| e.to_string())?;
        let config: BertConfig = serde_json::from_str(&config).map_err(|e| e.to_string())?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| format!("failed to load tokenizer: {e}"))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(|e| e.to_string())?
        };
        let model = BertModel::load(vb, &config).map_err(|e| e.to_string())?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, String> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| format!("tokenization error: {e}"))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| e.to_string())?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| e.to_string())?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(|e| e.to_string())?;

        let pooled = self
            .mean_pooling(&output, tokens.get_attention_mask())
            .map_err(|e| e.to_string())?;
        let normalized = self.normalize(&pooled).map_err(|e| e.to_string())?;
        normalized.to_vec1::<f32>().map_err(|e| e.to_string())
    }

    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> candle_core::Result<Tensor> {
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;
        let masked = embeddings.broadcast_mul(&mask)?;
        let sum = masked.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        sum.broadcast_div(&count)?.squeeze(0)
    }

    fn normalize(&self, tensor: &Tensor) -> candle_core::Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        tensor.broadcast_div(&norm)
    }
}

/// Local CPU inference via candle. Always available; first call triggers a
/// one-time download+load behind a single-in-flight `tokio::sync::OnceCell`
/// so concurrent callers share one initialization (spec §4.1, §9 "Lazy model
/// initialization").
pub struct LocalInferenceClient {
    model_id: String,
    dimension: usize,
    model: Arc<OnceCell<Result<Arc<LoadedModel>, String>>>,
}

impl LocalInferenceClient {
    /// Builds a client that defers the HuggingFace download and model load
    /// until the first [`Self::embed`] call.
    ///
    /// # Parameters
    /// - `model_id`: a HuggingFace repo id (e.g. `sentence-transformers/all-MiniLM-L6-v2`).
    /// - `dimension`: the expected output width; used to size the zero
    ///   vector fallback on load/encode failure, not validated against the
    ///   model's actual output.
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
            model: Arc::new(OnceCell::new()),
        }
    }

    /// Loads the model on first call; concurrent callers share the single
    /// in-flight load via `OnceCell::get_or_init`. Returns `None` (rather
    /// than propagating) on load failure, logged at `warn`.
    async fn loaded(&self) -> Option<Arc<LoadedModel>> {
        let result = self
            .model
            .get_or_init(|| async { LoadedModel::load(&self.model_id).await.map(Arc::new) })
            .await;
        match result {
            Ok(model) => Some(model.clone()),
            Err(e) => {
                warn!(error = %e, model = %self.model_id, "local-inference: model load failed");
                None
            }
        }
    }

    async fn embed(&self, texts: &[String], cancel: CancellationToken) -> Vec<Vec<f32>> {
        if texts.is_empty() || cancel.is_cancelled() {
            return Vec::new();
        }
        let Some(model) = self.loaded().await else {
            return zero_vectors(texts.len(), self.dimension);
        };
        if cancel.is_cancelled() {
            return Vec::new();
        }
        texts
            .iter()
            .map(|text| match model.encode(text) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "local-inference: embedding failed, using zero vector");
                    vec![0.0; self.dimension]
                }
            })
            .collect()
    }
}

#[derive(Serialize)]
struct DaemonEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct DaemonEmbedResponse {
    #[serde(default)]
    #[allow(dead_code)]
    model: String,
    embeddings: Vec<Vec<f32>>,
}

/// Shared HTTP embedding path for both the local-daemon (Ollama-style) and
/// custom-endpoint variants, which speak the identical wire format
/// (spec §4.1, §6).
struct HttpEmbedClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    max_batch_size: usize,
    timeout: Duration,
}

impl HttpEmbedClient {
    /// `max_batch_size` is fixed at 32 and `timeout` at 30s; both are the
    /// teacher's `graves-awful_aj` HTTP client defaults, not spec-mandated.
    fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dimension,
            max_batch_size: 32,
            timeout: Duration::from_secs(30),
        }
    }

    async fn embed(&self, texts: &[String], cancel: CancellationToken) -> Vec<Vec<f32>> {
        if texts.is_empty() || cancel.is_cancelled() {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(texts.len());
        for chunk in chunk_inputs(texts, self.max_batch_size) {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            let chunk_vec = chunk.to_vec();
            let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
            let request = self
                .http
                .post(&url)
                .json(&DaemonEmbedRequest {
                    model: &self.model,
                    input: &chunk_vec,
                })
                .send();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = tokio::time::timeout(self.timeout, request) => Some(r),
            };

            let vectors = match outcome {
                None => return Vec::new(),
                Some(Err(_elapsed)) => {
                    warn!(url = %url, "embedding request timed out, using zero vectors");
                    zero_vectors(chunk.len(), self.dimension)
                }
                Some(Ok(Err(e))) => {
                    warn!(error = %e, url = %url, "embedding request failed, using zero vectors");
                    zero_vectors(chunk.len(), self.dimension)
                }
                Some(Ok(Ok(response))) => match response.json::<DaemonEmbedResponse>().await {
                    Ok(body) if body.embeddings.len() == chunk.len() => body.embeddings,
                    Ok(_) => {
                        warn!("embedding response length mismatch, using zero vectors");
                        zero_vectors(chunk.len(), self.dimension)
                    }
                    Err(e) => {
                        warn!(error = %e, "embedding response decode failed, using zero vectors");
                        zero_vectors(chunk.len(), self.dimension)
                    }
                },
            };
            results.extend(vectors);
        }
        results
    }
}

pub struct LocalDaemonClient {
    inner: HttpEmbedClient,
}

impl LocalDaemonClient {
    /// `host` is the daemon's base URL (e.g. `http://localhost:11434`), not
    /// validated here — see [`Self::probe`] for liveness detection.
    pub fn new(host: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            inner: HttpEmbedClient::new(host, model, dimension),
        }
    }

    /// GET `{host}/api/tags` with a 3s timeout, returning `true` on any 2xx
    /// and `false` on any error or non-2xx status (spec §4.2 step 2: this
    /// is the provider ladder's local-daemon liveness probe).
    pub async fn probe(host: &str) -> bool {
        let url = format!("{}/api/tags", host.trim_end_matches('/'));
        let client = reqwest::Client::new();
        match tokio::time::timeout(Duration::from_secs(3), client.get(&url).send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            _ => false,
        }
    }

    async fn embed(&self, texts: &[String], cancel: CancellationToken) -> Vec<Vec<f32>> {
        self.inner.embed(texts, cancel).await
    }
}

/// Same wire format as [`LocalDaemonClient`] but against a caller-configured
/// base URL (`EMBED_BASE_URL`), for self-hosted or proxy deployments.
pub struct EndpointClient {
    inner: HttpEmbedClient,
}

impl EndpointClient {
    /// `base_url` comes from `EMBED_BASE_URL`; unlike [`LocalDaemonClient`]
    /// this variant is never auto-probed, only constructed when a caller
    /// pins it explicitly.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            inner: HttpEmbedClient::new(base_url, model, dimension),
        }
    }

    async fn embed(&self, texts: &[String], cancel: CancellationToken) -> Vec<Vec<f32>> {
        self.inner.embed(texts, cancel).await
    }
}

/// Hosted OpenAI-compatible API via `async-openai`, the same client crate
/// `graves-awful_aj::api::create_client` uses for chat completions.
pub struct HostedApiClient {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimension: usize,
}

impl HostedApiClient {
    /// Builds an `async-openai` client scoped to `api_key`. No request is
    /// made until [`Self::embed`] is called.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let config = async_openai::config::OpenAIConfig::new().with_api_key(api_key.into());
        Self {
            client: async_openai::Client::with_config(config),
            model: model.into(),
            dimension,
        }
    }

    async fn embed(&self, texts: &[String], cancel: CancellationToken) -> Vec<Vec<f32>> {
        if texts.is_empty() || cancel.is_cancelled() {
            return Vec::new();
        }

        let request = match async_openai::types::CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(async_openai::types::EmbeddingInput::StringArray(texts.to_vec()))
            .build()
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "hosted embedding: failed to build request, using zero vectors");
                return zero_vectors(texts.len(), self.dimension);
            }
        };

        let call = self.client.embeddings().create(request);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = call => Some(r),
        };

        match outcome {
            None => Vec::new(),
            Some(Ok(response)) if response.data.len() == texts.len() => {
                response.data.into_iter().map(|d| d.embedding).collect()
            }
            Some(Ok(_)) => {
                warn!("hosted embedding: response length mismatch, using zero vectors");
                zero_vectors(texts.len(), self.dimension)
            }
            Some(Err(e)) => {
                warn!(error = %e, "hosted embedding request failed, using zero vectors");
                zero_vectors(texts.len(), self.dimension)
            }
        }
    }
}

/// The selected embedding backend, tagged rather than boxed (see module docs).
pub enum EmbeddingClient {
    LocalInference(LocalInferenceClient),
    LocalDaemon(LocalDaemonClient),
    Endpoint(EndpointClient),
    Hosted(HostedApiClient),
}

impl EmbeddingClient {
    /// Embeds a batch of texts, dispatching to whichever backend this
    /// client is carrying.
    ///
    /// # Returns
    /// One vector per input text, same order, each `self.dimension()`
    /// long — including on per-item failure, where the failing backend
    /// substitutes a zero vector rather than shortening the output (so
    /// callers can always zip `texts` with the result 1:1). An empty input
    /// slice or an already-cancelled token yields an empty output vec.
    pub async fn embed(&self, texts: &[String], cancel: CancellationToken) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self {
            EmbeddingClient::LocalInference(c) => c.embed(texts, cancel).await,
            EmbeddingClient::LocalDaemon(c) => c.embed(texts, cancel).await,
            EmbeddingClient::Endpoint(c) => c.embed(texts, cancel).await,
            EmbeddingClient::Hosted(c) => c.embed(texts, cancel).await,
        }
    }

    /// Convenience wrapper over [`Self::embed`] for the single-query case
    /// used by [`crate::manager::MemoryManager::retrieve_relevant`] and
    /// [`crate::manager::MemoryManager::search`].
    ///
    /// # Returns
    /// An empty vec only if the underlying `embed` call returns no rows at
    /// all (cancelled token); otherwise always `self.dimension()` long.
    pub async fn embed_one(&self, text: &str, cancel: CancellationToken) -> Vec<f32> {
        self.embed(&[text.to_string()], cancel)
            .await
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// The dimension this client was constructed with, resolved by
    /// [`crate::provider::ProviderFactory`] from the selected model string.
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingClient::LocalInference(c) => c.dimension,
            EmbeddingClient::LocalDaemon(c) => c.inner.dimension,
            EmbeddingClient::Endpoint(c) => c.inner.dimension,
            EmbeddingClient::Hosted(c) => c.dimension,
        }
    }

    /// The model id this client was constructed with.
    pub fn model(&self) -> &str {
        match self {
            EmbeddingClient::LocalInference(c) => &c.model_id,
            EmbeddingClient::LocalDaemon(c) => &c.inner.model,
            EmbeddingClient::Endpoint(c) => &c.inner.model,
            EmbeddingClient::Hosted(c) => &c.model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_empty_input_returns_empty_output() {
        let client = EmbeddingClient::LocalDaemon(LocalDaemonClient::new(
            "http://localhost:11434",
            "nomic-embed-text",
            768,
        ));
        let out = client.embed(&[], CancellationToken::new()).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn embed_cancelled_returns_empty_output() {
        let client = EmbeddingClient::LocalDaemon(LocalDaemonClient::new(
            "http://localhost:11434",
            "nomic-embed-text",
            768,
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = client.embed(&["hello".to_string()], cancel).await;
        assert!(out.is_empty());
    }

    #[test]
    fn chunk_inputs_preserves_order_and_size() {
        let texts: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        let chunks = chunk_inputs(&texts, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], ["0".to_string(), "1".to_string()]);
        assert_eq!(chunks[2], ["4".to_string()]);
    }
}
