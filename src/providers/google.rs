//! Clients for the Google Generative AI APIs: Gemini chat generation and
//! the embedContent embedding endpoint.
//!
//! The chat client is blocking like the other providers. The embedding
//! client rides an async transport, so it carries the tokio runtime handle
//! the loader resolved for it and offers a blocking convenience wrapper.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error};

use crate::error::ProviderError;
use crate::loader::{
    build_llm_api_client, ChatModelSettings, ChatResponse, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_FETCH_TIMEOUT_SECS,
};

pub const GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const PROVIDER: &str = "google";

/// Headers for the Google Generative AI API:
/// "x-goog-api-key: PUT-YOUR-API-KEY-HERE"
pub fn prepare_google_headers(api_key: Option<&str>) -> HeaderMap {
    let mut custom_headers = HeaderMap::new();
    const GOOG_API_HEADER: reqwest::header::HeaderName =
        reqwest::header::HeaderName::from_static("x-goog-api-key");

    if let Some(api_key) = api_key {
        if let Ok(mut header_apikey_val) = HeaderValue::from_str(api_key) {
            header_apikey_val.set_sensitive(true);
            custom_headers.insert(GOOG_API_HEADER, header_apikey_val);
        }
    }
    custom_headers
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GooglePart {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GoogleContent {
    pub role: String,
    pub parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GoogleGenerationConfig {
    pub temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    pub max_output_tokens: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GoogleChatPayload {
    pub contents: Vec<GoogleContent>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GoogleGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GoogleChatResponseBody {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<GoogleUsageMetadata>,
    #[serde(default, rename = "modelVersion")]
    model_version: String,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidate {
    content: GoogleCandidateContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidateContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Default, Deserialize)]
struct GoogleUsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u64,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u64,
}

/// Client for the Google Gemini generateContent API.
#[derive(Debug)]
pub struct GoogleChat {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub api_key: Option<String>,
    pub base_url: String,
    pub api_client: Client,
}

impl GoogleChat {
    pub fn new(settings: ChatModelSettings) -> GoogleChat {
        let headers = prepare_google_headers(settings.api_key.as_deref());
        let api_client = build_llm_api_client(
            DEFAULT_CONNECT_TIMEOUT_SECS,
            DEFAULT_FETCH_TIMEOUT_SECS,
            None,
            Some(headers),
        );
        GoogleChat {
            model_name: settings.model_name,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            api_key: settings.api_key,
            base_url: GOOGLE_API_URL.to_string(),
            api_client,
        }
    }

    /// POST to `{base}/{model}:generateContent` and extract the first
    /// candidate's text with usage counts.
    pub fn generate(
        &self,
        system_context: &str,
        prompt: &str,
    ) -> Result<ChatResponse, ProviderError> {
        let api_url = format!("{}/{}:generateContent", self.base_url, self.model_name);
        let text = if system_context.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n{}", system_context, prompt)
        };
        let payload = GoogleChatPayload {
            contents: vec![GoogleContent {
                role: "user".to_string(),
                parts: vec![GooglePart { text }],
            }],
            generation_config: GoogleGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let response = self
            .api_client
            .post(api_url)
            .json(&payload)
            .send()
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "Error posting chat request");
                ProviderError::Request {
                    provider: PROVIDER,
                    source: e,
                }
            })?;

        match response.status() {
            StatusCode::OK => {
                let body: GoogleChatResponseBody = response.json().map_err(|e| {
                    error!(provider = PROVIDER, error = %e, "Error decoding chat response");
                    ProviderError::Request {
                        provider: PROVIDER,
                        source: e,
                    }
                })?;
                debug!(provider = PROVIDER, model = %body.model_version, "Chat response received");

                let candidate = body
                    .candidates
                    .into_iter()
                    .next()
                    .ok_or(ProviderError::Empty { provider: PROVIDER })?;
                let generated_text = candidate
                    .content
                    .parts
                    .into_iter()
                    .next()
                    .map(|part| part.text)
                    .ok_or(ProviderError::Empty { provider: PROVIDER })?;
                let usage = body.usage_metadata.unwrap_or_default();
                Ok(ChatResponse {
                    generated_text,
                    input_tokens_count: usage.prompt_token_count,
                    output_tokens_count: usage.candidates_token_count,
                    stop_reason: candidate.finish_reason.unwrap_or_default(),
                    model_used: body.model_version,
                })
            }
            status => {
                let message = response.text().unwrap_or_default();
                error!(provider = PROVIDER, status = %status, message = %message, "Chat request rejected");
                Err(ProviderError::Api {
                    provider: PROVIDER,
                    status,
                    message,
                })
            }
        }
    }
}

/// Runtime driving the embedding client's async transport.
#[derive(Debug)]
pub enum EmbeddingRuntime {
    /// The caller's runtime, captured while inside one.
    Shared(Handle),
    /// A dedicated runtime created by the loader when none was active.
    Owned(Runtime),
}

impl EmbeddingRuntime {
    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        match self {
            EmbeddingRuntime::Owned(runtime) => runtime.block_on(future),
            // block_in_place needs the multi-thread runtime flavour
            EmbeddingRuntime::Shared(handle) => {
                tokio::task::block_in_place(|| handle.block_on(future))
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GoogleEmbedContent {
    pub parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GoogleEmbedPayload {
    pub model: String,
    pub content: GoogleEmbedContent,
}

#[derive(Debug, Deserialize)]
struct GoogleEmbedResponseBody {
    embedding: Option<GoogleEmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct GoogleEmbeddingValues {
    #[serde(default)]
    values: Vec<f64>,
}

/// Client for the Google Generative AI embedContent API.
#[derive(Debug)]
pub struct GoogleEmbeddings {
    pub model_name: String,
    pub api_key: Option<String>,
    pub base_url: String,
    api_client: reqwest::Client,
    runtime: EmbeddingRuntime,
}

impl GoogleEmbeddings {
    pub fn new(
        model_name: String,
        api_key: Option<String>,
        runtime: EmbeddingRuntime,
    ) -> GoogleEmbeddings {
        let headers = prepare_google_headers(api_key.as_deref());
        let api_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .expect("Require valid parameters for building HTTP client");
        GoogleEmbeddings {
            model_name,
            api_key,
            base_url: GOOGLE_API_URL.to_string(),
            api_client,
            runtime,
        }
    }

    /// Embed a single text, returning the embedding vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f64>, ProviderError> {
        // the configured model name may or may not carry the models/ prefix
        let model_path = self
            .model_name
            .strip_prefix("models/")
            .unwrap_or(&self.model_name);
        let api_url = format!("{}/{}:embedContent", self.base_url, model_path);
        let payload = GoogleEmbedPayload {
            model: format!("models/{}", model_path),
            content: GoogleEmbedContent {
                parts: vec![GooglePart {
                    text: text.to_string(),
                }],
            },
        };

        let response = self
            .api_client
            .post(api_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "Error posting embedding request");
                ProviderError::Request {
                    provider: PROVIDER,
                    source: e,
                }
            })?;

        match response.status() {
            StatusCode::OK => {
                let body: GoogleEmbedResponseBody = response.json().await.map_err(|e| {
                    error!(provider = PROVIDER, error = %e, "Error decoding embedding response");
                    ProviderError::Request {
                        provider: PROVIDER,
                        source: e,
                    }
                })?;
                match body.embedding {
                    Some(embedding) if !embedding.values.is_empty() => Ok(embedding.values),
                    _ => Err(ProviderError::Empty { provider: PROVIDER }),
                }
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                error!(provider = PROVIDER, status = %status, message = %message, "Embedding request rejected");
                Err(ProviderError::Api {
                    provider: PROVIDER,
                    status,
                    message,
                })
            }
        }
    }

    /// Blocking convenience for synchronous callers; drives the runtime the
    /// loader resolved. Callers already inside a runtime should prefer
    /// [`GoogleEmbeddings::embed`].
    pub fn embed_query(&self, text: &str) -> Result<Vec<f64>, ProviderError> {
        self.runtime.block_on(self.embed(text))
    }
}
