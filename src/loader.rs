//! Loading of embedding models and chat LLMs from configuration.
//!
//! [`ModelLoader`] reads the YAML model configuration and, together with the
//! environment-based API keys held by [`ApiKeyManager`], constructs the
//! provider client selected by the `LLM_PROVIDER` environment variable.
//! Dispatch goes through a registry mapping provider names to constructor
//! functions, so adding a provider means adding a registry entry.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use config::{Config, File, FileFormat};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{AnveshakError, LoaderError, ProviderError};
use crate::providers::google::{EmbeddingRuntime, GoogleChat, GoogleEmbeddings};
use crate::providers::groq::GroqChat;
use crate::providers::openai::OpenAiChat;

pub const ENV_LLM_PROVIDER: &str = "LLM_PROVIDER";
pub const ENV_CONFIG_PATH: &str = "MODEL_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/model_config.yaml";
pub const DEFAULT_LLM_PROVIDER: &str = "openai";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 200;

const MANAGED_API_KEYS: [&str; 3] = ["OPENAI_API_KEY", "GOOGLE_API_KEY", "GROQ_API_KEY"];

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    1000
}

/// Embedding model section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
    pub model_name: String,
}

/// One provider block under the `llm` table of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    pub provider: String,
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

/// The whole model configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    pub embedding_model: EmbeddingSettings,
    pub llm: HashMap<String, LlmSettings>,
}

/// Everything a chat client constructor needs.
#[derive(Debug, Clone)]
pub struct ChatModelSettings {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub api_key: Option<String>,
}

/// The result of one text generation call, common to all providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub generated_text: String,
    pub input_tokens_count: u64,
    pub output_tokens_count: u64,
    pub stop_reason: String,
    pub model_used: String,
}

/// A loaded chat model, one variant per supported provider.
#[derive(Debug)]
pub enum ChatModel {
    OpenAi(OpenAiChat),
    Google(GoogleChat),
    Groq(GroqChat),
}

impl ChatModel {
    pub fn provider(&self) -> &'static str {
        match self {
            ChatModel::OpenAi(_) => "openai",
            ChatModel::Google(_) => "google",
            ChatModel::Groq(_) => "groq",
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            ChatModel::OpenAi(model) => &model.model_name,
            ChatModel::Google(model) => &model.model_name,
            ChatModel::Groq(model) => &model.model_name,
        }
    }

    /// Send a system context and a user prompt to the underlying provider.
    pub fn generate(
        &self,
        system_context: &str,
        prompt: &str,
    ) -> Result<ChatResponse, ProviderError> {
        match self {
            ChatModel::OpenAi(model) => model.generate(system_context, prompt),
            ChatModel::Google(model) => model.generate(system_context, prompt),
            ChatModel::Groq(model) => model.generate(system_context, prompt),
        }
    }
}

/// Loads and manages all environment-based API keys.
pub struct ApiKeyManager {
    api_keys: HashMap<String, Option<String>>,
}

impl ApiKeyManager {
    /// Read the managed keys from the process environment, after loading a
    /// `.env` file when one exists. Logs which keys are present without
    /// revealing their values.
    pub fn new() -> ApiKeyManager {
        dotenvy::dotenv().ok();

        info!("Initializing API key manager");
        let mut api_keys = HashMap::new();
        for key in MANAGED_API_KEYS {
            let value = env::var(key).ok();
            match value {
                Some(_) => info!(key = key, "Loaded API key"),
                None => warn!(key = key, "No API key found"),
            }
            api_keys.insert(key.to_string(), value);
        }
        ApiKeyManager { api_keys }
    }

    /// Retrieve an API key by name, case-insensitively.
    pub fn get(&self, key: &str) -> Option<String> {
        self.api_keys
            .get(key.to_uppercase().as_str())
            .and_then(|value| value.clone())
    }
}

impl Default for ApiKeyManager {
    fn default() -> Self {
        ApiKeyManager::new()
    }
}

struct ProviderRegistration {
    credential: &'static str,
    build: fn(ChatModelSettings) -> ChatModel,
}

fn build_openai(settings: ChatModelSettings) -> ChatModel {
    ChatModel::OpenAi(OpenAiChat::new(settings))
}

fn build_google(settings: ChatModelSettings) -> ChatModel {
    ChatModel::Google(GoogleChat::new(settings))
}

fn build_groq(settings: ChatModelSettings) -> ChatModel {
    ChatModel::Groq(GroqChat::new(settings))
}

fn provider_registry() -> HashMap<&'static str, ProviderRegistration> {
    HashMap::from([
        (
            "openai",
            ProviderRegistration {
                credential: "OPENAI_API_KEY",
                build: build_openai,
            },
        ),
        (
            "google",
            ProviderRegistration {
                credential: "GOOGLE_API_KEY",
                build: build_google,
            },
        ),
        (
            "groq",
            ProviderRegistration {
                credential: "GROQ_API_KEY",
                build: build_groq,
            },
        ),
    ])
}

/// Loads embedding models and LLMs based on the YAML configuration and
/// environment settings.
pub struct ModelLoader {
    api_key_manager: ApiKeyManager,
    settings: ModelSettings,
    registry: HashMap<&'static str, ProviderRegistration>,
}

impl ModelLoader {
    /// Build a loader from the configuration file named by
    /// `MODEL_CONFIG_PATH` (default `config/model_config.yaml`).
    pub fn new() -> Result<ModelLoader, AnveshakError> {
        let config_path =
            env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let app_config = Config::builder()
            .add_source(File::new(&config_path, FileFormat::Yaml))
            .build()
            .map_err(|e| {
                error!(path = %config_path, error = %e, "Error initializing ModelLoader");
                AnveshakError::wrap(format!("Failed to initialize ModelLoader: {e}"), &e)
            })?;
        ModelLoader::with_config(&app_config)
    }

    /// Build a loader from an already assembled configuration.
    pub fn with_config(app_config: &Config) -> Result<ModelLoader, AnveshakError> {
        let api_key_manager = ApiKeyManager::new();
        let settings = parse_settings(app_config).map_err(|e| {
            error!(error = %e, "Error initializing ModelLoader");
            AnveshakError::wrap(format!("Failed to initialize ModelLoader: {e}"), &e)
        })?;
        let config_keys: Vec<&String> = settings.llm.keys().collect();
        info!(config_keys = ?config_keys, "Model configuration loaded successfully");

        Ok(ModelLoader {
            api_key_manager,
            settings,
            registry: provider_registry(),
        })
    }

    /// Load and return a Google Generative AI embedding model client.
    pub fn load_embeddings(&self) -> Result<GoogleEmbeddings, AnveshakError> {
        let model_name = self.settings.embedding_model.model_name.clone();
        self.load_embeddings_inner(&model_name).map_err(|e| {
            error!(model_name = %model_name, error = %e, "Error loading embedding model");
            AnveshakError::wrap(format!("Failed to load embedding model {model_name}: {e}"), &e)
        })
    }

    fn load_embeddings_inner(&self, model_name: &str) -> Result<GoogleEmbeddings, LoaderError> {
        info!(model_name = %model_name, "Loading embedding model");

        // The embedding transport needs a live tokio runtime; reuse the
        // caller's when inside one, otherwise start a dedicated runtime.
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => EmbeddingRuntime::Shared(handle),
            Err(_) => EmbeddingRuntime::Owned(tokio::runtime::Runtime::new()?),
        };

        let embeddings = GoogleEmbeddings::new(
            model_name.to_string(),
            self.api_key_manager.get("GOOGLE_API_KEY"),
            runtime,
        );

        info!(model_name = %model_name, "Embedding model loaded successfully");
        Ok(embeddings)
    }

    /// Load and return a chat LLM client according to the configured
    /// provider.
    ///
    /// The provider block is selected by the `LLM_PROVIDER` environment
    /// variable (default `openai`, case-insensitive).
    pub fn load_llm(&self) -> Result<ChatModel, AnveshakError> {
        self.load_llm_inner().map_err(|e| {
            error!(error = %e, "Error loading LLM");
            AnveshakError::wrap(format!("Failed to load LLM: {e}"), &e)
        })
    }

    fn load_llm_inner(&self) -> Result<ChatModel, LoaderError> {
        let provider_key = env::var(ENV_LLM_PROVIDER)
            .unwrap_or_else(|_| DEFAULT_LLM_PROVIDER.to_string())
            .to_uppercase();

        let llm_settings = self.settings.llm.get(&provider_key).ok_or_else(|| {
            error!(provider = %provider_key, "LLM provider not found in configuration");
            LoaderError::ProviderNotConfigured(provider_key.clone())
        })?;

        let registration = self
            .registry
            .get(llm_settings.provider.as_str())
            .ok_or_else(|| {
                error!(provider = %llm_settings.provider, "Unsupported LLM provider");
                LoaderError::UnsupportedProvider(llm_settings.provider.clone())
            })?;

        info!(
            provider = %llm_settings.provider,
            model_name = %llm_settings.model_name,
            temperature = %llm_settings.temperature,
            max_tokens = %llm_settings.max_tokens,
            "Loading LLM"
        );

        let model = (registration.build)(ChatModelSettings {
            model_name: llm_settings.model_name.clone(),
            temperature: llm_settings.temperature,
            max_tokens: llm_settings.max_tokens,
            api_key: self.api_key_manager.get(registration.credential),
        });

        info!(model_name = %llm_settings.model_name, "LLM loaded successfully");
        Ok(model)
    }

    pub fn api_keys(&self) -> &ApiKeyManager {
        &self.api_key_manager
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }
}

fn parse_settings(app_config: &Config) -> Result<ModelSettings, LoaderError> {
    let mut settings: ModelSettings = app_config.clone().try_deserialize()?;
    // the config crate folds keys to lower case; the llm table is keyed by
    // upper-cased LLM_PROVIDER values
    settings.llm = settings
        .llm
        .into_iter()
        .map(|(key, value)| (key.to_uppercase(), value))
        .collect();
    Ok(settings)
}

/// Build the blocking HTTP client shared by the chat provider clients.
pub fn build_llm_api_client(
    connect_timeout: u64,
    fetch_timeout: u64,
    proxy_url: Option<String>,
    custom_headers: Option<HeaderMap>,
) -> reqwest::blocking::Client {
    let pool_idle_timeout = (connect_timeout + fetch_timeout) * 5;

    let mut headers = custom_headers.unwrap_or_default();
    headers.insert(
        reqwest::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    let client_builder = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(fetch_timeout))
        .connect_timeout(Duration::from_secs(connect_timeout))
        .default_headers(headers)
        .gzip(true)
        .pool_idle_timeout(Duration::from_secs(pool_idle_timeout))
        .pool_max_idle_per_host(1);

    if let Some(proxy_url) = proxy_url {
        match reqwest::Proxy::https(proxy_url.as_str()) {
            Ok(proxy) => {
                return client_builder
                    .proxy(proxy)
                    .build()
                    .expect("Require valid parameters for building HTTP client");
            }
            Err(e) => {
                error!(error = %e, "Unable to use proxy, error when setting the proxy server");
            }
        }
    }
    client_builder
        .build()
        .expect("Require valid parameters for building HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // tests below mutate process environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const SAMPLE_CONFIG: &str = r#"
embedding_model:
  model_name: models/text-embedding-004
llm:
  OPENAI:
    provider: openai
    model_name: gpt-4o-mini
    temperature: 0.2
  GROQ:
    provider: groq
    model_name: llama-3.3-70b-versatile
    temperature: 0.1
    max_tokens: 2048
"#;

    const UNSUPPORTED_CONFIG: &str = r#"
embedding_model:
  model_name: models/text-embedding-004
llm:
  OPENAI:
    provider: unknown-co
    model_name: mystery-1
"#;

    fn test_config(yaml: &str) -> Config {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
    }

    #[test]
    fn api_key_lookup_is_case_insensitive() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("GOOGLE_API_KEY", "g-test-key");

        let manager = ApiKeyManager::new();
        assert_eq!(manager.get("google_api_key"), manager.get("GOOGLE_API_KEY"));
        assert_eq!(manager.get("google_api_key"), Some("g-test-key".to_string()));

        env::remove_var("GOOGLE_API_KEY");
    }

    #[test]
    fn missing_api_key_is_not_an_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::remove_var("GROQ_API_KEY");

        let manager = ApiKeyManager::new();
        assert_eq!(manager.get("GROQ_API_KEY"), None);
    }

    #[test]
    fn load_llm_defaults_to_the_openai_block() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::remove_var("LLM_PROVIDER");
        env::set_var("OPENAI_API_KEY", "sk-test");

        let loader = ModelLoader::with_config(&test_config(SAMPLE_CONFIG)).unwrap();
        let model = loader.load_llm().unwrap();
        match model {
            ChatModel::OpenAi(chat) => {
                assert_eq!(chat.model_name, "gpt-4o-mini");
                assert_eq!(chat.temperature, 0.2);
                assert_eq!(chat.max_tokens, 1000);
                assert_eq!(chat.api_key.as_deref(), Some("sk-test"));
            }
            other => panic!("expected the OpenAI client, got {other:?}"),
        }

        env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn load_llm_honours_the_llm_provider_variable() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("LLM_PROVIDER", "groq");

        let loader = ModelLoader::with_config(&test_config(SAMPLE_CONFIG)).unwrap();
        let model = loader.load_llm().unwrap();
        assert_eq!(model.provider(), "groq");
        assert_eq!(model.model_name(), "llama-3.3-70b-versatile");

        env::remove_var("LLM_PROVIDER");
    }

    #[test]
    fn unconfigured_provider_key_is_reported_with_its_name() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("LLM_PROVIDER", "azure");

        let loader = ModelLoader::with_config(&test_config(SAMPLE_CONFIG)).unwrap();
        let err = loader.load_llm().unwrap_err();
        assert!(err.message().contains("AZURE"));
        assert!(err.message().contains("not found in configuration"));

        env::remove_var("LLM_PROVIDER");
    }

    #[test]
    fn unsupported_provider_is_a_distinct_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::remove_var("LLM_PROVIDER");

        let loader = ModelLoader::with_config(&test_config(UNSUPPORTED_CONFIG)).unwrap();
        let err = loader.load_llm().unwrap_err();
        assert!(err.message().contains("Unsupported LLM provider unknown-co"));
        assert!(!err.message().contains("not found in configuration"));
    }

    #[test]
    fn load_embeddings_starts_a_dedicated_runtime_outside_async() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("GOOGLE_API_KEY", "g-test-key");

        let loader = ModelLoader::with_config(&test_config(SAMPLE_CONFIG)).unwrap();
        let embeddings = loader.load_embeddings().unwrap();
        assert_eq!(embeddings.model_name, "models/text-embedding-004");
        assert_eq!(embeddings.api_key.as_deref(), Some("g-test-key"));

        env::remove_var("GOOGLE_API_KEY");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_embeddings_reuses_the_callers_runtime() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let loader = ModelLoader::with_config(&test_config(SAMPLE_CONFIG)).unwrap();
        let embeddings = loader.load_embeddings().unwrap();
        assert_eq!(embeddings.model_name, "models/text-embedding-004");
    }
}
