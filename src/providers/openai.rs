//! Client for OpenAI's chat completions API.
//!
//! The payload and response handling here are shared with the Groq client,
//! which speaks the same wire format on a different base URL.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::ProviderError;
use crate::loader::{
    build_llm_api_client, ChatModelSettings, ChatResponse, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_FETCH_TIMEOUT_SECS,
};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

const PROVIDER: &str = "openai";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Request payload of the format:
//      {
//        "model": "gpt-4o-mini",
//        "messages": [{"role": "user", "content": "Say this is a test!"}],
//        "temperature": 0.7
//      }
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenAiRequestPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_completion_tokens: usize,
}

impl OpenAiRequestPayload {
    pub fn new(
        model_name: &str,
        temperature: f32,
        max_tokens: usize,
        system_context: &str,
        prompt: &str,
    ) -> OpenAiRequestPayload {
        OpenAiRequestPayload {
            model: model_name.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_context.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature,
            max_completion_tokens: max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: String,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Authorization header for the bearer-token APIs. Without a key no
/// Authorization header is sent and the service rejects the request
/// downstream.
pub fn prepare_bearer_headers(api_key: Option<&str>) -> HeaderMap {
    let mut custom_headers = HeaderMap::new();
    if let Some(api_key) = api_key {
        // set header "Authorization: Bearer $API_KEY"
        let bearer = format!("Bearer {}", api_key);
        if let Ok(mut header_val) = HeaderValue::from_str(bearer.as_str()) {
            header_val.set_sensitive(true);
            custom_headers.insert(reqwest::header::AUTHORIZATION, header_val);
        }
    }
    custom_headers
}

/// Posts the json payload to an OpenAI-compatible chat completions endpoint
/// and extracts the generated text, token usage and stop reason.
pub(crate) fn post_chat_completions(
    provider: &'static str,
    client: &Client,
    api_url: &str,
    payload: &OpenAiRequestPayload,
) -> Result<ChatResponse, ProviderError> {
    let response = client.post(api_url).json(payload).send().map_err(|e| {
        error!(provider = provider, error = %e, "Error posting chat request");
        ProviderError::Request {
            provider,
            source: e,
        }
    })?;

    match response.status() {
        StatusCode::OK => {
            let body: ChatCompletionResponse = response.json().map_err(|e| {
                error!(provider = provider, error = %e, "Error decoding chat response");
                ProviderError::Request {
                    provider,
                    source: e,
                }
            })?;
            debug!(provider = provider, model = %body.model, "Chat response received");

            let choice = body
                .choices
                .into_iter()
                .next()
                .ok_or(ProviderError::Empty { provider })?;
            let usage = body.usage.unwrap_or_default();
            Ok(ChatResponse {
                generated_text: choice.message.content,
                input_tokens_count: usage.prompt_tokens,
                output_tokens_count: usage.completion_tokens,
                stop_reason: choice.finish_reason.unwrap_or_default(),
                model_used: body.model,
            })
        }
        status => {
            let message = response.text().unwrap_or_default();
            error!(provider = provider, status = %status, message = %message, "Chat request rejected");
            Err(ProviderError::Api {
                provider,
                status,
                message,
            })
        }
    }
}

/// Client for OpenAI's chat completions API.
#[derive(Debug)]
pub struct OpenAiChat {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub api_key: Option<String>,
    pub base_url: String,
    pub api_client: Client,
}

impl OpenAiChat {
    pub fn new(settings: ChatModelSettings) -> OpenAiChat {
        let headers = prepare_bearer_headers(settings.api_key.as_deref());
        let api_client = build_llm_api_client(
            DEFAULT_CONNECT_TIMEOUT_SECS,
            DEFAULT_FETCH_TIMEOUT_SECS,
            None,
            Some(headers),
        );
        OpenAiChat {
            model_name: settings.model_name,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            api_key: settings.api_key,
            base_url: OPENAI_API_URL.to_string(),
            api_client,
        }
    }

    /// Send a system context and a user prompt, returning the generated
    /// text with usage counts.
    pub fn generate(
        &self,
        system_context: &str,
        prompt: &str,
    ) -> Result<ChatResponse, ProviderError> {
        let payload = OpenAiRequestPayload::new(
            &self.model_name,
            self.temperature,
            self.max_tokens,
            system_context,
            prompt,
        );
        post_chat_completions(PROVIDER, &self.api_client, &self.base_url, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(model: &str) -> ChatModelSettings {
        ChatModelSettings {
            model_name: model.to_string(),
            temperature: 0.2,
            max_tokens: 256,
            api_key: Some("sk-test".to_string()),
        }
    }

    #[test]
    fn generate_parses_a_chat_completion() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{"message": {"role": "assistant", "content": "A test reply"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 4}
            }"#,
            )
            .create();

        let mut chat = OpenAiChat::new(settings("gpt-4o-mini"));
        chat.base_url = format!("{}/v1/chat/completions", server.url());

        let response = chat.generate("You are concise.", "Say hi").unwrap();
        assert_eq!(response.generated_text, "A test reply");
        assert_eq!(response.input_tokens_count, 12);
        assert_eq!(response.output_tokens_count, 4);
        assert_eq!(response.stop_reason, "stop");
        assert_eq!(response.model_used, "gpt-4o-mini-2024-07-18");
        mock.assert();
    }

    #[test]
    fn generate_surfaces_api_errors() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create();

        let mut chat = OpenAiChat::new(settings("gpt-4o-mini"));
        chat.base_url = format!("{}/v1/chat/completions", server.url());

        let err = chat.generate("", "Say hi").unwrap_err();
        match err {
            ProviderError::Api {
                provider,
                status,
                message,
            } => {
                assert_eq!(provider, "openai");
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(message, "rate limited");
            }
            other => panic!("expected an API error, got {other:?}"),
        }
    }

    #[test]
    fn empty_choices_are_reported() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"model": "gpt-4o-mini", "choices": []}"#)
            .create();

        let mut chat = OpenAiChat::new(settings("gpt-4o-mini"));
        chat.base_url = format!("{}/v1/chat/completions", server.url());

        let err = chat.generate("", "Say hi").unwrap_err();
        assert!(matches!(err, ProviderError::Empty { provider: "openai" }));
    }
}
