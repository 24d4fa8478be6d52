//! Client for Groq's chat completions API.
//!
//! Groq exposes the OpenAI wire format under its own base URL, so the
//! payload preparation and response handling are shared with the OpenAI
//! client.

use reqwest::blocking::Client;

use crate::error::ProviderError;
use crate::loader::{
    build_llm_api_client, ChatModelSettings, ChatResponse, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_FETCH_TIMEOUT_SECS,
};
use crate::providers::openai::{post_chat_completions, prepare_bearer_headers, OpenAiRequestPayload};

pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

const PROVIDER: &str = "groq";

/// Client for Groq's OpenAI-compatible chat completions API.
#[derive(Debug)]
pub struct GroqChat {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub api_key: Option<String>,
    pub base_url: String,
    pub api_client: Client,
}

impl GroqChat {
    pub fn new(settings: ChatModelSettings) -> GroqChat {
        let headers = prepare_bearer_headers(settings.api_key.as_deref());
        let api_client = build_llm_api_client(
            DEFAULT_CONNECT_TIMEOUT_SECS,
            DEFAULT_FETCH_TIMEOUT_SECS,
            None,
            Some(headers),
        );
        GroqChat {
            model_name: settings.model_name,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            api_key: settings.api_key,
            base_url: GROQ_API_URL.to_string(),
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

    #[test]
    fn generate_uses_the_openai_wire_format() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/openai/v1/chat/completions")
            .match_header("authorization", "Bearer gsk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                "model": "llama-3.3-70b-versatile",
                "choices": [{"message": {"role": "assistant", "content": "Fast reply"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 2}
            }"#,
            )
            .create();

        let mut chat = GroqChat::new(ChatModelSettings {
            model_name: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.1,
            max_tokens: 1024,
            api_key: Some("gsk-test".to_string()),
        });
        chat.base_url = format!("{}/openai/v1/chat/completions", server.url());

        let response = chat.generate("", "Say hi").unwrap();
        assert_eq!(response.generated_text, "Fast reply");
        assert_eq!(response.input_tokens_count, 9);
        assert_eq!(response.output_tokens_count, 2);
        assert_eq!(response.model_used, "llama-3.3-70b-versatile");
        mock.assert();
    }
}
