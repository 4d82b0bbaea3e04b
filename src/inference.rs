//! Inference service client
//!
//! Queries a local Ollama-style `/api/generate` endpoint. Failures never reach
//! the caller as errors: they degrade to a fixed apology that is still spoken.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::history::ConversationTurn;
use crate::{Error, Result};

/// Upper bound on one inference request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stored turns included ahead of a new utterance (up to 5 pairs)
pub const CONTEXT_TURNS: usize = 10;

/// Reply when the endpoint cannot be reached
pub const CONNECT_FALLBACK: &str = "I'm sorry, I cannot connect to the language model server.";

/// Reply for any other failure
pub const ERROR_FALLBACK: &str = "I'm sorry, I encountered an error processing your request.";

/// Text to speak for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceReply {
    pub text: String,
    /// True when `text` is a fallback apology rather than a model answer
    pub degraded: bool,
}

impl InferenceReply {
    #[must_use]
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            degraded: false,
        }
    }

    #[must_use]
    pub fn fallback(text: &str) -> Self {
        Self {
            text: text.to_string(),
            degraded: true,
        }
    }
}

/// Sends prompts to the language model
#[async_trait(?Send)]
pub trait InferenceClient {
    /// Query the model; never fails, degrading to a fallback reply instead
    async fn query(&self, prompt: &str) -> InferenceReply;

    /// Pick up endpoint or model changes
    fn update_config(&mut self, config: &RuntimeConfig);
}

/// Build a prompt from recent turns followed by the new utterance
///
/// ```
/// use jasper::inference::build_prompt;
///
/// let prompt = build_prompt([], "jasper what time is it");
/// assert_eq!(prompt, "user: jasper what time is it\nassistant:");
/// ```
pub fn build_prompt<'a>(
    context: impl IntoIterator<Item = &'a ConversationTurn>,
    utterance: &str,
) -> String {
    let mut prompt = String::new();
    for turn in context {
        prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }
    prompt.push_str(&format!("user: {utterance}\nassistant:"));
    prompt
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for an Ollama-compatible generate endpoint
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Create a client for the endpoint and model in `config`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.inference_url(),
            model: config.model.clone(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!("{status}: {body}")));
        }

        let result: GenerateResponse = response.json().await?;
        Ok(result.response.trim().to_string())
    }
}

#[async_trait(?Send)]
impl InferenceClient for OllamaClient {
    async fn query(&self, prompt: &str) -> InferenceReply {
        tracing::info!(model = %self.model, url = %self.base_url, "querying inference service");

        match self.generate(prompt).await {
            Ok(answer) => {
                tracing::info!(response = %answer, "inference response");
                InferenceReply::answer(answer)
            }
            Err(Error::Http(e)) if e.is_connect() => {
                tracing::error!(url = %self.base_url, error = %e, "cannot connect to inference service");
                InferenceReply::fallback(CONNECT_FALLBACK)
            }
            Err(e) => {
                tracing::error!(error = %e, "inference query failed");
                InferenceReply::fallback(ERROR_FALLBACK)
            }
        }
    }

    fn update_config(&mut self, config: &RuntimeConfig) {
        let base_url = config.inference_url();
        if base_url != self.base_url || config.model != self.model {
            tracing::info!(url = %base_url, model = %config.model, "inference settings updated");
        }
        self.base_url = base_url;
        self.model.clone_from(&config.model);
    }
}
