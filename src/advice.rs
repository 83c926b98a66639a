use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::constants;

pub const COULD_NOT_CONNECT_MESSAGE: &str = "Sorry, I couldn't connect to the advice service right now. Please try again in a little while.";
pub const TROUBLE_PROCESSING_MESSAGE: &str = "Sorry, I had trouble processing the advice. If this is weighing on you, please contact a professional career counsellor.";

const PERSONA_PREAMBLE: &str = "You are Compass, a calm and practical career advisor who helps people \
understand how artificial intelligence may affect their work. Be encouraging but honest, \
ground your advice in current, verifiable information, and finish with a short list of \
concrete next steps. Keep the whole answer under 250 words.";

#[derive(Debug, Error)]
pub enum AdviceError {
    #[error("request to advice endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("advice endpoint returned status {0}")]
    Status(u16),
    #[error("advice endpoint response had no text")]
    Malformed,
}

impl AdviceError {
    /// The bot message shown in place of the advice.
    pub fn fallback_message(&self) -> &'static str {
        match self {
            AdviceError::Transport(_) | AdviceError::Status(_) => COULD_NOT_CONNECT_MESSAGE,
            AdviceError::Malformed => TROUBLE_PROCESSING_MESSAGE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    /// Base URL of the generative language API, without a trailing slash.
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// None leaves timeouts to the transport.
    pub request_timeout: Option<Duration>,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        let api_key = constants::GEMINI_API_KEY.clone();
        Self {
            api_url: constants::GEMINI_API_URL.clone(),
            model: constants::GEMINI_MODEL.clone(),
            api_key: (!api_key.is_empty()).then_some(api_key),
            request_timeout: None,
        }
    }
}

impl AdvisorConfig {
    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_url.trim_end_matches('/'),
            self.model
        )
    }
}

// Structures matching the generateContent request and response bodies
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub google_search: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub tools: Vec<Tool>,
    pub system_instruction: Content,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

/// The user-facing query: every answer, in order, comma separated.
pub fn build_query(answers: &[String]) -> String {
    answers.join(", ")
}

/// Persona preamble followed by the numbered answers.
pub fn build_instruction(answers: &[String]) -> String {
    let answer_list = answers
        .iter()
        .enumerate()
        .map(|(i, answer)| format!("{}. {}", i + 1, answer))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{}\n\nThe user answered our questionnaire as follows:\n{}",
        PERSONA_PREAMBLE, answer_list
    )
}

pub fn build_request(answers: &[String]) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: build_query(answers),
            }],
        }],
        tools: vec![Tool {
            google_search: serde_json::json!({}),
        }],
        system_instruction: Content {
            parts: vec![Part {
                text: build_instruction(answers),
            }],
        },
    }
}

/// Pulls the first candidate's first text part out of a response body.
fn extract_text(body: &str) -> Option<String> {
    let response: GenerateResponse = serde_json::from_str(body).ok()?;
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .next()?
        .text
}

/// Issues exactly one advice request per call. Clones share the underlying
/// connection pool.
#[derive(Debug, Clone)]
pub struct AdviceClient {
    client: Client,
    config: AdvisorConfig,
}

impl AdviceClient {
    pub fn new(config: AdvisorConfig) -> Result<Self, AdviceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    #[instrument(skip(self, answers), fields(answers = answers.len()))]
    pub async fn fetch_advice(&self, answers: &[String]) -> Result<String, AdviceError> {
        let endpoint = self.config.endpoint();
        let payload = build_request(answers);
        debug!(query = %payload.contents[0].parts[0].text, "Constructed advice request");

        let mut request = self.client.post(&endpoint).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            error!(%endpoint, error = %e, "Advice request failed");
            AdviceError::Transport(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Advice endpoint returned an error");
            return Err(AdviceError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        match extract_text(&body) {
            Some(text) => {
                info!(chars = text.len(), "Received advice");
                Ok(text)
            }
            None => {
                warn!(%body, "Advice response missing candidate text");
                Err(AdviceError::Malformed)
            }
        }
    }
}
