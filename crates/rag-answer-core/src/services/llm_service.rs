use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::{GeneratedAnswer, GenerationRequest, KnowledgeMatch};
use crate::services::collaborators::AnswerGeneration;
use crate::utils::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// OpenAI-compatible chat completion client used as the answer generator.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    /// Generate completion without streaming (wait for full response)
    pub async fn generate_chat(&self, messages: Vec<ChatMessage>) -> CoreResult<String> {
        debug!("Starting chat generation with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::Generation(format!("Failed to call LLM API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Generation(format!("LLM API error: {} - {}", status, body)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CoreError::Generation("No answer returned from LLM".to_string()))
    }

    fn build_messages(&self, request: &GenerationRequest) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::new("system", self.config.system_prompt.clone())];

        let provisions = request
            .matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                format!(
                    "[Provision {}]\nCitation: {}\nTopic: {}\nStatus: {:?}\nText: {}\n",
                    i + 1,
                    m.citation,
                    m.topic.as_deref().unwrap_or("Unknown"),
                    m.status,
                    m.excerpt
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        messages.push(ChatMessage::new(
            "system",
            format!("Answer only from these provisions and cite them:\n\n{}", provisions),
        ));

        for turn in &request.history {
            messages.push(ChatMessage::new("user", turn.question.clone()));
            messages.push(ChatMessage::new("assistant", turn.answer.clone()));
        }

        messages.push(ChatMessage::new("user", request.question.clone()));
        messages
    }
}

/// Provisions the answer text cites; all of them when none is named.
fn cited_matches(text: &str, matches: &[KnowledgeMatch]) -> Vec<KnowledgeMatch> {
    let lower = text.to_lowercase();
    let cited: Vec<KnowledgeMatch> = matches
        .iter()
        .filter(|m| !m.citation.is_empty() && lower.contains(&m.citation.to_lowercase()))
        .cloned()
        .collect();

    if cited.is_empty() {
        matches.to_vec()
    } else {
        cited
    }
}

#[async_trait]
impl AnswerGeneration for LlmService {
    async fn generate(&self, request: GenerationRequest) -> CoreResult<GeneratedAnswer> {
        let messages = self.build_messages(&request);
        let text = self.generate_chat(messages).await?;
        let matches_used = cited_matches(&text, &request.matches);

        debug!(
            "Generated {} chars citing {}/{} provisions",
            text.len(),
            matches_used.len(),
            request.matches.len()
        );
        Ok(GeneratedAnswer { text, matches_used })
    }
}
