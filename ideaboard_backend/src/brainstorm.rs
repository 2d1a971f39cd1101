use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::Idea;
use crate::config::AssistantConfig;
use crate::http_client::build_http_client_with_timeout;

const MAX_SUGGESTIONS: usize = 8;

/// Card suggestions from an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct BrainstormClient {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl BrainstormClient {
    pub fn new(api_url: String, api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            client: build_http_client_with_timeout(Some(Duration::from_secs(120)))?,
        })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        Self::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone().unwrap_or_default(),
            config.llm_model.clone(),
        )
    }

    /// Suggest new card texts for an idea, skipping ones already on the board.
    pub async fn brainstorm(&self, idea: &Idea, existing_cards: &[String]) -> Result<Vec<String>> {
        let existing = if existing_cards.is_empty() {
            "(none yet)".to_string()
        } else {
            existing_cards
                .iter()
                .map(|text| format!("- {}", text))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let messages = vec![
            Message {
                role: "system".to_string(),
                content: "You help break ideas into small, concrete tasks for a kanban board. \
                          Respond with a JSON array of short card texts and nothing else."
                    .to_string(),
            },
            Message {
                role: "user".to_string(),
                content: format!(
                    "Idea: {}\nSummary: {}\n\nCards already on the board:\n{}\n\n\
                     Suggest up to {} new cards that are not duplicates. \
                     Respond with JSON like [\"First task\", \"Second task\"].",
                    idea.title, idea.summary, existing, MAX_SUGGESTIONS
                ),
            },
        ];

        let response = self.generate(messages).await?;
        let suggestions: Vec<String> = parse_json(&response)?;

        let mut cards: Vec<String> = Vec::new();
        for text in suggestions {
            let text = text.trim().to_string();
            let duplicate = existing_cards
                .iter()
                .chain(cards.iter())
                .any(|other| other.trim().eq_ignore_ascii_case(&text));
            if !text.is_empty() && !duplicate {
                cards.push(text);
            }
        }
        cards.truncate(MAX_SUGGESTIONS);
        tracing::debug!("Brainstorm for '{}' produced {} cards", idea.title, cards.len());
        Ok(cards)
    }

    async fn generate(&self, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(1000),
        };

        let mut req = self.client.post(&url).json(&request);

        // Local models usually run without a key
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }
}

/// Parse model output as JSON, tolerating reasoning preambles, a ```json
/// fence, or prose around a bare array.
fn parse_json<T>(response: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if let Ok(parsed) = serde_json::from_str::<T>(response) {
        return Ok(parsed);
    }

    let cleaned = match response.rfind("</think>") {
        Some(think_end) => &response[think_end + 8..],
        None => response,
    };

    let json_content = if let Some(start) = cleaned.find("```json") {
        let after_start = &cleaned[start + 7..];
        match after_start.find("```") {
            Some(end) => after_start[..end].trim(),
            None => cleaned,
        }
    } else if let (Some(start), Some(end)) = (cleaned.find('['), cleaned.rfind(']')) {
        if start < end {
            &cleaned[start..=end]
        } else {
            cleaned
        }
    } else {
        cleaned
    };

    serde_json::from_str::<T>(json_content.trim()).context(format!(
        "Failed to parse JSON. Extracted: {} | Original: {}",
        json_content,
        response.chars().take(500).collect::<String>()
    ))
}
