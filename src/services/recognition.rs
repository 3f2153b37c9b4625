use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::core::config::Settings;

/// Vision model that extracts the requested fields from a document image.
#[async_trait]
pub(crate) trait Recognizer: Send + Sync {
    async fn recognize(
        &self,
        image: &[u8],
        schema: &[String],
    ) -> Result<Map<String, Value>>;
}

#[derive(Debug, Clone)]
pub(crate) struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ChatMessage,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.ollama().request_timeout_seconds);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.ollama().host.trim_end_matches('/').to_string(),
            model: settings.ollama().model.clone(),
        })
    }

    pub(crate) async fn check_health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .context("Failed to connect to Ollama")?;

        if !response.status().is_success() {
            bail!("Ollama health check failed with status {}", response.status());
        }

        Ok(())
    }
}

#[async_trait]
impl Recognizer for OllamaClient {
    async fn recognize(
        &self,
        image: &[u8],
        schema: &[String],
    ) -> Result<Map<String, Value>> {
        let prompt = build_prompt(schema);
        let image_base64 = BASE64.encode(image);

        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": prompt,
                "images": [image_base64],
            }],
            "stream": false,
            "format": "json",
            "options": {
                "temperature": 0.1,
                "num_predict": 2048,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama returned status {status}: {body}");
        }

        let chat: ChatResponse =
            response.json().await.context("Failed to decode Ollama response")?;

        if let Some(error) = chat.error {
            bail!("Ollama error: {error}");
        }

        parse_response(&chat.message.content, schema)
    }
}

fn build_prompt(schema: &[String]) -> String {
    let fields_json = serde_json::to_string(schema).unwrap_or_default();

    format!(
        r#"You are a document recognition assistant. Analyze the provided document image and extract the requested information.

TASK: Extract the following fields from the document:
{fields_json}

INSTRUCTIONS:
1. Carefully analyze the document image
2. Extract values for each requested field
3. If a field is not found or not applicable, use null
4. For dates, use ISO 8601 format (YYYY-MM-DD)
5. For monetary amounts, extract the numeric value only
6. Return ONLY valid JSON, no additional text

RESPONSE FORMAT:
Return a JSON object with the requested fields as keys and extracted values.

Example for fields ["invoice_number", "date", "total_amount"]:
{{"invoice_number": "INV-2024-001", "date": "2024-01-15", "total_amount": 1500.00}}

Now analyze the document and extract: {}"#,
        schema.join(", ")
    )
}

/// Pulls a JSON object out of the model output. Tolerates markdown fences and
/// surrounding prose, and backfills missing schema fields with null so the
/// result always carries every requested key.
fn parse_response(response: &str, schema: &[String]) -> Result<Map<String, Value>> {
    let mut cleaned = response.trim();
    cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    let cleaned = cleaned.trim();

    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) if start <= end => (start, end),
        _ => return Err(anyhow!("no valid JSON found in response")),
    };

    let mut result: Map<String, Value> = serde_json::from_str(&cleaned[start..=end])
        .context("Failed to parse JSON from model response")?;

    for field in schema {
        result.entry(field.clone()).or_insert(Value::Null);
    }

    Ok(result)
}
