//! LLM-backed abbreviation of rendered passages.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const MESSAGES_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const SUMMARY_MAX_TOKENS: usize = 512;

/// Anthropic messages-API client that condenses rendered passages down to
/// the sentences relevant to a query.
///
/// Used by the HTTP layer when summarisation is enabled; the retrieval core
/// never sees it.
pub struct Summarizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl Summarizer {
    /// Builds a new summariser client.
    pub fn new(api_key: String, model: String) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Anthropic API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing summarisation model");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    /// Condenses one rendered passage, keeping facts relevant to `query`.
    pub async fn summarize(
        &self,
        cancel: &CancellationToken,
        query: &str,
        rendered: &str,
    ) -> Result<String> {
        let prompt = format!(
            "Condense the retrieved passage below to the sentences that answer \
             the question. Keep the title and source lines untouched.\n\n\
             Question: {query}\n\nPassage:\n{rendered}"
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.trim()).context("invalid Anthropic API key")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: SUMMARY_MAX_TOKENS,
            temperature: 0.0,
            messages: vec![Message {
                role: "user",
                content: vec![ContentBlock {
                    kind: "text",
                    text: &prompt,
                }],
            }],
        };

        let send = self
            .client
            .post(MESSAGES_ENDPOINT)
            .headers(headers)
            .json(&body)
            .send();
        let resp = tokio::select! {
            res = send => res.context("failed to call Anthropic messages API")?,
            _ = cancel.cancelled() => bail!("summarisation cancelled"),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Anthropic returned {status}: {text}");
        }
        let parsed: MessagesResponse = resp
            .json()
            .await
            .context("failed to parse Anthropic response")?;
        let summary = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if summary.is_empty() {
            bail!("Anthropic response missing text content");
        }
        Ok(summary)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
struct ContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
