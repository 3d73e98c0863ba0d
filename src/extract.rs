//! Free-text order extraction through a chat-completions API.
//!
//! The model is asked for `{"orders": [{<column>: <value>, ...}]}` using the
//! deployment's fixed column names; the reply is turned into records in the
//! configured layout.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::record::{FieldLookup, KeyedRecord, OrderRecord, RecordLayout};

pub const DEFAULT_CHAT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[async_trait]
pub trait OrderExtractor: Send + Sync + 'static {
    /// Turns free text into order records over the `fixed` columns.
    async fn extract(
        &self,
        text: &str,
        fixed: &[String],
        layout: RecordLayout,
    ) -> Result<Vec<OrderRecord>>;
}

/// Used when no extractor is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledExtractor;

#[async_trait]
impl OrderExtractor for DisabledExtractor {
    async fn extract(&self, _: &str, _: &[String], _: RecordLayout) -> Result<Vec<OrderRecord>> {
        Err(Error::Extraction(
            "free-text extraction is not configured".into(),
        ))
    }
}

#[derive(Clone)]
pub struct ChatExtractor {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatExtractor {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

fn instructions(fixed: &[String]) -> String {
    format!(
        "Extract every order in the user's message. Reply with JSON only, shaped as \
         {{\"orders\": [{{...}}]}}. Use exactly these keys for each order: {}. \
         Use an empty string for anything not mentioned. Do not invent values.",
        serde_json::to_string(fixed).unwrap_or_default()
    )
}

#[async_trait]
impl OrderExtractor for ChatExtractor {
    async fn extract(
        &self,
        text: &str,
        fixed: &[String],
        layout: RecordLayout,
    ) -> Result<Vec<OrderRecord>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("free text is empty".into()));
        }
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": instructions(fixed) },
                { "role": "user", "content": text },
            ],
        });

        let reply: Value = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Extraction(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Extraction(e.to_string()))?;

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::Extraction("reply has no message content".into()))?;
        debug!("extractor replied with {} byte(s)", content.len());
        parse_extraction(content, fixed, layout)
    }
}

/// Parses the model's reply into records.
///
/// Accepts `{"orders": [...]}`, a bare array, or a single object, with or
/// without a surrounding Markdown code fence.
pub fn parse_extraction(
    content: &str,
    fixed: &[String],
    layout: RecordLayout,
) -> Result<Vec<OrderRecord>> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    let value: Value = serde_json::from_str(unfenced.trim())
        .map_err(|e| Error::Extraction(format!("reply is not JSON: {e}")))?;
    let orders = match value {
        Value::Object(mut map) if map.contains_key("orders") => {
            map.remove("orders").unwrap_or(Value::Null)
        }
        other => other,
    };
    let orders = match orders {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Err(Error::Extraction("reply holds no orders".into())),
    };

    let records: Vec<OrderRecord> = orders
        .iter()
        .map(|order| -> Result<OrderRecord> {
            let keyed = match OrderRecord::from_json(order, RecordLayout::Keyed)? {
                OrderRecord::Keyed(record) => record,
                OrderRecord::Positional(_) => KeyedRecord::new(),
            };
            Ok(match layout {
                RecordLayout::Keyed => OrderRecord::Keyed(keyed),
                RecordLayout::Positional => OrderRecord::Positional(
                    fixed
                        .iter()
                        .map(|column| keyed.value_for(column).unwrap_or_default().to_string())
                        .collect(),
                ),
            })
        })
        .collect::<Result<_>>()
        .map_err(|e| Error::Extraction(e.to_string()))?;

    if records.is_empty() {
        return Err(Error::Extraction("no orders found in text".into()));
    }
    Ok(records)
}
