//! Text-generation service client
//!
//! Thin shim over the external messages API. Calls are synchronous from
//! the interaction's point of view (no timeout, no retry) and every
//! failure is mapped into [`EngineError::Llm`] so the responder can turn
//! it into a visible error string.
//!
//! A literal "dummy-api-key" short-circuits the HTTP round trip and
//! returns canned replies, which is what keeps the two-stage protocol
//! testable offline.

use crate::error::{EngineError, Result};
use lazy_static::lazy_static;
use regex::Regex;

/// System instructions for the live responder path.
pub const ANALYST_SYSTEM_PROMPT: &str = "You are a Revenue Operations analyst. Help sales leaders analyze pipeline, \
forecast deals, and make data-driven decisions. Keep responses concise and actionable.";

/// Literal schema description packaged with every stage-one request.
pub const SCHEMA_PROMPT: &str = "\
The data lives in one table:

sales_pipeline (
    opportunity_id TEXT PRIMARY KEY,
    sales_agent    TEXT,
    product        TEXT,
    account        TEXT,
    deal_stage     TEXT,   -- 'Engaging' (open), 'Won', 'Lost'
    engage_date    TEXT,   -- ISO date
    close_date     TEXT,   -- ISO date, NULL while Engaging
    close_value    INTEGER -- currency units, set at close
)

If answering requires data, reply with exactly one SQL query wrapped in
<sql></sql> tags. Otherwise answer directly.";

lazy_static! {
    static ref SQL_TAG: Regex = Regex::new(r"(?s)<sql>(.*?)</sql>").expect("valid regex");
}

/// Pull the first `<sql>…</sql>` block out of a reply, if any.
pub fn extract_sql(reply: &str) -> Option<String> {
    SQL_TAG
        .captures(reply)
        .map(|caps| caps[1].trim().to_string())
        .filter(|sql| !sql.is_empty())
}

#[derive(Debug, Clone)]
pub struct GenClient {
    api_key: String,
    base_url: String,
    model: String,
}

impl GenClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// One messages-API round trip: system instructions plus user prompt,
    /// free text back.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        if self.api_key == "dummy-api-key" {
            return Ok(canned_reply(prompt));
        }

        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 300,
            "system": system,
            "messages": [
                {"role": "user", "content": prompt}
            ]
        });

        let response = client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Llm(format!("service call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Llm(format!("malformed service response: {}", e)))?;

        if let Some(err) = response_json.get("error") {
            return Err(EngineError::Llm(format!("service error: {}", err)));
        }

        let content = response_json["content"][0]["text"]
            .as_str()
            .ok_or_else(|| EngineError::Llm("no content in service response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Offline replies for the dummy credential: stage-two prompts (they carry
/// the executed rows) get a narrative, everything else gets a query.
fn canned_reply(prompt: &str) -> String {
    if prompt.contains("Recommend three concrete actions") {
        return "1. Re-qualify every open deal older than the average cycle.\n\
                2. Pair the flagged rep with a top performer for two weeks.\n\
                3. Review pricing approvals on deals below the historical average."
            .to_string();
    }
    if prompt.contains("QUERY RESULTS") {
        "The pipeline skews heavily toward open deals; focus the team on converting the \
         oldest Engaging opportunities first."
            .to_string()
    } else {
        "<sql>SELECT deal_stage, COUNT(*), COALESCE(SUM(close_value), 0) \
         FROM sales_pipeline GROUP BY deal_stage</sql>"
            .to_string()
    }
}
