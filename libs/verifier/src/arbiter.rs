//! LLM match arbiter for the borderline similarity band.
//!
//! Asks a local chat model for a strict-JSON verdict on whether a bill item
//! and a tie-up item denote the same billable thing. Malformed or
//! low-confidence answers retry once on a secondary model; a double failure
//! degrades to "no match" instead of erroring, so verification never blocks
//! on the model. Verdicts are memoized per process.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ArbiterVerdict {
    pub matched: bool,
    pub confidence: f32,
    pub normalized_name: Option<String>,
    pub error: Option<String>,
}

impl ArbiterVerdict {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            confidence: 0.0,
            normalized_name: None,
            error: Some(reason.into()),
        }
    }
}

/// Stateless chat completion backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Generate a completion; implementations enforce `timeout` per call.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, String>;
}

/// OpenAI-compatible `/chat/completions` client for a local model server.
pub struct HttpChatBackend {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpChatBackend {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
            "max_tokens": max_tokens,
        });

        let mut request = self.client.post(&url).json(&body).timeout(timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("chat endpoint returned {}", response.status()));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid response body: {e}"))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| "empty choices".to_string())
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(rename = "match")]
    matched: bool,
    confidence: f32,
    #[serde(default)]
    normalized_name: Option<String>,
}

/// Extract and parse the first JSON object in a model reply. Models often
/// wrap the object in prose or code fences.
fn parse_verdict(reply: &str) -> Option<RawVerdict> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let raw: RawVerdict = serde_json::from_str(&reply[start..=end]).ok()?;
    if !(0.0..=1.0).contains(&raw.confidence) {
        return None;
    }
    Some(raw)
}

fn build_prompt(bill_item: &str, tie_up_item: &str) -> String {
    format!(
        "You compare hospital bill line items against a negotiated rate sheet.\n\
         Bill item: \"{bill_item}\"\n\
         Rate sheet item: \"{tie_up_item}\"\n\
         Do these denote the same billable service or product? Ignore doctor \
         names, serial numbers, and packaging differences. Answer with ONLY a \
         JSON object, no other text:\n\
         {{\"match\": true|false, \"confidence\": 0.0-1.0, \"normalized_name\": \"...\"}}"
    )
}

pub struct MatchArbiter {
    backend: std::sync::Arc<dyn ChatBackend>,
    primary_model: String,
    secondary_model: String,
    min_confidence: f32,
    max_tokens: u32,
    timeout: Duration,
    cache: Mutex<HashMap<(String, String), ArbiterVerdict>>,
}

impl MatchArbiter {
    pub fn new(
        backend: std::sync::Arc<dyn ChatBackend>,
        primary_model: impl Into<String>,
        secondary_model: impl Into<String>,
        min_confidence: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            primary_model: primary_model.into(),
            secondary_model: secondary_model.into(),
            min_confidence,
            max_tokens,
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Judge one (bill item, tie-up item) pair, both normalized. Never
    /// errors; total wall time is bounded by two model timeouts.
    pub async fn judge(&self, bill_item: &str, tie_up_item: &str) -> ArbiterVerdict {
        let key = (bill_item.to_string(), tie_up_item.to_string());
        if let Some(cached) = self.cache.lock().expect("arbiter cache poisoned").get(&key) {
            return cached.clone();
        }

        let prompt = build_prompt(bill_item, tie_up_item);
        let verdict = match self.ask(&self.primary_model, &prompt).await {
            Ok(v) => v,
            Err(primary_err) => {
                tracing::warn!(
                    model = %self.primary_model,
                    error = %primary_err,
                    "primary arbiter model failed, trying secondary"
                );
                match self.ask(&self.secondary_model, &prompt).await {
                    Ok(v) => v,
                    Err(secondary_err) => ArbiterVerdict::failed(format!(
                        "primary: {primary_err}; secondary: {secondary_err}"
                    )),
                }
            }
        };

        self.cache
            .lock()
            .expect("arbiter cache poisoned")
            .insert(key, verdict.clone());
        verdict
    }

    /// One model call. A reply that parses but falls below the confidence
    /// floor counts as a failure so the caller falls through to the
    /// secondary model.
    async fn ask(&self, model: &str, prompt: &str) -> Result<ArbiterVerdict, String> {
        let reply = self
            .backend
            .generate(model, prompt, self.max_tokens, self.timeout)
            .await?;
        let raw = parse_verdict(&reply).ok_or_else(|| "unparseable verdict".to_string())?;
        if raw.confidence < self.min_confidence {
            return Err(format!(
                "confidence {:.2} below floor {:.2}",
                raw.confidence, self.min_confidence
            ));
        }
        Ok(ArbiterVerdict {
            matched: raw.matched,
            confidence: raw.confidence,
            normalized_name: raw.normalized_name,
            error: None,
        })
    }
}
