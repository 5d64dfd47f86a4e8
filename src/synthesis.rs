//! Answer synthesis (C8, §4.5).
//!
//! Takes a question plus the chunks retrieved for it and produces a grounded
//! answer with an honest [`Confidence`](crate::models::Confidence) label.
//! The [`Completion`] trait is modeled on [`crate::embedding::EmbeddingProvider`]:
//! same shape (config-driven construction, a thin trait, retry/backoff inside
//! the free function that calls the backend), new capability. When synthesis
//! is disabled (§2 Non-goals still allow this path to be turned off), callers
//! get an error rather than a silently low-quality fabricated answer.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::SynthesisConfig;
use crate::models::{Citation, Confidence};

pub trait Completion: Send + Sync {
    fn model_name(&self) -> &str;
}

pub struct DisabledCompletion;

impl Completion for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }
}

pub struct OpenAICompletion {
    model: String,
}

impl OpenAICompletion {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("synthesis.model required for openai provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self { model })
    }
}

impl Completion for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }
}

pub fn create_completion(config: &SynthesisConfig) -> Result<Box<dyn Completion>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletion)),
        "openai" => Ok(Box::new(OpenAICompletion::new(config)?)),
        other => bail!("unknown synthesis provider: {}", other),
    }
}

/// Evidence handed to the synthesiser: retrieved chunk text plus the
/// citation metadata it will be attributed with in the response.
pub struct EvidenceChunk {
    pub citation: Citation,
    pub text: String,
}

pub struct SynthesisResult {
    pub answer: String,
    pub confidence: Confidence,
    pub citations: Vec<Citation>,
}

/// Synthesize a grounded answer from retrieved evidence. If no evidence was
/// retrieved, returns an honest "insufficient context" answer with
/// `Confidence::Unknown` rather than asking the model to guess (§4.5 "Hard
/// rule: never fabricate"). The prompt instructs the model to cite each
/// claim by section and to self-report its own confidence; if the model's
/// reply doesn't parse as the expected structure, the raw text is returned
/// with `Confidence::Unknown` — never upgraded to "medium" by default.
pub async fn synthesize(
    config: &SynthesisConfig,
    question: &str,
    evidence: &[EvidenceChunk],
) -> Result<SynthesisResult> {
    if evidence.is_empty() {
        return Ok(SynthesisResult {
            answer: "No relevant context was found for this question.".to_string(),
            confidence: Confidence::Unknown,
            citations: Vec::new(),
        });
    }

    if !config.is_enabled() {
        bail!("answer synthesis is disabled");
    }

    let prompt = build_prompt(question, evidence);
    let raw = match config.provider.as_str() {
        "openai" => call_openai(config, &prompt).await?,
        other => bail!("unknown synthesis provider: {}", other),
    };

    let (answer, confidence) = parse_structured_reply(&raw);
    let citations = evidence.iter().map(|e| e.citation.clone()).collect();

    Ok(SynthesisResult { answer, confidence, citations })
}

fn build_prompt(question: &str, evidence: &[EvidenceChunk]) -> String {
    let mut sections = String::new();
    for (i, chunk) in evidence.iter().enumerate() {
        sections.push_str(&format!(
            "[{}] (section: {}) {}\n\n",
            i + 1,
            chunk.citation.section_path,
            chunk.text
        ));
    }

    format!(
        "Answer the question using only the numbered context below. Cite sources \
         by their bracket number. If the context does not contain enough \
         information, say so plainly rather than guessing. End your reply with \
         a line 'Confidence: high|medium|low' reflecting how well the context \
         supports the answer.\n\n\
         Context:\n{}\n\
         Question: {}\n",
        sections, question
    )
}

/// Parse a "...\nConfidence: <label>" structured reply. Anything that
/// doesn't match is treated as unparsed raw text with `Confidence::Unknown`
/// (§4.5 "Hard rule": an unparseable self-report is never assumed medium).
fn parse_structured_reply(raw: &str) -> (String, Confidence) {
    let marker = "Confidence:";
    if let Some(idx) = raw.rfind(marker) {
        let (body, tail) = raw.split_at(idx);
        let label = tail[marker.len()..].trim();
        let confidence: Confidence = label.parse().unwrap_or(Confidence::Unknown);
        return (body.trim().to_string(), confidence);
    }
    (raw.trim().to_string(), Confidence::Unknown)
}

async fn call_openai(config: &SynthesisConfig, prompt: &str) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("synthesis.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let base_url = config.base_url.as_deref().unwrap_or("https://api.openai.com/v1");
    let body = serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
    });

    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/chat/completions", base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_chat_response(&json);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("synthesis API error {}", status));
                    continue;
                }
                let body_text = response.text().await.unwrap_or_default();
                bail!("synthesis API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("synthesis failed after retries")))
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("invalid chat completion response: missing choices[0].message.content"))
}
