//! Grounded answer generation through an OpenAI-compatible chat API.
//!
//! Retrieved passages are numbered `[Source N]` in the prompt and the model
//! is instructed to cite them and to close with a confidence line, which
//! [`parse_confidence`] reads back.

use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::sync::OnceLock;
use tracing::debug;

use crate::chunk::estimate_tokens;
use crate::config::LlmConfig;
use crate::embedding::post_with_retry;
use crate::models::Confidence;
use crate::store::SearchHit;

pub const SYSTEM_PROMPT: &str = "You are a legal document assistant. Answer questions ONLY using the provided document excerpts.

RULES:
- Use ONLY information from the sources provided
- Cite every claim with [Source N]
- Use bullet points for multiple items
- If sources don't answer the question, say so
- End with: \"Confidence: high/medium/low\"

This is for research only, not legal advice.";

const NO_CONTEXT_ANSWER: &str = "I cannot find sufficient information in the provided documents to answer this question. No relevant document sections were found.";

/// A generated answer and what it cost.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub confidence: Confidence,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

/// Builds the numbered source block placed in the user prompt.
pub fn build_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[Source {}] {}, p.{}:\n{}",
                i + 1,
                hit.document_title,
                hit.page_number,
                hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn user_prompt(question: &str, context: &str) -> String {
    format!(
        "Question: {}\n\nSources:\n{}\n\nAnswer the question using only the sources above. Cite with [Source N]. End with \"Confidence: high/medium/low\"",
        question, context
    )
}

fn confidence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"confidence:\s*(high|medium|low)").expect("valid regex"))
}

/// Reads the confidence level out of a generated answer.
///
/// An explicit `Confidence: <level>` line wins; otherwise the wording of
/// the answer decides, defaulting to medium.
pub fn parse_confidence(answer: &str) -> Confidence {
    let lower = answer.to_lowercase();

    let explicit = confidence_re()
        .captures(&lower)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    match explicit {
        Some("high") => return Confidence::High,
        Some("medium") => return Confidence::Medium,
        Some("low") => return Confidence::Low,
        _ => {}
    }

    if lower.contains("cannot find sufficient") || lower.contains("insufficient") {
        return Confidence::Low;
    }
    if lower.contains("clearly") || lower.contains("explicitly") {
        return Confidence::High;
    }
    Confidence::Medium
}

/// Whether an answer is the model admitting the sources do not cover it.
pub fn admits_insufficient(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    lower.contains("cannot find sufficient") || lower.contains("insufficient information")
}

pub fn estimate_cost(config: &LlmConfig, input_tokens: i64, output_tokens: i64) -> f64 {
    input_tokens as f64 / 1000.0 * config.input_cost_per_1k
        + output_tokens as f64 / 1000.0 * config.output_cost_per_1k
}

/// Answers `question` from the retrieved passages.
///
/// With no passages the model is not called at all and a zero-cost,
/// low-confidence refusal is returned.
pub async fn generate_answer(
    config: &LlmConfig,
    question: &str,
    hits: &[SearchHit],
) -> Result<Answer> {
    if hits.is_empty() {
        return Ok(Answer {
            text: NO_CONTEXT_ANSWER.to_string(),
            confidence: Confidence::Low,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        });
    }

    match config.provider.as_str() {
        "openai" => {}
        "disabled" => bail!("LLM provider is disabled"),
        other => bail!("Unknown llm provider: {}", other),
    }

    let context = build_context(hits);
    let prompt = user_prompt(question, &context);
    let response = complete_openai(config, &prompt).await?;

    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    let (input_tokens, output_tokens) = match response.usage {
        Some(u) => (u.prompt_tokens, u.completion_tokens),
        None => (
            (estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(&prompt)) as i64,
            estimate_tokens(&text) as i64,
        ),
    };

    let confidence = parse_confidence(&text);
    let cost_usd = estimate_cost(config, input_tokens, output_tokens);
    debug!(
        input_tokens,
        output_tokens,
        cost_usd,
        confidence = %confidence,
        "generated answer"
    );

    Ok(Answer {
        text,
        confidence,
        input_tokens,
        output_tokens,
        cost_usd,
    })
}

async fn complete_openai(config: &LlmConfig, prompt: &str) -> Result<ChatResponse> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = ChatRequest {
        model: &config.model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ],
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let response =
        post_with_retry(&client, &url, &api_key, &body, config.max_retries).await?;
    Ok(response.json::<ChatResponse>().await?)
}
