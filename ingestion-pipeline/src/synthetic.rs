//! Turns document chunks into chat-style fine-tuning examples (JSONL).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::store::{StorageManager, LOGS_CONTAINER},
    utils::llm::{ChatMessage, ChatOptions, LlmProvider},
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, info, warn};

const GENERIC_INPUT: &str = "Generic financial data: creditor details and personal info.";
const MIN_RESPONSE_LINES: usize = 10;
const SUMMARY_CHARS: usize = 50;
const GENERATION_TEMPERATURE: f32 = 0.7;
const GENERATION_MAX_TOKENS: u32 = 5000;

const FALLBACK_TEMPLATES: [[(&str, &str); 3]; 3] = [
    [
        ("system", "You are a factual assistant that provides accurate answers."),
        ("user", "Please explain the following data: {input_text}"),
        ("assistant", "Based on the data, it appears that {summary}."),
    ],
    [
        ("system", "You are a helpful and knowledgeable assistant."),
        ("user", "What does the following information mean? {input_text}"),
        ("assistant", "This information suggests that {summary}."),
    ],
    [
        ("system", "You are a factual assistant."),
        ("user", "Summarize this data: {input_text}"),
        ("assistant", "In summary, {summary}."),
    ],
];

/// Destination for raw model output kept for later inspection.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn record(&self, bytes: Vec<u8>, key: &str) -> Result<(), AppError>;
}

/// Writes raw responses into the logs container.
pub struct StorageResponseSink {
    storage: StorageManager,
}

impl StorageResponseSink {
    pub fn new(storage: StorageManager) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ResponseSink for StorageResponseSink {
    async fn record(&self, bytes: Vec<u8>, key: &str) -> Result<(), AppError> {
        let locator = self.storage.put(bytes, key, LOGS_CONTAINER).await?;
        debug!(locator = %locator, "stored raw synthetic response");
        Ok(())
    }
}

/// Drops everything it is given.
pub struct DiscardResponses;

#[async_trait]
impl ResponseSink for DiscardResponses {
    async fn record(&self, _bytes: Vec<u8>, _key: &str) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticSettings {
    pub model: String,
    pub max_attempts: usize,
    pub min_examples: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            max_attempts: 3,
            min_examples: 10,
            retry_base_delay_ms: 200,
        }
    }
}

pub struct SyntheticGenerator {
    llm: Arc<dyn LlmProvider>,
    sink: Arc<dyn ResponseSink>,
    settings: SyntheticSettings,
    next_template: Mutex<usize>,
}

/// Key prefix under which a job's raw model responses are kept.
pub fn response_log_prefix(job_id: &str) -> String {
    format!("synthetic_logs/job-{job_id}")
}

impl SyntheticGenerator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        sink: Arc<dyn ResponseSink>,
        settings: SyntheticSettings,
    ) -> Self {
        Self {
            llm,
            sink,
            settings,
            next_template: Mutex::new(0),
        }
    }

    /// Generates JSONL training examples for the given chunks.
    ///
    /// The model is asked up to `max_attempts` times; after that the examples are filled in
    /// from fixed templates, so this never fails.
    #[tracing::instrument(skip_all, fields(job_id = %job_id, chunks = chunks.len()))]
    pub async fn generate(&self, job_id: &str, chunks: &[String]) -> String {
        let input_text = combine_chunks(chunks);
        let prompt = build_generation_prompt(&input_text);

        let retries = self.settings.max_attempts.max(1).saturating_sub(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.settings.retry_base_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(retries);

        let mut attempt = 0usize;
        let outcome = Retry::spawn(strategy, || {
            attempt += 1;
            let current = attempt;
            let prompt = prompt.clone();
            async move {
                self.attempt_generation(job_id, prompt)
                    .await
                    .inspect_err(|err| warn!(attempt = current, error = %err, "synthetic generation attempt failed"))
            }
        })
        .await;

        match outcome {
            Ok(jsonl) => jsonl,
            Err(_) => {
                warn!("max attempts reached; using fallback templates for synthetic data");
                let fallback = self.fallback_jsonl(&input_text).await;
                self.log_response(job_id, &fallback, false).await;
                fallback
            }
        }
    }

    async fn attempt_generation(&self, job_id: &str, prompt: String) -> Result<String, AppError> {
        let options = ChatOptions {
            temperature: Some(GENERATION_TEMPERATURE),
            max_tokens: Some(GENERATION_MAX_TOKENS),
        };
        let raw = self
            .llm
            .chat(&self.settings.model, vec![ChatMessage::user(prompt)], options)
            .await?;
        let raw = raw.trim();
        self.log_response(job_id, raw, true).await;

        let lines = validate_jsonl(&strip_code_fences(raw))?;
        debug!(lines = lines.len(), "generated valid synthetic JSONL");
        Ok(lines.join("\n"))
    }

    /// Persists a raw response. Failures are logged and otherwise ignored.
    async fn log_response(&self, job_id: &str, text: &str, primary: bool) {
        let file = if primary {
            "raw_response.txt"
        } else {
            "fallback_raw_response.txt"
        };
        let key = format!("{}/{file}", response_log_prefix(job_id));
        match self.sink.record(text.as_bytes().to_vec(), &key).await {
            Ok(()) => info!(key = %key, primary, "logged synthetic response"),
            Err(err) => warn!(key = %key, error = %err, "failed to log synthetic response"),
        }
    }

    async fn fallback_jsonl(&self, input_text: &str) -> String {
        let mut next = self.next_template.lock().await;
        let lines: Vec<String> = (0..self.settings.min_examples)
            .map(|_| {
                let template = &FALLBACK_TEMPLATES[*next % FALLBACK_TEMPLATES.len()];
                *next = next.wrapping_add(1);
                fill_template(template, input_text)
            })
            .collect();
        lines.join("\n")
    }
}

/// Non-empty trimmed chunks joined by newlines, or a generic sentence when nothing is left.
pub fn combine_chunks(chunks: &[String]) -> String {
    let joined = chunks
        .iter()
        .map(|chunk| chunk.trim())
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if joined.is_empty() {
        warn!("no usable chunks; using generic input text");
        GENERIC_INPUT.to_string()
    } else {
        joined
    }
}

pub fn build_generation_prompt(input_text: &str) -> String {
    format!(
        r#"You are a highly intelligent assistant tasked with generating synthetic training data for fine-tuning a chatbot. Given the following input text, create at least 15 distinct chat-style examples in JSONL format, one JSON object per line. Each JSON object must have the following structure:
{{
    "messages": [
         {{"role": "system", "content": "You are a factual assistant that provides accurate answers."}},
         {{"role": "user", "content": <user message>}},
         {{"role": "assistant", "content": <assistant message>}}
    ]
}}
Ensure that:
- The user message is a creative variation derived from the input text (e.g., "What does this describe?", "Can you explain this?", "Summarize this:" etc.).
- The assistant message is a factual, concise answer based on the input text.
- There is no additional text, markdown formatting, or explanation outside of the JSON objects.
- Each line is a valid JSON object.

Input text:
{input_text}
"#
    )
}

/// Drops a leading ```` ``` ```` line and a closing fence line, if present.
pub fn strip_code_fences(text: &str) -> String {
    if !text.starts_with("```") {
        return text.to_string();
    }
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.first().is_some_and(|l| l.trim().starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n")
}

/// Parses every non-blank line as JSON and returns the lines re-serialized compactly.
pub fn validate_jsonl(text: &str) -> Result<Vec<String>, AppError> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < MIN_RESPONSE_LINES {
        return Err(AppError::LLMParsing(format!(
            "Expected at least {MIN_RESPONSE_LINES} lines, but got {}.",
            lines.len()
        )));
    }

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str::<Value>(line)
                .map(|value| value.to_string())
                .map_err(|err| {
                    AppError::LLMParsing(format!("Invalid JSON on line {}: {line} - {err}", i + 1))
                })
        })
        .collect()
}

fn summarize(input_text: &str) -> String {
    if input_text.chars().count() <= SUMMARY_CHARS {
        input_text.to_string()
    } else {
        let head: String = input_text.chars().take(SUMMARY_CHARS).collect();
        format!("{head}...")
    }
}

fn fill_template(template: &[(&str, &str); 3], input_text: &str) -> String {
    let summary = summarize(input_text);
    let messages: Vec<Value> = template
        .iter()
        .map(|(role, content)| {
            let content = substitute(content, input_text, &summary);
            json!({ "role": role, "content": content })
        })
        .collect();
    json!({ "messages": messages }).to_string()
}

/// Expands `{input_text}` and `{summary}` in one scan; inserted text is never re-expanded.
fn substitute(template: &str, input_text: &str, summary: &str) -> String {
    let mut out = String::with_capacity(template.len() + input_text.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{input_text}") {
            out.push_str(input_text);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{summary}") {
            out.push_str(summary);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
