//! Concrete inference backends.
//!
//! Remote backends speak each vendor's chat API over blocking `ureq`. The
//! command backend pipes the prompt to any local tool (`llm`, `ollama run`,
//! a wrapper script) and reads the reply from stdout.
use super::{InferenceRequest, Provider};
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const COHERE_BASE_URL: &str = "https://api.cohere.ai/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const COHERE_DEFAULT_MAX_TOKENS: u32 = 1000;

/// Local command that receives the prompt on stdin.
pub struct CommandProvider {
    name: String,
    command: String,
    argv: Vec<String>,
}

impl CommandProvider {
    pub fn new(name: &str, command: &str) -> Result<Self> {
        let argv =
            shell_words::split(command).with_context(|| format!("parse LM command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("LM command is empty"));
        }
        Ok(Self {
            name: name.to_string(),
            command: command.to_string(),
            argv,
        })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

impl Provider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.command
    }

    fn complete(&self, request: &InferenceRequest) -> Result<String> {
        let prompt = request.combined_prompt();
        let start = Instant::now();
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn LM command: {}", self.argv[0]))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .context("write prompt to LM stdin")?;
        }

        let output = child.wait_with_output().context("wait for LM command")?;
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = prompt.len(),
            response_bytes = output.stdout.len(),
            "lm command finished"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "LM command failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        let text = String::from_utf8(output.stdout).context("decode LM stdout as UTF-8")?;
        if text.trim().is_empty() {
            return Err(anyhow!("LM command produced no output"));
        }
        Ok(text)
    }
}

/// Any backend exposing the OpenAI `chat/completions` shape (OpenAI, Groq via `GROQ_BASE_URL`).
pub struct OpenAiCompatibleProvider {
    name: String,
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: &str, model: &str, api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn body(&self, request: &InferenceRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = request.system.as_deref() {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &InferenceRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = post_json(
            &url,
            Some(&format!("Bearer {}", self.api_key)),
            &self.body(request),
        )?;
        text_at(&response, "/choices/0/message/content")
    }
}

pub struct CohereProvider {
    name: String,
    model: String,
    api_key: String,
}

impl CohereProvider {
    pub fn new(name: &str, model: &str, api_key: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl Provider for CohereProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &InferenceRequest) -> Result<String> {
        let body = json!({
            "message": request.combined_prompt(),
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens.unwrap_or(COHERE_DEFAULT_MAX_TOKENS),
        });
        let url = format!("{COHERE_BASE_URL}/chat");
        let response = post_json(&url, Some(&format!("Bearer {}", self.api_key)), &body)?;
        text_at(&response, "/text")
    }
}

pub struct GeminiProvider {
    name: String,
    model: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(name: &str, model: &str, api_key: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &InferenceRequest) -> Result<String> {
        let mut generation = json!({"temperature": request.temperature});
        if let Some(max_tokens) = request.max_tokens {
            generation["maxOutputTokens"] = json!(max_tokens);
        }
        let body = json!({
            "contents": [{"parts": [{"text": request.combined_prompt()}]}],
            "generationConfig": generation,
        });
        let url = format!(
            "{GEMINI_BASE_URL}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let response = post_json(&url, None, &body)?;
        text_at(&response, "/candidates/0/content/parts/0/text")
    }
}

fn post_json(url: &str, authorization: Option<&str>, body: &Value) -> Result<Value> {
    let mut request = ureq::post(url).header("Content-Type", "application/json");
    if let Some(authorization) = authorization {
        request = request.header("Authorization", authorization);
    }
    let mut response = request
        .send_json(body)
        .with_context(|| format!("POST {}", redact_query(url)))?;
    response
        .body_mut()
        .read_json::<Value>()
        .with_context(|| format!("decode response from {}", redact_query(url)))
}

fn text_at(response: &Value, pointer: &str) -> Result<String> {
    response
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("response missing text at {pointer}"))
}

// Query strings may carry API keys.
fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_provider_pipes_prompt_through_command() {
        let provider = CommandProvider::new("echo", "cat").expect("provider");
        let request = InferenceRequest::new("hello").with_system("be brief");
        let text = provider.complete(&request).expect("complete");
        assert_eq!(text, "be brief\n\nhello");
    }

    #[test]
    fn command_provider_reports_failing_status() {
        let provider = CommandProvider::new("fail", "sh -c 'echo nope >&2; exit 3'").expect("provider");
        let err = provider.complete(&InferenceRequest::new("x")).unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandProvider::new("empty", "  ").is_err());
    }

    #[test]
    fn openai_body_includes_system_and_limits() {
        let provider = OpenAiCompatibleProvider::new("OpenAI", "gpt-4o-mini", "k", None);
        let request = InferenceRequest::new("q")
            .with_system("s")
            .with_max_tokens(Some(64));
        let body = provider.body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "q");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(provider.base_url, OPENAI_BASE_URL);
    }

    #[test]
    fn text_pointer_extracts_nested_content() {
        let response = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(
            text_at(&response, "/choices/0/message/content").unwrap(),
            "hi"
        );
        assert!(text_at(&response, "/text").is_err());
    }

    #[test]
    fn redact_query_drops_keys() {
        assert_eq!(redact_query("https://x/y?key=secret"), "https://x/y");
        assert_eq!(redact_query("https://x/y"), "https://x/y");
    }
}
