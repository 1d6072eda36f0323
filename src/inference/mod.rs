//! Ranked multi-provider inference client.
//!
//! Providers are tried strictly in ascending priority order. The first one
//! that returns text wins; a failing provider is logged and the next one is
//! tried. Each provider gets exactly one attempt, and a provider that hangs
//! blocks the whole chain.
//!
//! `complete_structured` layers JSON decoding on top, tolerating responses
//! wrapped in markdown code fences.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;

pub mod providers;

/// Outbound request shared by every backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// System text and prompt joined for backends without a separate system slot.
    pub fn combined_prompt(&self) -> String {
        match self.system.as_deref() {
            Some(system) if !system.trim().is_empty() => format!("{system}\n\n{}", self.prompt),
            _ => self.prompt.clone(),
        }
    }
}

/// One inference backend.
pub trait Provider {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn complete(&self, request: &InferenceRequest) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no inference providers configured")]
    NoProviders,
    #[error("all inference providers failed; last error: {last_error}")]
    AllProvidersFailed {
        attempts: Vec<ProviderFailure>,
        last_error: String,
    },
    #[error("failed to parse structured response: {message}\nresponse: {raw}")]
    Parse { message: String, raw: String },
}

struct RankedProvider {
    priority: u32,
    provider: Box<dyn Provider>,
}

/// Summary of one configured provider, in fallback order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub priority: u32,
    pub model: String,
}

pub struct InferenceClient {
    providers: Vec<RankedProvider>,
}

impl InferenceClient {
    /// Build a client from `(priority, provider)` pairs; lower priority is tried first.
    ///
    /// Equal priorities keep their given order.
    pub fn new(providers: Vec<(u32, Box<dyn Provider>)>) -> Result<Self, InferenceError> {
        if providers.is_empty() {
            return Err(InferenceError::NoProviders);
        }
        let mut providers: Vec<RankedProvider> = providers
            .into_iter()
            .map(|(priority, provider)| RankedProvider { priority, provider })
            .collect();
        providers.sort_by_key(|p| p.priority);
        Ok(Self { providers })
    }

    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|p| ProviderInfo {
                name: p.provider.name().to_string(),
                priority: p.priority,
                model: p.provider.model().to_string(),
            })
            .collect()
    }

    /// Name of the provider that will be tried first.
    pub fn active_provider(&self) -> Option<&str> {
        self.providers.first().map(|p| p.provider.name())
    }

    pub fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let mut attempts = Vec::new();
        for ranked in &self.providers {
            let provider = ranked.provider.as_ref();
            let start = Instant::now();
            match provider.complete(request) {
                Ok(text) => {
                    tracing::info!(
                        provider = provider.name(),
                        model = provider.model(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        prompt_bytes = request.prompt.len(),
                        response_bytes = text.len(),
                        "inference complete"
                    );
                    return Ok(text);
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    tracing::warn!(
                        provider = provider.name(),
                        model = provider.model(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        error = %error,
                        "inference provider failed"
                    );
                    attempts.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        error,
                    });
                }
            }
        }
        let last_error = attempts
            .last()
            .map(|failure| format!("{}: {}", failure.provider, failure.error))
            .unwrap_or_default();
        Err(InferenceError::AllProvidersFailed {
            attempts,
            last_error,
        })
    }

    /// Complete, strip optional code fences, and decode the response as JSON.
    pub fn complete_structured<T: DeserializeOwned>(
        &self,
        request: &InferenceRequest,
    ) -> Result<T, InferenceError> {
        let raw = self.complete(request)?;
        parse_structured(&raw)
    }
}

pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, InferenceError> {
    serde_json::from_str(strip_code_fences(raw)).map_err(|err| InferenceError::Parse {
        message: err.to_string(),
        raw: raw.to_string(),
    })
}

/// Remove a leading ```` ```json ```` / ```` ``` ```` and a trailing ```` ``` ````.
pub fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}
