//! Run configuration: providers, sampling, and diagnostic thresholds.
//!
//! Configuration comes from an optional JSON file. When the file names no
//! providers, they are discovered from API-key environment variables (after
//! loading `.env`), in a fixed priority order.
use crate::diagnostics::DiagnosticRules;
use crate::inference::providers::{
    CohereProvider, CommandProvider, GeminiProvider, OpenAiCompatibleProvider, GROQ_BASE_URL,
};
use crate::inference::{InferenceClient, Provider};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "taxdraft.json";
/// Local LM command used when no API keys are present.
pub const LM_COMMAND_ENV: &str = "TAXDRAFT_LM_COMMAND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Cohere,
    Groq,
    Gemini,
    Command,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Groq => "groq",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Command => "command",
        }
    }

    fn default_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Openai => Some("OPENAI_API_KEY"),
            ProviderKind::Cohere => Some("COHERE_API_KEY"),
            ProviderKind::Groq => Some("GROQ_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Command => None,
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "gpt-4o-mini",
            ProviderKind::Cohere => "command-r-plus",
            ProviderKind::Groq => "llama3-70b-8192",
            ProviderKind::Gemini => "gemini-1.5-pro",
            ProviderKind::Command => "local-command",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "OpenAI",
            ProviderKind::Cohere => "Cohere",
            ProviderKind::Groq => "Groq",
            ProviderKind::Gemini => "Gemini",
            ProviderKind::Command => "Command",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    /// Lower is tried first.
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Environment variable holding the API key; defaults per kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Shell-style command line for `command` providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ProviderConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.kind.default_model())
    }

    fn key_env(&self) -> Option<&str> {
        self.api_key_env
            .as_deref()
            .or_else(|| self.kind.default_key_env())
    }

    /// Construct the backend, resolving the API key through `lookup`.
    pub fn build(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Box<dyn Provider>> {
        let provider: Box<dyn Provider> = match self.kind {
            ProviderKind::Command => Box::new(self.build_command()?),
            ProviderKind::Openai => Box::new(OpenAiCompatibleProvider::new(
                &self.name,
                self.model(),
                &self.api_key(lookup)?,
                self.base_url.as_deref(),
            )),
            ProviderKind::Groq => Box::new(OpenAiCompatibleProvider::new(
                &self.name,
                self.model(),
                &self.api_key(lookup)?,
                Some(self.base_url.as_deref().unwrap_or(GROQ_BASE_URL)),
            )),
            ProviderKind::Cohere => Box::new(CohereProvider::new(
                &self.name,
                self.model(),
                &self.api_key(lookup)?,
            )),
            ProviderKind::Gemini => Box::new(GeminiProvider::new(
                &self.name,
                self.model(),
                &self.api_key(lookup)?,
            )),
        };
        Ok(provider)
    }

    fn api_key(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String> {
        let key_env = self
            .key_env()
            .ok_or_else(|| anyhow!("provider {} has no api_key_env", self.name))?;
        lookup(key_env)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("provider {}: {key_env} is not set", self.name))
    }

    fn build_command(&self) -> Result<CommandProvider> {
        let command = self
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("provider {} has no command", self.name))?;
        let provider = CommandProvider::new(&self.name, command)?;
        which::which(provider.program()).with_context(|| {
            format!(
                "provider {}: LM command {} not found",
                self.name,
                provider.program()
            )
        })?;
        Ok(provider)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub schema_version: u32,
    /// Empty means "discover from the environment".
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub diagnostics: DiagnosticRules,
}

pub fn default_config() -> Config {
    Config {
        schema_version: CONFIG_SCHEMA_VERSION,
        providers: Vec::new(),
        temperature: 0.0,
        max_tokens: None,
        diagnostics: DiagnosticRules::default(),
    }
}

/// Pick the config file: explicit path, then `./taxdraft.json`, then the user config dir.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("taxdraft").join("config.json"))
        .filter(|path| path.is_file())
}

/// Load and validate the config, falling back to defaults when no file is found.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config = match resolve_config_path(explicit) {
        Some(path) => {
            let bytes =
                fs::read(&path).with_context(|| format!("read config {}", path.display()))?;
            let config: Config = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse config JSON {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config");
            config
        }
        None => default_config(),
    };
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if !(0.0..=2.0).contains(&config.temperature) {
        return Err(anyhow!(
            "temperature must be between 0 and 2 (got {})",
            config.temperature
        ));
    }
    let mut names = BTreeSet::new();
    for provider in &config.providers {
        let name = provider.name.trim();
        if name.is_empty() {
            return Err(anyhow!("provider names must be non-empty"));
        }
        if !names.insert(name) {
            return Err(anyhow!("duplicate provider name {name:?}"));
        }
        let has_command =
            matches!(provider.command.as_deref(), Some(command) if !command.trim().is_empty());
        if provider.kind == ProviderKind::Command && !has_command {
            return Err(anyhow!("command provider {name:?} requires a command"));
        }
    }
    let rules = &config.diagnostics;
    if rules.cogs_ratio_threshold <= 0.0 {
        return Err(anyhow!("diagnostics.cogs_ratio_threshold must be positive"));
    }
    if rules.tolerance < 0.0 {
        return Err(anyhow!("diagnostics.tolerance must not be negative"));
    }
    Ok(())
}

/// Providers implied by the environment, in fallback order.
pub fn discover_providers(lookup: &dyn Fn(&str) -> Option<String>) -> Vec<ProviderConfig> {
    let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    let mut providers = Vec::new();
    let keyed = [
        (ProviderKind::Openai, 1),
        (ProviderKind::Cohere, 2),
        (ProviderKind::Groq, 3),
        (ProviderKind::Gemini, 4),
    ];
    for (kind, priority) in keyed {
        let Some(key_env) = kind.default_key_env() else {
            continue;
        };
        if present(key_env).is_none() {
            continue;
        }
        let model = match kind {
            ProviderKind::Openai => present("OPENAI_MODEL"),
            _ => None,
        };
        providers.push(ProviderConfig {
            name: kind.display_name().to_string(),
            kind,
            priority,
            model,
            api_key_env: None,
            base_url: None,
            command: None,
        });
    }
    if let Some(command) = present(LM_COMMAND_ENV) {
        providers.push(ProviderConfig {
            name: ProviderKind::Command.display_name().to_string(),
            kind: ProviderKind::Command,
            priority: 5,
            model: None,
            api_key_env: None,
            base_url: None,
            command: Some(command),
        });
    }
    providers
}

/// Build the inference client, or `None` when no provider is available.
///
/// Explicitly configured providers must all build. Providers discovered from
/// the environment are skipped with a warning when they cannot be built.
pub fn build_client(
    config: &Config,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Option<InferenceClient>> {
    let mut built = Vec::new();
    if config.providers.is_empty() {
        for provider in discover_providers(lookup) {
            match provider.build(lookup) {
                Ok(backend) => built.push((provider.priority, backend)),
                Err(err) => tracing::warn!(
                    provider = %provider.name,
                    error = %format!("{err:#}"),
                    "skipping provider"
                ),
            }
        }
    } else {
        for provider in &config.providers {
            let backend = provider
                .build(lookup)
                .with_context(|| format!("configure provider {}", provider.name))?;
            built.push((provider.priority, backend));
        }
    }
    if built.is_empty() {
        return Ok(None);
    }
    let client = InferenceClient::new(built)?;
    Ok(Some(client))
}

/// Environment lookup used outside tests.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
