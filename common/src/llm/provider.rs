use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    storage::types::session::SessionPreferences,
    utils::config::AppConfig,
};

/// Supported chat-completion providers. All but Gemini speak the
/// OpenAI-compatible protocol at a swapped base URL; Gemini is its own
/// strategy routed through Google's OpenAI-compatibility endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Fireworks,
    Together,
    Groq,
    Grok,
    OpenRouter,
    Gemini,
}

impl Provider {
    pub fn base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Fireworks => "https://api.fireworks.ai/inference/v1",
            Self::Together => "https://api.together.xyz/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Grok => "https://api.x.ai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Fireworks => "fireworks",
            Self::Together => "together",
            Self::Groq => "groq",
            Self::Grok => "grok",
            Self::OpenRouter => "openrouter",
            Self::Gemini => "gemini",
        }
    }
}

impl FromStr for Provider {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "fireworks" => Ok(Self::Fireworks),
            "together" => Ok(Self::Together),
            "groq" => Ok(Self::Groq),
            "grok" => Ok(Self::Grok),
            "openrouter" => Ok(Self::OpenRouter),
            "gemini" => Ok(Self::Gemini),
            other => Err(AppError::Validation(format!("unknown provider '{other}'"))),
        }
    }
}

/// Per-request provider context. Carried explicitly instead of any global
/// client so concurrent sessions can talk to different providers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
}

impl RequestContext {
    /// Chat context from session preferences, falling back to the
    /// development environment variables when the session has none.
    pub fn for_chat(
        preferences: Option<&SessionPreferences>,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        let (provider, model) = match preferences {
            Some(prefs) => (prefs.ai_provider.parse()?, prefs.ai_model.clone()),
            None => {
                if !config.is_development() {
                    return Err(AppError::Validation(
                        "session has no model preferences".to_string(),
                    ));
                }
                let provider = config
                    .ai_provider
                    .as_deref()
                    .ok_or_else(|| {
                        AppError::Validation("no provider preference or fallback".to_string())
                    })?
                    .parse()?;
                let model = config.ai_model.clone().ok_or_else(|| {
                    AppError::Validation("no model preference or fallback".to_string())
                })?;
                (provider, model)
            }
        };

        Ok(Self {
            provider,
            model,
            api_key: require_api_key(config)?,
        })
    }

    /// Embedding context: preferences may override provider and model, the
    /// defaults are OpenAI and the configured embedding model.
    pub fn for_embedding(
        preferences: Option<&SessionPreferences>,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        let provider = match preferences.and_then(|p| p.embedding_provider.as_deref()) {
            Some(value) => value.parse()?,
            None => Provider::OpenAi,
        };
        let model = preferences
            .and_then(|p| p.embedding_model.clone())
            .unwrap_or_else(|| config.embedding_model.clone());

        Ok(Self {
            provider,
            model,
            api_key: require_api_key(config)?,
        })
    }
}

fn require_api_key(config: &AppConfig) -> Result<String, AppError> {
    config
        .ai_api_key
        .clone()
        .ok_or_else(|| AppError::UnauthorizedLlm("AI_API_KEY is not configured".to_string()))
}
