use serde::{Deserialize, Serialize};

/// The text-generation providers the backend can talk to, in the order they
/// are preferred when no explicit primary is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
    OpenAi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Gemini,
        ProviderKind::Groq,
        ProviderKind::OpenAi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(ProviderKind::Gemini),
            "groq" => Some(ProviderKind::Groq),
            "openai" => Some(ProviderKind::OpenAi),
            _ => None,
        }
    }

    pub(crate) fn api_key_var(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub(crate) fn model_var(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_MODEL",
            ProviderKind::Groq => "GROQ_MODEL",
            ProviderKind::OpenAi => "OPENAI_MODEL",
        }
    }

    pub(crate) fn base_url_var(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_BASE_URL",
            ProviderKind::Groq => "GROQ_BASE_URL",
            ProviderKind::OpenAi => "OPENAI_BASE_URL",
        }
    }

    pub(crate) fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::Groq => "llama-3.1-8b-instant",
            ProviderKind::OpenAi => "gpt-4-turbo-preview",
        }
    }

    /// All three providers expose an OpenAI-compatible chat-completions
    /// endpoint; only the base URL differs.
    pub(crate) fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable connection configuration for one provider.
///
/// A fresh value is built for every request and discarded afterwards; in-flight
/// requests never share or mutate one. Fields are private so the only way to
/// change anything is to build a new value through the factory.
#[derive(Clone)]
pub struct ProviderConfig {
    provider: ProviderKind,
    model: String,
    api_key: String,
    base_url: String,
}

impl ProviderConfig {
    pub(crate) fn new(
        provider: ProviderKind,
        model: String,
        api_key: String,
        base_url: String,
    ) -> Self {
        Self {
            provider,
            model,
            api_key,
            base_url,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}
