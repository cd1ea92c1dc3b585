use std::collections::HashMap;

use taskloom_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::{ProviderConfig, ProviderKind};

/// Builds fresh, immutable provider configurations from environment-held
/// credentials.
///
/// The factory snapshots the relevant variables once; every `create_config`
/// call constructs a brand-new `ProviderConfig` so nothing built here is ever
/// shared between concurrent requests.
#[derive(Debug, Clone)]
pub struct ProviderConfigFactory {
    vars: HashMap<String, String>,
}

impl ProviderConfigFactory {
    /// Snapshot provider settings from the process environment, loading a
    /// `.env` file first if one is present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut vars = HashMap::new();
        for kind in ProviderKind::ALL {
            for var in [kind.api_key_var(), kind.model_var(), kind.base_url_var()] {
                if let Ok(value) = std::env::var(var) {
                    vars.insert(var.to_string(), value);
                }
            }
        }
        if let Ok(value) = std::env::var("PRIMARY_PROVIDER") {
            vars.insert("PRIMARY_PROVIDER".to_string(), value);
        }

        Self { vars }
    }

    /// Build a factory from an explicit variable map. Tests use this so they
    /// never have to mutate the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Build a fresh configuration for one provider, or `None` when its
    /// credentials are absent or still the placeholder from a sample .env.
    pub fn create_config(&self, kind: ProviderKind) -> Option<ProviderConfig> {
        let api_key = self.var(kind.api_key_var())?;
        if is_placeholder(api_key) {
            warn!("{} holds a placeholder value; ignoring provider", kind.api_key_var());
            return None;
        }

        let model = self
            .var(kind.model_var())
            .unwrap_or(kind.default_model())
            .to_string();
        let base_url = self
            .var(kind.base_url_var())
            .unwrap_or(kind.default_base_url())
            .trim_end_matches('/')
            .to_string();

        debug!("built fresh {kind} config (model {model})");
        Some(ProviderConfig::new(kind, model, api_key.to_string(), base_url))
    }

    /// The configured primary provider preference (default: Gemini).
    pub fn primary_kind(&self) -> ProviderKind {
        match self.var("PRIMARY_PROVIDER") {
            Some(name) => ProviderKind::from_name(name).unwrap_or_else(|| {
                warn!("unknown PRIMARY_PROVIDER '{name}', defaulting to gemini");
                ProviderKind::Gemini
            }),
            None => ProviderKind::Gemini,
        }
    }

    /// Providers to try, starting with the configured primary and continuing
    /// through the fixed preference order.
    fn preference_order(&self) -> Vec<ProviderKind> {
        let primary = self.primary_kind();
        let mut order = vec![primary];
        order.extend(ProviderKind::ALL.iter().copied().filter(|k| *k != primary));
        order
    }

    /// Fresh configuration for the first available provider in preference
    /// order. Fails only when no provider has usable credentials.
    pub fn primary_config(&self) -> Result<ProviderConfig> {
        for kind in self.preference_order() {
            if let Some(config) = self.create_config(kind) {
                info!("using {kind} as primary provider");
                return Ok(config);
            }
        }

        Err(Error::Config(
            "no AI provider configured; set GEMINI_API_KEY, GROQ_API_KEY, or OPENAI_API_KEY"
                .to_string(),
        ))
    }

    /// Fresh configuration for the next available provider after the one the
    /// primary resolved to, or `None` when there is no fallback.
    pub fn fallback_config(&self) -> Option<ProviderConfig> {
        let order = self.preference_order();
        let primary = order
            .iter()
            .copied()
            .find(|kind| self.create_config(*kind).is_some())?;

        for kind in order.into_iter().filter(|k| *k != primary) {
            if let Some(config) = self.create_config(kind) {
                info!("using {kind} as fallback provider");
                return Some(config);
            }
        }

        warn!("no fallback provider configuration available");
        None
    }
}

fn is_placeholder(api_key: &str) -> bool {
    let key = api_key.trim();
    key.is_empty()
        || key.starts_with("sk-your")
        || key.starts_with("your-")
        || key.eq_ignore_ascii_case("changeme")
}
