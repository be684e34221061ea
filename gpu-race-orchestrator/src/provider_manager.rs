use gpu_race_providers::InstanceProvider;
use std::env;
use std::fs;
use std::sync::Arc;

#[cfg(feature = "provider-http")]
use gpu_race_providers::http::HttpProvider;
#[cfg(feature = "provider-mock")]
use gpu_race_providers::mock::{MockProvider, OfferScript};

pub struct ProviderManager;

impl ProviderManager {
    pub fn current_provider_name() -> String {
        env::var("PROVIDER").unwrap_or_else(|_| "http".to_string())
    }

    pub fn get_provider(provider_name: &str) -> Option<Arc<dyn InstanceProvider>> {
        match provider_name.trim().to_lowercase().as_str() {
            #[cfg(feature = "provider-http")]
            "http" => {
                let settings = ApiSettings::from_env()?;
                match HttpProvider::new(settings.base_url, settings.api_token) {
                    Ok(provider) => Some(Arc::new(provider)),
                    Err(e) => {
                        tracing::error!("❌ [provider] Failed to build HTTP provider: {:#}", e);
                        None
                    }
                }
            }
            // Demo marketplace: every instance boots after a few polls.
            #[cfg(feature = "provider-mock")]
            "mock" => Some(Arc::new(MockProvider::new().with_default_script(
                OfferScript::statuses(&["created", "loading", "loading", "running"]),
            ))),
            _ => None,
        }
    }
}

/// Backend location and credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub base_url: String,
    pub api_token: String,
}

impl ApiSettings {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let base_url = lookup("GPU_API_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())?;
        // Prefer *_FILE for secrets (Docker/K8s friendly), fallback to env var.
        let token_file = lookup("GPU_API_TOKEN_FILE")
            .unwrap_or_else(|| "/run/secrets/gpu_api_token".to_string());
        let api_token = fs::read_to_string(&token_file)
            .ok()
            .or_else(|| lookup("GPU_API_TOKEN"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())?;
        Some(Self {
            base_url,
            api_token,
        })
    }
}
