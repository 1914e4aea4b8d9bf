//! Process-wide settings, resolved once at startup and passed by
//! reference into each component.

use anyhow::{anyhow, Result};
use secrecy::SecretString;
use std::time::Duration;

use crate::cli::Args;

pub const DEFAULT_MODEL: &str = "gpt-5";
pub const DEFAULT_EFFORT: &str = "medium";
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ENRICH_BASE_URL: &str = "https://api.personlookup.io/v1";
pub const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_secs(12);

/// Everything the components need from the environment, gathered in one
/// place so tests can construct them with fake values.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Model-provider credential. The only fatal startup requirement.
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    /// Reasoning-effort hint sent with each turn.
    pub effort: String,
    /// Externally supplied conversation handle, if any.
    pub conversation_override: Option<String>,
    pub enrich_api_key: Option<String>,
    pub enrich_base_url: String,
    pub enrich_timeout: Duration,
    /// Base URL of the configuration document service.
    pub config_url: Option<String>,
}

impl Settings {
    /// Build settings from the environment (after dotenv) plus CLI
    /// overrides. Fails only when the provider credential is missing.
    pub fn from_env(args: &Args) -> Result<Self> {
        let api_key = env_nonempty("OPENAI_API_KEY")
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;

        let model = args
            .model
            .clone()
            .or_else(|| env_nonempty("INTAKE_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let conversation_override = args
            .conversation
            .clone()
            .or_else(|| env_nonempty("INTAKE_CONVERSATION_ID"));

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url: env_nonempty("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string()),
            model,
            effort: DEFAULT_EFFORT.to_string(),
            conversation_override,
            enrich_api_key: env_nonempty("ENRICH_API_KEY"),
            enrich_base_url: env_nonempty("ENRICH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ENRICH_BASE_URL.to_string()),
            enrich_timeout: DEFAULT_ENRICH_TIMEOUT,
            config_url: env_nonempty("INTAKE_CONFIG_URL"),
        })
    }
}

/// Read an environment variable, treating empty values as unset.
fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "OPENAI_API_KEY",
            "OPENAI_BASE_URL",
            "INTAKE_MODEL",
            "INTAKE_CONVERSATION_ID",
            "ENRICH_API_KEY",
            "ENRICH_BASE_URL",
            "INTAKE_CONFIG_URL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_provider_key_is_an_error() {
        clear_env();
        let err = Settings::from_env(&Args::default()).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    #[serial]
    fn defaults_apply_when_env_is_minimal() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        let settings = Settings::from_env(&Args::default()).unwrap();
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.base_url, DEFAULT_PROVIDER_BASE_URL);
        assert_eq!(settings.effort, DEFAULT_EFFORT);
        assert!(settings.conversation_override.is_none());
        assert!(settings.enrich_api_key.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn cli_flags_win_over_env() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("INTAKE_MODEL", "gpt-5-mini");
        std::env::set_var("INTAKE_CONVERSATION_ID", "conv-env");
        let args = Args {
            model: Some("gpt-5".to_string()),
            conversation: Some("conv-cli".to_string()),
            ..Args::default()
        };
        let settings = Settings::from_env(&args).unwrap();
        assert_eq!(settings.model, "gpt-5");
        assert_eq!(settings.conversation_override.as_deref(), Some("conv-cli"));
        clear_env();
    }

    #[test]
    #[serial]
    fn empty_env_values_are_treated_as_unset() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("INTAKE_MODEL", "  ");
        let settings = Settings::from_env(&Args::default()).unwrap();
        assert_eq!(settings.model, DEFAULT_MODEL);
        clear_env();
    }
}
