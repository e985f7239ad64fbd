use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::pipeline::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub ai_model: AiModelConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub path: String,
    #[serde(default = "default_daily_notes_folder")]
    pub daily_notes_folder: String,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VerificationConfig {
    pub verify_writes: bool,
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    pub strict_mode: bool,
    pub recency_window_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            verify_writes: true,
            max_retries: 2,
            retry_delay_secs: 0.5,
            strict_mode: true,
            recency_window_secs: 10,
        }
    }
}

impl VerificationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            verify_writes: self.verify_writes,
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs_f64(self.retry_delay_secs),
            strict_mode: self.strict_mode,
        }
    }

    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.recency_window_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    pub require_tool_for_writes: bool,
    pub require_tool_for_reads: bool,
    pub history_limit: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            require_tool_for_writes: true,
            require_tool_for_reads: true,
            history_limit: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_temperature() -> f32 {
    0.3
}

fn default_daily_notes_folder() -> String {
    crate::vault::DEFAULT_DAILY_NOTES_FOLDER.to_string()
}

fn default_sessions_dir() -> String {
    "./sessions".to_string()
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context("Failed to read config file. Make sure config.toml exists.")?;

        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TELOXIDE_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Ok(path) = std::env::var("VAULT_PATH") {
            self.vault.path = path;
        }

        let key_var = match self.ai_model.provider.as_str() {
            "openai" => Some("OPENAI_API_KEY"),
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            _ => None,
        };
        if let Some(Ok(key)) = key_var.map(std::env::var) {
            self.ai_model.api_key = Some(key);
        }
    }

    /// Range checks for the options the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        let v = &self.verification;
        if v.max_retries > 5 {
            bail!("verification.max_retries must be between 0 and 5 (got {})", v.max_retries);
        }
        if !(0.0..=5.0).contains(&v.retry_delay_secs) {
            bail!(
                "verification.retry_delay_secs must be between 0.0 and 5.0 (got {})",
                v.retry_delay_secs
            );
        }
        match self.ai_model.provider.as_str() {
            "ollama" | "openai" | "anthropic" => {}
            other => bail!("Unknown ai_model.provider '{}' (expected ollama, openai or anthropic)", other),
        }
        if self.vault.path.trim().is_empty() {
            bail!("vault.path must not be empty");
        }
        Ok(())
    }

    /// Create vault and session directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.vault.path).context("Failed to create vault directory")?;
        fs::create_dir_all(&self.vault.sessions_dir).context("Failed to create sessions directory")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [telegram]
        bot_token = "test_token"

        [ai_model]
        provider = "ollama"
        model = "qwen2.5:7b"
        endpoint = "http://localhost:11434"
        temperature = 0.7

        [vault]
        path = "./vault"
        daily_notes_folder = "Journal"
        sessions_dir = "./sessions"

        [verification]
        verify_writes = true
        max_retries = 3
        retry_delay_secs = 1.5
        strict_mode = false
        recency_window_secs = 20

        [conversation]
        require_tool_for_writes = true
        require_tool_for_reads = false
        history_limit = 10

        [logging]
        level = "debug"
    "#;

    #[test]
    fn test_config_parsing() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.telegram.bot_token, "test_token");
        assert_eq!(config.vault.daily_notes_folder, "Journal");
        assert!(!config.conversation.require_tool_for_reads);
        assert_eq!(config.logging.level, "debug");

        let policy = config.verification.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay, Duration::from_millis(1500));
        assert!(!policy.strict_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_for_optional_sections() {
        let config = Config::from_toml(
            r#"
            [telegram]
            bot_token = "t"

            [ai_model]
            provider = "openai"
            model = "gpt-4o-mini"

            [vault]
            path = "/tmp/vault"
        "#,
        )
        .unwrap();

        assert!(config.verification.verify_writes);
        assert_eq!(config.verification.max_retries, 2);
        assert_eq!(config.verification.retry_delay_secs, 0.5);
        assert!(config.verification.strict_mode);
        assert_eq!(config.conversation.history_limit, 20);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.vault.daily_notes_folder, "Daily Notes");
        assert!(config.ai_model.endpoint.is_none());
    }

    #[test]
    fn test_out_of_range_options_are_rejected() {
        let mut config = Config::from_toml(FULL).unwrap();
        config.verification.max_retries = 6;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(FULL).unwrap();
        config.verification.retry_delay_secs = -0.1;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(FULL).unwrap();
        config.ai_model.provider = "gemini".to_string();
        assert!(config.validate().is_err());
    }
}
