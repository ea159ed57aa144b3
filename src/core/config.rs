use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::state::{DEFAULT_CHAPTERS, MAX_CHAPTERS, MIN_CHAPTERS};
use crate::services::llm::LlmConfig;

pub const CONFIG_FILE: &str = "config.yml";
pub const MODEL_ENV: &str = "NOVELGEN_MODEL";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_export_file")]
    pub export_file: String,

    #[serde(default = "default_chapters")]
    pub default_chapters: u32,

    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_output() -> String {
    "output".to_string()
}
fn default_export_file() -> String {
    "novel.json".to_string()
}
fn default_chapters() -> u32 {
    DEFAULT_CHAPTERS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            export_file: default_export_file(),
            default_chapters: default_chapters(),
            llm: LlmConfig::default(),
        }
    }
}

/// Environment variable holding the API key for a provider.
pub fn api_key_env(provider: &str) -> Option<&'static str> {
    match provider {
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "gemini" => Some("GEMINI_API_KEY"),
        _ => None,
    }
}

impl Config {
    /// Reads `config.yml` if present, then applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(CONFIG_FILE))?;
        let api_key = api_key_env(&config.llm.provider).and_then(|name| std::env::var(name).ok());
        let model = std::env::var(MODEL_ENV).ok();
        config.apply_overrides(api_key, model);
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, api_key: Option<String>, model: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.llm.set_api_key(key);
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.llm.model = Some(model);
        }
    }

    /// Fails when the selected provider has no API key; the binary cannot start without one.
    pub fn validate(&self) -> Result<()> {
        if self.llm.requires_api_key() && self.llm.api_key().is_none() {
            let hint = api_key_env(&self.llm.provider).unwrap_or("the config file");
            anyhow::bail!(
                "No API key configured for provider '{}'. Set {} or add it to {}.",
                self.llm.provider,
                hint,
                CONFIG_FILE
            );
        }
        if !(MIN_CHAPTERS..=MAX_CHAPTERS).contains(&self.default_chapters) {
            anyhow::bail!(
                "default_chapters must be between {} and {}",
                MIN_CHAPTERS,
                MAX_CHAPTERS
            );
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)
            .with_context(|| format!("Failed to create {}", self.output_folder))?;
        Ok(())
    }

    pub fn export_path(&self) -> PathBuf {
        Path::new(&self.output_folder).join(&self.export_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.yml")).unwrap();
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.default_chapters, 25);
        assert_eq!(config.llm.provider, "openrouter");
        assert_eq!(config.llm.retry_count, 3);
        assert_eq!(config.llm.retry_delay_seconds, 2);
    }

    #[test]
    fn test_parses_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "output_folder: novels\n\
             llm:\n  provider: gemini\n  retry_count: 5\n  gemini:\n    api_key: g-123\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.output_folder, "novels");
        assert_eq!(config.export_file, "novel.json");
        assert_eq!(config.llm.retry_count, 5);
        assert_eq!(config.llm.retry_delay_seconds, 2);
        assert_eq!(config.llm.api_key(), Some("g-123"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "llm: [not, a, map]").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let mut config = Config::default();
        config.llm.provider = "ollama".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(Some("sk-or-1".to_string()), Some("  ".to_string()));
        assert_eq!(config.llm.api_key(), Some("sk-or-1"));
        assert_eq!(config.llm.model, None);

        config.apply_overrides(None, Some("openai/gpt-4o".to_string()));
        assert_eq!(config.llm.model_name(), "openai/gpt-4o");
        assert_eq!(config.llm.api_key(), Some("sk-or-1"));
    }

    #[test]
    fn test_export_path() {
        let config = Config::default();
        assert_eq!(config.export_path(), Path::new("output").join("novel.json"));
    }
}
