use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stepseq_core::{DEFAULT_BPM, DEFAULT_MAX_HISTORY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepseqConfig {
    pub bpm: u32,
    pub history_limit: usize,
    /// Default tracing directive; `RUST_LOG` wins when set
    pub log_filter: String,
    pub preview_duration_ms: f64,
    pub demo_seconds: u64,
}

impl Default for StepseqConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            history_limit: DEFAULT_MAX_HISTORY,
            log_filter: "stepseq=info".to_string(),
            preview_duration_ms: 250.0,
            demo_seconds: 8,
        }
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepseq")
        .join("config.toml")
}

/// Missing or unreadable config falls back to defaults
pub fn load_config() -> StepseqConfig {
    let path = config_path();
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|s| toml::from_str(&s).ok())
        .unwrap_or_default()
}

pub fn save_config(config: &StepseqConfig) -> anyhow::Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, toml::to_string_pretty(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: StepseqConfig = toml::from_str("bpm = 90\n").unwrap();
        assert_eq!(config.bpm, 90);
        assert_eq!(config.history_limit, DEFAULT_MAX_HISTORY);
        assert_eq!(config.log_filter, "stepseq=info");
    }

    #[test]
    fn test_toml_round_trip() {
        let config = StepseqConfig { demo_seconds: 3, ..Default::default() };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<StepseqConfig>(&text).unwrap(), config);
    }
}
