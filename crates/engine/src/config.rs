use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime configuration for the re-encoding engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where the persisted state document lives
    pub state_path: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// H.264 CRF for re-encodes (lower = higher quality, larger file)
    pub video_crf: u8,
    /// AAC audio bitrate in kbit/s
    pub audio_bitrate_kbps: u32,
    /// How often the worker re-checks pause/stop flags and in-flight encodes
    pub poll_interval_ms: u64,
    /// Cooldown between files, bounding sustained thermal/IO load
    pub cooldown_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl EngineConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            state_path: PathBuf::from("compress-state.json"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            video_crf: 28,
            audio_bitrate_kbps: 128,
            poll_interval_ms: 250,
            cooldown_ms: 2_000,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or
    /// the file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path).with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

                // Try JSON first, then TOML
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content).with_context(|| {
                        format!("Failed to parse TOML config: {}", config_path.display())
                    })?;
                } else {
                    config = serde_json::from_str(&content).with_context(|| {
                        format!("Failed to parse JSON config: {}", config_path.display())
                    })?;
                }
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cfg = EngineConfig::load_config(Some(Path::new("/nonexistent/config.json"))).unwrap();
        assert_eq!(cfg.video_crf, 28);
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn partial_json_config_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"video_crf": 23}"#).unwrap();

        let cfg = EngineConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.video_crf, 23);
        assert_eq!(cfg.audio_bitrate_kbps, 128);
    }

    #[test]
    fn toml_config_is_accepted_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "video_crf = 20\ncooldown_ms = 0\n").unwrap();

        let cfg = EngineConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.video_crf, 20);
        assert_eq!(cfg.cooldown_ms, 0);
    }
}
