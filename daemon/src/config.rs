//! Configuration loading and management
//!
//! Defaults, then an optional `config.json` in the data directory, then
//! environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sampler::{GestureSettings, VoiceSettings};

const CONFIG_FILE: &str = "config.json";
const DEFAULT_API_URL: &str = "https://toolkit.rork.com";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data and the call stores
    pub data_dir: PathBuf,

    /// Run on scripted recognition backends and static capture
    pub simulate: bool,

    pub backend: BackendConfig,
    pub gesture: GestureConfig,
    pub voice: VoiceConfig,
    pub capture: CaptureConfig,
}

/// Recognition service endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub llm_url: String,
    pub stt_url: String,
    pub language: String,
    pub timeout_ms: u64,
}

impl BackendConfig {
    fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            llm_url: format!("{base}/text/llm/"),
            stt_url: format!("{base}/stt/transcribe/"),
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            llm_url: String::new(),
            stt_url: String::new(),
            language: "en".to_string(),
            timeout_ms: 8_000,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_API_URL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub period_ms: u64,
    /// Presence-watch period while idle; off when unset
    pub idle_watch_ms: Option<u64>,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            period_ms: 2_000,
            idle_watch_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub trigger_period_ms: u64,
    pub trigger_clip_ms: u64,
    pub command_period_ms: u64,
    pub command_clip_ms: u64,
    pub command_retry_limit: u32,
    pub trigger_phrases: Vec<String>,
    pub always_listening: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let settings = VoiceSettings::default();
        Self {
            trigger_period_ms: settings.trigger_period.as_millis() as u64,
            trigger_clip_ms: settings.trigger_clip.as_millis() as u64,
            command_period_ms: settings.command_period.as_millis() as u64,
            command_clip_ms: settings.command_clip.as_millis() as u64,
            command_retry_limit: settings.retry_limit,
            trigger_phrases: settings.trigger_phrases,
            always_listening: settings.always_listening,
        }
    }
}

/// Spool directories the platform capture layer writes into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub frames_dir: PathBuf,
    pub clips_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaptureOverrides {
    frames_dir: Option<PathBuf>,
    clips_dir: Option<PathBuf>,
}

/// On-disk shape of `config.json`; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    simulate: bool,
    backend: Option<BackendConfig>,
    gesture: GestureConfig,
    voice: VoiceConfig,
    capture: CaptureOverrides,
}

impl Config {
    /// Load configuration from defaults, `config.json` and the environment
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("CALL_GENIE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(&home)
                    .join(".local")
                    .join("share")
                    .join("call-genie")
            }
        };

        Self::resolve(data_dir, |key| std::env::var(key).ok())
    }

    /// Build the configuration rooted at `data_dir`, reading overrides through `env`
    fn resolve(data_dir: PathBuf, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = read_config_file(&data_dir.join(CONFIG_FILE))?;

        let backend = match env("CALL_GENIE_API_URL") {
            Some(url) if !url.trim().is_empty() => BackendConfig {
                timeout_ms: file.backend.as_ref().map_or(8_000, |b| b.timeout_ms),
                language: file
                    .backend
                    .as_ref()
                    .map_or_else(|| "en".to_string(), |b| b.language.clone()),
                ..BackendConfig::with_base_url(url.trim())
            },
            _ => file.backend.unwrap_or_default(),
        };

        let simulate = match env("CALL_GENIE_SIMULATE") {
            Some(flag) => matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => file.simulate,
        };

        let spool = data_dir.join("spool");
        let capture = CaptureConfig {
            frames_dir: file.capture.frames_dir.unwrap_or_else(|| spool.join("frames")),
            clips_dir: file.capture.clips_dir.unwrap_or_else(|| spool.join("clips")),
        };

        Ok(Self {
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
            simulate,
            backend,
            gesture: file.gesture,
            voice: file.voice,
            capture,
        })
    }

    /// Ensure data and spool directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.capture.frames_dir, &self.capture.clips_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn gesture_settings(&self) -> GestureSettings {
        GestureSettings {
            period: Duration::from_millis(self.gesture.period_ms),
            idle_watch: self.gesture.idle_watch_ms.map(Duration::from_millis),
            request_timeout: self.backend.timeout(),
        }
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            trigger_period: Duration::from_millis(self.voice.trigger_period_ms),
            trigger_clip: Duration::from_millis(self.voice.trigger_clip_ms),
            command_period: Duration::from_millis(self.voice.command_period_ms),
            command_clip: Duration::from_millis(self.voice.command_clip_ms),
            request_timeout: self.backend.timeout(),
            retry_limit: self.voice.command_retry_limit,
            trigger_phrases: self.voice.trigger_phrases.clone(),
            always_listening: self.voice.always_listening,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data)
            .with_context(|| format!("invalid config file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no config file, using defaults");
            Ok(ConfigFile::default())
        }
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), no_env).unwrap();

        assert_eq!(config.socket_path, dir.path().join("daemon.sock"));
        assert!(!config.simulate);
        assert_eq!(config.backend.llm_url, "https://toolkit.rork.com/text/llm/");
        assert_eq!(config.capture.clips_dir, dir.path().join("spool").join("clips"));

        let gesture = config.gesture_settings();
        assert_eq!(gesture.period, Duration::from_secs(2));
        assert_eq!(gesture.idle_watch, None);

        let voice = config.voice_settings();
        assert_eq!(voice.trigger_period, Duration::from_secs(4));
        assert_eq!(voice.trigger_clip, Duration::from_secs(3));
        assert_eq!(voice.command_clip, Duration::from_secs(5));
        assert_eq!(voice.request_timeout, Duration::from_secs(8));
        assert_eq!(voice.retry_limit, 3);
        assert!(voice.trigger_phrases.iter().any(|p| p == "hey genie"));
        assert!(voice.always_listening);
    }

    #[test]
    fn test_config_file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{
                "simulate": true,
                "gesture": { "idle_watch_ms": 5000 },
                "voice": { "trigger_phrases": ["okay phone"], "command_retry_limit": 1 }
            }"#,
        )
        .unwrap();

        let config = Config::resolve(dir.path().to_path_buf(), no_env).unwrap();
        assert!(config.simulate);
        assert_eq!(config.gesture.period_ms, 2_000);
        assert_eq!(config.gesture_settings().idle_watch, Some(Duration::from_secs(5)));
        assert_eq!(config.voice.trigger_phrases, vec!["okay phone"]);
        assert_eq!(config.voice.command_retry_limit, 1);
        assert_eq!(config.voice.trigger_clip_ms, 3_000);
        assert!(config.voice_settings().always_listening);
    }

    #[test]
    fn test_always_listening_can_start_off() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "voice": { "always_listening": false } }"#,
        )
        .unwrap();

        let config = Config::resolve(dir.path().to_path_buf(), no_env).unwrap();
        assert!(!config.voice_settings().always_listening);
        assert_eq!(config.voice.command_retry_limit, 3);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "simulate": true, "backend": { "timeout_ms": 2000 } }"#,
        )
        .unwrap();

        let config = Config::resolve(dir.path().to_path_buf(), |key| match key {
            "CALL_GENIE_SIMULATE" => Some("0".into()),
            "CALL_GENIE_API_URL" => Some("http://localhost:8080/".into()),
            _ => None,
        })
        .unwrap();

        assert!(!config.simulate);
        assert_eq!(config.backend.llm_url, "http://localhost:8080/text/llm/");
        assert_eq!(config.backend.stt_url, "http://localhost:8080/stt/transcribe/");
        assert_eq!(config.backend.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        assert!(Config::resolve(dir.path().to_path_buf(), no_env).is_err());
    }

    #[test]
    fn test_ensure_dirs_creates_spools() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path().join("nested"), no_env).unwrap();
        config.ensure_dirs().unwrap();
        assert!(config.capture.frames_dir.is_dir());
        assert!(config.capture.clips_dir.is_dir());
    }
}
