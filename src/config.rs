//! Configuration for the JoJo voice pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (JOJO_HOME, JOJO_COMPLETION_URL)
//! 2. Config file (.jojo/config.yaml)
//! 3. Defaults (~/.jojo)
//!
//! Config file discovery:
//! - Searches current directory and parents for .jojo/config.yaml
//! - `paths.home` in the config file is relative to the .jojo/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::{RecognitionSettings, VoiceSettings};

/// Hard ceiling for intent parsing
pub const MAX_PARSE_BUDGET_MS: u64 = 1000;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub wake_word: Option<WakeWordConfig>,
    #[serde(default)]
    pub recognition: Option<RecognitionConfig>,
    #[serde(default)]
    pub intent: Option<IntentConfig>,
    #[serde(default)]
    pub context: Option<ContextConfig>,
    #[serde(default)]
    pub alerts: Option<AlertsConfig>,
    #[serde(default)]
    pub voice: Option<VoiceConfig>,
    #[serde(default)]
    pub session: Option<SessionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .jojo/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WakeWordConfig {
    pub phrase: Option<String>,
    pub sensitivity: Option<f32>,
    pub debounce_ms: Option<u64>,
    pub restart_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    pub language: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub continuous: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentConfig {
    pub budget_ms: Option<u64>,
    pub completion_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    pub max_intents: Option<usize>,
    pub max_entities: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    pub check_interval_seconds: Option<u64>,
    pub expire_after_hours: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub name: Option<String>,
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub max_follow_ups: Option<usize>,
}

/// Wake-word detector settings
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordSettings {
    pub phrase: String,
    /// 0.0 - 1.0, higher accepts lower recognizer confidence
    pub sensitivity: f32,
    pub debounce: Duration,
    pub restart_delay: Duration,
    pub language: String,
}

impl Default for WakeWordSettings {
    fn default() -> Self {
        Self {
            phrase: "hey jojo".to_string(),
            sensitivity: 0.5,
            debounce: Duration::from_millis(1500),
            restart_delay: Duration::from_millis(250),
            language: "en-US".to_string(),
        }
    }
}

/// Utterance capture settings
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionEngineSettings {
    pub language: String,
    pub continuous: bool,
    pub timeout: Duration,
}

impl Default for RecognitionEngineSettings {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            continuous: false,
            timeout: Duration::from_secs(60),
        }
    }
}

impl RecognitionEngineSettings {
    pub fn recognition(&self) -> RecognitionSettings {
        RecognitionSettings {
            language: self.language.clone(),
            continuous: self.continuous,
            interim_results: true,
        }
    }
}

/// Intent parser settings
#[derive(Debug, Clone, PartialEq)]
pub struct IntentSettings {
    /// Clamped to MAX_PARSE_BUDGET_MS
    pub budget: Duration,
    pub completion_url: Option<String>,
}

impl Default for IntentSettings {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(MAX_PARSE_BUDGET_MS),
            completion_url: None,
        }
    }
}

/// Context manager bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSettings {
    pub max_intents: usize,
    pub max_entities: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_intents: 10,
            max_entities: 20,
        }
    }
}

/// Alert scheduler settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertSettings {
    pub check_interval: Duration,
    pub expire_after: chrono::Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            expire_after: chrono::Duration::hours(24),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the JoJo home (persisted state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub wake_word: WakeWordSettings,
    pub recognition: RecognitionEngineSettings,
    pub intent: IntentSettings,
    pub context: ContextSettings,
    pub alerts: AlertSettings,
    pub voice: VoiceSettings,
    pub max_follow_ups: usize,
}

impl ResolvedConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            home,
            config_file: None,
            wake_word: WakeWordSettings::default(),
            recognition: RecognitionEngineSettings::default(),
            intent: IntentSettings::default(),
            context: ContextSettings::default(),
            alerts: AlertSettings::default(),
            voice: VoiceSettings::default(),
            max_follow_ups: 2,
        }
    }

    /// Apply the sections of a parsed config file
    fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(wake) = &file.wake_word {
            if let Some(phrase) = &wake.phrase {
                self.wake_word.phrase = phrase.clone();
            }
            if let Some(sensitivity) = wake.sensitivity {
                self.wake_word.sensitivity = sensitivity.clamp(0.0, 1.0);
            }
            if let Some(ms) = wake.debounce_ms {
                self.wake_word.debounce = Duration::from_millis(ms);
            }
            if let Some(ms) = wake.restart_delay_ms {
                self.wake_word.restart_delay = Duration::from_millis(ms);
            }
        }

        if let Some(recognition) = &file.recognition {
            if let Some(language) = &recognition.language {
                self.recognition.language = language.clone();
                self.wake_word.language = language.clone();
                self.voice.language = language.clone();
            }
            if let Some(secs) = recognition.timeout_seconds {
                self.recognition.timeout = Duration::from_secs(secs);
            }
            if let Some(continuous) = recognition.continuous {
                self.recognition.continuous = continuous;
            }
        }

        if let Some(intent) = &file.intent {
            if let Some(ms) = intent.budget_ms {
                self.intent.budget = Duration::from_millis(ms.min(MAX_PARSE_BUDGET_MS));
            }
            if intent.completion_url.is_some() {
                self.intent.completion_url = intent.completion_url.clone();
            }
        }

        if let Some(context) = &file.context {
            if let Some(n) = context.max_intents {
                self.context.max_intents = n.max(1);
            }
            if let Some(n) = context.max_entities {
                self.context.max_entities = n.max(1);
            }
        }

        if let Some(alerts) = &file.alerts {
            if let Some(secs) = alerts.check_interval_seconds {
                self.alerts.check_interval = Duration::from_secs(secs.max(1));
            }
            if let Some(hours) = alerts.expire_after_hours {
                self.alerts.expire_after = chrono::Duration::hours(hours.max(1));
            }
        }

        if let Some(voice) = &file.voice {
            if voice.name.is_some() {
                self.voice.name = voice.name.clone();
            }
            if let Some(rate) = voice.rate {
                self.voice.rate = rate;
            }
            if let Some(pitch) = voice.pitch {
                self.voice.pitch = pitch;
            }
            if let Some(volume) = voice.volume {
                self.voice.volume = volume.clamp(0.0, 1.0);
            }
        }

        if let Some(session) = &file.session {
            if let Some(n) = session.max_follow_ups {
                self.max_follow_ups = n;
            }
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".jojo").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".jojo");

    let config_file = find_config_file();

    let mut resolved = if let Some(ref config_path) = config_file {
        let file = load_config_file(config_path)?;

        let jojo_dir = config_path.parent().unwrap_or(Path::new("."));
        let home = match &file.paths.home {
            Some(home_path) => resolve_path(jojo_dir, home_path),
            None => default_home,
        };

        let mut resolved = ResolvedConfig::with_home(home);
        resolved.apply_file(&file);
        resolved.config_file = Some(config_path.clone());
        resolved
    } else {
        ResolvedConfig::with_home(default_home)
    };

    // Environment wins over the file
    if let Ok(env_home) = std::env::var("JOJO_HOME") {
        resolved.home = PathBuf::from(env_home);
    }
    if let Ok(url) = std::env::var("JOJO_COMPLETION_URL") {
        if !url.trim().is_empty() {
            resolved.intent.completion_url = Some(url);
        }
    }

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the JoJo home directory
pub fn jojo_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the key-value store path ($JOJO_HOME/store.json)
pub fn store_path() -> Result<PathBuf> {
    Ok(config()?.home.join("store.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ResolvedConfig::with_home(PathBuf::from("/tmp/.jojo"));

        assert_eq!(config.wake_word.phrase, "hey jojo");
        assert_eq!(config.wake_word.sensitivity, 0.5);
        assert_eq!(config.recognition.timeout, Duration::from_secs(60));
        assert_eq!(config.intent.budget, Duration::from_millis(1000));
        assert!(config.intent.completion_url.is_none());
        assert_eq!(config.context.max_intents, 10);
        assert_eq!(config.alerts.check_interval, Duration::from_secs(60));
        assert_eq!(config.max_follow_ups, 2);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let jojo_dir = temp.path().join(".jojo");
        std::fs::create_dir_all(&jojo_dir).unwrap();

        let config_path = jojo_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
wake_word:
  phrase: "okay jojo"
  sensitivity: 0.7
recognition:
  language: en-GB
  timeout_seconds: 20
intent:
  budget_ms: 5000
  completion_url: http://localhost:8000/chat
alerts:
  check_interval_seconds: 30
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("1.0"));
        assert_eq!(parsed.paths.home.as_deref(), Some("./state"));

        let mut config = ResolvedConfig::with_home(PathBuf::from("/tmp/.jojo"));
        config.apply_file(&parsed);

        assert_eq!(config.wake_word.phrase, "okay jojo");
        assert_eq!(config.wake_word.sensitivity, 0.7);
        assert_eq!(config.recognition.language, "en-GB");
        assert_eq!(config.wake_word.language, "en-GB");
        assert_eq!(config.recognition.timeout, Duration::from_secs(20));
        // Budget above the ceiling is clamped
        assert_eq!(config.intent.budget, Duration::from_millis(1000));
        assert_eq!(
            config.intent.completion_url.as_deref(),
            Some("http://localhost:8000/chat")
        );
        assert_eq!(config.alerts.check_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.jojo");

        assert_eq!(
            resolve_path(&base, "./state"),
            PathBuf::from("/home/user/project/.jojo/./state")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
