//! Settings record
//!
//! A versioned configuration document stored under the platform config
//! directory. The recognition fields (`language`, `temperature`,
//! `initial_prompt`, provider, key, model) are input-capture only: the
//! engine reads its key from the environment and uses its own session
//! defaults, so editing these values does not change recognition
//! behavior.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const SETTINGS_FILE_NAME: &str = "settings.json";
const SETTINGS_DIR_NAME: &str = "voicepad";

/// Current on-disk document version.
pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiProvider {
    #[default]
    OpenAi,
    Azure,
    Google,
}

impl fmt::Display for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiProvider::OpenAi => write!(f, "openai"),
            ApiProvider::Azure => write!(f, "azure"),
            ApiProvider::Google => write!(f, "google"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// On-disk document version. Unknown versions fall back to
    /// defaults on load.
    pub version: u32,

    /// Use an external recognition API rather than a local engine.
    pub use_api: bool,

    /// Language code (e.g. "en", "fr").
    pub language: String,

    /// Decoding temperature. Clamped to 0.0..=1.0 on load.
    pub temperature: f32,

    /// Text to bias the recognizer at session start.
    pub initial_prompt: String,

    pub api_provider: ApiProvider,

    /// Stored for the settings form; the engine authenticates with the
    /// key from the environment instead.
    pub api_key: String,

    pub model: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            use_api: true,
            language: "en".to_string(),
            temperature: 0.0,
            initial_prompt: String::new(),
            api_provider: ApiProvider::OpenAi,
            api_key: String::new(),
            model: "whisper-1".to_string(),
        }
    }
}

impl AppSettings {
    /// Bring loaded values back into their documented ranges.
    fn normalized(mut self) -> Self {
        if self.version != SETTINGS_VERSION {
            log::warn!(
                "Settings: unknown version {} (expected {}), using defaults",
                self.version,
                SETTINGS_VERSION
            );
            return Self::default();
        }
        self.temperature = self.temperature.clamp(0.0, 1.0);
        self
    }
}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

fn load_from(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings.normalized(),
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

fn save_to(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: temp file in the same directory, then rename.
    // This prevents a partial settings.json if the app dies mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename atomically replaces the destination. On Windows,
    // rename fails if the destination exists, so remove it first.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))
}

pub fn load_settings() -> AppSettings {
    match settings_path() {
        Ok(path) => load_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(settings: &AppSettings) -> Result<(), String> {
    let path = settings_path()?;
    save_to(&path, settings)
}

/// Load the settings record, writing the default document on first run
/// so the on-disk contract is visible.
pub fn load_or_init() -> AppSettings {
    let path = match settings_path() {
        Ok(path) => path,
        Err(e) => {
            log::warn!("Settings: {}", e);
            return AppSettings::default();
        }
    };

    let settings = load_from(&path);
    if !path.exists() {
        if let Err(e) = save_to(&path, &settings) {
            log::warn!("Settings: failed to write defaults: {}", e);
        }
    }
    settings
}
