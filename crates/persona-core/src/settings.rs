use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::PersonaError;

pub const DEFAULT_AUTH_BASE_URL: &str = "https://api.anam.ai";
const TOKEN_PATH: &str = "v1/auth/session-token";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,
    #[serde(default = "default_token_timeout_secs")]
    pub token_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub start_muted: bool,
    #[serde(default = "default_true")]
    pub prefer_front_camera: bool,
    #[serde(default = "default_output_volume")]
    pub output_volume: f64,
}

fn default_auth_base_url() -> String {
    DEFAULT_AUTH_BASE_URL.to_string()
}

fn default_token_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_output_volume() -> f64 {
    1.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auth_base_url: default_auth_base_url(),
            token_timeout_secs: default_token_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            start_muted: false,
            prefer_front_camera: true,
            output_volume: default_output_volume(),
        }
    }
}

impl Settings {
    /// Full URL of the session-token endpoint under `auth_base_url`.
    pub fn token_endpoint(&self) -> Result<url::Url, PersonaError> {
        let mut base = url::Url::parse(&self.auth_base_url)
            .map_err(|e| PersonaError::Config(format!("auth_base_url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(TOKEN_PATH)
            .map_err(|e| PersonaError::Config(format!("auth_base_url: {e}")))
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> Settings {
        self.settings.lock().unwrap().clone()
    }

    pub fn set_auth_base_url(&self, url: String) {
        self.settings.lock().unwrap().auth_base_url = url;
        self.save();
    }

    pub fn set_token_timeout_secs(&self, secs: u64) {
        self.settings.lock().unwrap().token_timeout_secs = secs;
        self.save();
    }

    pub fn set_connect_timeout_secs(&self, secs: u64) {
        self.settings.lock().unwrap().connect_timeout_secs = secs;
        self.save();
    }

    pub fn set_start_muted(&self, muted: bool) {
        self.settings.lock().unwrap().start_muted = muted;
        self.save();
    }

    pub fn set_prefer_front_camera(&self, front: bool) {
        self.settings.lock().unwrap().prefer_front_camera = front;
        self.save();
    }

    pub fn set_output_volume(&self, volume: f64) {
        self.settings.lock().unwrap().output_volume = volume.clamp(0.0, 1.0);
        self.save();
    }

    fn save(&self) {
        let settings = self.settings.lock().unwrap().clone();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write settings: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &PathBuf) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable settings file: {e}");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}
