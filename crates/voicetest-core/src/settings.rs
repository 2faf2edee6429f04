use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::BrokerMethod;
use crate::transport::ConnectOptions;

pub const ENV_CREDENTIAL_URL: &str = "VOICETEST_CREDENTIAL_URL";
pub const ENV_CREDENTIAL_METHOD: &str = "VOICETEST_CREDENTIAL_METHOD";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "VOICETEST_REQUEST_TIMEOUT_SECS";

const DEFAULT_CREDENTIAL_ENDPOINT: &str = "http://localhost:3000/api/livekit/token";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default = "default_credential_endpoint")]
    pub credential_endpoint: String,
    #[serde(default)]
    pub credential_method: BrokerMethod,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub mic_enabled_on_join: bool,
    #[serde(default)]
    pub camera_enabled_on_join: bool,
}

fn default_credential_endpoint() -> String {
    DEFAULT_CREDENTIAL_ENDPOINT.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            credential_endpoint: default_credential_endpoint(),
            credential_method: BrokerMethod::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            mic_enabled_on_join: true,
            camera_enabled_on_join: false,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            audio: self.mic_enabled_on_join,
            video: self.camera_enabled_on_join,
        }
    }

    /// Overlay `VOICETEST_*` environment variables. Unparseable values are
    /// ignored with a warning.
    pub fn with_env_overrides(mut self, vars: &HashMap<String, String>) -> Self {
        if let Some(url) = vars.get(ENV_CREDENTIAL_URL).filter(|v| !v.trim().is_empty()) {
            self.credential_endpoint = url.trim().to_string();
        }
        if let Some(method) = vars.get(ENV_CREDENTIAL_METHOD) {
            match method.trim().to_ascii_lowercase().as_str() {
                "get" => self.credential_method = BrokerMethod::Get,
                "post" => self.credential_method = BrokerMethod::Post,
                other => tracing::warn!("ignoring {ENV_CREDENTIAL_METHOD}={other}: expected get or post"),
            }
        }
        if let Some(secs) = vars.get(ENV_REQUEST_TIMEOUT_SECS) {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => tracing::warn!("ignoring {ENV_REQUEST_TIMEOUT_SECS}={secs}: expected a positive integer"),
            }
        }
        self
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides(&std::env::vars().collect())
    }
}

/// Settings persisted as `settings.json` in a data directory.
pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    pub fn set_credential_endpoint(&self, endpoint: String) {
        self.lock().credential_endpoint = endpoint;
        self.save();
    }

    pub fn set_credential_method(&self, method: BrokerMethod) {
        self.lock().credential_method = method;
        self.save();
    }

    pub fn set_mic_enabled_on_join(&self, enabled: bool) {
        self.lock().mic_enabled_on_join = enabled;
        self.save();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("corrupt {}, using defaults: {e}", path.display());
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}
