use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::message::ChatMessage;
use crate::settings::Settings;

const APP_DIR: &str = "gemini-chat";
const SETTINGS_FILE: &str = "settings.json";
const SESSION_FILE: &str = "chat_session.json";

pub type SettingsStore = JsonStore<Settings>;
pub type SessionStore = JsonStore<Vec<ChatMessage>>;

/// Whole-file JSON persistence. Reads never fail: anything unreadable
/// comes back as `T::default()`.
pub struct JsonStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> T {
        if !self.path.exists() {
            debug!("{} does not exist yet, using defaults", self.path.display());
            return T::default();
        }

        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return T::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring malformed {}: {}", self.path.display(), e);
                T::default()
            }
        }
    }

    pub fn save(&self, value: &T) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn default_settings_path() -> PathBuf {
    app_data_dir().join(SETTINGS_FILE)
}

pub fn default_session_path() -> PathBuf {
    app_data_dir().join(SESSION_FILE)
}
