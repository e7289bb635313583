use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::gemini::{DEFAULT_API_BASE, DEFAULT_TIMEOUT};
use crate::store;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Desktop chat client for the Gemini API", long_about = None)]
pub struct Args {
    /// Fallback Gemini API key, used when none is saved in the settings file
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the generative language API
    #[arg(long, env = "GEMINI_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Settings file (defaults to <config dir>/gemini-chat/settings.json)
    #[arg(long, env = "CHAT_SETTINGS_PATH")]
    pub settings_path: Option<PathBuf>,

    /// Conversation history file (defaults to <config dir>/gemini-chat/chat_session.json)
    #[arg(long, env = "CHAT_SESSION_PATH")]
    pub session_path: Option<PathBuf>,

    /// Timeout in seconds for a single request
    #[arg(long, env = "CHAT_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub request_timeout_secs: u64,
}

impl Args {
    pub fn settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(store::default_settings_path)
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_path
            .clone()
            .unwrap_or_else(store::default_session_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
