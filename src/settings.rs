use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub const AVAILABLE_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-flash",
    "gemini-1.5-pro",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    #[serde(rename = "geminiApiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub model_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            temperature: 0.7,
            max_output_tokens: 2048,
            model_name: DEFAULT_MODEL.to_string(),
        }
    }
}

impl Settings {
    /// Trims the key and drops it entirely when blank, as stored on save.
    pub fn normalized(mut self) -> Self {
        self.api_key = self
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self
    }

    /// Models for the picker, keeping a non-standard name loaded from disk.
    pub fn model_choices(&self) -> Vec<String> {
        let mut models: Vec<String> = AVAILABLE_MODELS.iter().map(|m| m.to_string()).collect();
        if !self.model_name.is_empty() && !models.contains(&self.model_name) {
            models.push(self.model_name.clone());
        }
        models
    }
}

/// A non-blank key from settings wins over the environment fallback.
pub fn resolve_api_key(settings_key: Option<&str>, env_key: Option<&str>) -> Option<String> {
    [settings_key, env_key]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|k| !k.is_empty())
        .map(str::to_string)
}
