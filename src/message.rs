use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Lenient parse used for persisted history: "assistant" and "model"
    /// (any case) are the model, everything else is the user.
    pub fn parse_lossy(role: &str) -> Self {
        if role.eq_ignore_ascii_case("assistant") || role.eq_ignore_ascii_case("model") {
            Role::Model
        } else {
            Role::User
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Model => "Gemini",
        }
    }

    pub fn avatar(&self) -> char {
        match self {
            Role::User => 'Y',
            Role::Model => 'G',
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::parse_lossy(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    role: Role,
    text: String,
    timestamp: DateTime<Local>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self::at(role, text, Local::now())
    }

    pub fn at(role: Role, text: impl Into<String>, timestamp: DateTime<Local>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    #[cfg(test)]
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn time_text(&self) -> String {
        time_text(self.timestamp)
    }
}

pub fn time_text(timestamp: DateTime<Local>) -> String {
    timestamp.format("%H:%M").to_string()
}
