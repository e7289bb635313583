use eframe::egui;
use log::{error, info, warn};
use poll_promise::Promise;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::attachment::{compose_message, Attachment};
use crate::cli::Args;
use crate::gemini::{GeminiClient, GeminiConfig, GeminiError};
use crate::message::{ChatMessage, Role};
use crate::reveal::Typewriter;
use crate::settings::{resolve_api_key, Settings};
use crate::store::{SessionStore, SettingsStore};

const EMPTY_REPLY: &str = "(empty reply)";
const MISSING_KEY_HINT: &str =
    "Enter a Gemini API key in the settings, or set the GEMINI_API_KEY environment variable.";
const TYPING_INTERVAL: Duration = Duration::from_millis(350);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ChatApp {
    runtime: Runtime,
    settings_store: SettingsStore,
    session_store: SessionStore,
    env_api_key: Option<String>,
    api_base: String,
    request_timeout: Duration,
    pub messages: Vec<ChatMessage>,
    pub input: String,
    pub attachment: Option<Attachment>,
    pub settings: Settings,
    pub error_message: Option<String>,
    pub show_settings: bool,
    pending_response: Option<Promise<Result<String, GeminiError>>>,
    pub reveal: Option<Typewriter>,
    client: Option<GeminiClient>,
    cancel_token: Option<CancellationToken>,
    busy_since: Option<Instant>,
}

impl ChatApp {
    pub fn new(cc: &eframe::CreationContext<'_>, runtime: Runtime, args: &Args) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());
        Self::from_args(runtime, args)
    }

    pub fn from_args(runtime: Runtime, args: &Args) -> Self {
        let settings_store = SettingsStore::new(args.settings_path());
        let session_store = SessionStore::new(args.session_path());
        let settings = settings_store.load();
        let messages = session_store.load();
        info!(
            "Loaded {} messages from {}",
            messages.len(),
            session_store.path().display()
        );

        let mut app = Self {
            runtime,
            settings_store,
            session_store,
            env_api_key: args.api_key.clone(),
            api_base: args.api_base.clone(),
            request_timeout: args.request_timeout(),
            messages,
            input: String::new(),
            attachment: None,
            settings,
            error_message: None,
            show_settings: false,
            pending_response: None,
            reveal: None,
            client: None,
            cancel_token: None,
            busy_since: None,
        };

        if app.api_key().is_none() {
            warn!("No Gemini API key configured");
            app.error_message = Some(MISSING_KEY_HINT.to_string());
            app.show_settings = true;
        }
        app
    }

    fn api_key(&self) -> Option<String> {
        resolve_api_key(self.settings.api_key.as_deref(), self.env_api_key.as_deref())
    }

    pub fn is_busy(&self) -> bool {
        self.pending_response.is_some() || self.reveal.is_some()
    }

    pub fn can_send(&self) -> bool {
        !self.is_busy() && (!self.input.trim().is_empty() || self.attachment.is_some())
    }

    fn ensure_client(&mut self) -> Result<GeminiClient, GeminiError> {
        let api_key = self.api_key().ok_or(GeminiError::MissingApiKey)?;
        let config = GeminiConfig {
            api_key,
            model: self.settings.model_name.clone(),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
            base_url: self.api_base.clone(),
            timeout: self.request_timeout,
        };

        match &self.client {
            Some(client) if !client.config().needs_rebuild(&config) => Ok(client.clone()),
            _ => {
                info!("Creating Gemini client for model {}", config.model);
                let client = GeminiClient::new(config);
                self.client = Some(client.clone());
                Ok(client)
            }
        }
    }

    pub fn send_message(&mut self) {
        if self.is_busy() {
            return;
        }
        self.error_message = None;

        let Some(text) = compose_message(&self.input, self.attachment.as_ref()) else {
            return;
        };
        self.attachment = None;
        self.input.clear();
        self.messages.push(ChatMessage::user(text));
        self.save_session();

        let client = match self.ensure_client() {
            Ok(client) => client,
            Err(e) => {
                self.error_message = Some(e.to_string());
                return;
            }
        };

        let history = self.messages.clone();
        let cancel = CancellationToken::new();
        self.cancel_token = Some(cancel.clone());
        self.busy_since = Some(Instant::now());

        let handle = self.runtime.handle().clone();
        self.pending_response = Some(Promise::spawn_thread("gemini_request", move || {
            handle.block_on(async move { client.generate(&history, &cancel).await })
        }));
    }

    /// Polls the in-flight request and advances the reveal. Called once per frame.
    pub fn process_pending(&mut self, now: Instant) {
        if let Some(promise) = self.pending_response.take() {
            match promise.try_take() {
                Ok(result) => {
                    self.cancel_token = None;
                    match result {
                        Ok(reply) => {
                            let full = if reply.trim().is_empty() {
                                EMPTY_REPLY.to_string()
                            } else {
                                reply
                            };
                            info!("Received reply ({} chars)", full.chars().count());
                            self.reveal = Some(Typewriter::new(full, now));
                        }
                        Err(e) => {
                            error!("Chat request failed: {}", e);
                            self.error_message = Some(e.to_string());
                        }
                    }
                }
                Err(promise) => self.pending_response = Some(promise),
            }
        }

        if let Some(reveal) = &mut self.reveal {
            reveal.tick(now);
            if reveal.is_done() {
                self.finish_reveal();
            }
        }

        if !self.is_busy() {
            self.busy_since = None;
        }
    }

    fn finish_reveal(&mut self) {
        let Some(reveal) = self.reveal.take() else {
            return;
        };
        let text = if reveal.is_cancelled() {
            reveal.visible()
        } else {
            reveal.full_text()
        };
        if !text.is_empty() {
            self.messages
                .push(ChatMessage::at(Role::Model, text, reveal.started()));
        }
        self.save_session();
    }

    pub fn cancel(&mut self) {
        if let Some(token) = &self.cancel_token {
            info!("Cancelling in-flight request");
            token.cancel();
        }
        if let Some(reveal) = &mut self.reveal {
            reveal.cancel();
        }
    }

    /// When the UI next needs to repaint to keep the reveal or the indicator moving.
    pub fn repaint_after(&self, now: Instant) -> Option<Duration> {
        match &self.reveal {
            Some(reveal) => reveal.until_next(now),
            None if self.is_busy() => Some(POLL_INTERVAL),
            None => None,
        }
    }

    pub fn typing_indicator(&self, now: Instant) -> Option<String> {
        let since = self.busy_since.filter(|_| self.is_busy())?;
        let ticks = now.saturating_duration_since(since).as_millis() / TYPING_INTERVAL.as_millis();
        let dots = (ticks % 4) as usize;
        Some(format!("Typing{}", ".".repeat(dots)))
    }

    pub fn attach_file(&mut self, path: &Path) {
        match Attachment::read(path) {
            Ok(attachment) => self.attachment = Some(attachment),
            Err(e) => {
                warn!("Failed to attach {}: {:#}", path.display(), e);
                self.attachment = None;
                self.error_message = Some(format!("Could not read file: {:#}", e));
            }
        }
    }

    pub fn remove_attachment(&mut self) {
        self.attachment = None;
    }

    pub fn save_settings(&mut self) {
        self.settings = std::mem::take(&mut self.settings).normalized();
        if let Err(e) = self.settings_store.save(&self.settings) {
            warn!("Failed to save settings: {:#}", e);
        }
        self.client = None;
        self.show_settings = false;
        self.error_message = self
            .api_key()
            .is_none()
            .then(|| MISSING_KEY_HINT.to_string());
    }

    pub fn clear_chat(&mut self) {
        if self.is_busy() {
            return;
        }
        self.messages.clear();
        self.input.clear();
        self.attachment = None;
        self.error_message = None;
        self.save_session();
    }

    fn save_session(&self) {
        if let Err(e) = self.session_store.save(&self.messages) {
            warn!("Failed to save chat session: {:#}", e);
        }
    }
}
