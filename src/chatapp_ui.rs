use eframe::egui;
use std::time::Instant;

use crate::attachment::TEXT_EXTENSIONS;
use crate::chatapp::ChatApp;
use crate::message::{self, ChatMessage, Role};

const USER_BUBBLE: egui::Color32 = egui::Color32::from_rgb(38, 79, 120);
const MODEL_BUBBLE: egui::Color32 = egui::Color32::from_rgb(48, 48, 56);
const CODE_BLOCK: egui::Color32 = egui::Color32::from_rgb(24, 24, 28);

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.process_pending(now);
        if let Some(delay) = self.repaint_after(now) {
            ctx.request_repaint_after(delay);
        }

        // Top menu bar
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("☰").on_hover_text("Settings").clicked() {
                    self.show_settings = !self.show_settings;
                }
                ui.label(egui::RichText::new("Gemini Chat").strong());
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui
                        .add_enabled(!self.is_busy(), egui::Button::new("New Chat"))
                        .clicked()
                    {
                        self.clear_chat();
                    }
                });
            });
        });

        if self.show_settings {
            self.show_settings_window(ctx);
        }

        egui::TopBottomPanel::bottom("input_panel").show(ctx, |ui| {
            self.render_input_area(ui, ctx, now);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for message in &self.messages {
                        render_message(ui, message);
                    }
                    if let Some(reveal) = &self.reveal {
                        render_bubble(
                            ui,
                            Role::Model,
                            &message::time_text(reveal.started()),
                            reveal.visible(),
                        );
                    }
                });
        });
    }
}

impl ChatApp {
    fn render_input_area(&mut self, ui: &mut egui::Ui, ctx: &egui::Context, now: Instant) {
        ui.add_space(4.0);

        if let Some(error) = &self.error_message {
            ui.colored_label(egui::Color32::RED, error);
        }

        if let Some(typing) = self.typing_indicator(now) {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(egui::RichText::new(typing).italics().weak());
            });
        }

        let mut remove_attachment = false;
        if let Some(attachment) = &self.attachment {
            ui.horizontal(|ui| {
                ui.label(format!("📎 {}", attachment.file_name));
                if ui.small_button("✖").on_hover_text("Remove attachment").clicked() {
                    remove_attachment = true;
                }
            });
        }
        if remove_attachment {
            self.remove_attachment();
        }

        let input_id = egui::Id::new("chat_input");
        let enter_pressed =
            ctx.memory(|m| m.has_focus(input_id)) && ui.input_mut(take_send_shortcut);

        ui.add(
            egui::TextEdit::multiline(&mut self.input)
                .id(input_id)
                .hint_text("Type your message here... (Enter to send, Shift+Enter for new line)")
                .desired_rows(3)
                .desired_width(f32::INFINITY),
        );

        ui.horizontal(|ui| {
            if ui
                .add_enabled(!self.is_busy(), egui::Button::new("📎 Attach"))
                .clicked()
            {
                self.pick_attachment();
            }

            let send = ui.add_enabled(self.can_send(), egui::Button::new("Send"));
            if send.clicked() || (enter_pressed && self.can_send()) {
                self.send_message();
            }

            if self.is_busy() && ui.button("Stop").clicked() {
                self.cancel();
            }
        });
        ui.add_space(4.0);
    }

    fn pick_attachment(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .set_title("Choose a file")
            .add_filter("Text files", TEXT_EXTENSIONS)
            .add_filter("All files", &["*"])
            .pick_file()
        {
            self.attach_file(&path);
        }
    }

    pub fn show_settings_window(&mut self, ctx: &egui::Context) {
        let mut show_settings = self.show_settings;
        let mut save = false;

        egui::Window::new("Settings")
            .open(&mut show_settings)
            .resizable(false)
            .default_width(400.0)
            .show(ctx, |ui| {
                egui::Grid::new("settings_grid")
                    .num_columns(2)
                    .spacing([8.0, 6.0])
                    .show(ui, |ui| {
                        ui.label("API Key:");
                        let mut key = self.settings.api_key.clone().unwrap_or_default();
                        if ui
                            .add(egui::TextEdit::singleline(&mut key).password(true))
                            .changed()
                        {
                            self.settings.api_key = Some(key);
                        }
                        ui.end_row();

                        ui.label("Model:");
                        let choices = self.settings.model_choices();
                        egui::ComboBox::from_id_source("model_select")
                            .selected_text(&self.settings.model_name)
                            .show_ui(ui, |ui| {
                                for model in &choices {
                                    ui.selectable_value(
                                        &mut self.settings.model_name,
                                        model.clone(),
                                        model,
                                    );
                                }
                            });
                        ui.end_row();

                        ui.label("Temperature:");
                        ui.add(
                            egui::Slider::new(&mut self.settings.temperature, 0.0..=2.0)
                                .step_by(0.05),
                        );
                        ui.end_row();

                        ui.label("Max Tokens:");
                        ui.add(egui::Slider::new(
                            &mut self.settings.max_output_tokens,
                            256..=8192,
                        ));
                        ui.end_row();
                    });

                ui.add_space(8.0);
                ui.label(
                    egui::RichText::new("Leave the key empty to use GEMINI_API_KEY.")
                        .small()
                        .weak(),
                );
                ui.separator();
                if ui.button("Save").clicked() {
                    save = true;
                }
            });

        self.show_settings = show_settings;
        if save {
            self.save_settings();
        }
    }
}

/// Enter sends. Shift+Enter is left in the queue so the text edit inserts a
/// newline; `consume_key` alone would also match it.
fn take_send_shortcut(input: &mut egui::InputState) -> bool {
    !input.modifiers.shift && input.consume_key(egui::Modifiers::NONE, egui::Key::Enter)
}

fn render_message(ui: &mut egui::Ui, message: &ChatMessage) {
    render_bubble(ui, message.role(), &message.time_text(), message.text());
}

fn render_bubble(ui: &mut egui::Ui, role: Role, time: &str, text: &str) {
    let (align, fill) = match role {
        Role::User => (egui::Align::Max, USER_BUBBLE),
        Role::Model => (egui::Align::Min, MODEL_BUBBLE),
    };

    ui.with_layout(egui::Layout::top_down(align), |ui| {
        egui::Frame::none()
            .fill(fill)
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::style::Margin::same(8.0))
            .show(ui, |ui| {
                ui.set_max_width(ui.available_width() * 0.8);
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new(role.avatar().to_string()).strong().monospace());
                    ui.label(egui::RichText::new(role.display_name()).strong());
                    ui.label(egui::RichText::new(time).small().weak());
                });
                render_message_content(ui, text);
            });
    });
    ui.add_space(8.0);
}

/// Draws text with fenced code blocks in monospace frames. An unclosed
/// fence (common mid-reveal) is still drawn as code.
fn render_message_content(ui: &mut egui::Ui, content: &str) {
    for (i, part) in content.split("```").enumerate() {
        if i % 2 == 0 {
            let text = part.trim_matches('\n');
            if !text.is_empty() {
                ui.label(text);
            }
            continue;
        }

        let (lang, code) = match part.split_once('\n') {
            Some((first, rest)) if !first.trim().contains(' ') => (first.trim(), rest),
            _ => ("", part),
        };
        egui::Frame::none()
            .fill(CODE_BLOCK)
            .rounding(egui::Rounding::same(4.0))
            .inner_margin(egui::style::Margin::same(6.0))
            .show(ui, |ui| {
                if !lang.is_empty() {
                    ui.label(egui::RichText::new(lang).small().weak());
                }
                ui.label(egui::RichText::new(code.trim_end_matches('\n')).monospace());
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_press(key: egui::Key, modifiers: egui::Modifiers) -> egui::InputState {
        let mut input = egui::InputState::default();
        input.modifiers = modifiers;
        input.events.push(egui::Event::Key {
            key,
            physical_key: None,
            pressed: true,
            repeat: false,
            modifiers,
        });
        input
    }

    #[test]
    fn enter_sends() {
        let mut input = key_press(egui::Key::Enter, egui::Modifiers::NONE);

        assert!(take_send_shortcut(&mut input));
        assert!(input.events.is_empty());
    }

    #[test]
    fn shift_enter_is_left_for_the_text_edit() {
        let mut input = key_press(egui::Key::Enter, egui::Modifiers::SHIFT);

        assert!(!take_send_shortcut(&mut input));
        assert_eq!(input.events.len(), 1);
    }

    #[test]
    fn other_keys_do_not_send() {
        let mut input = key_press(egui::Key::A, egui::Modifiers::NONE);

        assert!(!take_send_shortcut(&mut input));
        assert_eq!(input.events.len(), 1);
    }
}
