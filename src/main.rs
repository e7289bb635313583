#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use eframe::egui;
use log::info;

mod attachment;
mod chatapp;
mod chatapp_ui;
mod cli;
mod gemini;
mod message;
mod reveal;
mod settings;
mod store;

use chatapp::ChatApp;
use cli::Args;

fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("Settings file: {}", args.settings_path().display());
    info!("Session file: {}", args.session_path().display());
    info!("API base: {}", args.api_base);
    info!("Request timeout: {}s", args.request_timeout_secs);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([800.0, 600.0])
            .with_min_inner_size([400.0, 300.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Gemini Chat",
        options,
        Box::new(move |cc| Box::new(ChatApp::new(cc, runtime, &args))),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run app: {}", e))
}
