use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

pub const MAX_ATTACHMENT_CHARS: usize = 50_000;
const TRUNCATION_NOTICE: &str = "\n\n[... file too long, truncated ...]";

pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "xml", "csv", "log", "rs", "cs", "py", "js", "ts", "html", "css",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub content: String,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, content: &str) -> Self {
        Self {
            file_name: file_name.into(),
            content: truncate(content),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("{}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content = String::from_utf8_lossy(&bytes);
        info!("Attached {} ({} bytes)", file_name, bytes.len());
        Ok(Self::new(file_name, &content))
    }

    fn block(&self) -> String {
        format!(
            "\n\n📎 **Attached file: {}**\n```\n{}\n```",
            self.file_name, self.content
        )
    }
}

fn truncate(content: &str) -> String {
    match content.char_indices().nth(MAX_ATTACHMENT_CHARS) {
        Some((cut, _)) => format!("{}{}", &content[..cut], TRUNCATION_NOTICE),
        None => content.to_string(),
    }
}

/// Builds the outgoing message text. `None` means there is nothing to send.
pub fn compose_message(input: &str, attachment: Option<&Attachment>) -> Option<String> {
    let input = input.trim();
    let text = match attachment {
        Some(attachment) if input.is_empty() => {
            format!("Please review this file:{}", attachment.block())
        }
        Some(attachment) => format!("{}{}", input, attachment.block()),
        None => input.to_string(),
    };
    (!text.trim().is_empty()).then_some(text)
}
