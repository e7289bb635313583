use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub const FRAME_DELAY: Duration = Duration::from_millis(15);
const CODE_FENCE: &str = "```";

pub fn chunk_size(text: &str) -> usize {
    if text.contains(CODE_FENCE) {
        8
    } else {
        3
    }
}

/// Byte offsets of every published prefix, in order. The last entry is
/// always the full length.
fn frame_offsets(text: &str) -> Vec<usize> {
    let chunk = chunk_size(text);
    let count = text.chars().count();
    text.char_indices()
        .enumerate()
        .filter(|(i, _)| i % chunk == 0 || i + 1 == count)
        .map(|(_, (offset, ch))| offset + ch.len_utf8())
        .collect()
}

/// Reveals an already-complete reply a few characters at a time.
/// Driven from the UI loop through `tick`.
#[derive(Debug)]
pub struct Typewriter {
    text: String,
    frames: Vec<usize>,
    shown: usize,
    next_at: Instant,
    delay: Duration,
    cancelled: bool,
    started: DateTime<Local>,
}

impl Typewriter {
    pub fn new(text: String, now: Instant) -> Self {
        Self::with_delay(text, now, FRAME_DELAY)
    }

    pub fn with_delay(text: String, now: Instant, delay: Duration) -> Self {
        let frames = frame_offsets(&text);
        Self {
            text,
            frames,
            shown: 0,
            next_at: now,
            delay,
            cancelled: false,
            started: Local::now(),
        }
    }

    /// Publishes every frame that is due. Returns whether the visible text changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let before = self.shown;
        while !self.is_done() && now >= self.next_at {
            self.shown += 1;
            self.next_at += self.delay;
        }
        self.shown != before
    }

    pub fn visible(&self) -> &str {
        match self.shown {
            0 => "",
            n => &self.text[..self.frames[n - 1]],
        }
    }

    pub fn full_text(&self) -> &str {
        &self.text
    }

    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_done(&self) -> bool {
        self.cancelled || self.shown >= self.frames.len()
    }

    /// How long until the next frame is due, for scheduling a repaint.
    pub fn until_next(&self, now: Instant) -> Option<Duration> {
        (!self.is_done()).then(|| self.next_at.saturating_duration_since(now))
    }
}
