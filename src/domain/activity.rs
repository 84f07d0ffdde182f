// Rolling activity log shown to the user, newest first
use chrono::Local;
use serde::Serialize;
use std::collections::VecDeque;

pub const MAX_ACTIVITY_ENTRIES: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: VecDeque<String>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message and mirror it to tracing
    pub fn push(&mut self, level: ActivityLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            ActivityLevel::Info => tracing::info!("{}", message),
            ActivityLevel::Warn => tracing::warn!("{}", message),
            ActivityLevel::Error => tracing::error!("{}", message),
        }

        let stamp = Local::now().format("%H:%M:%S");
        self.entries.push_front(format!("{}  {}", stamp, message));
        self.entries.truncate(MAX_ACTIVITY_ENTRIES);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(ActivityLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(ActivityLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(ActivityLevel::Error, message);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}
