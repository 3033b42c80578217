// Notification seam: the engine reports, delivery belongs to the caller
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    /// Something was done (position closed, entry blacklisted)
    Action,
    /// Something was deliberately not done
    Skip,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    pub timestamp: DateTime<Utc>,
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Receives every audit message the engine produces
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);

    fn info(&self, message: &str) {
        self.notify(Notice::new(NoticeLevel::Info, message));
    }

    fn action(&self, message: &str) {
        self.notify(Notice::new(NoticeLevel::Action, message));
    }

    fn skip(&self, message: &str) {
        self.notify(Notice::new(NoticeLevel::Skip, message));
    }

    fn warning(&self, message: &str) {
        self.notify(Notice::new(NoticeLevel::Warning, message));
    }
}

/// Forwards notices to the tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => tracing::info!("{}", notice.message),
            NoticeLevel::Action => tracing::info!(action = true, "{}", notice.message),
            NoticeLevel::Skip => tracing::info!(skip = true, "{}", notice.message),
            NoticeLevel::Warning => tracing::warn!("{}", notice.message),
        }
    }
}

/// Keeps the most recent notices in memory
pub struct MemoryNotifier {
    history: Mutex<VecDeque<Notice>>,
    max_history: usize,
}

impl MemoryNotifier {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            max_history,
        }
    }

    /// Snapshot of the stored notices, oldest first
    pub fn notices(&self) -> Vec<Notice> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().cloned().collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices().into_iter().map(|n| n.message).collect()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().filter(|n| n.level == level).count()
    }

    pub fn clear(&self) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.clear();
    }
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notice: Notice) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(notice);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }
}
