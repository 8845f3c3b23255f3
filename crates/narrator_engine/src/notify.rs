//! User-facing conversion notices.
//!
//! Jobs finish long after the user moved on, so terminal outcomes surface
//! through a [`NotificationSink`] alongside the event stream. The stock sink
//! writes to the log; frontends substitute a desktop notifier.

use engine_logging::{engine_info, engine_warn};

pub trait NotificationSink: Send + Sync {
    fn success(&self, title: &str, message: &str);
    fn failure(&self, title: &str, message: &str);
    /// How many conversions are currently queued or running.
    fn set_active_jobs(&self, count: usize);
}

/// Default sink: notifications become log lines.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn success(&self, title: &str, message: &str) {
        engine_info!("[notify] {title}: {message}");
    }

    fn failure(&self, title: &str, message: &str) {
        engine_warn!("[notify] {title}: {message}");
    }

    fn set_active_jobs(&self, count: usize) {
        engine_info!("[notify] active jobs: {count}");
    }
}
