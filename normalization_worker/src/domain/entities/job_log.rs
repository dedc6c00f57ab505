use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};

/// Plain text log of one job, uploaded next to the archive once the job ends
///
/// Every line is also emitted as a `tracing` event.
#[derive(Debug, Default)]
pub struct JobLog {
    lines: Vec<String>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.push("INFO", message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.push("WARN", message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.push("ERROR", message);
    }

    fn push(&mut self, level: &str, message: String) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.lines
            .push(format!("{} [{}] {}", timestamp, level, message));
    }

    pub fn render(&self) -> String {
        let mut rendered = self.lines.join("\n");
        rendered.push('\n');
        rendered
    }
}
