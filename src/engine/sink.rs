use tokio::sync::mpsc;

/// Receives progress from a running job.
///
/// Calls arrive from the worker executing the job, so implementations own
/// their own synchronisation.
pub trait ProgressSink: Send + Sync {
    /// Status text for the current step.
    fn message(&self, text: &str);
    /// One line of tool output, in the order the tool produced it.
    fn line(&self, text: &str);
    fn succeeded(&self, text: &str);
    fn failed(&self, text: &str, code: i32);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent {
    Message(String),
    Line(String),
    Succeeded(String),
    Failed { text: String, code: i32 },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Succeeded(_) | JobEvent::Failed { .. })
    }
}

// The foreground drains the receiver; a dropped receiver just discards events.
impl ProgressSink for mpsc::UnboundedSender<JobEvent> {
    fn message(&self, text: &str) {
        let _ = self.send(JobEvent::Message(text.to_owned()));
    }

    fn line(&self, text: &str) {
        let _ = self.send(JobEvent::Line(text.to_owned()));
    }

    fn succeeded(&self, text: &str) {
        let _ = self.send(JobEvent::Succeeded(text.to_owned()));
    }

    fn failed(&self, text: &str, code: i32) {
        let _ = self.send(JobEvent::Failed {
            text: text.to_owned(),
            code,
        });
    }
}
