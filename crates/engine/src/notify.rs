/// User-facing notices raised by the session. Presentation is out of scope;
/// the session only queues them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Explicit save landed.
    Saved,
    SaveFailed(String),
    /// A created event arrived; carries the new item's title.
    Added(String),
    FolderExists(String),
    /// An optimistic change was undone after the remote write failed.
    RolledBack { action: String, reason: String },
    AutomationBanner(String),
    AutomationDone,
}

impl Notice {
    pub fn text(&self) -> String {
        match self {
            Notice::Saved => "Saved".to_string(),
            Notice::SaveFailed(reason) => format!("Save Failed: {reason}"),
            Notice::Added(title) => format!("+ {title}"),
            Notice::FolderExists(name) => format!("Folder Exists: {name}"),
            Notice::RolledBack { action, reason } => format!("{action} failed: {reason}"),
            Notice::AutomationBanner(message) => message.clone(),
            Notice::AutomationDone => "Automation finished".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Notifier {
    pending: Vec<Notice>,
}

impl Notifier {
    pub fn push(&mut self, notice: Notice) {
        tracing::debug!(notice = %notice.text(), "notice");
        self.pending.push(notice);
    }

    pub fn drain(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[Notice] {
        &self.pending
    }
}
