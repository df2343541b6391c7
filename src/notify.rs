use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Default,
    Destructive,
}

/// A short-lived message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub variant: Variant,
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.variant {
            Variant::Default => write!(f, "[{}] {}", self.title, self.description),
            Variant::Destructive => write!(f, "[!{}] {}", self.title, self.description),
        }
    }
}

pub type NotificationFeed = mpsc::UnboundedReceiver<Notification>;

/// Sending half of the notification surface. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, NotificationFeed) {
        let (sender, feed) = mpsc::unbounded_channel();
        (Self { sender }, feed)
    }

    pub fn info(&self, title: &str, description: &str) {
        self.send(title, description, Variant::Default);
    }

    pub fn error(&self, title: &str, description: &str) {
        log::warn!("{title}: {description}");
        self.send(title, description, Variant::Destructive);
    }

    pub fn send(&self, title: &str, description: &str, variant: Variant) {
        let notification = Notification {
            title: title.to_string(),
            description: description.to_string(),
            variant,
        };

        // A closed feed means nobody is displaying anything anymore.
        if self.sender.send(notification).is_err() {
            log::debug!("[Notifier::send] Notification feed closed, dropping \"{title}\"");
        }
    }
}

#[cfg(test)]
pub(crate) fn drain(feed: &mut NotificationFeed) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(notification) = feed.try_recv() {
        notifications.push(notification);
    }
    notifications
}
