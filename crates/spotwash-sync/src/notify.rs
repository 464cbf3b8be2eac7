//! User-facing notices and the persistent offline banner.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Banner {
    Offline,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
    fn show_banner(&self, banner: Banner);
    fn hide_banner(&self, banner: Banner);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Notice(Notice),
    ShowBanner(Banner),
    HideBanner(Banner),
}

/// Forwards everything to a UI loop. A closed receiver is logged, not fatal.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }

    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: UiEvent) {
        if let Err(error) = self.tx.send(event) {
            debug!(event = ?error.0, "ui receiver dropped");
        }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        self.send(UiEvent::Notice(notice));
    }

    fn show_banner(&self, banner: Banner) {
        self.send(UiEvent::ShowBanner(banner));
    }

    fn hide_banner(&self, banner: Banner) {
        self.send(UiEvent::HideBanner(banner));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info | NoticeLevel::Success => {
                info!(level = ?notice.level, "{}", notice.message);
            }
            NoticeLevel::Warning => warn!("{}", notice.message),
            NoticeLevel::Error => error!("{}", notice.message),
        }
    }

    fn show_banner(&self, banner: Banner) {
        warn!(?banner, "banner shown");
    }

    fn hide_banner(&self, banner: Banner) {
        info!(?banner, "banner hidden");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_forwards_in_order() {
        let (notifier, mut rx) = ChannelNotifier::channel();

        notifier.show_banner(Banner::Offline);
        notifier.notify(Notice::warning("You are offline"));
        notifier.hide_banner(Banner::Offline);

        assert_eq!(rx.try_recv().ok(), Some(UiEvent::ShowBanner(Banner::Offline)));
        assert_eq!(
            rx.try_recv().ok(),
            Some(UiEvent::Notice(Notice::warning("You are offline")))
        );
        assert_eq!(rx.try_recv().ok(), Some(UiEvent::HideBanner(Banner::Offline)));
    }

    #[test]
    fn closed_channel_is_not_fatal() {
        let (notifier, rx) = ChannelNotifier::channel();
        drop(rx);
        notifier.notify(Notice::info("nobody listening"));
    }

    #[test]
    fn levels_serialize_lowercase() {
        let encoded = serde_json::to_string(&Notice::success("Order started")).expect("encode");
        assert_eq!(encoded, r#"{"level":"success","message":"Order started"}"#);
    }
}
