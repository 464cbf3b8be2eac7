//! Online/offline and page-visibility tracking.
//!
//! The monitor is the only writer; everything else holds a read-only
//! [`ConnectivityHandle`] backed by a `watch` channel. Link-layer "online" is
//! optimistic, so the gateway still has to cope with request failures while
//! the handle reports online.

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVisibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub visibility: PageVisibility,
}

impl ConnectivityState {
    #[must_use]
    pub fn online_visible() -> Self {
        Self {
            is_online: true,
            visibility: PageVisibility::Visible,
        }
    }

    /// Refreshing needs both axes: reachable network and someone looking.
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.is_online && self.visibility == PageVisibility::Visible
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::online_visible()
    }
}

/// What changed after a platform signal was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityTransition {
    CameOnline,
    WentOffline,
    BecameVisible,
    BecameHidden,
    None,
}

/// Signals delivered by the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSignal {
    Online,
    Offline,
    Visibility(PageVisibility),
    BackgroundSync,
    PeriodicSync,
    Push { title: String, body: String },
}

pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn set_online(&self, online: bool) -> ConnectivityTransition {
        let mut transition = ConnectivityTransition::None;
        self.tx.send_if_modified(|state| {
            if state.is_online == online {
                return false;
            }
            state.is_online = online;
            transition = if online {
                ConnectivityTransition::CameOnline
            } else {
                ConnectivityTransition::WentOffline
            };
            true
        });
        if transition != ConnectivityTransition::None {
            info!(online, "connectivity changed");
        }
        transition
    }

    pub fn set_visibility(&self, visibility: PageVisibility) -> ConnectivityTransition {
        let mut transition = ConnectivityTransition::None;
        self.tx.send_if_modified(|state| {
            if state.visibility == visibility {
                return false;
            }
            state.visibility = visibility;
            transition = match visibility {
                PageVisibility::Visible => ConnectivityTransition::BecameVisible,
                PageVisibility::Hidden => ConnectivityTransition::BecameHidden,
            };
            true
        });
        transition
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::default())
    }
}

#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    rx: watch::Receiver<ConnectivityState>,
}

impl ConnectivityHandle {
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        *self.rx.borrow()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state().is_online
    }

    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.state().can_refresh()
    }

    /// Wait for the next state change. Returns `false` once the monitor is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
