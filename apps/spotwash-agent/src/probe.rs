use std::sync::Arc;
use std::time::Duration;

use spotwash_sync::{HttpRequest, HttpTransport, PlatformSignal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use url::Url;

/// Derives online/offline signals from a periodic health request.
///
/// Any HTTP answer counts as reachable; only a failed fetch reports offline.
/// The connectivity monitor ignores repeats, so every tick emits a signal.
pub struct HealthProbe;

impl HealthProbe {
    pub fn spawn<T>(
        transport: Arc<T>,
        url: Url,
        interval: Duration,
        signals: mpsc::Sender<PlatformSignal>,
    ) -> JoinHandle<()>
    where
        T: HttpTransport + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let signal = match transport.send(HttpRequest::get(url.clone())).await {
                    Ok(response) => {
                        debug!(status = response.status, "health probe answered");
                        PlatformSignal::Online
                    }
                    Err(failure) => {
                        debug!(error = %failure, "health probe failed");
                        PlatformSignal::Offline
                    }
                };
                if signals.send(signal).await.is_err() {
                    break;
                }
            }
        })
    }
}
