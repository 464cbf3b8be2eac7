//! Live refresh timer and the per-order detail poller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::connectivity::ConnectivityHandle;
use crate::error::GatewayError;
use crate::gateway::RequestGateway;
use crate::models::{DashboardStats, OrderDetail};
use crate::transport::HttpTransport;

pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_QUEUE_RELOAD_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_ORDER_POLL_MS: u64 = 10_000;

pub type PathPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RefreshSchedule {
    pub interval: Duration,
    pub active_path: PathPredicate,
}

impl RefreshSchedule {
    pub fn new(interval: Duration, active_path: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            interval,
            active_path: Arc::new(active_path),
        }
    }

    /// Summary cards on the landing and dashboard pages.
    #[must_use]
    pub fn dashboard(interval: Duration) -> Self {
        Self::new(interval, |path| path == "/" || path.starts_with("/dashboard"))
    }

    /// The operational queue view, which reloads wholesale.
    #[must_use]
    pub fn queue_page(interval: Duration) -> Self {
        Self::new(interval, |path| path.starts_with("/queue"))
    }
}

impl std::fmt::Debug for RefreshSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshSchedule")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Current page path, written by navigation and read by the timers.
#[derive(Clone)]
pub struct PageLocation {
    tx: Arc<watch::Sender<String>>,
}

impl PageLocation {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(path.into());
        Self { tx: Arc::new(tx) }
    }

    pub fn navigate(&self, path: impl Into<String>) {
        self.tx.send_replace(path.into());
    }

    #[must_use]
    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_stats(&self) -> Result<DashboardStats, GatewayError>;
}

#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_order(&self, order_id: u64) -> Result<OrderDetail, GatewayError>;
}

#[async_trait]
impl<T> StatsSource for RequestGateway<T>
where
    T: HttpTransport,
{
    async fn fetch_stats(&self) -> Result<DashboardStats, GatewayError> {
        self.dashboard_stats().await
    }
}

#[async_trait]
impl<T> OrderSource for RequestGateway<T>
where
    T: HttpTransport,
{
    async fn fetch_order(&self, order_id: u64) -> Result<OrderDetail, GatewayError> {
        self.order(order_id).await
    }
}

/// Where refreshed stats land. Both timers may write the same element; the
/// last write wins.
pub trait StatsSink: Send + Sync {
    fn apply_stats(&self, stats: &DashboardStats);

    fn refresh_failed(&self, error: &GatewayError) {
        debug!(error = %error, "stats refresh failed");
    }
}

pub trait OrderSink: Send + Sync {
    fn apply_order(&self, detail: &OrderDetail);

    fn order_failed(&self, order_id: u64, error: &GatewayError) {
        debug!(order_id, error = %error, "order refresh failed");
    }
}

pub trait PageReloader: Send + Sync {
    fn reload(&self, path: &str);
}

#[derive(Clone)]
pub enum RefreshAction {
    /// Patch the summary figures in place.
    FetchStats {
        source: Arc<dyn StatsSource>,
        sink: Arc<dyn StatsSink>,
    },
    /// Reload the whole page.
    Reload(Arc<dyn PageReloader>),
}

impl RefreshAction {
    pub async fn run(&self, path: &str) {
        match self {
            Self::FetchStats { source, sink } => match source.fetch_stats().await {
                Ok(stats) => sink.apply_stats(&stats),
                Err(error) => sink.refresh_failed(&error),
            },
            Self::Reload(reloader) => reloader.reload(path),
        }
    }
}

/// Repeating refresh timer; at most one is armed at a time.
pub struct LiveRefreshScheduler {
    connectivity: ConnectivityHandle,
    location: PageLocation,
    armed: Mutex<Option<(RefreshSchedule, RefreshAction)>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveRefreshScheduler {
    #[must_use]
    pub fn new(connectivity: ConnectivityHandle, location: PageLocation) -> Self {
        Self {
            connectivity,
            location,
            armed: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Cancel any running timer and arm a new one.
    pub fn start(&self, schedule: RefreshSchedule, action: RefreshAction) {
        self.stop();
        debug!(interval_ms = schedule.interval.as_millis() as u64, "arming refresh timer");

        let connectivity = self.connectivity.clone();
        let location = self.location.clone();
        let task_schedule = schedule.clone();
        let task_action = action.clone();
        let task = tokio::spawn(async move {
            let period = task_schedule.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !connectivity.can_refresh() {
                    trace!("refresh tick skipped: offline or hidden");
                    continue;
                }
                let path = location.current();
                if !(task_schedule.active_path)(&path) {
                    trace!(path = %path, "refresh tick skipped: inactive path");
                    continue;
                }
                task_action.run(&path).await;
            }
        });

        *lock(&self.armed) = Some((schedule, action));
        *lock(&self.task) = Some(task);
    }

    /// Re-arm the most recently started schedule, if any.
    pub fn restart(&self) -> bool {
        let armed = lock(&self.armed).clone();
        match armed {
            Some((schedule, action)) => {
                self.start(schedule, action);
                true
            }
            None => false,
        }
    }

    /// Run the armed action once, right now, if refreshing is allowed.
    pub async fn refresh_now(&self) -> bool {
        let armed = lock(&self.armed).clone();
        let Some((schedule, action)) = armed else {
            return false;
        };
        if !self.connectivity.can_refresh() {
            return false;
        }
        let path = self.location.current();
        if !(schedule.active_path)(&path) {
            return false;
        }
        action.run(&path).await;
        true
    }

    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
            debug!("refresh timer stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for LiveRefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polls one order's detail until its owner cancels the handle.
pub struct OrderDetailPoller;

impl OrderDetailPoller {
    /// Fetch, then wait `delay`, forever. The wait starts after each fetch
    /// settles, whatever its outcome.
    pub fn spawn(
        order_id: u64,
        delay: Duration,
        source: Arc<dyn OrderSource>,
        sink: Arc<dyn OrderSink>,
    ) -> PollerHandle {
        let task = tokio::spawn(async move {
            loop {
                match source.fetch_order(order_id).await {
                    Ok(detail) => sink.apply_order(&detail),
                    Err(error) => sink.order_failed(order_id, &error),
                }
                tokio::time::sleep(delay).await;
            }
        });
        debug!(order_id, delay_ms = delay.as_millis() as u64, "order poller started");
        PollerHandle {
            order_id,
            task: Some(task),
        }
    }
}

/// Owned cancellation handle for an [`OrderDetailPoller`].
///
/// Cancelling drops any in-flight fetch, so a response that arrives after
/// teardown is never applied. Dropping the handle cancels too.
pub struct PollerHandle {
    order_id: u64,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    #[must_use]
    pub fn order_id(&self) -> u64 {
        self.order_id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(order_id = self.order_id, "order poller cancelled");
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
