//! Page-side reconciliation of connectivity changes with the queue, the
//! refresh timer and the user-visible notices.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::arbiter::ControlMessage;
use crate::connectivity::{ConnectivityMonitor, ConnectivityTransition, PlatformSignal};
use crate::error::GatewayError;
use crate::gateway::RequestGateway;
use crate::notify::{Banner, Notice, Notifier};
use crate::queue::{ActionReplayQueue, DrainSummary};
use crate::scheduler::{
    LiveRefreshScheduler, OrderDetailPoller, OrderSink, PageLocation, PollerHandle, RefreshAction,
    RefreshSchedule,
};
use crate::transport::{HttpMethod, HttpTransport};

const OFFLINE_MESSAGE: &str = "You are offline. Changes will sync when the connection returns.";
const BACK_ONLINE_MESSAGE: &str = "Back online";
const QUEUED_MESSAGE: &str = "Saved offline. It will be sent when the connection returns.";
const FAULT_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    /// Drain, then resume live refresh.
    Reconnect,
    /// Refresh now, then resume the timer.
    Revisit,
    Replay,
    Refresh,
}

/// What `submit` does when the network is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflinePolicy {
    /// Park the call in the replay queue.
    Queue,
    /// Surface the failure to the caller.
    FailFast,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Completed(Value),
    Queued(u64),
}

pub struct SyncCoordinator<T> {
    monitor: ConnectivityMonitor,
    gateway: Arc<RequestGateway<T>>,
    queue: Arc<ActionReplayQueue>,
    scheduler: LiveRefreshScheduler,
    location: PageLocation,
    notifier: Arc<dyn Notifier>,
}

impl<T> SyncCoordinator<T>
where
    T: HttpTransport + 'static,
{
    /// `gateway` must have been built from a handle of `monitor`.
    pub fn new(
        monitor: ConnectivityMonitor,
        gateway: Arc<RequestGateway<T>>,
        queue: Arc<ActionReplayQueue>,
        location: PageLocation,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let scheduler = LiveRefreshScheduler::new(monitor.subscribe(), location.clone());
        Self {
            monitor,
            gateway,
            queue,
            scheduler,
            location,
            notifier,
        }
    }

    #[must_use]
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<RequestGateway<T>> {
        &self.gateway
    }

    #[must_use]
    pub fn queue(&self) -> &ActionReplayQueue {
        &self.queue
    }

    #[must_use]
    pub fn scheduler(&self) -> &LiveRefreshScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn location(&self) -> &PageLocation {
        &self.location
    }

    pub fn start_live_refresh(&self, schedule: RefreshSchedule, action: RefreshAction) {
        self.scheduler.start(schedule, action);
    }

    /// Poll one order until the returned handle is cancelled or dropped.
    pub fn watch_order(&self, order_id: u64, delay: Duration, sink: Arc<dyn OrderSink>) -> PollerHandle {
        OrderDetailPoller::spawn(order_id, delay, self.gateway.clone(), sink)
    }

    /// Apply a signal and wait for everything it sets off.
    pub async fn apply_signal(&self, signal: PlatformSignal) -> ConnectivityTransition {
        let (transition, follow_up) = self.observe(signal);
        if let Some(follow_up) = follow_up {
            self.follow_up(follow_up).await;
        }
        transition
    }

    pub async fn reconcile(&self, transition: ConnectivityTransition) {
        if let Some(follow_up) = self.settle(transition) {
            self.follow_up(follow_up).await;
        }
    }

    /// Record a signal and apply its immediate effects.
    fn observe(&self, signal: PlatformSignal) -> (ConnectivityTransition, Option<FollowUp>) {
        let transition = match signal {
            PlatformSignal::Online => self.monitor.set_online(true),
            PlatformSignal::Offline => self.monitor.set_online(false),
            PlatformSignal::Visibility(visibility) => self.monitor.set_visibility(visibility),
            PlatformSignal::BackgroundSync => return (ConnectivityTransition::None, Some(FollowUp::Replay)),
            PlatformSignal::PeriodicSync => return (ConnectivityTransition::None, Some(FollowUp::Refresh)),
            PlatformSignal::Push { title, body } => {
                self.notifier.notify(Notice::info(format!("{title}: {body}")));
                return (ConnectivityTransition::None, None);
            }
        };
        (transition, self.settle(transition))
    }

    fn settle(&self, transition: ConnectivityTransition) -> Option<FollowUp> {
        match transition {
            ConnectivityTransition::CameOnline => {
                self.notifier.hide_banner(Banner::Offline);
                Some(FollowUp::Reconnect)
            }
            ConnectivityTransition::WentOffline => {
                self.notifier.show_banner(Banner::Offline);
                self.scheduler.stop();
                self.notifier.notify(Notice::warning(OFFLINE_MESSAGE));
                None
            }
            ConnectivityTransition::BecameVisible => Some(FollowUp::Revisit),
            ConnectivityTransition::BecameHidden => {
                self.scheduler.stop();
                None
            }
            ConnectivityTransition::None => None,
        }
    }

    /// Network-bound work; state may have moved on by the time it finishes.
    async fn follow_up(&self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::Reconnect => {
                self.replay_pending().await;
                if !self.monitor.state().is_online {
                    debug!("connection dropped again during reconnect");
                    return;
                }
                self.scheduler.restart();
                self.notifier.notify(Notice::success(BACK_ONLINE_MESSAGE));
            }
            FollowUp::Revisit => {
                self.scheduler.refresh_now().await;
                if self.monitor.state().can_refresh() {
                    self.scheduler.restart();
                }
            }
            FollowUp::Replay => {
                self.replay_pending().await;
            }
            FollowUp::Refresh => {
                self.scheduler.refresh_now().await;
            }
        }
    }

    /// Drain the replay queue if the page believes it is online.
    pub async fn replay_pending(&self) -> DrainSummary {
        if !self.monitor.state().is_online {
            debug!(pending = self.queue.len(), "skipping replay while offline");
            return DrainSummary {
                remaining: self.queue.len(),
                ..DrainSummary::default()
            };
        }

        let summary = self.queue.drain(self.gateway.as_ref()).await;
        if !summary.is_noop() {
            let notice = if summary.failed.is_empty() && summary.evicted.is_empty() {
                Notice::success(summary.describe())
            } else {
                Notice::warning(summary.describe())
            };
            self.notifier.notify(notice);
        }
        summary
    }

    /// Issue a mutating call, or park it for replay under `OfflinePolicy::Queue`.
    pub async fn submit(
        &self,
        endpoint: &str,
        method: HttpMethod,
        payload: Option<Value>,
        policy: OfflinePolicy,
    ) -> Result<SubmitOutcome, GatewayError> {
        if !self.monitor.state().is_online {
            return match policy {
                OfflinePolicy::Queue => Ok(SubmitOutcome::Queued(self.park(endpoint, method, payload))),
                OfflinePolicy::FailFast => Err(GatewayError::NetworkUnavailable {
                    message: "offline".to_string(),
                }),
            };
        }

        match self.gateway.call(endpoint, method, payload.as_ref(), &[]).await {
            Ok(value) => Ok(SubmitOutcome::Completed(value)),
            Err(error) if error.is_offline_eligible() && policy == OfflinePolicy::Queue => {
                info!(endpoint, %method, error = %error, "network unavailable; queueing");
                Ok(SubmitOutcome::Queued(self.park(endpoint, method, payload)))
            }
            Err(error) => Err(error),
        }
    }

    pub async fn handle_control(&self, message: ControlMessage) {
        if let Some(follow_up) = self.receive(message) {
            self.follow_up(follow_up).await;
        }
    }

    fn receive(&self, message: ControlMessage) -> Option<FollowUp> {
        match message {
            ControlMessage::ReplayRequested { tag } => {
                debug!(tag = %tag, "worker requested replay");
                Some(FollowUp::Replay)
            }
            ControlMessage::RefreshRequested { tag } => {
                debug!(tag = %tag, "worker requested refresh");
                Some(FollowUp::Refresh)
            }
            ControlMessage::ShowNotification { title, body } => {
                self.notifier.notify(Notice::info(format!("{title}: {body}")));
                None
            }
        }
    }

    /// Last-resort handler for failures nothing else caught.
    pub fn report_fault(&self, fault: &(dyn std::error::Error + 'static)) {
        error!(error = %fault, "unhandled fault");
        self.notifier.notify(Notice::error(FAULT_MESSAGE));
    }

    /// Process platform signals and worker messages until the signal source
    /// closes.
    ///
    /// State changes apply as soon as a signal arrives. Replays and refreshes
    /// run alongside the loop, so a signal that lands mid-drain is not held
    /// back by it. In-flight work is finished before returning.
    pub async fn run(
        &self,
        mut signals: mpsc::Receiver<PlatformSignal>,
        mut control: mpsc::UnboundedReceiver<ControlMessage>,
    ) {
        let mut in_flight = FuturesUnordered::new();
        let mut control_open = true;
        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        let (_, follow_up) = self.observe(signal);
                        in_flight.extend(follow_up.map(|follow_up| self.follow_up(follow_up)));
                    }
                    None => break,
                },
                message = control.recv(), if control_open => match message {
                    Some(message) => {
                        in_flight.extend(self.receive(message).map(|follow_up| self.follow_up(follow_up)));
                    }
                    None => {
                        debug!("worker control channel closed");
                        control_open = false;
                    }
                },
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }
        while in_flight.next().await.is_some() {}
        self.scheduler.stop();
        info!(pending = self.queue.len(), "coordinator stopped");
    }

    fn park(&self, endpoint: &str, method: HttpMethod, payload: Option<Value>) -> u64 {
        let seq = self.queue.enqueue(endpoint, method, payload);
        self.notifier.notify(Notice::info(QUEUED_MESSAGE));
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::PageVisibility;
    use crate::gateway::GatewayConfig;
    use crate::models::DashboardStats;
    use crate::notify::{ChannelNotifier, NoticeLevel, UiEvent};
    use crate::scheduler::StatsSink;
    use crate::test_support::MockTransport;
    use crate::transport::HttpResponse;
    use serde_json::json;
    use std::sync::Mutex;

    struct Fixture {
        coordinator: SyncCoordinator<Arc<MockTransport>>,
        transport: Arc<MockTransport>,
        events: mpsc::UnboundedReceiver<UiEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let transport = Arc::new(MockTransport::default());
            let monitor = ConnectivityMonitor::default();
            let gateway = RequestGateway::new(
                GatewayConfig::new("https://wash.example.com"),
                transport.clone(),
                monitor.subscribe(),
            )
            .expect("gateway");
            let (notifier, events) = ChannelNotifier::channel();
            let coordinator = SyncCoordinator::new(
                monitor,
                Arc::new(gateway),
                Arc::new(ActionReplayQueue::default()),
                PageLocation::new("/dashboard"),
                Arc::new(notifier),
            );
            Self {
                coordinator,
                transport,
                events,
            }
        }

        fn drain_events(&mut self) -> Vec<UiEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    #[derive(Default)]
    struct CountingStats(Mutex<usize>);

    impl StatsSink for CountingStats {
        fn apply_stats(&self, _stats: &DashboardStats) {
            *self.0.lock().expect("lock") += 1;
        }
    }

    fn ok_envelope() -> HttpResponse {
        HttpResponse::json(200, &json!({"success": true, "data": {}}))
    }

    #[tokio::test(start_paused = true)]
    async fn offline_actions_replay_in_order_on_reconnect() {
        let mut fixture = Fixture::new();
        fixture.transport.respond("/api/orders/5/start", Ok(ok_envelope()));
        fixture.transport.respond("/api/orders/5/finish", Ok(ok_envelope()));
        let coordinator = &fixture.coordinator;

        coordinator.apply_signal(PlatformSignal::Offline).await;
        let start = coordinator
            .submit("/orders/5/start", HttpMethod::Post, None, OfflinePolicy::Queue)
            .await
            .expect("queued");
        let finish = coordinator
            .submit("/orders/5/finish", HttpMethod::Post, None, OfflinePolicy::Queue)
            .await
            .expect("queued");
        assert_eq!(start, SubmitOutcome::Queued(1));
        assert_eq!(finish, SubmitOutcome::Queued(2));
        assert!(fixture.transport.paths().is_empty());

        let transition = coordinator.apply_signal(PlatformSignal::Online).await;

        assert_eq!(transition, ConnectivityTransition::CameOnline);
        assert_eq!(
            fixture.transport.paths(),
            vec!["/api/orders/5/start", "/api/orders/5/finish"]
        );
        assert!(coordinator.queue().is_empty());

        let events = fixture.drain_events();
        assert_eq!(events[0], UiEvent::ShowBanner(Banner::Offline));
        let online_at = events
            .iter()
            .position(|event| *event == UiEvent::HideBanner(Banner::Offline))
            .expect("banner hidden");
        assert_eq!(
            events[online_at + 1],
            UiEvent::Notice(Notice::success("Synced 2 pending action(s)"))
        );
        assert_eq!(
            events[online_at + 2],
            UiEvent::Notice(Notice::success(BACK_ONLINE_MESSAGE))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn going_offline_stops_refresh_and_keeps_queue() {
        let fixture = Fixture::new();
        let coordinator = &fixture.coordinator;
        coordinator.start_live_refresh(
            RefreshSchedule::dashboard(Duration::from_secs(30)),
            RefreshAction::FetchStats {
                source: coordinator.gateway().clone(),
                sink: Arc::new(CountingStats::default()),
            },
        );
        coordinator.queue().enqueue("/orders/9/start", HttpMethod::Post, None);

        coordinator.apply_signal(PlatformSignal::Offline).await;

        assert!(!coordinator.scheduler().is_running());
        assert_eq!(coordinator.queue().len(), 1);

        let repeated = coordinator.apply_signal(PlatformSignal::Offline).await;
        assert_eq!(repeated, ConnectivityTransition::None);
    }

    #[tokio::test(start_paused = true)]
    async fn becoming_visible_refreshes_immediately() {
        let fixture = Fixture::new();
        fixture.transport.respond(
            "/api/dashboard-stats",
            Ok(HttpResponse::json(
                200,
                &json!({"active_queue": 2, "today_revenue": 1500.0, "today_orders": 4}),
            )),
        );
        let sink = Arc::new(CountingStats::default());
        let coordinator = &fixture.coordinator;
        coordinator.start_live_refresh(
            RefreshSchedule::dashboard(Duration::from_secs(30)),
            RefreshAction::FetchStats {
                source: coordinator.gateway().clone(),
                sink: sink.clone(),
            },
        );

        coordinator
            .apply_signal(PlatformSignal::Visibility(PageVisibility::Hidden))
            .await;
        assert!(!coordinator.scheduler().is_running());

        coordinator
            .apply_signal(PlatformSignal::Visibility(PageVisibility::Visible))
            .await;

        assert_eq!(*sink.0.lock().expect("lock"), 1);
        assert!(coordinator.scheduler().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_surfaces_offline_error() {
        let fixture = Fixture::new();
        let coordinator = &fixture.coordinator;
        coordinator.apply_signal(PlatformSignal::Offline).await;

        let error = coordinator
            .submit("/orders/5/start", HttpMethod::Post, None, OfflinePolicy::FailFast)
            .await
            .expect_err("should fail");

        assert!(error.is_offline_eligible());
        assert!(coordinator.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_while_online_are_queued() {
        let fixture = Fixture::new();
        fixture
            .transport
            .respond("/api/orders/7/start", Err("connection reset".to_string()));

        let outcome = fixture
            .coordinator
            .submit("/orders/7/start", HttpMethod::Post, None, OfflinePolicy::Queue)
            .await
            .expect("queued");

        assert_eq!(outcome, SubmitOutcome::Queued(1));
        assert_eq!(fixture.transport.calls_to("/api/orders/7/start"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn application_errors_are_not_queued() {
        let fixture = Fixture::new();
        fixture.transport.respond(
            "/api/orders/7/finish",
            Ok(HttpResponse::json(
                200,
                &json!({"success": false, "error": {"code": "INVALID_STATE", "message": "Order is not in progress"}}),
            )),
        );

        let error = fixture
            .coordinator
            .submit("/orders/7/finish", HttpMethod::Post, None, OfflinePolicy::Queue)
            .await
            .expect_err("should fail");

        assert_eq!(
            error,
            GatewayError::Application {
                message: "Order is not in progress".to_string()
            }
        );
        assert!(fixture.coordinator.queue().is_empty());
    }

    #[tokio::test]
    async fn worker_messages_reach_the_page() {
        let mut fixture = Fixture::new();
        fixture.transport.respond("/api/payments", Ok(ok_envelope()));
        fixture
            .coordinator
            .queue()
            .enqueue("/payments", HttpMethod::Post, Some(json!({"amount": 500})));

        fixture
            .coordinator
            .handle_control(ControlMessage::ReplayRequested {
                tag: "sync-actions".to_string(),
            })
            .await;
        fixture
            .coordinator
            .handle_control(ControlMessage::ShowNotification {
                title: "Queue".to_string(),
                body: "3 cars waiting".to_string(),
            })
            .await;

        assert!(fixture.coordinator.queue().is_empty());
        let events = fixture.drain_events();
        assert!(events.contains(&UiEvent::Notice(Notice::info("Queue: 3 cars waiting"))));
    }

    #[tokio::test]
    async fn faults_are_never_silent() {
        let mut fixture = Fixture::new();
        let fault = GatewayError::Decode {
            message: "expected value".to_string(),
        };

        fixture.coordinator.report_fault(&fault);

        let events = fixture.drain_events();
        assert!(matches!(
            events.as_slice(),
            [UiEvent::Notice(notice)] if notice.level == NoticeLevel::Error
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_ends_when_signals_close() {
        let fixture = Fixture::new();
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        drop(control_tx);

        signal_tx.send(PlatformSignal::Offline).await.expect("send");
        drop(signal_tx);

        fixture.coordinator.run(signal_rx, control_rx).await;

        assert!(!fixture.coordinator.monitor().state().is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn going_offline_mid_drain_applies_at_once() {
        let mut fixture = Fixture::new();
        for id in 1..=3 {
            let endpoint = format!("/orders/{id}/start");
            fixture
                .transport
                .respond(&format!("/api{endpoint}"), Err("connection reset".to_string()));
            fixture.coordinator.queue().enqueue(endpoint, HttpMethod::Post, None);
        }
        fixture.coordinator.apply_signal(PlatformSignal::Offline).await;
        fixture.drain_events();

        let coordinator = &fixture.coordinator;
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let started = tokio::time::Instant::now();
        let flap = async {
            signal_tx.send(PlatformSignal::Online).await.expect("send");
            tokio::time::sleep(Duration::from_millis(10)).await;
            signal_tx.send(PlatformSignal::Offline).await.expect("send");
            tokio::time::sleep(Duration::from_millis(1)).await;
            let state = coordinator.monitor().state();
            let elapsed = started.elapsed();
            drop(signal_tx);
            (state, elapsed)
        };
        let ((), (state, elapsed)) = tokio::join!(coordinator.run(signal_rx, control_rx), flap);

        assert!(!state.is_online);
        assert!(elapsed < Duration::from_millis(100));
        assert_eq!(fixture.transport.paths(), vec!["/api/orders/1/start"]);
        let attempts: Vec<u32> = coordinator
            .queue()
            .snapshot()
            .iter()
            .map(|action| action.replay_attempts)
            .collect();
        assert_eq!(attempts, vec![1, 0, 0]);

        let events = fixture.drain_events();
        assert_eq!(events[0], UiEvent::HideBanner(Banner::Offline));
        assert_eq!(events[1], UiEvent::ShowBanner(Banner::Offline));
        assert!(!events.contains(&UiEvent::Notice(Notice::success(BACK_ONLINE_MESSAGE))));
        assert!(!fixture.coordinator.scheduler().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn hiding_during_a_slow_refresh_keeps_the_timer_off() {
        let fixture = Fixture::new();
        fixture.transport.respond(
            "/api/dashboard-stats",
            Ok(HttpResponse::json(
                200,
                &json!({"active_queue": 1, "today_revenue": 300.0, "today_orders": 1}),
            )),
        );
        fixture
            .transport
            .set_latency("/api/dashboard-stats", Duration::from_secs(5));
        let sink = Arc::new(CountingStats::default());
        let coordinator = &fixture.coordinator;
        coordinator.start_live_refresh(
            RefreshSchedule::dashboard(Duration::from_secs(30)),
            RefreshAction::FetchStats {
                source: coordinator.gateway().clone(),
                sink: sink.clone(),
            },
        );
        coordinator
            .apply_signal(PlatformSignal::Visibility(PageVisibility::Hidden))
            .await;

        let (signal_tx, signal_rx) = mpsc::channel(8);
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let glance = async {
            signal_tx
                .send(PlatformSignal::Visibility(PageVisibility::Visible))
                .await
                .expect("send");
            tokio::time::sleep(Duration::from_millis(10)).await;
            signal_tx
                .send(PlatformSignal::Visibility(PageVisibility::Hidden))
                .await
                .expect("send");
            tokio::time::sleep(Duration::from_millis(1)).await;
            let state = coordinator.monitor().state();
            drop(signal_tx);
            state
        };
        let ((), state) = tokio::join!(coordinator.run(signal_rx, control_rx), glance);

        assert_eq!(state.visibility, PageVisibility::Hidden);
        assert_eq!(*sink.0.lock().expect("lock"), 1);
        assert!(!coordinator.scheduler().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_skips_pages_outside_the_schedule() {
        let fixture = Fixture::new();
        let sink = Arc::new(CountingStats::default());
        let coordinator = &fixture.coordinator;
        coordinator.start_live_refresh(
            RefreshSchedule::dashboard(Duration::from_secs(30)),
            RefreshAction::FetchStats {
                source: coordinator.gateway().clone(),
                sink: sink.clone(),
            },
        );

        coordinator.location().navigate("/orders/5");
        coordinator
            .apply_signal(PlatformSignal::Visibility(PageVisibility::Hidden))
            .await;
        coordinator
            .apply_signal(PlatformSignal::Visibility(PageVisibility::Visible))
            .await;

        assert_eq!(coordinator.location().current(), "/orders/5");
        assert_eq!(*sink.0.lock().expect("lock"), 0);
        assert_eq!(fixture.transport.calls_to("/api/dashboard-stats"), 0);
        assert!(coordinator.scheduler().is_running());
    }
}
