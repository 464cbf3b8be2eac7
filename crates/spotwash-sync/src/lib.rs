//! Offline-tolerant sync and caching layer for the car-wash operations dashboard.
//!
//! Two halves that share no memory:
//! - the page side: connectivity monitor, request gateway, action replay
//!   queue, live refresh timers and search, wired together by the coordinator
//! - the worker side: the cache arbiter running on its own task, reached only
//!   through message channels

pub mod arbiter;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod search;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use arbiter::{
    ArbiterConfig, ArbiterHandle, ArbiterWorker, CacheArbiter, ControlMessage, FetchOutcome,
    ResponseSource,
};
pub use config::SyncConfig;
pub use connectivity::{
    ConnectivityHandle, ConnectivityMonitor, ConnectivityState, ConnectivityTransition,
    PageVisibility, PlatformSignal,
};
pub use coordinator::{OfflinePolicy, SubmitOutcome, SyncCoordinator};
pub use error::{ArbiterError, ConfigError, GatewayError};
pub use gateway::{GatewayConfig, RequestGateway, RetryBudget};
pub use models::{DashboardStats, OrderDetail, OrderQueue, OrderSummary, SearchResults};
pub use notify::{Banner, ChannelNotifier, Notice, NoticeLevel, Notifier, TracingNotifier, UiEvent};
pub use queue::{ActionReplayQueue, ActionReplayer, DrainSummary, PendingAction};
pub use scheduler::{
    LiveRefreshScheduler, OrderDetailPoller, PageLocation, PollerHandle, RefreshAction,
    RefreshSchedule,
};
pub use search::{NavigationRegistry, ResultKind, SearchDebouncer};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
