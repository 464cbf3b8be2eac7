//! Log-only stand-ins for the dashboard widgets.

use std::sync::Arc;

use spotwash_sync::error::GatewayError;
use spotwash_sync::scheduler::{OrderSink, PageReloader, StatsSink};
use spotwash_sync::{DashboardStats, HttpTransport, OrderDetail, RequestGateway};
use tracing::{info, warn};

pub struct LogStatsSink;

impl StatsSink for LogStatsSink {
    fn apply_stats(&self, stats: &DashboardStats) {
        info!(
            active_queue = stats.active_queue,
            today_revenue = stats.today_revenue,
            today_orders = stats.today_orders,
            "dashboard stats"
        );
    }

    fn refresh_failed(&self, error: &GatewayError) {
        warn!(error = %error, "dashboard stats refresh failed");
    }
}

pub struct LogOrderSink;

impl OrderSink for LogOrderSink {
    fn apply_order(&self, detail: &OrderDetail) {
        let order = &detail.order;
        info!(
            order_id = order.id,
            order_number = %order.order_number,
            status = %order.status,
            balance_due = order.balance_due,
            "order detail"
        );
    }

    fn order_failed(&self, order_id: u64, error: &GatewayError) {
        warn!(order_id, error = %error, "order detail refresh failed");
    }
}

/// The queue page reloads wholesale; headless, that means refetching the queue.
pub struct QueueReloader<T> {
    gateway: Arc<RequestGateway<T>>,
}

impl<T> QueueReloader<T> {
    pub fn new(gateway: Arc<RequestGateway<T>>) -> Self {
        Self { gateway }
    }
}

impl<T> PageReloader for QueueReloader<T>
where
    T: HttpTransport + 'static,
{
    fn reload(&self, path: &str) {
        let gateway = Arc::clone(&self.gateway);
        let path = path.to_string();
        tokio::spawn(async move {
            match gateway.order_queue().await {
                Ok(queue) => {
                    let active = queue.queue.iter().filter(|order| order.is_active()).count();
                    info!(path = %path, queue_length = queue.queue_length, active, "queue reloaded");
                }
                Err(error) => warn!(path = %path, error = %error, "queue reload failed"),
            }
        });
    }
}
