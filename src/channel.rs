//! Scan event channel
//!
//! In-process fan-out of scan lifecycle events. Every coordinator subscribes once and
//! only reacts to its own product. Each subscriber owns an unbounded queue that only
//! receives its product's events, so a slow subscriber never costs another one an
//! event and a terminal event is never dropped.
//!
//! Delivery to a subscriber is serial: one task per subscription drains its queue and
//! runs the handler to completion before taking the next event, which is what lets
//! coordinators mutate state without reentrancy.
//!
//! A subscription is an explicit handle. Disposing it (or dropping it) removes the
//! subscriber and cancels its delivery task. Closing the channel instead lets every
//! task finish what is already queued before it exits.

use crate::proto::Product;
use crate::scan::errors::{CoordinatorError, CoordinatorResult, TransportError};
use crate::scan::ScanEvent;
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ScanEventChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    observers: Mutex<Observers>,
    next_id: AtomicU64,
    backlog_warning: usize,
}

#[derive(Default)]
struct Observers {
    list: Vec<Observer>,
    closed: bool,
}

struct Observer {
    id: u64,
    product: Product,
    sender: mpsc::UnboundedSender<ScanEvent>,
    backlog: Arc<AtomicUsize>,
}

impl fmt::Debug for ScanEventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observers = self.inner.observers.lock();
        f.debug_struct("ScanEventChannel")
            .field("subscribers", &observers.list.len())
            .field("closed", &observers.closed)
            .field("backlog_warning", &self.inner.backlog_warning)
            .finish()
    }
}

impl ChannelInner {
    fn remove(&self, id: u64) {
        self.observers.lock().list.retain(|observer| observer.id != id);
    }
}

impl ScanEventChannel {
    /// `backlog_warning` is the queue depth at which a lagging subscriber gets logged.
    /// Nothing is ever dropped.
    pub fn new(backlog_warning: usize) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                observers: Mutex::new(Observers::default()),
                next_id: AtomicU64::new(0),
                backlog_warning,
            }),
        }
    }

    /// Returns how many subscribers will see the event.
    pub fn publish(&self, event: ScanEvent) -> usize {
        let mut observers = self.inner.observers.lock();
        if observers.closed {
            debug!(
                "Scan event channel closed, dropping {} {} for {}",
                event.product,
                event.status.as_str(),
                event.folder_path.display()
            );
            return 0;
        }

        debug!(
            "Publishing {} {} for {}",
            event.product,
            event.status.as_str(),
            event.folder_path.display()
        );

        let backlog_warning = self.inner.backlog_warning;
        let mut delivered = 0;
        observers.list.retain(|observer| {
            if observer.product != event.product {
                return true;
            }
            if observer.sender.send(event.clone()).is_err() {
                return false;
            }

            let queued = observer.backlog.fetch_add(1, Ordering::SeqCst) + 1;
            if queued == backlog_warning {
                warn!(
                    "{} subscriber is falling behind with {} scan events queued",
                    observer.product, queued
                );
            }
            delivered += 1;
            true
        });
        delivered
    }

    pub fn publish_notification(
        &self,
        notification: &lsp_server::Notification,
    ) -> Result<usize, TransportError> {
        let event = ScanEvent::from_notification(notification)?;
        Ok(self.publish(event))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.observers.lock().list.len()
    }

    /// Events published but not yet handled, across all subscribers.
    pub fn pending(&self) -> usize {
        self.inner
            .observers
            .lock()
            .list
            .iter()
            .map(|observer| observer.backlog.load(Ordering::SeqCst))
            .sum()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.observers.lock().closed
    }

    /// Stops accepting events. Delivery tasks handle whatever is already queued and then
    /// exit, so `Subscription::join` returns once a subscriber has caught up.
    pub fn close(&self) {
        let mut observers = self.inner.observers.lock();
        if observers.closed {
            return;
        }
        observers.closed = true;
        observers.list.clear();
        debug!("Scan event channel closed");
    }

    /// Spawns a delivery task that hands `product`'s events to `handler`, one at a time.
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, product: Product, handler: F) -> CoordinatorResult<Subscription>
    where
        F: Fn(&ScanEvent) + Send + 'static,
    {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| CoordinatorError::NoRuntime)?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<ScanEvent>();
        let backlog = Arc::new(AtomicUsize::new(0));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut observers = self.inner.observers.lock();
            if observers.closed {
                return Err(CoordinatorError::ChannelClosed);
            }
            observers.list.push(Observer {
                id,
                product,
                sender,
                backlog: Arc::clone(&backlog),
            });
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    received = receiver.recv() => match received {
                        Some(event) => {
                            handler(&event);
                            backlog.fetch_sub(1, Ordering::SeqCst);
                        }
                        None => {
                            debug!("Scan event channel closed, stopping {} subscriber", product);
                            break;
                        }
                    },
                }
            }
        });

        debug!("Subscribed {} to scan events", product);
        Ok(Subscription {
            id,
            channel: Arc::downgrade(&self.inner),
            token,
            task,
        })
    }
}

pub struct Subscription {
    id: u64,
    channel: Weak<ChannelInner>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Subscription {
    /// Unsubscribes and cancels delivery. Queued events are not handled.
    pub fn dispose(&self) {
        self.token.cancel();
        if let Some(channel) = self.channel.upgrade() {
            channel.remove(self.id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the delivery task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the delivery task to exit. Only returns once the channel has been
    /// closed or the subscription disposed.
    pub async fn join(mut self) {
        if let Err(e) = (&mut self.task).await {
            if e.is_panic() {
                warn!("Scan event delivery task panicked");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn create_test_recorder() -> (Arc<Mutex<Vec<ScanEvent>>>, impl Fn(&ScanEvent) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &ScanEvent| {
            sink.lock().unwrap().push(event.clone())
        })
    }

    #[tokio::test]
    async fn test_subscriber_receives_only_its_product() {
        let channel = ScanEventChannel::new(16);
        let (seen, handler) = create_test_recorder();
        let _subscription = channel.subscribe(Product::Code, handler).unwrap();

        assert_eq!(channel.publish(ScanEvent::in_progress("/a", Product::OpenSource)), 0);
        assert_eq!(channel.publish(ScanEvent::in_progress("/a", Product::Code)), 1);
        channel.publish(ScanEvent::success("/a", Product::Code));
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ScanEvent::in_progress("/a", Product::Code),
                ScanEvent::success("/a", Product::Code),
            ]
        );
    }

    #[tokio::test]
    async fn test_burst_beyond_backlog_warning_loses_nothing() {
        let channel = ScanEventChannel::new(4);
        let (seen, handler) = create_test_recorder();
        let _subscription = channel.subscribe(Product::Code, handler).unwrap();
        let _other = channel.subscribe(Product::OpenSource, |_| {}).unwrap();

        channel.publish(ScanEvent::in_progress("/a", Product::Code));
        settle().await;

        channel.publish(ScanEvent::success("/a", Product::Code));
        for i in 0..20 {
            channel.publish(ScanEvent::in_progress(format!("/o{}", i), Product::OpenSource));
        }
        for i in 0..10 {
            channel.publish(ScanEvent::in_progress(format!("/c{}", i), Product::Code));
        }
        assert_eq!(channel.pending(), 31);

        settle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 12);
        assert_eq!(seen[1], ScanEvent::success("/a", Product::Code));
        assert_eq!(seen[11], ScanEvent::in_progress("/c9", Product::Code));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_close_lets_queued_events_finish() {
        let channel = ScanEventChannel::new(16);
        let (seen, handler) = create_test_recorder();
        let subscription = channel.subscribe(Product::Secrets, handler).unwrap();

        for folder in ["/a", "/b", "/c"] {
            channel.publish(ScanEvent::success(folder, Product::Secrets));
        }
        channel.close();
        subscription.join().await;

        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(channel.is_closed());
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.publish(ScanEvent::success("/d", Product::Secrets)), 0);
        assert!(matches!(
            channel.subscribe(Product::Secrets, |_| {}),
            Err(CoordinatorError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_disposed_subscription_stops_delivery() {
        let channel = ScanEventChannel::new(16);
        let (seen, handler) = create_test_recorder();
        let subscription = channel.subscribe(Product::IaC, handler).unwrap();

        channel.publish(ScanEvent::in_progress("/a", Product::IaC));
        settle().await;
        subscription.dispose();
        settle().await;

        assert_eq!(channel.publish(ScanEvent::success("/a", Product::IaC)), 0);
        settle().await;

        assert!(subscription.is_disposed());
        assert!(subscription.is_finished());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let channel = ScanEventChannel::new(16);
        let subscription = channel.subscribe(Product::Secrets, |_| {}).unwrap();
        assert_eq!(channel.subscriber_count(), 1);

        drop(subscription);

        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_without_runtime_fails() {
        let channel = ScanEventChannel::new(16);
        let result = channel.subscribe(Product::Code, |_| {});
        assert!(matches!(result, Err(CoordinatorError::NoRuntime)));
    }

    #[test]
    fn test_publish_without_subscribers_reaches_nobody() {
        let channel = ScanEventChannel::new(16);
        assert_eq!(channel.publish(ScanEvent::success("/a", Product::Code)), 0);
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_pending_drains_as_subscriber_handles() {
        let channel = ScanEventChannel::new(16);
        let _subscription = channel.subscribe(Product::Code, |_| {}).unwrap();

        channel.publish(ScanEvent::in_progress("/a", Product::Code));
        channel.publish(ScanEvent::success("/a", Product::Code));
        assert_eq!(channel.pending(), 2);

        settle().await;
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn test_publish_notification_rejects_malformed_params() {
        let channel = ScanEventChannel::new(16);
        let notification = lsp_server::Notification::new(
            crate::proto::SCAN_NOTIFICATION_METHOD.to_string(),
            serde_json::json!({ "product": "code" }),
        );

        assert!(matches!(
            channel.publish_notification(&notification),
            Err(TransportError::Malformed(_))
        ));
    }
}
