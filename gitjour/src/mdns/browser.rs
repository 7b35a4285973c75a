use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use futures::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use shared::types::ServiceRecord;
use crate::error::{DiscoveryError, ResolveError};

/// The discovery-protocol boundary: browse a service type and receive its
/// resolved/removed instances on a channel.
pub trait Browser: Send + Sync {
    fn browse(&self, service_type: &str) -> Result<flume::Receiver<BrowseEvent>, DiscoveryError>;
    fn stop_browse(&self, service_type: &str) -> Result<(), DiscoveryError>;
}

/// An instance after resolution, with every TXT attribute it carried
#[derive(Debug, Clone)]
pub struct ResolvedInstance {
    pub record: ServiceRecord,
    pub attributes: HashMap<String, String>,
}

/// Raw events as they come off the browser, keyed by the full DNS-SD name.
///
/// `Found` is the browse-level add of an instance. `Resolved` follows it, and
/// may repeat later whenever the instance's address or TXT records change.
#[derive(Debug, Clone)]
pub enum BrowseEvent {
    Found {
        fullname: String,
    },
    Resolved {
        fullname: String,
        resolved: Result<ResolvedInstance, ResolveError>,
    },
    Removed {
        fullname: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Added,
    Removed,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub record: ServiceRecord,
    pub kind: NotificationKind,
}

/// Turns a [`Browser`] into cancellable subscriptions of [`Notification`]s.
#[derive(Clone)]
pub struct DiscoveryClient {
    browser: Arc<dyn Browser>,
}

impl DiscoveryClient {
    pub fn new(browser: Arc<dyn Browser>) -> Self {
        Self { browser }
    }

    /// Start browsing `service_type`. Notifications are pulled with
    /// [`Subscription::next`]; the browse stops when the subscription is
    /// cancelled or dropped.
    pub fn subscribe(&self, service_type: &str) -> Result<Subscription, DiscoveryError> {
        let events = self.browser.browse(service_type)?;
        tracing::debug!("Browsing {}", service_type);

        Ok(Subscription {
            events,
            handle: SubscriptionHandle::new(self.browser.clone(), service_type),
            resolved: HashMap::new(),
            found: HashSet::new(),
            pending: VecDeque::new(),
            required: None,
        })
    }

    /// Start browsing `service_type` and feed every notification to
    /// `on_notification` from a background task, one at a time.
    pub fn subscribe_with<F>(
        &self,
        service_type: &str,
        on_notification: F,
    ) -> Result<SubscriptionHandle, DiscoveryError>
    where
        F: FnMut(Notification) + Send + 'static,
    {
        Ok(self.subscribe(service_type)?.spawn(on_notification))
    }
}

/// A live browse of one service type.
///
/// Notifications come out in the order the browser produced them. An
/// instance is reported Added on its first resolve, and again only after it
/// was found anew or removed; re-resolves in between refresh the stored
/// record silently. Instances that fail to resolve are skipped. A removal is
/// reported with the record last resolved under the same name, and dropped if
/// there was none.
pub struct Subscription {
    events: flume::Receiver<BrowseEvent>,
    handle: SubscriptionHandle,
    /// Last record resolved per fullname, so removals can name their record
    resolved: HashMap<String, ServiceRecord>,
    /// Found by the browse but not yet resolved
    found: HashSet<String>,
    /// Notifications decided but not handed out yet
    pending: VecDeque<Notification>,
    required: Option<(String, String)>,
}

impl Subscription {
    /// Only pass through instances whose TXT attribute `key` equals `value`
    pub fn require_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required = Some((key.into(), value.into()));
        self
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Wait for the next notification. Returns `None` once the subscription
    /// is cancelled or the browser goes away.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            if let Some(notification) = self.pending.pop_front() {
                if self.handle.is_cancelled() {
                    return None;
                }
                return Some(notification);
            }

            let event = tokio::select! {
                biased;
                _ = self.handle.cancelled() => return None,
                event = self.events.recv_async() => event.ok()?,
            };

            // A cancel may land while the event was in flight
            if self.handle.is_cancelled() {
                return None;
            }

            self.accept(event);
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Notification> {
        stream::unfold(self, |mut subscription| async move {
            let notification = subscription.next().await?;
            Some((notification, subscription))
        })
    }

    /// Drive this subscription from a background task
    pub fn spawn<F>(mut self, mut on_notification: F) -> SubscriptionHandle
    where
        F: FnMut(Notification) + Send + 'static,
    {
        let handle = self.handle();
        tokio::spawn(async move {
            while let Some(notification) = self.next().await {
                if self.handle.is_cancelled() {
                    break;
                }
                on_notification(notification);
            }
            tracing::debug!("Subscription to {} finished", self.handle.service_type());
        });
        handle
    }

    fn accept(&mut self, event: BrowseEvent) {
        match event {
            BrowseEvent::Found { fullname } => {
                self.found.insert(fullname);
            }
            BrowseEvent::Resolved { fullname, resolved: Ok(instance) } => {
                let announced = self.found.remove(&fullname);

                if !self.wanted(&instance.attributes) {
                    tracing::trace!("Ignoring unmarked instance {}", fullname);
                    if let Some(previous) = self.resolved.remove(&fullname) {
                        self.emit(previous, NotificationKind::Removed);
                    }
                    return;
                }

                let record = instance.record;
                match self.resolved.insert(fullname.clone(), record.clone()) {
                    None => {
                        tracing::debug!("Resolved {} at {}:{}", fullname, record.host(), record.port());
                        self.emit(record, NotificationKind::Added);
                    }
                    Some(previous) if previous != record => {
                        tracing::debug!("{} moved to {}:{}", fullname, record.host(), record.port());
                        self.emit(previous, NotificationKind::Removed);
                        self.emit(record, NotificationKind::Added);
                    }
                    Some(_) if announced => {
                        tracing::debug!("Re-announced {}", fullname);
                        self.emit(record, NotificationKind::Added);
                    }
                    Some(_) => tracing::trace!("Refreshed {}", fullname),
                }
            }
            BrowseEvent::Resolved { fullname, resolved: Err(e) } => {
                tracing::debug!("Skipping {}: {}", fullname, e);
            }
            BrowseEvent::Removed { fullname } => {
                tracing::debug!("Service removed: {}", fullname);
                self.found.remove(&fullname);
                if let Some(record) = self.resolved.remove(&fullname) {
                    self.emit(record, NotificationKind::Removed);
                }
            }
        }
    }

    fn emit(&mut self, record: ServiceRecord, kind: NotificationKind) {
        self.pending.push_back(Notification { record, kind });
    }

    fn wanted(&self, attributes: &HashMap<String, String>) -> bool {
        match &self.required {
            Some((key, value)) => attributes.get(key) == Some(value),
            None => true,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Cancels a [`Subscription`] from anywhere. Cancelling twice is a no-op.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    service_type: String,
    browser: Arc<dyn Browser>,
    token: CancellationToken,
    stopped: AtomicBool,
}

impl SubscriptionHandle {
    fn new(browser: Arc<dyn Browser>, service_type: &str) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                service_type: service_type.to_string(),
                browser,
                token: CancellationToken::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Stop the browse. After this returns the subscription yields nothing more.
    pub fn cancel(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.token.cancel();

        if let Err(e) = self.inner.browser.stop_browse(&self.inner.service_type) {
            tracing::debug!("Failed to stop browsing {}: {}", self.inner.service_type, e);
        }

        tracing::debug!("Stopped browsing {}", self.inner.service_type);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    pub fn service_type(&self) -> &str {
        &self.inner.service_type
    }
}
