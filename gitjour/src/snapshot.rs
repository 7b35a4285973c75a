use std::collections::HashSet;
use std::time::Duration;
use shared::types::ServiceRecord;
use crate::error::DiscoveryError;
use crate::mdns::browser::{DiscoveryClient, NotificationKind, Subscription};

/// Every distinct record seen during one gathering window
pub type DiscoveredSet = HashSet<ServiceRecord>;

/// Collect everything advertised under `service_type` for `window`.
///
/// This is a catalog of what was seen, not what is still up: removals during
/// the window are ignored.
pub async fn gather(
    client: &DiscoveryClient,
    service_type: &str,
    window: Duration,
) -> Result<DiscoveredSet, DiscoveryError> {
    let subscription = client.subscribe(service_type)?;
    Ok(collect(subscription, window).await)
}

/// Like [`gather`], keeping only instances whose TXT `key` equals `value`
pub async fn gather_marked(
    client: &DiscoveryClient,
    service_type: &str,
    key: &str,
    value: &str,
    window: Duration,
) -> Result<DiscoveredSet, DiscoveryError> {
    let subscription = client.subscribe(service_type)?.require_attribute(key, value);
    Ok(collect(subscription, window).await)
}

async fn collect(mut subscription: Subscription, window: Duration) -> DiscoveredSet {
    let handle = subscription.handle();
    let deadline = tokio::time::Instant::now() + window;
    let mut discovered = DiscoveredSet::new();

    loop {
        tokio::select! {
            notification = subscription.next() => match notification {
                Some(notification) if notification.kind == NotificationKind::Added => {
                    discovered.insert(notification.record);
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }

    handle.cancel();
    tracing::debug!("Gathered {} services from {}", discovered.len(), handle.service_type());
    discovered
}
