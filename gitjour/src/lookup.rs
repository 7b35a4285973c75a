use std::future::ready;
use std::time::Duration;
use futures::StreamExt;
use shared::types::ServiceRecord;
use crate::error::DiscoveryError;
use crate::mdns::browser::{DiscoveryClient, NotificationKind};

/// Find the first service named exactly `name`, giving up after `timeout`.
///
/// Browsing stops as soon as a match arrives. Running out of time is not an
/// error: it returns `Ok(None)` and the caller decides how to report it.
pub async fn locate(
    client: &DiscoveryClient,
    service_type: &str,
    name: &str,
    timeout: Duration,
) -> Result<Option<ServiceRecord>, DiscoveryError> {
    let subscription = client.subscribe(service_type)?;
    let handle = subscription.handle();

    let mut matches = Box::pin(subscription.into_stream().filter(|notification| {
        ready(notification.kind == NotificationKind::Added && notification.record.name() == name)
    }));

    let found = tokio::select! {
        notification = matches.next() => notification.map(|n| n.record),
        _ = tokio::time::sleep(timeout) => {
            tracing::debug!("No service named {} after {:?}", name, timeout);
            None
        }
    };

    // Whichever side lost the race, cancelling again is harmless
    handle.cancel();

    Ok(found)
}
