use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use serde::Deserialize;
use shared::types::ServiceRecord;
use crate::error::DiscoveryError;
use crate::mdns::browser::{DiscoveryClient, Notification, NotificationKind, SubscriptionHandle};

/// How notifications change registry membership
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipPolicy {
    /// Every notification flips presence, whatever its kind
    #[default]
    Toggle,
    /// Added inserts and Removed deletes, both idempotent
    FollowKind,
}

/// The set of services currently advertised, shared between the task
/// receiving notifications and any number of readers.
///
/// Every read and write goes through the one lock, so readers only ever see
/// whole toggles.
#[derive(Debug, Default)]
pub struct LiveRegistry {
    members: Mutex<HashSet<ServiceRecord>>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove `record` if present, insert it otherwise. Returns whether the
    /// record is present afterwards.
    pub fn toggle(&self, record: ServiceRecord) -> bool {
        let mut members = self.lock();
        if members.remove(&record) {
            false
        } else {
            members.insert(record);
            true
        }
    }

    pub fn apply(&self, notification: Notification, policy: MembershipPolicy) -> bool {
        match policy {
            MembershipPolicy::Toggle => self.toggle(notification.record),
            MembershipPolicy::FollowKind => {
                let mut members = self.lock();
                match notification.kind {
                    NotificationKind::Added => {
                        // replace so the latest description wins
                        members.replace(notification.record);
                        true
                    }
                    NotificationKind::Removed => {
                        members.remove(&notification.record);
                        false
                    }
                }
            }
        }
    }

    /// Copy of the current members, ordered by name, host and port
    pub fn snapshot(&self) -> Vec<ServiceRecord> {
        let mut records: Vec<ServiceRecord> = self.lock().iter().cloned().collect();
        records.sort_by(|a, b| {
            (a.name(), a.host(), a.port()).cmp(&(b.name(), b.host(), b.port()))
        });
        records
    }

    pub fn contains(&self, record: &ServiceRecord) -> bool {
        self.lock().contains(record)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<ServiceRecord>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keep a registry in step with `service_type` until the returned handle is
/// cancelled. With `marker` set, only instances carrying that TXT attribute
/// are tracked.
pub fn track(
    client: &DiscoveryClient,
    service_type: &str,
    marker: Option<(&str, &str)>,
    policy: MembershipPolicy,
) -> Result<(Arc<LiveRegistry>, SubscriptionHandle), DiscoveryError> {
    let mut subscription = client.subscribe(service_type)?;
    if let Some((key, value)) = marker {
        subscription = subscription.require_attribute(key, value);
    }

    let registry = Arc::new(LiveRegistry::new());
    let sink = registry.clone();
    let handle = subscription.spawn(move |notification| {
        let name = notification.record.name().to_string();
        let present = sink.apply(notification, policy);
        tracing::info!("{} {}", if present { "Now browsing" } else { "No longer browsing" }, name);
    });

    tracing::info!("Tracking {} with {:?} membership", service_type, policy);
    Ok((registry, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use crate::mdns::testing::{found, malformed, marked, removed, resolved, FakeBrowser};

    const TYPE: &str = "_http._tcp.local.";

    fn record(name: &str) -> ServiceRecord {
        ServiceRecord::new(name, "laptop.local", 1234, "")
    }

    fn notification(name: &str, kind: NotificationKind) -> Notification {
        Notification { record: record(name), kind }
    }

    #[test]
    fn test_toggle_parity() {
        let registry = LiveRegistry::new();
        let a = record("a");

        let presence: Vec<bool> = (0..3)
            .map(|_| {
                registry.apply(notification("a", NotificationKind::Added), MembershipPolicy::Toggle);
                registry.contains(&a)
            })
            .collect();

        assert_eq!(presence, vec![true, false, true]);
    }

    #[test]
    fn test_toggle_ignores_kind() {
        let registry = LiveRegistry::new();

        registry.apply(notification("a", NotificationKind::Removed), MembershipPolicy::Toggle);
        assert!(registry.contains(&record("a")), "A removal of an absent record still toggles it in");

        registry.apply(notification("a", NotificationKind::Added), MembershipPolicy::Toggle);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_toggle_matches_on_identity_not_description() {
        let registry = LiveRegistry::new();

        assert!(registry.toggle(ServiceRecord::new("a", "laptop.local", 1234, "old")));
        assert!(!registry.toggle(ServiceRecord::new("a", "laptop.local", 1234, "new")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_follow_kind_is_idempotent() {
        let registry = LiveRegistry::new();
        let policy = MembershipPolicy::FollowKind;

        registry.apply(notification("a", NotificationKind::Added), policy);
        registry.apply(notification("a", NotificationKind::Added), policy);
        assert_eq!(registry.len(), 1);

        registry.apply(notification("a", NotificationKind::Removed), policy);
        registry.apply(notification("a", NotificationKind::Removed), policy);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted_copy() {
        let registry = LiveRegistry::new();
        registry.toggle(record("b"));
        registry.toggle(record("a"));

        let snapshot = registry.snapshot();
        registry.clear();

        let names: Vec<&str> = snapshot.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_snapshots_see_whole_toggles() {
        const COUNT: usize = 50;
        let registry = Arc::new(LiveRegistry::new());
        let names: Vec<String> = (0..COUNT).map(|i| format!("repo-{:03}", i)).collect();

        // First pass adds every record in order, second pass removes them in
        // the same order. Any consistent state is a prefix or a suffix.
        let writer = {
            let registry = registry.clone();
            let names = names.clone();
            thread::spawn(move || {
                for _ in 0..2 {
                    for name in &names {
                        registry.toggle(record(name));
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..500)
                        .map(|_| {
                            registry
                                .snapshot()
                                .iter()
                                .map(|r| r.name().to_string())
                                .collect::<Vec<_>>()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            for seen in reader.join().unwrap() {
                let is_prefix = seen[..] == names[..seen.len()];
                let is_suffix = seen[..] == names[COUNT - seen.len()..];
                assert!(is_prefix || is_suffix, "Impossible snapshot: {:?}", seen);
            }
        }
        assert!(registry.is_empty());
    }

    async fn settle(registry: &LiveRegistry, expected: usize) {
        for _ in 0..100 {
            if registry.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_track_follows_notifications() {
        let browser = FakeBrowser::new();
        let (registry, handle) = track(
            &browser.client(),
            TYPE,
            Some(("gitjour", "true")),
            MembershipPolicy::Toggle,
        )
        .unwrap();
        let emitter = browser.emitter(TYPE).unwrap();

        emitter.send(marked("tools", "laptop.local", 1234, "")).unwrap();
        emitter.send(resolved("printer", "printer.local", 80, "")).unwrap();
        emitter.send(malformed("broken")).unwrap();
        emitter.send(marked("docs", "laptop.local", 1235, "")).unwrap();
        settle(&registry, 2).await;

        let names: Vec<String> = registry.snapshot().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["docs", "tools"]);

        emitter.send(removed("tools")).unwrap();
        settle(&registry, 1).await;
        assert_eq!(registry.len(), 1);

        handle.cancel();
        assert_eq!(browser.stopped(), vec![TYPE.to_string()]);
    }

    #[tokio::test]
    async fn test_reresolve_keeps_service_listed() {
        let browser = FakeBrowser::new();
        let (registry, handle) = track(
            &browser.client(),
            TYPE,
            Some(("gitjour", "true")),
            MembershipPolicy::Toggle,
        )
        .unwrap();
        let emitter = browser.emitter(TYPE).unwrap();

        emitter.send(found("tools")).unwrap();
        emitter.send(marked("tools", "laptop.local", 1234, "")).unwrap();
        // the daemon resolves again when an address record changes
        emitter.send(marked("tools", "laptop.local", 1234, "")).unwrap();
        emitter.send(marked("docs", "laptop.local", 1235, "")).unwrap();
        settle(&registry, 2).await;

        let names: Vec<String> = registry.snapshot().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["docs", "tools"]);

        handle.cancel();
    }
}
