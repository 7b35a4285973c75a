//! In-memory stand-ins for the mDNS daemon.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use shared::protocol::{TXT_DESCRIPTION, TXT_MARKER, TXT_MARKER_VALUE};
use shared::types::ServiceRecord;
use crate::error::{AnnounceError, DiscoveryError, ResolveError};
use crate::mdns::advertise::{Announcement, Publisher};
use crate::mdns::browser::{BrowseEvent, Browser, DiscoveryClient, ResolvedInstance};

fn fullname(name: &str) -> String {
    format!("{}._git._tcp.local.", name)
}

pub fn resolved(name: &str, host: &str, port: u16, description: &str) -> BrowseEvent {
    let attributes = HashMap::from([(TXT_DESCRIPTION.to_string(), description.to_string())]);
    resolved_with(name, host, port, description, attributes)
}

/// A resolved instance carrying the web marker
pub fn marked(name: &str, host: &str, port: u16, description: &str) -> BrowseEvent {
    let attributes = HashMap::from([
        (TXT_DESCRIPTION.to_string(), description.to_string()),
        (TXT_MARKER.to_string(), TXT_MARKER_VALUE.to_string()),
    ]);
    resolved_with(name, host, port, description, attributes)
}

fn resolved_with(
    name: &str,
    host: &str,
    port: u16,
    description: &str,
    attributes: HashMap<String, String>,
) -> BrowseEvent {
    BrowseEvent::Resolved {
        fullname: fullname(name),
        resolved: Ok(ResolvedInstance {
            record: ServiceRecord::new(name, host, port, description),
            attributes,
        }),
    }
}

pub fn malformed(name: &str) -> BrowseEvent {
    BrowseEvent::Resolved {
        fullname: fullname(name),
        resolved: Err(ResolveError::MalformedAttribute {
            key: TXT_DESCRIPTION.to_string(),
        }),
    }
}

/// The browse-level "new instance" event that precedes its resolve
pub fn found(name: &str) -> BrowseEvent {
    BrowseEvent::Found { fullname: fullname(name) }
}

pub fn removed(name: &str) -> BrowseEvent {
    BrowseEvent::Removed { fullname: fullname(name) }
}

/// Host name the fakes publish under
pub const LOCAL_HOST: &str = "testhost.local.";

#[derive(Default)]
struct State {
    scripts: HashMap<String, Vec<(Duration, BrowseEvent)>>,
    emitters: HashMap<String, flume::Sender<BrowseEvent>>,
    stopped: Vec<String>,
    /// Services published through this fake, per service type
    published: HashMap<String, Vec<Announcement>>,
}

fn announced_events(announcement: &Announcement) -> Vec<BrowseEvent> {
    let fullname = format!("{}.{}", announcement.name, announcement.service_type);
    let description = announcement
        .attributes
        .get(TXT_DESCRIPTION)
        .cloned()
        .unwrap_or_default();
    vec![
        BrowseEvent::Found { fullname: fullname.clone() },
        BrowseEvent::Resolved {
            fullname,
            resolved: Ok(ResolvedInstance {
                record: ServiceRecord::new(
                    announcement.name.clone(),
                    LOCAL_HOST.trim_end_matches('.'),
                    announcement.port,
                    description,
                ),
                attributes: announcement.attributes.clone(),
            }),
        },
    ]
}

/// A [`Browser`] whose events are pushed by the test, either by hand through
/// [`FakeBrowser::emitter`] or on a timed script started at browse time.
///
/// It is also a [`Publisher`]: whatever is published shows up to browses of
/// the same type, like services on a shared network segment.
#[derive(Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<State>>,
    delivered: Arc<AtomicUsize>,
    unavailable: bool,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A browser that can never start, like a host without multicast
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            unavailable: true,
            ..Self::default()
        })
    }

    /// Each event is sent after waiting its delay, counted from the previous event
    pub fn scripted(service_type: &str, script: Vec<(Duration, BrowseEvent)>) -> Arc<Self> {
        let browser = Self::default();
        browser
            .state
            .lock()
            .unwrap()
            .scripts
            .insert(service_type.to_string(), script);
        Arc::new(browser)
    }

    pub fn client(self: &Arc<Self>) -> DiscoveryClient {
        DiscoveryClient::new(self.clone())
    }

    pub fn emitter(&self, service_type: &str) -> Option<flume::Sender<BrowseEvent>> {
        self.state.lock().unwrap().emitters.get(service_type).cloned()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// Scripted events actually handed to a subscriber
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl Browser for FakeBrowser {
    fn browse(&self, service_type: &str) -> Result<flume::Receiver<BrowseEvent>, DiscoveryError> {
        if self.unavailable {
            return Err(DiscoveryError::TransportUnavailable("no multicast interface".to_string()));
        }

        let (tx, rx) = flume::unbounded();
        let script = {
            let mut state = self.state.lock().unwrap();
            state.emitters.insert(service_type.to_string(), tx.clone());
            for announcement in state.published.get(service_type).into_iter().flatten() {
                for event in announced_events(announcement) {
                    let _ = tx.send(event);
                }
            }
            state.scripts.remove(service_type).unwrap_or_default()
        };

        if !script.is_empty() {
            let state = self.state.clone();
            let delivered = self.delivered.clone();
            let service_type = service_type.to_string();
            tokio::spawn(async move {
                for (delay, event) in script {
                    tokio::time::sleep(delay).await;
                    if state.lock().unwrap().stopped.contains(&service_type) {
                        break;
                    }
                    if tx.send(event).is_err() {
                        break;
                    }
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        Ok(rx)
    }

    fn stop_browse(&self, service_type: &str) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock().unwrap();
        state.emitters.remove(service_type);
        state.stopped.push(service_type.to_string());
        Ok(())
    }
}

impl Publisher for FakeBrowser {
    fn publish(&self, announcement: &Announcement) -> Result<String, AnnounceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(emitter) = state.emitters.get(&announcement.service_type) {
            for event in announced_events(announcement) {
                let _ = emitter.send(event);
            }
        }
        state
            .published
            .entry(announcement.service_type.clone())
            .or_default()
            .push(announcement.clone());
        Ok(format!("{}.{}", announcement.name, announcement.service_type))
    }

    fn withdraw(&self, fullname: &str) -> Result<(), AnnounceError> {
        let mut state = self.state.lock().unwrap();
        for announcements in state.published.values_mut() {
            announcements.retain(|a| format!("{}.{}", a.name, a.service_type) != fullname);
        }
        Ok(())
    }
}

/// A [`Publisher`] that records what it was asked to publish
#[derive(Default)]
pub struct FakePublisher {
    published: Mutex<Vec<Announcement>>,
    withdrawn: Mutex<Vec<String>>,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<Announcement> {
        self.published.lock().unwrap().clone()
    }

    pub fn withdrawn(&self) -> Vec<String> {
        self.withdrawn.lock().unwrap().clone()
    }
}

impl Publisher for FakePublisher {
    fn publish(&self, announcement: &Announcement) -> Result<String, AnnounceError> {
        self.published.lock().unwrap().push(announcement.clone());
        Ok(format!("{}.{}", announcement.name, announcement.service_type))
    }

    fn withdraw(&self, fullname: &str) -> Result<(), AnnounceError> {
        self.withdrawn.lock().unwrap().push(fullname.to_string());
        Ok(())
    }
}
