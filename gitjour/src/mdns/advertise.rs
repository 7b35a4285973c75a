use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use shared::protocol::{TXT_DESCRIPTION, TXT_MARKER, TXT_MARKER_VALUE};
use crate::error::AnnounceError;
use crate::mdns::browser::DiscoveryClient;
use crate::snapshot;

/// The registration side of the discovery protocol
pub trait Publisher: Send + Sync {
    /// Register the service, returning its fully qualified instance name
    fn publish(&self, announcement: &Announcement) -> Result<String, AnnounceError>;
    fn withdraw(&self, fullname: &str) -> Result<(), AnnounceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub name: String,
    pub service_type: String,
    pub port: u16,
    pub attributes: HashMap<String, String>,
}

/// Proof that a service was handed to the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    fullname: String,
    name: String,
    service_type: String,
    port: u16,
}

impl Registration {
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// TXT attributes for a repository announcement. Web endpoints also carry
/// the marker that sets them apart from other HTTP services.
pub fn repository_attributes(description: &str, web: bool) -> HashMap<String, String> {
    let mut attributes = HashMap::from([(TXT_DESCRIPTION.to_string(), description.to_string())]);
    if web {
        attributes.insert(TXT_MARKER.to_string(), TXT_MARKER_VALUE.to_string());
    }
    attributes
}

/// Registers local endpoints, refusing a name and type that is already taken:
/// by this announcer's own active registrations, and when
/// [`Announcer::with_conflict_check`] is set, by anything already advertised
/// on the network.
pub struct Announcer {
    publisher: Arc<dyn Publisher>,
    active: Mutex<HashMap<(String, String), Registration>>,
    network: Option<NetworkNames>,
}

/// Instance names already advertised on the network, gathered once per
/// service type the first time that type is announced
struct NetworkNames {
    client: DiscoveryClient,
    window: Duration,
    seen: tokio::sync::Mutex<HashMap<String, HashSet<String>>>,
}

impl NetworkNames {
    async fn is_taken(&self, name: &str, service_type: &str) -> Result<bool, AnnounceError> {
        let mut seen = self.seen.lock().await;

        if !seen.contains_key(service_type) {
            let gathered = snapshot::gather(&self.client, service_type, self.window)
                .await
                .map_err(|e| AnnounceError::TransportUnavailable(e.to_string()))?;
            let names = gathered.iter().map(|record| record.name().to_string()).collect();
            seen.insert(service_type.to_string(), names);
        }

        Ok(seen
            .get(service_type)
            .map_or(false, |names| names.contains(name)))
    }
}

fn conflict(name: &str, service_type: &str, port: u16) -> AnnounceError {
    AnnounceError::RegistrationConflict {
        name: name.to_string(),
        service_type: service_type.to_string(),
        port,
    }
}

impl Announcer {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            active: Mutex::new(HashMap::new()),
            network: None,
        }
    }

    /// Before the first announcement of each service type, browse it for
    /// `window` and refuse names other hosts or processes already advertise.
    pub fn with_conflict_check(mut self, client: DiscoveryClient, window: Duration) -> Self {
        self.network = Some(NetworkNames {
            client,
            window,
            seen: tokio::sync::Mutex::new(HashMap::new()),
        });
        self
    }

    pub async fn announce(
        &self,
        name: &str,
        service_type: &str,
        port: u16,
        attributes: HashMap<String, String>,
    ) -> Result<Registration, AnnounceError> {
        let key = (name.to_string(), service_type.to_string());

        if self.lock_active().contains_key(&key) {
            return Err(conflict(name, service_type, port));
        }

        if let Some(network) = &self.network {
            if network.is_taken(name, service_type).await? {
                tracing::warn!("{} is already advertised as {}", name, service_type);
                return Err(conflict(name, service_type, port));
            }
        }

        let mut active = self.lock_active();
        if active.contains_key(&key) {
            return Err(conflict(name, service_type, port));
        }

        let announcement = Announcement {
            name: name.to_string(),
            service_type: service_type.to_string(),
            port,
            attributes,
        };
        let fullname = self.publisher.publish(&announcement)?;

        tracing::info!("Registering {} as {} on port {}", name, service_type, port);

        let registration = Registration {
            fullname,
            name: announcement.name,
            service_type: announcement.service_type,
            port,
        };
        active.insert(key, registration.clone());

        Ok(registration)
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<(String, String), Registration>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn withdraw(&self, registration: &Registration) -> Result<(), AnnounceError> {
        let key = (registration.name.clone(), registration.service_type.clone());
        self.lock_active().remove(&key);

        self.publisher.withdraw(&registration.fullname)?;
        tracing::info!("Unregistered {}", registration.fullname);
        Ok(())
    }

    /// Withdraw every active registration, logging the ones that fail
    pub fn withdraw_all(&self) {
        let registrations: Vec<Registration> = self
            .lock_active()
            .drain()
            .map(|(_, registration)| registration)
            .collect();

        for registration in registrations {
            match self.publisher.withdraw(&registration.fullname) {
                Ok(()) => tracing::info!("Unregistered {}", registration.fullname),
                Err(e) => tracing::error!("Failed to unregister {}: {}", registration.fullname, e),
            }
        }
    }

    pub fn active(&self) -> Vec<Registration> {
        self.lock_active()
            .values()
            .cloned()
            .collect()
    }
}
