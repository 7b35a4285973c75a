use std::collections::HashMap;
use std::thread;
use mdns_sd::{DaemonEvent, IfKind, ServiceDaemon, ServiceEvent, ServiceInfo};
use shared::protocol::TXT_DESCRIPTION;
use shared::types::ServiceRecord;
use crate::error::{AnnounceError, DiscoveryError, ResolveError};
use crate::mdns::advertise::{Announcement, Publisher};
use crate::mdns::browser::{BrowseEvent, Browser, ResolvedInstance};

/// Browser and publisher backed by one `mdns-sd` daemon
#[derive(Clone)]
pub struct MdnsBackend {
    daemon: ServiceDaemon,
    host_name: String,
}

impl MdnsBackend {
    /// Start the mDNS daemon, optionally restricted to one network interface
    pub fn new(interface: Option<&str>) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::TransportUnavailable(e.to_string()))?;

        if let Some(interface) = interface {
            daemon
                .disable_interface(IfKind::All)
                .map_err(|e| DiscoveryError::TransportUnavailable(e.to_string()))?;
            daemon.enable_interface(interface).map_err(|e| {
                DiscoveryError::TransportUnavailable(format!("interface {}: {}", interface, e))
            })?;
        }

        spawn_monitor(&daemon);

        Ok(Self {
            daemon,
            host_name: local_host_name(),
        })
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::error!("Failed to shutdown mDNS daemon: {}", e);
        }
    }
}

impl Browser for MdnsBackend {
    fn browse(&self, service_type: &str) -> Result<flume::Receiver<BrowseEvent>, DiscoveryError> {
        let events = self.daemon.browse(service_type).map_err(|e| {
            DiscoveryError::TransportUnavailable(format!("failed to browse {}: {}", service_type, e))
        })?;

        let (tx, rx) = flume::unbounded();
        let service_type = service_type.to_string();
        thread::Builder::new()
            .name(format!("browse {}", service_type))
            .spawn(move || forward_events(&service_type, events, tx))
            .map_err(|e| DiscoveryError::TransportUnavailable(e.to_string()))?;

        Ok(rx)
    }

    fn stop_browse(&self, service_type: &str) -> Result<(), DiscoveryError> {
        self.daemon
            .stop_browse(service_type)
            .map_err(|e| DiscoveryError::TransportUnavailable(e.to_string()))
    }
}

impl Publisher for MdnsBackend {
    fn publish(&self, announcement: &Announcement) -> Result<String, AnnounceError> {
        let service_info = ServiceInfo::new(
            &announcement.service_type,
            &announcement.name,
            &self.host_name,
            (),
            announcement.port,
            announcement.attributes.clone(),
        )
        .map_err(|e| AnnounceError::Invalid(e.to_string()))?
        .enable_addr_auto();

        let fullname = service_info.get_fullname().to_string();
        self.daemon
            .register(service_info)
            .map_err(|e| AnnounceError::TransportUnavailable(e.to_string()))?;

        Ok(fullname)
    }

    fn withdraw(&self, fullname: &str) -> Result<(), AnnounceError> {
        self.daemon
            .unregister(fullname)
            .map_err(|e| AnnounceError::TransportUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Relay daemon events until the browse is stopped or nobody is listening
fn forward_events(
    service_type: &str,
    events: flume::Receiver<ServiceEvent>,
    tx: flume::Sender<BrowseEvent>,
) {
    while let Ok(event) = events.recv() {
        let forwarded = match event {
            ServiceEvent::ServiceResolved(info) => BrowseEvent::Resolved {
                fullname: info.get_fullname().to_string(),
                resolved: resolve_instance(&info),
            },
            ServiceEvent::ServiceFound(_ty, fullname) => BrowseEvent::Found { fullname },
            ServiceEvent::ServiceRemoved(_ty, fullname) => BrowseEvent::Removed { fullname },
            ServiceEvent::SearchStopped(_) => break,
            _ => continue,
        };

        if tx.send(forwarded).is_err() {
            break;
        }
    }

    tracing::debug!("Stopped relaying {} events", service_type);
}

/// Build a record from a resolved `ServiceInfo`.
///
/// Only the description must be readable text; other attributes that aren't
/// valid UTF-8 are left out of the attribute map.
pub fn resolve_instance(info: &ServiceInfo) -> Result<ResolvedInstance, ResolveError> {
    let fullname = info.get_fullname();
    let service_type = info.get_type();

    let name = fullname
        .strip_suffix(service_type)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ResolveError::MalformedName {
            fullname: fullname.to_string(),
            service_type: service_type.to_string(),
        })?;

    let host = info.get_hostname().trim_end_matches('.');
    if host.is_empty() {
        return Err(ResolveError::MissingHost(fullname.to_string()));
    }

    let mut attributes = HashMap::new();
    for property in info.get_properties().iter() {
        let value = match property.val() {
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(value) => value.to_string(),
                Err(_) if property.key() == TXT_DESCRIPTION => {
                    return Err(ResolveError::MalformedAttribute {
                        key: property.key().to_string(),
                    });
                }
                Err(_) => continue,
            },
            None => String::new(),
        };
        attributes.insert(property.key().to_string(), value);
    }

    let description = attributes.get(TXT_DESCRIPTION).cloned().unwrap_or_default();

    Ok(ResolvedInstance {
        record: ServiceRecord::new(name, host, info.get_port(), description),
        attributes,
    })
}

fn local_host_name() -> String {
    let host = match hostname::get() {
        Ok(host) => host.to_string_lossy().to_string(),
        Err(e) => {
            tracing::warn!("Failed to get system hostname: {}", e);
            "localhost".to_string()
        }
    };

    let host = host.trim_end_matches('.');
    let host = host.strip_suffix(".local").unwrap_or(host);
    format!("{}.local.", host)
}

/// Log the daemon's own confirmations and errors
fn spawn_monitor(daemon: &ServiceDaemon) {
    let events = match daemon.monitor() {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("Failed to monitor mDNS daemon: {}", e);
            return;
        }
    };

    thread::spawn(move || {
        while let Ok(event) = events.recv() {
            match event {
                DaemonEvent::Announce(fullname, addresses) => {
                    tracing::info!("Registered {} at {}. Starting service.", fullname, addresses);
                }
                DaemonEvent::Error(e) => tracing::warn!("mDNS daemon error: {}", e),
                _ => {}
            }
        }
    });
}
