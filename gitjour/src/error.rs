use thiserror::Error;

/// Failures that stop a discovery operation outright.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("service discovery could not be started: {0}")]
    TransportUnavailable(String),
}

/// Why a single instance could not be turned into a record. These never leave
/// the discovery client; the instance is skipped and browsing carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("instance name {fullname:?} does not belong to {service_type:?}")]
    MalformedName { fullname: String, service_type: String },
    #[error("instance {0:?} resolved without a target host")]
    MissingHost(String),
    #[error("text attribute {key:?} is not valid UTF-8")]
    MalformedAttribute { key: String },
}

#[derive(Debug, Error)]
pub enum AnnounceError {
    #[error("'{name}' is already registered as {service_type} on port {port}")]
    RegistrationConflict {
        name: String,
        service_type: String,
        port: u16,
    },
    #[error("invalid service registration: {0}")]
    Invalid(String),
    #[error("service announcement could not be started: {0}")]
    TransportUnavailable(String),
}
