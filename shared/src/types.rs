use std::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use crate::protocol::UNNAMED_DESCRIPTION_PREFIX;

/// A repository endpoint discovered on the network.
///
/// Two records are the same service when `name`, `host` and `port` match.
/// The description is carried along but ignored for identity, so a repository
/// whose description changes is still one member of any set it lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    name: String,
    host: String,
    port: u16,
    description: String,
}

impl ServiceRecord {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            description: description.into(),
        }
    }

    /// Advertised instance name, e.g. "alice-gitjour"
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved target host, e.g. "laptop.local"
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The description, unless it is empty or git's "Unnamed repository" placeholder
    pub fn display_description(&self) -> Option<&str> {
        let description = self.description.trim();
        if description.is_empty() || description.starts_with(UNNAMED_DESCRIPTION_PREFIX) {
            None
        } else {
            Some(description)
        }
    }

    /// URL for the git protocol daemon serving this record
    pub fn git_url(&self) -> String {
        format!("git://{}:{}/", self.host, self.port)
    }

    /// URL for the web view serving this record
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl PartialEq for ServiceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.host == other.host && self.port == other.port
    }
}

impl Eq for ServiceRecord {}

impl Hash for ServiceRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.host.hash(state);
        self.port.hash(state);
    }
}
