/// mDNS service type for repositories served by `git daemon`
pub const GIT_SERVICE_TYPE: &str = "_git._tcp.local.";

/// mDNS service type for repositories served by `git instaweb`
pub const WEB_SERVICE_TYPE: &str = "_http._tcp.local.";

/// TXT record keys
pub const TXT_DESCRIPTION: &str = "description";
/// Marks our web endpoints so unrelated HTTP services can be told apart
pub const TXT_MARKER: &str = "gitjour";
pub const TXT_MARKER_VALUE: &str = "true";

/// Announced when a repository's description file can't be read
pub const FALLBACK_DESCRIPTION: &str = "a git project";

/// git's placeholder text for repositories nobody described
pub const UNNAMED_DESCRIPTION_PREFIX: &str = "Unnamed repository";

pub const DEFAULT_GIT_PORT: u16 = 9418;
pub const DEFAULT_WEB_PORT: u16 = 1234;
pub const DEFAULT_BROWSE_PORT: u16 = 9850;
