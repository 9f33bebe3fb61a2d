//! Feature configuration shared by every host. Loading (file, env) is the host's job.

use serde::{Deserialize, Serialize};

/// Settings for one share feature instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name advertised to nearby devices (default "NearShare").
    #[serde(default = "default_endpoint_name")]
    pub endpoint_name: String,
    /// Service id both peers must agree on (default "org.nearshare.pages").
    #[serde(default = "default_service_id")]
    pub service_id: String,
    /// Ask the user to confirm the pairing token before connecting (default true).
    #[serde(default = "default_authentication")]
    pub authentication: bool,
    /// How long to wait for the browser extension to serialize a page (default 5000 ms).
    #[serde(default = "default_page_request_timeout_ms")]
    pub page_request_timeout_ms: u64,
    /// Log filter used when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_endpoint_name() -> String {
    "NearShare".to_string()
}
fn default_service_id() -> String {
    "org.nearshare.pages".to_string()
}
fn default_authentication() -> bool {
    true
}
fn default_page_request_timeout_ms() -> u64 {
    5000
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_name: default_endpoint_name(),
            service_id: default_service_id(),
            authentication: default_authentication(),
            page_request_timeout_ms: default_page_request_timeout_ms(),
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn page_request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.page_request_timeout_ms)
    }
}
